//! Non-blocking socket shuttling.
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};

use bytes::{Buf, BytesMut};

const READ_CHUNK: usize = 4096;

/// A non-blocking TCP stream moving bytes in and out of the session
/// buffers.
///
/// Every operation is issued non-blocking; `WouldBlock` is reported as
/// `Ok(None)` so the caller can turn it into a
/// [`PollState`][crate::PollState] instead of an error.
#[derive(Debug)]
pub(crate) struct Socket {
    inner: TcpStream,
}

impl Socket {
    /// Establish the TCP stream and switch it to non-blocking mode.
    ///
    /// This is the one blocking step of a connection's lifetime; the
    /// protocol handshake itself runs through the poll loop.
    pub(crate) fn connect(host: &str, port: u16) -> io::Result<Socket> {
        let inner = TcpStream::connect((host, port))?;
        inner.set_nodelay(true)?;
        inner.set_nonblocking(true)?;
        Ok(Socket { inner })
    }

    /// Read once into `buf`.
    ///
    /// `Ok(None)` means the socket is not readable yet; `Ok(Some(0))` is
    /// end of stream.
    pub(crate) fn read_into(&mut self, buf: &mut BytesMut) -> io::Result<Option<usize>> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            return match self.inner.read(&mut chunk) {
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    Ok(Some(n))
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => Err(e),
            };
        }
    }

    /// Write once from `buf`, consuming the written prefix.
    ///
    /// `Ok(None)` means the socket is not writable yet.
    pub(crate) fn write_from(&mut self, buf: &mut BytesMut) -> io::Result<Option<usize>> {
        loop {
            return match self.inner.write(buf.chunk()) {
                Ok(0) => Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    buf.advance(n);
                    Ok(Some(n))
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => Err(e),
            };
        }
    }

    pub(crate) fn shutdown(&mut self) {
        let _ = self.inner.shutdown(Shutdown::Both);
    }

    #[cfg(unix)]
    pub(crate) fn as_raw_fd(&self) -> std::os::fd::RawFd {
        std::os::fd::AsRawFd::as_raw_fd(&self.inner)
    }

    #[cfg(windows)]
    pub(crate) fn as_raw_socket(&self) -> std::os::windows::io::RawSocket {
        std::os::windows::io::AsRawSocket::as_raw_socket(&self.inner)
    }
}
