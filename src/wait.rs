//! Blocking waiters for driving a connection without an event loop.
//!
//! [`Connection::poll`][crate::Connection::poll] never blocks; something
//! has to wait for the socket to become ready between polls. [`Wait`] is
//! that seam: [`drive`] loops poll-wait-poll with the [`PollWait`]
//! waiter until the operation in flight completes. Event loops and
//! async runtimes skip this module and wait on
//! [`file_descriptor`][crate::Connection::file_descriptor] themselves.
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use crate::{Connection, PollState, Result};

/// Wait for readiness on a connection's file descriptor.
pub trait Wait {
    /// Block until `fd` is ready for `state`.
    ///
    /// Called with [`PollState::Read`] or [`PollState::Write`]; waiting
    /// for [`PollState::Ok`] returns immediately.
    fn wait(&mut self, fd: RawFd, state: PollState) -> io::Result<()>;
}

/// A waiter built on `poll(2)`, with an optional timeout.
#[derive(Debug, Default)]
pub struct PollWait {
    timeout: Option<Duration>,
}

impl PollWait {
    /// Wait indefinitely.
    pub fn new() -> PollWait {
        PollWait { timeout: None }
    }

    /// Fail a single wait with [`io::ErrorKind::TimedOut`] after
    /// `timeout`.
    pub fn with_timeout(timeout: Duration) -> PollWait {
        PollWait { timeout: Some(timeout) }
    }
}

impl Wait for PollWait {
    fn wait(&mut self, fd: RawFd, state: PollState) -> io::Result<()> {
        let events = match state {
            PollState::Read => libc::POLLIN,
            PollState::Write => libc::POLLOUT,
            PollState::Ok => return Ok(()),
        };
        let mut pollfd = libc::pollfd { fd, events, revents: 0 };
        let timeout = match self.timeout {
            Some(timeout) => timeout.as_millis().min(i32::MAX as u128) as i32,
            None => -1,
        };

        loop {
            match unsafe { libc::poll(&mut pollfd, 1, timeout) } {
                -1 => {
                    let err = io::Error::last_os_error();
                    if err.kind() == io::ErrorKind::Interrupted {
                        continue;
                    }
                    return Err(err);
                },
                0 => return Err(io::ErrorKind::TimedOut.into()),
                _ => return Ok(()),
            }
        }
    }
}

/// Drive the connection's current operation to completion, blocking with
/// [`PollWait`].
pub fn drive(conn: &mut Connection) -> Result<()> {
    drive_with(conn, &mut PollWait::new())
}

/// Drive the connection's current operation to completion with a custom
/// waiter.
pub fn drive_with(conn: &mut Connection, waiter: &mut impl Wait) -> Result<()> {
    loop {
        match conn.poll()? {
            PollState::Ok => return Ok(()),
            state => waiter
                .wait(conn.file_descriptor(), state)
                .map_err(|e| crate::Error::from(e).context("waiting for socket readiness"))?,
        }
    }
}
