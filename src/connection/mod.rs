//! Postgres connection.
//!
//! [`Connection`] pairs a non-blocking socket with the protocol
//! [`Session`]: [`poll`][Connection::poll] flushes queued frontend
//! traffic, pulls in whatever the server has sent, advances the session
//! and reports what to wait for next. It never blocks; callers decide
//! how to wait on the [`file_descriptor`][Connection::file_descriptor],
//! whether with [`wait::drive`][crate::wait::drive], an event loop, or
//! an async reactor.
use std::io;
use std::sync::Arc;

use crate::{
    Result,
    protocol::Oid,
    row::{Column, Row},
    notify::Notification,
    sql::{self, Fragments},
    types::{ToSql, TypeRegistry},
};

mod config;
mod session;
mod socket;

pub use config::Config;

use session::{Phase, Session};
use socket::Socket;

/// What a [`Connection`] is waiting for.
///
/// Returned by [`Connection::poll`]; the caller is expected to wait for
/// the reported readiness on the connection's file descriptor before
/// polling again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// The current operation completed; results are available.
    Ok,
    /// Waiting for the socket to become readable.
    Read,
    /// Waiting for the socket to become writable.
    Write,
}

/// The connection has entered the terminal error state; every subsequent
/// operation fails with this.
#[derive(Debug, thiserror::Error)]
#[error("connection is closed")]
pub struct ConnectionClosed;

/// A query was submitted while another is still in flight.
///
/// The outstanding operation is unaffected and can be driven to
/// completion.
#[derive(Debug, thiserror::Error)]
#[error("a query is already in progress")]
pub struct ConcurrentQuery;

/// The server requested an authentication flow this library does not
/// speak.
#[derive(Debug, thiserror::Error)]
#[error("unsupported authentication method: {method}")]
pub struct UnsupportedAuth {
    pub method: &'static str,
}

/// A non-blocking postgres connection.
#[derive(Debug)]
pub struct Connection {
    socket: Socket,
    session: Session,
    registry: Arc<TypeRegistry>,
}

impl Connection {
    /// Open a connection using the process-wide
    /// [`TypeRegistry::global`].
    ///
    /// Establishing the TCP stream is the one blocking step; the
    /// protocol handshake runs through [`poll`][Connection::poll] and
    /// completes when it first returns [`PollState::Ok`].
    pub fn connect(config: &Config) -> Result<Connection> {
        Self::connect_with(config, Arc::clone(TypeRegistry::global()))
    }

    /// Open a connection from the `PG*` environment variables.
    pub fn connect_env() -> Result<Connection> {
        Self::connect(&Config::from_env())
    }

    /// Open a connection with an explicit type registry.
    pub fn connect_with(config: &Config, registry: Arc<TypeRegistry>) -> Result<Connection> {
        let socket = Socket::connect(&config.host, config.port)
            .map_err(|e| crate::Error::from(e)
                .context(format!("connecting to {}:{}", config.host, config.port)))?;
        let session = Session::new(config, Arc::clone(&registry));
        Ok(Connection { socket, session, registry })
    }

    /// Advance the connection as far as the socket allows.
    ///
    /// Flushes queued frontend traffic, consumes everything the server
    /// has sent and reports what to wait for. [`PollState::Ok`] means
    /// the operation in flight completed: the handshake finished, or a
    /// query's results are ready via [`take_rows`][Connection::take_rows].
    ///
    /// Errors carried over from the response stream (a server error or a
    /// failed cast) leave the connection usable; transport and protocol
    /// errors are terminal.
    pub fn poll(&mut self) -> Result<PollState> {
        if self.session.phase() == Phase::Error {
            return Err(ConnectionClosed.into());
        }

        loop {
            let write_blocked = self.flush()?;
            let eof = self.fill()?;

            let state = self.session.step()?;

            // whatever was buffered ahead of the hangup has been
            // consumed; needing more traffic now is an error
            if eof && state != PollState::Ok {
                self.session.mark_broken();
                let eof = io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "server closed the connection",
                );
                return Err(crate::Error::from(eof).context("reading from server"));
            }

            // the session may queue fresh traffic while stepping, an
            // authentication reply for instance; push it out before
            // telling the caller to wait
            if state == PollState::Write && !write_blocked && !self.session.write_buf.is_empty() {
                continue;
            }
            return Ok(state);
        }
    }

    /// Write until the buffer drains or the socket blocks.
    ///
    /// Returns whether the socket blocked with traffic still pending.
    fn flush(&mut self) -> Result<bool> {
        while !self.session.write_buf.is_empty() {
            match self.socket.write_from(&mut self.session.write_buf) {
                Ok(Some(_)) => { },
                Ok(None) => return Ok(true),
                Err(e) => {
                    self.session.mark_broken();
                    return Err(crate::Error::from(e).context("writing to server"));
                },
            }
        }
        Ok(false)
    }

    /// Read until the socket blocks; reports whether the server hung up.
    fn fill(&mut self) -> Result<bool> {
        loop {
            match self.socket.read_into(&mut self.session.read_buf) {
                Ok(Some(0)) => return Ok(true),
                Ok(Some(_)) => { },
                Ok(None) => return Ok(false),
                Err(e) => {
                    self.session.mark_broken();
                    return Err(crate::Error::from(e).context("reading from server"));
                },
            }
        }
    }

    /// Submit a query with positional `$1`..`$n` parameters.
    ///
    /// Each parameter is adapted into a SQL literal fragment through the
    /// connection's [`TypeRegistry`] and spliced over its placeholder;
    /// the query then travels as a single simple-protocol message. Drive
    /// it with [`poll`][Connection::poll] until [`PollState::Ok`].
    ///
    /// Fails with [`ConcurrentQuery`] while another query is in flight,
    /// leaving that query untouched.
    pub fn execute(&mut self, sql: &str, params: &[&dyn ToSql]) -> Result<()> {
        let mut fragments = Vec::with_capacity(params.len());
        for param in params {
            fragments.push(self.registry.encode(*param)?);
        }
        let sql = sql::interpolate(sql, &Fragments::Positional(&fragments))?;
        self.session.submit(&sql)
    }

    /// Submit a query with named `:name` parameters.
    ///
    /// Identical to [`execute`][Connection::execute] apart from the
    /// placeholder style; `::` casts are left alone.
    pub fn execute_named(&mut self, sql: &str, params: &[(&str, &dyn ToSql)]) -> Result<()> {
        let mut fragments = Vec::with_capacity(params.len());
        for (name, param) in params {
            fragments.push((*name, self.registry.encode(*param)?));
        }
        let sql = sql::interpolate(sql, &Fragments::Named(&fragments))?;
        self.session.submit(&sql)
    }

    /// Take the rows accumulated by the last completed query.
    pub fn take_rows(&mut self) -> Vec<Row> {
        self.session.take_rows()
    }

    /// The command tag of the last completed query, `SELECT 2` for
    /// instance.
    pub fn command_tag(&self) -> Option<&str> {
        self.session.command_tag()
    }

    /// Column metadata of the last result, `None` before any
    /// row-returning query.
    pub fn columns(&self) -> Option<&[Column]> {
        self.session.columns()
    }

    /// The oid of a column in the last result.
    ///
    /// Useful for discovering oids to register casters for: select a
    /// value of the type in question and read the oid off the metadata.
    pub fn result_oid(&self, name: &str) -> Option<Oid> {
        self.session
            .columns()?
            .iter()
            .find(|c| c.name() == name)
            .map(Column::oid)
    }

    /// Pop the oldest buffered notification, `None` when the queue is
    /// empty. Never blocks.
    ///
    /// Notifications accumulate whenever [`poll`][Connection::poll]
    /// consumes server traffic, including mid-query.
    pub fn pop_notification(&mut self) -> Option<Notification> {
        self.session.pop_notification()
    }

    /// Number of buffered notifications.
    pub fn notification_len(&self) -> usize {
        self.session.notification_len()
    }

    /// The server-reported process ID of the backend.
    pub fn backend_pid(&self) -> Option<u32> {
        self.session.backend_key().map(|key| key.process_id)
    }

    /// A run-time parameter reported by the server, `server_version` for
    /// instance.
    pub fn server_param(&self, name: &str) -> Option<&str> {
        self.session.server_param(name)
    }

    /// The backend transaction status from the last ReadyForQuery:
    /// `b'I'` idle, `b'T'` in a transaction, `b'E'` in a failed
    /// transaction.
    pub fn transaction_status(&self) -> u8 {
        self.session.transaction_status()
    }

    /// Whether the connection has entered the terminal error state.
    pub fn is_closed(&self) -> bool {
        self.session.phase() == Phase::Error
    }

    /// The raw file descriptor to wait for readiness on.
    ///
    /// The caller must not read from or write to the descriptor, only
    /// wait on it.
    #[cfg(unix)]
    pub fn file_descriptor(&self) -> std::os::fd::RawFd {
        self.socket.as_raw_fd()
    }

    /// The raw socket handle to wait for readiness on.
    #[cfg(windows)]
    pub fn raw_socket(&self) -> std::os::windows::io::RawSocket {
        self.socket.as_raw_socket()
    }

    /// Close the connection.
    ///
    /// Sends the Terminate message best-effort and shuts the socket
    /// down. The connection is unusable afterwards.
    pub fn close(&mut self) {
        if self.session.phase() != Phase::Error {
            self.session.terminate();
            // best effort, the socket may not be writable
            let _ = self.socket.write_from(&mut self.session.write_buf);
        }
        self.session.mark_broken();
        self.socket.shutdown();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
