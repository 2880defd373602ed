//! Tokio integration.
//!
//! The connection itself stays synchronous and non-blocking; this module
//! only provides the waiting. [`drive`] registers the connection's file
//! descriptor with the tokio reactor and awaits readiness between polls,
//! so a query completes without blocking the executor:
//!
//! ```no_run
//! # async fn demo() -> pgpoll::Result<()> {
//! let mut conn = pgpoll::Connection::connect_env()?;
//! pgpoll::rt::drive(&mut conn).await?;
//!
//! conn.execute("SELECT $1", &[&42i32])?;
//! pgpoll::rt::drive(&mut conn).await?;
//! let rows = conn.take_rows();
//! # Ok(())
//! # }
//! ```
//!
//! To share a connection across tasks, wrap it in
//! `Arc<tokio::sync::Mutex<Connection>>`: the mutex hands out the
//! connection to one task at a time while its `.lock().await` yields to
//! the scheduler, and [`ConcurrentQuery`][crate::ConcurrentQuery] guards
//! against interleaving submissions if a guard is dropped mid-query.
use std::os::fd::{AsRawFd, RawFd};

use tokio::io::{Interest, unix::AsyncFd};

use crate::{Connection, PollState, Result};

/// A borrowed descriptor for reactor registration; the socket stays
/// owned by the connection.
struct Fd(RawFd);

impl AsRawFd for Fd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

/// Drive the connection's current operation to completion, awaiting
/// socket readiness on the tokio reactor.
pub async fn drive(conn: &mut Connection) -> Result<()> {
    loop {
        match conn.poll()? {
            PollState::Ok => return Ok(()),
            state => {
                let interest = match state {
                    PollState::Write => Interest::WRITABLE,
                    _ => Interest::READABLE,
                };
                wait(conn.file_descriptor(), interest).await?;
            },
        }
    }
}

async fn wait(fd: RawFd, interest: Interest) -> Result<()> {
    // registered per wait; the descriptor leaves the reactor before the
    // connection can be moved or dropped
    let fd = AsyncFd::with_interest(Fd(fd), interest)
        .map_err(|e| crate::Error::from(e).context("registering socket with the reactor"))?;
    let mut guard = fd
        .ready(interest)
        .await
        .map_err(|e| crate::Error::from(e).context("waiting for socket readiness"))?;
    guard.clear_ready();
    Ok(())
}
