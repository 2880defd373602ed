//! Non-blocking Postgres Client
//!
//! Everything is driven by a poll loop: [`Connection::poll`] advances
//! the connection as far as the socket allows and reports whether to
//! wait for the socket to become readable or writable before polling
//! again. Waiting is the caller's business, on
//! [`Connection::file_descriptor`]; [`wait::drive`] blocks with
//! `poll(2)` for callers without an event loop, and the `tokio` feature
//! adds [`rt::drive`] for awaiting readiness on the tokio reactor.
//!
//! # Examples
//!
//! Query with positional parameters:
//!
//! ```no_run
//! use pgpoll::{Config, Connection, PgValue, wait};
//!
//! # fn app() -> pgpoll::Result<()> {
//! let config = Config::new().user("postgres").password("secret");
//! let mut conn = Connection::connect(&config)?;
//! wait::drive(&mut conn)?;
//!
//! conn.execute("SELECT 420, $1", &[&"Foo"])?;
//! wait::drive(&mut conn)?;
//!
//! let rows = conn.take_rows();
//! assert_eq!(rows[0].get(0), Some(&PgValue::Int(420)));
//! assert_eq!(rows[0].get(1), Some(&PgValue::Text("Foo".into())));
//! # Ok(())
//! # }
//! ```
//!
//! LISTEN/NOTIFY:
//!
//! ```no_run
//! use pgpoll::{Connection, PollState, wait::{self, PollWait, Wait}};
//!
//! # fn app() -> pgpoll::Result<()> {
//! let mut conn = Connection::connect_env()?;
//! wait::drive(&mut conn)?;
//!
//! conn.execute("LISTEN events", &[])?;
//! wait::drive(&mut conn)?;
//!
//! // an idle connection reports Ok, so notification traffic has to be
//! // waited for externally: readiness on file_descriptor() first, then
//! // a poll() to consume whatever arrived
//! let mut waiter = PollWait::new();
//! loop {
//!     waiter.wait(conn.file_descriptor(), PollState::Read)?;
//!     conn.poll()?;
//!     while let Some(n) = conn.pop_notification() {
//!         println!("{}: {}", n.channel, n.payload);
//!     }
//! }
//! # }
//! ```
//!
//! Custom types go through the [`TypeRegistry`]: casters turn incoming
//! column bytes into [`PgValue`]s by oid, adapters turn outgoing
//! parameters into SQL literal fragments by Rust type. See
//! [`types`] for registration examples.

pub mod common;
mod ext;

// Protocol
pub mod protocol;

// Type adaptation
pub mod types;
mod sql;

// Component
pub mod row;
pub mod notify;

// Connection
pub mod connection;

// Waiting
#[cfg(unix)]
pub mod wait;
#[cfg(all(unix, feature = "tokio"))]
pub mod rt;

mod error;

pub use connection::{
    ConcurrentQuery, Config, Connection, ConnectionClosed, PollState, UnsupportedAuth,
};
pub use error::{Error, ErrorKind, Result};
pub use notify::Notification;
pub use sql::PlaceholderError;
pub use row::{Column, Row};
pub use types::{PgValue, ToSql, TypeRegistry};
