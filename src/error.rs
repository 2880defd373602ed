//! `pgpoll` error types.
use std::{backtrace::Backtrace, fmt, io, str::Utf8Error};

use crate::{
    connection::{ConcurrentQuery, ConnectionClosed, UnsupportedAuth},
    protocol::{DbError, ProtocolError},
    sql::PlaceholderError,
    types::{AdaptationError, DecodeError},
};

/// A specialized [`Result`] type for `pgpoll` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `pgpoll` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub(crate) fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }
}

/// All possible error kind from `pgpoll` library.
pub enum ErrorKind {
    /// Malformed wire data; the connection is unusable.
    Protocol(ProtocolError),
    /// Underlying socket failure.
    Io(io::Error),
    /// An error reported by the server.
    Database(DbError),
    /// No adapter registered for a bound value, or adaptation failed.
    Adapt(AdaptationError),
    /// A caster rejected a column value.
    Decode(DecodeError),
    /// A placeholder could not be resolved against the parameters.
    Placeholder(PlaceholderError),
    /// Operation attempted after the connection entered the error state.
    Closed(ConnectionClosed),
    /// A query was submitted while one is already outstanding.
    Busy(ConcurrentQuery),
    /// The server requested an authentication flow this library does not speak.
    UnsupportedAuth(UnsupportedAuth),
    Utf8(Utf8Error),
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<io::Error>e => ErrorKind::Io(e));
from!(<DbError>e => ErrorKind::Database(e));
from!(<AdaptationError>e => ErrorKind::Adapt(e));
from!(<DecodeError>e => ErrorKind::Decode(e));
from!(<PlaceholderError>e => ErrorKind::Placeholder(e));
from!(<ConnectionClosed>e => ErrorKind::Closed(e));
from!(<ConcurrentQuery>e => ErrorKind::Busy(e));
from!(<UnsupportedAuth>e => ErrorKind::UnsupportedAuth(e));
from!(<Utf8Error>e => ErrorKind::Utf8(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            Self::Database(e) => e.fmt(f),
            Self::Adapt(e) => e.fmt(f),
            Self::Decode(e) => e.fmt(f),
            Self::Placeholder(e) => e.fmt(f),
            Self::Closed(e) => e.fmt(f),
            Self::Busy(e) => e.fmt(f),
            Self::UnsupportedAuth(e) => e.fmt(f),
            Self::Utf8(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
