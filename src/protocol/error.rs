//! Wire protocol errors.
use std::fmt;

use bytes::{Buf, Bytes};

use crate::{common::ByteStr, ext::BytesExt};

/// An error when translating buffer from postgres.
///
/// Once this error is returned, the stream is considered corrupt and
/// the connection must be closed.
pub enum ProtocolError {
    /// Message kind not known by this library.
    Unexpected {
        expect: Option<u8>,
        found: u8,
        phase: Option<&'static str>,
    },
    /// Declared message length does not fit the wire format.
    BadLength {
        len: i32,
    },
    /// Message body ended before all declared fields were read.
    Truncated {
        msgtype: u8,
    },
    /// Authentication request not known by this library.
    UnknownAuth {
        auth: u32,
    },
    /// A protocol string is missing its nul terminator.
    MissingNul,
    /// A protocol string is not valid utf-8.
    NonUtf8(std::str::Utf8Error),
}

impl ProtocolError {
    pub(crate) fn unknown(found: u8) -> ProtocolError {
        Self::Unexpected { expect: None, found, phase: None }
    }

    pub(crate) fn unexpected(expect: u8, found: u8) -> ProtocolError {
        Self::Unexpected { expect: Some(expect), found, phase: None }
    }

    pub(crate) fn unexpected_phase(found: u8, phase: &'static str) -> ProtocolError {
        Self::Unexpected { expect: None, found, phase: Some(phase) }
    }

    pub(crate) fn unknown_auth(auth: u32) -> ProtocolError {
        Self::UnknownAuth { auth }
    }

    pub(crate) fn bad_length(len: i32) -> ProtocolError {
        Self::BadLength { len }
    }

    pub(crate) fn truncated(msgtype: u8) -> ProtocolError {
        Self::Truncated { msgtype }
    }

    pub(crate) fn missing_nul() -> ProtocolError {
        Self::MissingNul
    }

    pub(crate) fn non_utf8(err: std::str::Utf8Error) -> ProtocolError {
        Self::NonUtf8(err)
    }
}

impl std::error::Error for ProtocolError { }

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ProtocolError::Unexpected { expect, found, phase } => {
                match expect {
                    Some(m) => write!(f, "expected message `{}` found `{}`", m as char, found as char)?,
                    None => write!(f, "unexpected message `{}`", found as char)?,
                }
                if let Some(phase) = phase {
                    write!(f, " in `{phase}`")?;
                }
                Ok(())
            },
            ProtocolError::BadLength { len } => write!(f, "malformed message length: {len}"),
            ProtocolError::Truncated { msgtype } => {
                write!(f, "truncated `{}` message body", msgtype as char)
            },
            ProtocolError::UnknownAuth { auth } => write!(f, "unknown authentication request: {auth}"),
            ProtocolError::MissingNul => write!(f, "protocol string missing nul terminator"),
            ProtocolError::NonUtf8(err) => write!(f, "protocol string is not utf-8: {err}"),
        }
    }
}

impl fmt::Debug for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// An error reported by the server via `ErrorResponse`.
///
/// The message body consists of one or more identified fields, followed by
/// a zero byte as a terminator. Fields can appear in any order, and fields
/// of unrecognized type are silently ignored.
#[derive(Debug, thiserror::Error)]
#[error("{severity}: {message} ({code})")]
pub struct DbError {
    /// The severity: ERROR, FATAL, PANIC, or a localized translation.
    pub severity: ByteStr,
    /// The SQLSTATE code for the error.
    pub code: ByteStr,
    /// The primary human-readable error message.
    pub message: ByteStr,
}

impl DbError {
    pub(crate) fn from_fields(mut body: Bytes) -> Result<DbError, ProtocolError> {
        let mut severity = ByteStr::default();
        let mut code = ByteStr::default();
        let mut message = ByteStr::default();

        while body.has_remaining() {
            let field = body.get_u8();
            if field == 0 {
                break;
            }
            let value = body.get_nul_bytestr()?;
            match field {
                b'S' => severity = value,
                b'C' => code = value,
                b'M' => message = value,
                _ => { },
            }
        }

        Ok(DbError { severity, code, message })
    }
}
