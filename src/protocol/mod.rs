//! Postgres Frontend and Backend Protocol
//!
//! docs here mostly quoted from the official postgres documentation
//!
//! <https://www.postgresql.org/docs/17/protocol-overview.html>
//!
//! # Messaging Overview
//!
//! All communication is through a stream of messages. The first byte of a message identifies
//! the message type, and the next four bytes specify the length of the rest of the message
//! (this length count includes itself, but not the message-type byte). The remaining contents
//! of the message are determined by the message type.
//!
//! ```text
//! | u8 |        i32        | body
//! |----|-------------------|-----
//! | 43 | 00 | 00 | 00 | 32 |  ..
//!
//! Message Type -> length -> body
//! ```
//!
//! For historical reasons, the very first message sent by the client (the startup message)
//! has no initial message-type byte.
//!
//! # Formats and Format Codes
//!
//! Data of a particular data type might be transmitted in any of several different formats.
//! As of PostgreSQL 7.4 the only supported formats are "text" and "binary".
//!
//! | format | format code |
//! |--------|-------------|
//! |  text  |      0      |
//! | binary |      1      |
//!
//! The text representation of values is whatever strings are produced and accepted by the
//! input/output conversion functions for the *particular* data type. In the transmitted
//! representation, there is no trailing null character; the frontend must add one to received
//! values if it wants to process them as C strings.
//!
//! This library sends all query parameters as already-adapted SQL literal fragments and
//! receives result columns in the text format.

pub mod frontend;
pub mod backend;
pub mod decoder;

mod error;

pub use backend::{BackendMessage, BackendProtocol};
pub use error::{DbError, ProtocolError};
pub use frontend::FrontendProtocol;

/// Server-assigned numeric identifier for a data type.
pub type Oid = u32;
