//! Decoded column values.
use bytes::Bytes;

use crate::common::ByteStr;

/// A decoded result column value.
///
/// Casters registered in the [`TypeRegistry`][crate::types::TypeRegistry]
/// produce these from raw wire bytes. Unregistered oids fall back to
/// [`Text`][PgValue::Text] when the raw bytes are utf-8 and
/// [`Bytes`][PgValue::Bytes] otherwise, untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum PgValue {
    /// SQL NULL.
    Null,
    Bool(bool),
    /// Any of the integer types, widened.
    Int(i64),
    /// Any of the floating point types, widened.
    Float(f64),
    /// Textual value, zero-copy slice of the receive buffer.
    Text(ByteStr),
    /// Raw value for which no caster is registered.
    Bytes(Bytes),
}

impl PgValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Self::Int(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match *self {
            Self::Float(v) => Some(v),
            Self::Int(i) => Some(i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            Self::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }
}
