//! Result value casting, oid keyed.
use std::sync::Arc;

use bytes::Bytes;

use crate::{common::ByteStr, protocol::Oid};

use super::PgValue;

/// Postgres data transmission format.
///
/// <https://www.postgresql.org/docs/current/protocol-overview.html#PROTOCOL-FORMAT-CODES>
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgFormat {
    /// Text has format code zero.
    Text,
    /// Binary has format code one.
    Binary,
}

impl PgFormat {
    pub fn from_code(code: u16) -> PgFormat {
        match code {
            1 => PgFormat::Binary,
            _ => PgFormat::Text,
        }
    }
}

/// Decoding context handed to a [`Caster`].
#[derive(Debug, Clone, Copy)]
pub struct CastContext {
    /// The oid of the column's data type as reported by the server.
    pub oid: Oid,
    /// The transmission format of the raw value.
    pub format: PgFormat,
}

/// Decode function bound to one or more oids.
///
/// Receives the raw wire representation, `None` for SQL NULL, and the
/// decoding context. Composite decoding is explicit: a caster for a
/// container type calls [`TypeRegistry::decode`][1] on its sub-values
/// itself, there is no implicit nesting.
///
/// [1]: super::TypeRegistry::decode
pub type Caster = Arc<dyn Fn(Option<&Bytes>, &CastContext) -> Result<PgValue, DecodeError> + Send + Sync>;

/// An error from a [`Caster`] while decoding a column value.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("column value for oid {oid} is not utf-8")]
    NonUtf8 { oid: Oid },
    #[error("malformed value for oid {oid}: {detail}")]
    Malformed { oid: Oid, detail: &'static str },
}

fn utf8<'r>(raw: &'r Bytes, ctx: &CastContext) -> Result<&'r str, DecodeError> {
    std::str::from_utf8(raw).map_err(|_| DecodeError::NonUtf8 { oid: ctx.oid })
}

pub(super) fn cast_bool(raw: Option<&Bytes>, ctx: &CastContext) -> Result<PgValue, DecodeError> {
    match raw.map(|r| &r[..]) {
        None => Ok(PgValue::Null),
        Some(b"t") => Ok(PgValue::Bool(true)),
        Some(b"f") => Ok(PgValue::Bool(false)),
        Some(_) => Err(DecodeError::Malformed { oid: ctx.oid, detail: "expected `t` or `f`" }),
    }
}

pub(super) fn cast_int(raw: Option<&Bytes>, ctx: &CastContext) -> Result<PgValue, DecodeError> {
    let Some(raw) = raw else {
        return Ok(PgValue::Null);
    };
    utf8(raw, ctx)?
        .parse::<i64>()
        .map(PgValue::Int)
        .map_err(|_| DecodeError::Malformed { oid: ctx.oid, detail: "expected an integer" })
}

pub(super) fn cast_float(raw: Option<&Bytes>, ctx: &CastContext) -> Result<PgValue, DecodeError> {
    let Some(raw) = raw else {
        return Ok(PgValue::Null);
    };
    utf8(raw, ctx)?
        .parse::<f64>()
        .map(PgValue::Float)
        .map_err(|_| DecodeError::Malformed { oid: ctx.oid, detail: "expected a float" })
}

pub(super) fn cast_text(raw: Option<&Bytes>, ctx: &CastContext) -> Result<PgValue, DecodeError> {
    match raw {
        None => Ok(PgValue::Null),
        Some(raw) => ByteStr::from_utf8(raw.clone())
            .map(PgValue::Text)
            .map_err(|_| DecodeError::NonUtf8 { oid: ctx.oid }),
    }
}

pub(super) fn cast_bytea(raw: Option<&Bytes>, ctx: &CastContext) -> Result<PgValue, DecodeError> {
    let Some(raw) = raw else {
        return Ok(PgValue::Null);
    };
    let text = utf8(raw, ctx)?;

    // text output is hex encoded since postgres 9.0
    let Some(hex) = text.strip_prefix("\\x") else {
        return Err(DecodeError::Malformed { oid: ctx.oid, detail: "expected `\\x` prefix" });
    };
    if hex.len() % 2 != 0 {
        return Err(DecodeError::Malformed { oid: ctx.oid, detail: "odd hex length" });
    }

    let mut out = Vec::with_capacity(hex.len() / 2);
    for pair in hex.as_bytes().chunks_exact(2) {
        let hi = hex_digit(pair[0], ctx)?;
        let lo = hex_digit(pair[1], ctx)?;
        out.push(hi << 4 | lo);
    }
    Ok(PgValue::Bytes(Bytes::from(out)))
}

fn hex_digit(digit: u8, ctx: &CastContext) -> Result<u8, DecodeError> {
    match digit {
        b'0'..=b'9' => Ok(digit - b'0'),
        b'a'..=b'f' => Ok(digit - b'a' + 10),
        b'A'..=b'F' => Ok(digit - b'A' + 10),
        _ => Err(DecodeError::Malformed { oid: ctx.oid, detail: "invalid hex digit" }),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::oid;

    fn ctx(oid: Oid) -> CastContext {
        CastContext { oid, format: PgFormat::Text }
    }

    #[test]
    fn null_passes_through() {
        assert_eq!(cast_int(None, &ctx(oid::INT4)).unwrap(), PgValue::Null);
        assert_eq!(cast_bool(None, &ctx(oid::BOOL)).unwrap(), PgValue::Null);
    }

    #[test]
    fn scalar_casts() {
        let raw = Bytes::from_static(b"-42");
        assert_eq!(cast_int(Some(&raw), &ctx(oid::INT8)).unwrap(), PgValue::Int(-42));

        let raw = Bytes::from_static(b"1.5");
        assert_eq!(cast_float(Some(&raw), &ctx(oid::FLOAT8)).unwrap(), PgValue::Float(1.5));

        let raw = Bytes::from_static(b"t");
        assert_eq!(cast_bool(Some(&raw), &ctx(oid::BOOL)).unwrap(), PgValue::Bool(true));
    }

    #[test]
    fn bytea_hex() {
        let raw = Bytes::from_static(b"\\x00ff10");
        let value = cast_bytea(Some(&raw), &ctx(oid::BYTEA)).unwrap();
        assert_eq!(value, PgValue::Bytes(Bytes::from_static(&[0x00, 0xff, 0x10])));
    }

    #[test]
    fn malformed_value_errors() {
        let raw = Bytes::from_static(b"x");
        assert!(cast_int(Some(&raw), &ctx(oid::INT4)).is_err());
        assert!(cast_bool(Some(&raw), &ctx(oid::BOOL)).is_err());
        assert!(cast_bytea(Some(&raw), &ctx(oid::BYTEA)).is_err());
    }
}
