//! Parameter adaptation, runtime type keyed.
use std::any::Any;
use std::sync::Arc;

use super::TypeRegistry;

/// A value that can travel through adapter dispatch.
///
/// Blanket implemented for every `'static` type; the actual encoding is
/// resolved at runtime from the [`TypeRegistry`] adapter table, keyed by
/// [`TypeId`][std::any::TypeId]. Registering an adapter for a type makes
/// values of that type bindable as query parameters.
pub trait ToSql: Any {
    fn as_any(&self) -> &dyn Any;

    fn type_name(&self) -> &'static str;
}

impl<T: Any> ToSql for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Encode function bound to a runtime type.
///
/// Produces a complete SQL literal fragment, quoting included; the registry
/// splices the fragment over a placeholder verbatim. An adapter may invoke
/// [`TypeRegistry::encode`] recursively on sub-values to compose fragments.
pub type Adapter = Arc<dyn Fn(&dyn Any, &TypeRegistry) -> Result<Vec<u8>, AdaptationError> + Send + Sync>;

/// An error during parameter adaptation.
#[derive(Debug, thiserror::Error)]
pub enum AdaptationError {
    /// No adapter is registered for the value's runtime type.
    #[error("no adapter registered for type `{type_name}`")]
    Unregistered { type_name: &'static str },
    /// A registered adapter rejected the value.
    #[error("cannot adapt value of type `{type_name}`: {detail}")]
    Failed { type_name: &'static str, detail: &'static str },
}

/// Write `string` as a quoted SQL string literal into `out`.
///
/// Single quotes are doubled; with `standard_conforming_strings` (the server
/// default since 9.1) backslashes carry no special meaning inside `'...'`.
pub fn quote_literal(string: &str, out: &mut Vec<u8>) {
    out.push(b'\'');
    for &b in string.as_bytes() {
        if b == b'\'' {
            out.push(b'\'');
        }
        out.push(b);
    }
    out.push(b'\'');
}

pub(super) fn adapt_bool(value: &bool) -> Vec<u8> {
    match value {
        true => b"TRUE".to_vec(),
        false => b"FALSE".to_vec(),
    }
}

pub(super) fn adapt_int(value: i64) -> Vec<u8> {
    let mut fmt = itoa::Buffer::new();
    fmt.format(value).as_bytes().to_vec()
}

pub(super) fn adapt_float(value: f64) -> Vec<u8> {
    if !value.is_finite() {
        // NaN and infinities exist server side but only as quoted literals
        return match value {
            v if v.is_nan() => b"'NaN'".to_vec(),
            v if v > 0.0 => b"'Infinity'".to_vec(),
            _ => b"'-Infinity'".to_vec(),
        };
    }
    format!("{value}").into_bytes()
}

pub(super) fn adapt_str(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() + 2);
    quote_literal(value, &mut out);
    out
}

pub(super) fn adapt_bytes(value: &[u8]) -> Vec<u8> {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = Vec::with_capacity(value.len() * 2 + 6);
    out.extend_from_slice(b"'\\x");
    for &b in value {
        out.push(HEX[(b >> 4) as usize]);
        out.push(HEX[(b & 0x0f) as usize]);
    }
    out.extend_from_slice(b"'");
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn quoting_doubles_single_quotes() {
        let mut out = Vec::new();
        quote_literal("it's", &mut out);
        assert_eq!(out, b"'it''s'");
    }

    #[test]
    fn scalar_fragments() {
        assert_eq!(adapt_bool(&true), b"TRUE");
        assert_eq!(adapt_int(-7), b"-7");
        assert_eq!(adapt_float(1.23), b"1.23");
        assert_eq!(adapt_float(f64::NAN), b"'NaN'");
        assert_eq!(adapt_str("a"), b"'a'");
        assert_eq!(adapt_bytes(&[0x00, 0xff]), b"'\\x00ff'");
    }
}
