//! Placeholder substitution.
//!
//! Parameters never travel separately in the simple query protocol; they
//! are adapted into SQL literal fragments first and spliced over the
//! placeholders here. Positional markers are `$1`..`$n`, named markers are
//! `:name`. Markers inside `'...'` and `"..."` regions are left alone, as
//! is the `::` cast operator.

/// Adapted parameter fragments, positional or named.
pub(crate) enum Fragments<'a> {
    Positional(&'a [Vec<u8>]),
    Named(&'a [(&'a str, Vec<u8>)]),
}

/// An error resolving a placeholder against the provided parameters.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum PlaceholderError {
    #[error("no parameter bound for placeholder `${0}`")]
    UnknownIndex(usize),
    #[error("no parameter bound for placeholder `:{0}`")]
    UnknownName(String),
    #[error("interpolated query is not valid utf-8")]
    NonUtf8,
}

/// Substitute placeholders in `sql` with the adapted fragments.
pub(crate) fn interpolate(sql: &str, params: &Fragments) -> Result<String, PlaceholderError> {
    let bytes = sql.as_bytes();
    let mut out = Vec::with_capacity(sql.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            // string literal, quote doubling included
            b'\'' => i = copy_quoted(bytes, i, b'\'', &mut out),
            // quoted identifier
            b'"' => i = copy_quoted(bytes, i, b'"', &mut out),
            b'$' if matches!(params, Fragments::Positional(_)) => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if end == start {
                    out.push(b'$');
                    i += 1;
                    continue;
                }
                // placeholders are 1-based
                let index: usize = sql[start..end]
                    .parse()
                    .map_err(|_| PlaceholderError::UnknownIndex(0))?;
                let Fragments::Positional(fragments) = params else { unreachable!() };
                let fragment = index
                    .checked_sub(1)
                    .and_then(|i| fragments.get(i))
                    .ok_or(PlaceholderError::UnknownIndex(index))?;
                out.extend_from_slice(fragment);
                i = end;
            },
            b':' if matches!(params, Fragments::Named(_)) => {
                // `::` is a cast, not a placeholder
                if bytes.get(i + 1) == Some(&b':') {
                    out.extend_from_slice(b"::");
                    i += 2;
                    continue;
                }
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
                    end += 1;
                }
                if end == start {
                    out.push(b':');
                    i += 1;
                    continue;
                }
                let name = &sql[start..end];
                let Fragments::Named(fragments) = params else { unreachable!() };
                let fragment = fragments
                    .iter()
                    .find(|(n, _)| *n == name)
                    .map(|(_, f)| f)
                    .ok_or_else(|| PlaceholderError::UnknownName(name.to_string()))?;
                out.extend_from_slice(fragment);
                i = end;
            },
            b => {
                out.push(b);
                i += 1;
            },
        }
    }

    String::from_utf8(out).map_err(|_| PlaceholderError::NonUtf8)
}

fn copy_quoted(bytes: &[u8], mut i: usize, quote: u8, out: &mut Vec<u8>) -> usize {
    out.push(bytes[i]);
    i += 1;
    while i < bytes.len() {
        out.push(bytes[i]);
        if bytes[i] == quote {
            // a doubled quote stays inside the region
            if bytes.get(i + 1) == Some(&quote) {
                out.push(quote);
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    i
}

#[cfg(test)]
mod test {
    use super::*;

    fn positional(sql: &str, fragments: &[&[u8]]) -> Result<String, PlaceholderError> {
        let owned: Vec<Vec<u8>> = fragments.iter().map(|f| f.to_vec()).collect();
        interpolate(sql, &Fragments::Positional(&owned))
    }

    #[test]
    fn positional_markers() {
        let sql = positional("SELECT $1, $2, $1", &[b"42", b"'a'"]).unwrap();
        assert_eq!(sql, "SELECT 42, 'a', 42");
    }

    #[test]
    fn named_markers() {
        let params = [("id", b"7".to_vec()), ("name", b"'x'".to_vec())];
        let sql = interpolate("UPDATE t SET name = :name WHERE id = :id", &Fragments::Named(&params)).unwrap();
        assert_eq!(sql, "UPDATE t SET name = 'x' WHERE id = 7");
    }

    #[test]
    fn quoted_regions_are_untouched() {
        let sql = positional("SELECT '$1', \"$1\", $1", &[b"0"]).unwrap();
        assert_eq!(sql, "SELECT '$1', \"$1\", 0");
    }

    #[test]
    fn doubled_quote_stays_inside_literal() {
        let sql = positional("SELECT 'it''s $1', $1", &[b"0"]).unwrap();
        assert_eq!(sql, "SELECT 'it''s $1', 0");
    }

    #[test]
    fn cast_operator_is_not_a_placeholder() {
        let params = [("a", b"1".to_vec())];
        let sql = interpolate("SELECT :a::text", &Fragments::Named(&params)).unwrap();
        assert_eq!(sql, "SELECT 1::text");
    }

    #[test]
    fn unbound_placeholders_error() {
        assert_eq!(positional("SELECT $2", &[b"0"]), Err(PlaceholderError::UnknownIndex(2)));
        assert_eq!(positional("SELECT $0", &[b"0"]), Err(PlaceholderError::UnknownIndex(0)));

        let err = interpolate("SELECT :nope", &Fragments::Named(&[])).unwrap_err();
        assert_eq!(err, PlaceholderError::UnknownName("nope".into()));
    }

    #[test]
    fn bare_dollar_is_copied() {
        let sql = positional("SELECT $$tag$$", &[]).unwrap();
        assert_eq!(sql, "SELECT $$tag$$");
    }
}
