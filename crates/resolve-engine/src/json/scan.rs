//! Single-pass byte scanner over JSON text.
//!
//! Deliberately does not build a parse tree: every function here walks the
//! input once, tracking only the bracket/string nesting needed to find
//! value boundaries. This keeps `get`/`arrayEach`/`objectEach` cheap even on
//! large upstream response bodies, at the cost of re-scanning on repeated
//! lookups.

use resolve_error::JsonPathError;

/// The JSON type of a located value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// `{...}`
    Object,
    /// `[...]`
    Array,
    /// A quoted string (the located slice excludes the surrounding quotes).
    String,
    /// A number literal.
    Number,
    /// `true` or `false`.
    Boolean,
    /// `null`.
    Null,
}

pub fn skip_whitespace(data: &[u8], mut i: usize) -> usize {
    while i < data.len() && matches!(data[i], b' ' | b'\t' | b'\n' | b'\r') {
        i += 1;
    }
    i
}

/// Classify the value starting at `i` (which must already be past leading
/// whitespace) and return `(type, end_index_exclusive)`.
pub fn scan_value(data: &[u8], i: usize) -> Result<(ValueType, usize), JsonPathError> {
    let Some(&b) = data.get(i) else {
        return Err(JsonPathError::PathNotFound("<eof>".to_string()));
    };
    match b {
        b'{' => Ok((ValueType::Object, scan_container(data, i, b'{', b'}')?)),
        b'[' => Ok((ValueType::Array, scan_container(data, i, b'[', b']')?)),
        b'"' => {
            let end = scan_string(data, i)?;
            Ok((ValueType::String, end))
        }
        b't' => scan_literal(data, i, b"true").map(|e| (ValueType::Boolean, e)),
        b'f' => scan_literal(data, i, b"false").map(|e| (ValueType::Boolean, e)),
        b'n' => scan_literal(data, i, b"null").map(|e| (ValueType::Null, e)),
        b'-' | b'0'..=b'9' => Ok((ValueType::Number, scan_number(data, i))),
        other => Err(JsonPathError::ShapeMismatch(format!(
            "unexpected byte {other:?} at offset {i}"
        ))),
    }
}

fn scan_literal(data: &[u8], i: usize, lit: &[u8]) -> Result<usize, JsonPathError> {
    if data.len() >= i + lit.len() && &data[i..i + lit.len()] == lit {
        Ok(i + lit.len())
    } else {
        Err(JsonPathError::ShapeMismatch(format!(
            "expected literal {:?} at offset {i}",
            String::from_utf8_lossy(lit)
        )))
    }
}

fn scan_number(data: &[u8], start: usize) -> usize {
    let mut i = start;
    if data.get(i) == Some(&b'-') {
        i += 1;
    }
    while data.get(i).is_some_and(u8::is_ascii_digit) {
        i += 1;
    }
    if data.get(i) == Some(&b'.') {
        i += 1;
        while data.get(i).is_some_and(u8::is_ascii_digit) {
            i += 1;
        }
    }
    if matches!(data.get(i), Some(b'e' | b'E')) {
        i += 1;
        if matches!(data.get(i), Some(b'+' | b'-')) {
            i += 1;
        }
        while data.get(i).is_some_and(u8::is_ascii_digit) {
            i += 1;
        }
    }
    i
}

/// Returns the index just past the closing quote. `start` must point at the
/// opening `"`.
pub fn scan_string(data: &[u8], start: usize) -> Result<usize, JsonPathError> {
    let mut i = start + 1;
    while let Some(&b) = data.get(i) {
        match b {
            b'\\' => i += 2,
            b'"' => return Ok(i + 1),
            _ => i += 1,
        }
    }
    Err(JsonPathError::ShapeMismatch(format!(
        "unterminated string starting at offset {start}"
    )))
}

fn scan_container(data: &[u8], start: usize, open: u8, close: u8) -> Result<usize, JsonPathError> {
    debug_assert_eq!(data[start], open);
    let mut depth = 0usize;
    let mut i = start;
    loop {
        let Some(&b) = data.get(i) else {
            return Err(JsonPathError::ShapeMismatch(format!(
                "unterminated container starting at offset {start}"
            )));
        };
        match b {
            b'"' => {
                i = scan_string(data, i)?;
                continue;
            }
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i + 1);
                }
            }
            _ => {}
        }
        i += 1;
    }
}

/// Iterate the top-level entries of an object already known to start at
/// `start` (the byte at `start` is `{`). Calls `f(key_raw, value_start,
/// value_end, value_type)` for each member until `f` returns `false`.
pub fn for_each_object_entry<F>(data: &[u8], start: usize, mut f: F) -> Result<(), JsonPathError>
where
    F: FnMut(&[u8], usize, usize, ValueType) -> Result<bool, JsonPathError>,
{
    let mut i = skip_whitespace(data, start + 1);
    if data.get(i) == Some(&b'}') {
        return Ok(());
    }
    loop {
        i = skip_whitespace(data, i);
        if data.get(i) != Some(&b'"') {
            return Err(JsonPathError::ShapeMismatch("expected object key".to_string()));
        }
        let key_end = scan_string(data, i)?;
        let key = &data[i + 1..key_end - 1];
        i = skip_whitespace(data, key_end);
        if data.get(i) != Some(&b':') {
            return Err(JsonPathError::ShapeMismatch("expected ':' after key".to_string()));
        }
        i = skip_whitespace(data, i + 1);
        let (vtype, vend) = scan_value(data, i)?;
        if !f(key, i, vend, vtype)? {
            return Ok(());
        }
        i = skip_whitespace(data, vend);
        match data.get(i) {
            Some(b',') => i += 1,
            Some(b'}') => return Ok(()),
            _ => return Err(JsonPathError::ShapeMismatch("expected ',' or '}'".to_string())),
        }
    }
}

/// Iterate the top-level elements of an array already known to start at
/// `start`. Calls `f(index, value_start, value_end, value_type)` for each
/// element until `f` returns `false`.
pub fn for_each_array_entry<F>(data: &[u8], start: usize, mut f: F) -> Result<(), JsonPathError>
where
    F: FnMut(usize, usize, usize, ValueType) -> Result<bool, JsonPathError>,
{
    let mut i = skip_whitespace(data, start + 1);
    if data.get(i) == Some(&b']') {
        return Ok(());
    }
    let mut idx = 0;
    loop {
        i = skip_whitespace(data, i);
        let (vtype, vend) = scan_value(data, i)?;
        if !f(idx, i, vend, vtype)? {
            return Ok(());
        }
        idx += 1;
        i = skip_whitespace(data, vend);
        match data.get(i) {
            Some(b',') => i += 1,
            Some(b']') => return Ok(()),
            _ => return Err(JsonPathError::ShapeMismatch("expected ',' or ']'".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_scalars() {
        assert_eq!(scan_value(b"true", 0).unwrap(), (ValueType::Boolean, 4));
        assert_eq!(scan_value(b"false", 0).unwrap(), (ValueType::Boolean, 5));
        assert_eq!(scan_value(b"null", 0).unwrap(), (ValueType::Null, 4));
        assert_eq!(scan_value(b"-12.5e10", 0).unwrap(), (ValueType::Number, 8));
        assert_eq!(scan_value(b"\"abc\"", 0).unwrap(), (ValueType::String, 5));
    }

    #[test]
    fn scans_nested_container() {
        let data = br#"{"a":[1,2,{"b":"c"}],"d":3}"#;
        let (t, end) = scan_value(data, 0).unwrap();
        assert_eq!(t, ValueType::Object);
        assert_eq!(end, data.len());
    }

    #[test]
    fn object_entries_are_iterated_in_order() {
        let data = br#"{"a":1,"b":[1,2],"c":"x"}"#;
        let mut seen = Vec::new();
        for_each_object_entry(data, 0, |k, _, _, t| {
            seen.push((String::from_utf8_lossy(k).to_string(), t));
            Ok(true)
        })
        .unwrap();
        assert_eq!(
            seen,
            vec![
                ("a".to_string(), ValueType::Number),
                ("b".to_string(), ValueType::Array),
                ("c".to_string(), ValueType::String),
            ]
        );
    }

    #[test]
    fn array_entries_are_iterated_in_order() {
        let data = br#"[1,"two",[3]]"#;
        let mut types = Vec::new();
        for_each_array_entry(data, 0, |_, _, _, t| {
            types.push(t);
            Ok(true)
        })
        .unwrap();
        assert_eq!(
            types,
            vec![ValueType::Number, ValueType::String, ValueType::Array]
        );
    }

    #[test]
    fn string_with_escaped_quote_is_scanned_whole() {
        let data = br#""a\"b""#;
        assert_eq!(scan_string(data, 0).unwrap(), data.len());
    }
}
