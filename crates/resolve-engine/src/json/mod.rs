//! Path-oriented JSON utilities used throughout the resolve pipeline.
//!
//! These operate directly on byte slices rather than a parsed
//! [`serde_json::Value`] tree, so locating a field inside a large upstream
//! response doesn't require materializing the whole document.

mod scan;

pub use scan::ValueType;

use resolve_error::JsonPathError;
use scan::{for_each_array_entry, for_each_object_entry, scan_value, skip_whitespace};

/// One element of a JSON path: either an object key or an array index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathElem {
    /// An object member name.
    Key(String),
    /// An array index.
    Index(usize),
}

impl From<&str> for PathElem {
    fn from(s: &str) -> Self {
        Self::Key(s.to_string())
    }
}

impl From<usize> for PathElem {
    fn from(i: usize) -> Self {
        Self::Index(i)
    }
}

/// A value located by `get`: its byte range within the original document and
/// its JSON type. String ranges exclude the surrounding quotes.
#[derive(Debug, Clone, Copy)]
pub struct Located {
    /// Start offset, inclusive.
    pub start: usize,
    /// End offset, exclusive.
    pub end: usize,
    /// The value's JSON type.
    pub value_type: ValueType,
}

impl Located {
    /// The raw bytes of this value (quotes excluded for strings).
    #[must_use]
    pub fn bytes<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.start..self.end]
    }

    /// Whether this location denotes JSON `null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self.value_type, ValueType::Null)
    }
}

/// Classify the JSON value at the start of `data` (after leading
/// whitespace) without indexing into it by path.
///
/// # Errors
///
/// Returns a [`JsonPathError`] if `data` doesn't begin with a recognizable
/// JSON value.
pub fn detect_type(data: &[u8]) -> Result<ValueType, JsonPathError> {
    let start = skip_whitespace(data, 0);
    let (value_type, _end) = scan_value(data, start)?;
    Ok(value_type)
}

/// Locate the value at `path` within `data`, without building a parse tree.
///
/// # Errors
///
/// Returns [`JsonPathError::PathNotFound`] if any path element doesn't
/// exist, and [`JsonPathError::ShapeMismatch`] if a path element expects a
/// key into a non-object or an index into a non-array.
pub fn get(data: &[u8], path: &[PathElem]) -> Result<Located, JsonPathError> {
    let (value_start, end, value_type) = locate(data, path)?;
    let (start, end) = if value_type == ValueType::String {
        (value_start + 1, end - 1)
    } else {
        (value_start, end)
    };
    Ok(Located {
        start,
        end,
        value_type,
    })
}

/// Like [`get`], but for a string value returns the span *including* the
/// surrounding quotes — used by the input template renderer when splicing a
/// pre-encoded value verbatim.
///
/// # Errors
///
/// Same as [`get`].
pub fn get_raw(data: &[u8], path: &[PathElem]) -> Result<Located, JsonPathError> {
    let (start, end, value_type) = locate(data, path)?;
    Ok(Located {
        start,
        end,
        value_type,
    })
}

fn locate(data: &[u8], path: &[PathElem]) -> Result<(usize, usize, ValueType), JsonPathError> {
    let start = skip_whitespace(data, 0);
    let (mut value_type, mut end) = scan_value(data, start)?;
    let mut value_start = start;

    for elem in path {
        match (elem, value_type) {
            (PathElem::Key(key), ValueType::Object) => {
                let mut found = None;
                for_each_object_entry(data, value_start, |k, vstart, vend, vtype| {
                    if k == key.as_bytes() {
                        found = Some((vstart, vend, vtype));
                        Ok(false)
                    } else {
                        Ok(true)
                    }
                })?;
                let Some((vstart, vend, vtype)) = found else {
                    return Err(JsonPathError::PathNotFound(key.clone()));
                };
                value_start = vstart;
                end = vend;
                value_type = vtype;
            }
            (PathElem::Index(idx), ValueType::Array) => {
                let mut found = None;
                for_each_array_entry(data, value_start, |i, vstart, vend, vtype| {
                    if i == *idx {
                        found = Some((vstart, vend, vtype));
                        Ok(false)
                    } else {
                        Ok(true)
                    }
                })?;
                let Some((vstart, vend, vtype)) = found else {
                    return Err(JsonPathError::PathNotFound(format!("[{idx}]")));
                };
                value_start = vstart;
                end = vend;
                value_type = vtype;
            }
            (PathElem::Key(key), _) => {
                return Err(JsonPathError::ShapeMismatch(format!(
                    "key {key:?} into non-object"
                )))
            }
            (PathElem::Index(idx), _) => {
                return Err(JsonPathError::ShapeMismatch(format!(
                    "index {idx} into non-array"
                )))
            }
        }
    }

    Ok((value_start, end, value_type))
}

/// Stream the top-level elements of the array at `data` (the whole slice
/// must already be an array), re-quoting string elements so the callback
/// always receives renderable JSON bytes.
///
/// # Errors
///
/// Returns [`JsonPathError::ShapeMismatch`] if `data` is not an array.
pub fn array_each<F>(data: &[u8], mut f: F) -> Result<(), JsonPathError>
where
    F: FnMut(usize, &[u8], ValueType) -> Result<(), JsonPathError>,
{
    let start = skip_whitespace(data, 0);
    if data.get(start) != Some(&b'[') {
        return Err(JsonPathError::ShapeMismatch("expected array".to_string()));
    }
    let mut outcome = Ok(());
    for_each_array_entry(data, start, |idx, vstart, vend, vtype| {
        let res = f(idx, &data[vstart..vend], vtype);
        match res {
            Ok(()) => Ok(true),
            Err(e) => {
                outcome = Err(e);
                Ok(false)
            }
        }
    })?;
    outcome
}

/// Iterate the top-level keys of the object at `data`.
///
/// # Errors
///
/// Returns [`JsonPathError::ShapeMismatch`] if `data` is not an object.
pub fn object_each<F>(data: &[u8], mut f: F) -> Result<(), JsonPathError>
where
    F: FnMut(&[u8], &[u8], ValueType) -> Result<(), JsonPathError>,
{
    let start = skip_whitespace(data, 0);
    if data.get(start) != Some(&b'{') {
        return Err(JsonPathError::ShapeMismatch("expected object".to_string()));
    }
    let mut outcome = Ok(());
    for_each_object_entry(data, start, |key, vstart, vend, vtype| {
        let res = f(key, &data[vstart..vend], vtype);
        match res {
            Ok(()) => Ok(true),
            Err(e) => {
                outcome = Err(e);
                Ok(false)
            }
        }
    })?;
    outcome
}

/// Read several paths from `data` in a single pass over its top-level
/// object, calling `f(path_index, value_bytes, value_type)` for every path
/// that resolves. Paths must be single-element (a top-level key) — deeper
/// paths should use repeated [`get`] calls.
///
/// # Errors
///
/// Returns [`JsonPathError::ShapeMismatch`] if `data` is not an object or a
/// path has more than one element.
pub fn each_key<F>(data: &[u8], paths: &[&str], mut f: F) -> Result<(), JsonPathError>
where
    F: FnMut(usize, &[u8], ValueType),
{
    let start = skip_whitespace(data, 0);
    if data.get(start) != Some(&b'{') {
        return Err(JsonPathError::ShapeMismatch("expected object".to_string()));
    }
    for_each_object_entry(data, start, |key, vstart, vend, vtype| {
        if let Some(idx) = paths.iter().position(|p| p.as_bytes() == key) {
            f(idx, &data[vstart..vend], vtype);
        }
        Ok(true)
    })
}

/// Return a new byte vector with `value` inserted or replaced at `path`.
///
/// Supports replacing an existing key or appending a new key to an object
/// at the end of `path`; array insertion by index is not supported (the
/// resolve pipeline only ever rewrites object fields).
///
/// # Errors
///
/// Returns [`JsonPathError::ShapeMismatch`] if any but the last path element
/// fails to resolve to an object, or [`JsonPathError::PathNotFound`] if an
/// intermediate key is missing.
pub fn set(data: &[u8], path: &[PathElem], value: &[u8]) -> Result<Vec<u8>, JsonPathError> {
    let Some((last, prefix)) = path.split_last() else {
        return Ok(value.to_vec());
    };
    let PathElem::Key(last_key) = last else {
        return Err(JsonPathError::ShapeMismatch(
            "set only supports a trailing object key".to_string(),
        ));
    };

    let parent = if prefix.is_empty() {
        Located {
            start: skip_whitespace(data, 0),
            end: data.len(),
            value_type: ValueType::Object,
        }
    } else {
        get(data, prefix)?
    };
    if parent.value_type != ValueType::Object {
        return Err(JsonPathError::ShapeMismatch(
            "set target is not an object".to_string(),
        ));
    }

    let mut existing = None;
    for_each_object_entry(data, parent.start, |k, vstart, vend, _| {
        if k == last_key.as_bytes() {
            existing = Some((vstart, vend));
            Ok(false)
        } else {
            Ok(true)
        }
    })?;

    let mut out = Vec::with_capacity(data.len() + value.len() + last_key.len() + 8);
    if let Some((vstart, vend)) = existing {
        out.extend_from_slice(&data[..vstart]);
        out.extend_from_slice(value);
        out.extend_from_slice(&data[vend..]);
    } else {
        let insert_at = parent.end - 1;
        out.extend_from_slice(&data[..insert_at]);
        let needs_comma = data[parent.start + 1..insert_at]
            .iter()
            .any(|b| !matches!(b, b' ' | b'\t' | b'\n' | b'\r'));
        if needs_comma {
            out.push(b',');
        }
        out.push(b'"');
        out.extend_from_slice(last_key.as_bytes());
        out.extend_from_slice(b"\":");
        out.extend_from_slice(value);
        out.extend_from_slice(&data[insert_at..]);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_scalar_by_key() {
        let data = br#"{"x":"a","y":1}"#;
        let loc = get(data, &[PathElem::from("x")]).unwrap();
        assert_eq!(loc.bytes(data), b"a");
        assert_eq!(loc.value_type, ValueType::String);
    }

    #[test]
    fn get_nested_array_index() {
        let data = br#"{"a":[{"id":"x"},{"id":"y"}]}"#;
        let loc = get(data, &[PathElem::from("a"), PathElem::from(1), PathElem::from("id")])
            .unwrap();
        assert_eq!(loc.bytes(data), b"y");
    }

    #[test]
    fn get_missing_key_errors() {
        let data = br#"{"a":1}"#;
        let err = get(data, &[PathElem::from("missing")]).unwrap_err();
        assert!(matches!(err, JsonPathError::PathNotFound(_)));
    }

    #[test]
    fn array_each_preserves_order_and_string_quoting() {
        let data = br#"["a","b",1]"#;
        let mut out = Vec::new();
        array_each(data, |_, bytes, vtype| {
            out.push((bytes.to_vec(), vtype));
            Ok(())
        })
        .unwrap();
        assert_eq!(out[0].0, b"\"a\"");
        assert_eq!(out[2].1, ValueType::Number);
    }

    #[test]
    fn set_replaces_existing_key() {
        let data = br#"{"a":1,"b":2}"#;
        let out = set(data, &[PathElem::from("a")], b"99").unwrap();
        assert_eq!(out, br#"{"a":99,"b":2}"#.to_vec());
    }

    #[test]
    fn set_appends_new_key() {
        let data = br#"{"a":1}"#;
        let out = set(data, &[PathElem::from("b")], b"2").unwrap();
        assert_eq!(out, br#"{"a":1,"b":2}"#.to_vec());
    }

    #[test]
    fn set_appends_to_empty_object() {
        let data = br"{}";
        let out = set(data, &[PathElem::from("a")], b"1").unwrap();
        assert_eq!(out, br#"{"a":1}"#.to_vec());
    }

    #[test]
    fn each_key_reads_multiple_paths_in_one_pass() {
        let data = br#"{"errors":[1],"data":{"x":1},"extra":true}"#;
        let mut seen = vec![false; 2];
        each_key(data, &["errors", "data"], |idx, _bytes, _t| {
            seen[idx] = true;
        })
        .unwrap();
        assert_eq!(seen, vec![true, true]);
    }
}
