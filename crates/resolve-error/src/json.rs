//! Errors raised by the path-oriented JSON utilities.

/// Failure locating or mutating a value at a JSON path without a full parse.
#[derive(Debug, thiserror::Error)]
pub enum JsonPathError {
    /// The path did not resolve to any value.
    #[error("path not found: {0}")]
    PathNotFound(String),

    /// A path element expected an array index (`[N]`) but the underlying
    /// value was not an array, or vice versa.
    #[error("path element {0:?} does not match underlying JSON shape")]
    ShapeMismatch(String),

    /// The input bytes were not valid JSON at all.
    #[error("malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}
