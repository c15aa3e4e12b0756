//! Errors raised while rendering an [`InputTemplate`] segment list.
//!
//! [`InputTemplate`]: https://docs.rs/resolve-engine (see `resolve_engine::template`)

/// Failure while rendering a single template segment.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// A `RequestHeader` variable's path had more than one segment.
    #[error("invalid header path: expected exactly one path segment, got {0}")]
    InvalidHeaderPath(usize),

    /// An `OperationContext` variable's path had more than one segment.
    #[error("invalid context path: expected exactly one path segment, got {0}")]
    InvalidContextPath(usize),

    /// A `Variable` segment named a source kind the renderer does not know.
    #[error("unknown variable source kind: {0}")]
    UnknownVariableSource(String),

    /// The JSON value found at a variable's path did not match its declared
    /// expected type (and no nullability rule applies).
    #[error("variable at path {path:?} has type {actual}, expected {expected}")]
    TypeMismatch {
        /// Dotted/bracketed path rendered for diagnostics.
        path: String,
        /// The JSON type actually found.
        actual: &'static str,
        /// The JSON type the segment declared.
        expected: &'static str,
    },

    /// Locating a variable's source value in `data`/`ctx.variables` failed.
    #[error("failed to read variable source: {0}")]
    Source(#[from] super::json::JsonPathError),
}
