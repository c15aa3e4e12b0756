//! Unified error types for the resolve engine.
//!
//! Each resolve component gets its own error enum (`TemplateError`,
//! `JsonPathError`, `FetchError`, `SubscriptionError`); [`ResolveError`] is
//! the umbrella type returned from the engine's public entry points, so a
//! caller only ever has to match on one enum.

#![allow(missing_docs)]

mod fetch;
mod json;
mod subscription;
mod template;

pub use fetch::FetchError;
pub use json::JsonPathError;
pub use subscription::SubscriptionError;
pub use template::TemplateError;

/// Result type alias used throughout the resolve engine.
pub type Result<T> = std::result::Result<T, ResolveError>;

/// Umbrella error type returned from the resolve engine's public API.
///
/// Wraps each domain's own error enum, plus the handful of resolve-level
/// conditions that aren't owned by any single component.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Json(#[from] JsonPathError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    /// A non-nullable field resolved to `null` and no nullable ancestor
    /// was found to absorb it; `data` becomes `null` but `errors` survives.
    #[error("non-nullable field value is null")]
    NonNullableFieldValueIsNull,

    /// A subscription could not be resolved at all; surfaced to the
    /// client as `{"errors":[{"message":"unable to resolve"}]}`.
    #[error("unable to resolve")]
    UnableToResolve,

    /// Transport/connection failure, surfaced as
    /// `{"errors":[{"message":"connection error"}]}`.
    #[error("connection error")]
    Connection,
}

impl ResolveError {
    /// Whether this error should be rendered into the GraphQL `errors`
    /// array (all of them) as opposed to only logged. Kept as a method
    /// rather than inlined matching at call sites, since the mapping may
    /// grow additional internal-only variants later.
    #[must_use]
    pub const fn is_user_facing(&self) -> bool {
        true
    }
}
