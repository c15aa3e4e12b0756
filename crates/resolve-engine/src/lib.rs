//! A federated GraphQL resolve engine.
//!
//! Given a pre-built, read-only response plan (a tree of [`resolve::Node`]s
//! produced by an external planner) and an opaque [`fetch::DataSource`],
//! this crate walks the plan, dispatches upstream fetches (deduplicating
//! concurrent identical ones and batching sibling federation entity
//! lookups), and renders the result as a GraphQL response envelope —
//! including `@defer`/`@stream` incremental delivery and `graphql-ws`
//! subscriptions.
//!
//! The entry point is [`resolve::Resolver`].

pub mod buf;
pub mod config;
pub mod context;
pub mod fetch;
pub mod json;
pub mod resolve;
pub mod subscription;
pub mod template;
pub mod writer;

pub use config::ResolveConfig;
pub use context::Context;
pub use resolve::{Node, Resolver};
