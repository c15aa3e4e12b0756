//! The tree-walking resolver: consumes a [`node::Node`] response plan plus
//! a variables payload and produces a GraphQL response envelope, dispatching
//! fetches through the fetcher, data loader and batch factory along the way.

pub mod node;
mod resolver;

pub use node::{Defer, Field, Node, Stream};
pub use resolver::{Outcome, Resolver};
