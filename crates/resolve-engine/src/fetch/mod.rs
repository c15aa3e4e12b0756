//! Fetch orchestration: single-flight deduplicated single fetches (D), a
//! sibling-batching data loader (E), and the federation batch factory that
//! merges sibling inputs into one upstream call (F).

pub mod batch;
pub mod dataloader;
pub mod fetcher;

use crate::context::Context;
use async_trait::async_trait;
use bytes::BytesMut;
use resolve_error::ResolveError;

/// A remote data source, consumed opaquely by the fetcher. Implementations
/// typically wrap an HTTP client to a federated subgraph.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Execute `input` (an upstream request body, already rendered by the
    /// input template) and write the raw response body into `out`.
    async fn load(
        &self,
        ctx: &Context,
        input: &[u8],
        out: &mut BytesMut,
    ) -> Result<(), ResolveError>;
}

/// A remote subscription data source. Each message pushed on `next` is a
/// complete upstream response payload.
#[async_trait]
pub trait SubscriptionDataSource: Send + Sync {
    /// Start the subscription; returns once it's established (delivery
    /// continues asynchronously via `next`).
    async fn start(
        &self,
        ctx: &Context,
        input: &[u8],
        next: tokio::sync::mpsc::Sender<Vec<u8>>,
    ) -> Result<(), ResolveError>;
}

/// A fetch descriptor attached to an `Object` response node.
#[derive(Clone)]
pub enum Fetch {
    /// Execute one upstream call.
    Single(SingleFetch),
    /// Execute one upstream call that merges N prepared sibling inputs.
    Batch(BatchFetch),
    /// Execute several fetches concurrently, each on its own task.
    Parallel(Vec<Fetch>),
}

/// Describes how to execute and extract a single upstream call.
#[derive(Clone)]
pub struct SingleFetch {
    /// Identifies the result slot this fetch's output is stored under, so
    /// fields can reference it via `Field::buffer_id`.
    pub buffer_id: usize,
    /// Renders the upstream request body.
    pub input_template: crate::template::InputTemplate,
    /// The data source to call.
    pub data_source: std::sync::Arc<dyn DataSource>,
    /// Opt this fetch out of single-flight deduplication even when it's
    /// enabled globally.
    pub disallow_single_flight: bool,
    /// Extract `{errors, data}` from a standard GraphQL response envelope.
    pub extract_graphql_response: bool,
    /// After extracting `data`, further descend into `data._entities`.
    pub extract_federation_entities: bool,
    /// Only run this fetch when the narrowed parent's `__typename` matches.
    pub on_type_name: Option<String>,
}

/// A [`SingleFetch`] executed against a merged batch of sibling inputs.
#[derive(Clone)]
pub struct BatchFetch {
    /// The underlying single fetch, executed once against the merged input.
    pub single: SingleFetch,
    /// Merges N sibling inputs into one upstream request.
    pub batch_factory: std::sync::Arc<dyn batch::BatchFactory>,
}

/// A 64-bit content hash, used both by single-flight dedup and by the
/// federation batch factory's representation dedup.
#[must_use]
pub fn hash64(bytes: &[u8]) -> u64 {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(bytes);
    u64::from_be_bytes(digest[..8].try_into().expect("digest is at least 8 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash64_is_deterministic_and_distinguishes_inputs() {
        assert_eq!(hash64(b"abc"), hash64(b"abc"));
        assert_ne!(hash64(b"abc"), hash64(b"abd"));
    }
}
