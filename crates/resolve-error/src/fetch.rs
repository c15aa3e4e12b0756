//! Errors raised by the fetcher, data loader, and batch factory.

/// Failure executing or demultiplexing an upstream fetch.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The `DataSource` implementation returned an error.
    #[error("data source failed: {0}")]
    DataSource(String),

    /// Upstream response could not be decomposed into `errors`/`data`
    /// (or `data._entities`).
    #[error("failed to extract upstream response: {0}")]
    Extraction(#[from] super::json::JsonPathError),

    /// A batched response's entity count did not match the number of
    /// representations sent; positions in the two arrays are expected to
    /// correspond 1:1.
    #[error("entity count mismatch: sent {sent}, received {received}")]
    EntityCountMismatch {
        /// Representations sent upstream.
        sent: usize,
        /// Entities present in the `_entities` response array.
        received: usize,
    },

    /// A data loader was constructed with a `total_num` that did not match
    /// the number of siblings that actually called `load`.
    #[error("data loader sibling count mismatch: declared {declared}, observed {observed}")]
    DataLoaderCountMismatch {
        /// Count declared at construction.
        declared: usize,
        /// Count of `load` calls actually observed.
        observed: usize,
    },

    /// The request was cancelled (`ctx.cancel`) before a result arrived.
    #[error("request cancelled")]
    Cancelled,

    /// Multipart request assembly failed (missing `ctx.map`/`ctx.files`
    /// invariant, or base64/content-type rewrite failure).
    #[error("multipart assembly failed: {0}")]
    Multipart(String),
}
