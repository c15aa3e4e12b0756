//! Per-request state threaded through the resolver.

use crate::fetch::dataloader::DataLoader;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A single segment of the current response path: either a field name or an
/// array index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// A field name.
    Field(String),
    /// An array index.
    Index(usize),
}

impl std::fmt::Display for PathSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Field(name) => write!(f, "{name}"),
            Self::Index(i) => write!(f, "{i}"),
        }
    }
}

/// A source line/column used for error-location reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Position {
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
}

/// One resolve-domain error recorded alongside a successfully-produced (if
/// partial) `data` value, destined for the response envelope's `errors`
/// array.
#[derive(Debug, Clone)]
pub struct ResolveErrorEntry {
    /// Human-readable message.
    pub message: String,
    /// Response path at the point the error was recorded.
    pub path: Vec<PathSegment>,
    /// Source position, when the originating node carried one.
    pub position: Option<Position>,
}

/// Pops one path segment on drop, so `resolve_node` can push a field name or
/// array index before recursing and rely on early returns (`?`) still
/// leaving the path balanced.
pub struct PathGuard<'a> {
    ctx: &'a Context,
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        self.ctx.path.lock().pop();
    }
}

/// One enqueued incremental patch, ready to be rendered by the response
/// writer's streaming frame.
#[derive(Debug, Clone)]
pub struct Patch {
    /// Selects which patch template (operation) to render.
    pub index: usize,
    /// Response path at the point the patch was enqueued.
    pub path: Vec<PathSegment>,
    /// Additional path appended by the producing node (e.g. an array index
    /// inside a deferred element).
    pub extra_path: Vec<PathSegment>,
    /// The patch payload, already-rendered JSON bytes.
    pub data: Bytes,
}

/// Per-request state. Created fresh for each incoming operation and dropped
/// at the end of the request; never shared between concurrent requests.
pub struct Context {
    /// Cooperative cancellation signal. Every suspension point in the
    /// resolve pipeline must observe this.
    pub cancel: CancellationToken,

    /// Raw JSON bytes of the operation's variables.
    pub variables: Bytes,

    /// Request headers, canonicalized (lowercase) key to value(s).
    pub headers: HashMap<String, Vec<String>>,

    /// Arbitrary operation-scoped context values looked up by
    /// `OperationContext` template variables.
    pub operation_context: HashMap<String, String>,

    /// Multipart file map and uploaded file bytes, present only for
    /// file-upload requests. Wrapped in a lock (not `Option` fields
    /// directly) so the fetcher can take and clear them through a shared
    /// `&Context` without requiring exclusive access to the whole request.
    multipart: parking_lot::Mutex<Option<(serde_json::Value, HashMap<String, Bytes>)>>,

    /// Current response path, pushed/popped as the resolver descends. A
    /// lock rather than a plain field since `Context` is threaded through
    /// the resolve tree by shared reference.
    path: parking_lot::Mutex<Vec<PathSegment>>,

    /// Patches enqueued so far, in FIFO order.
    pub patches: parking_lot::Mutex<Vec<Patch>>,

    /// Resolve-domain errors recorded so far, in occurrence order.
    errors: parking_lot::Mutex<Vec<ResolveErrorEntry>>,

    /// Already-rendered upstream error objects (from `DataSource` response
    /// extraction), comma-joined bytes with no surrounding brackets, kept
    /// alongside `errors` so the writer doesn't need to reparse them.
    upstream_errors: parking_lot::Mutex<Vec<Bytes>>,

    /// Data loader bound to the current response layer, if batching is in
    /// effect for it.
    pub data_loader: Option<Arc<DataLoader>>,

    /// Opaque identifier used as a `tracing` span field so logs from
    /// concurrent requests stay distinguishable.
    pub request_id: String,
}

impl Context {
    /// Build a new request context.
    #[must_use]
    pub fn new(variables: Bytes, headers: HashMap<String, Vec<String>>) -> Self {
        Self {
            cancel: CancellationToken::new(),
            variables,
            headers,
            operation_context: HashMap::new(),
            multipart: parking_lot::Mutex::new(None),
            path: parking_lot::Mutex::new(Vec::new()),
            patches: parking_lot::Mutex::new(Vec::new()),
            errors: parking_lot::Mutex::new(Vec::new()),
            upstream_errors: parking_lot::Mutex::new(Vec::new()),
            data_loader: None,
            request_id: generate_request_id(),
        }
    }

    /// Look up a (possibly multi-valued) header, joined with `,`, the way
    /// `RequestHeader` template variables render it.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|values| values.join(","))
    }

    /// Fork a child context sharing the cancellation token, variables,
    /// headers and data loader, but with an independent path and patch
    /// queue. Used both to spawn concurrently-resolved workers and to hand
    /// an owned context to a task that must outlive the caller's stack
    /// frame (e.g. a data loader's batch-completion task).
    #[must_use]
    pub fn fork(&self) -> Self {
        Self {
            cancel: self.cancel.clone(),
            variables: self.variables.clone(),
            headers: self.headers.clone(),
            operation_context: self.operation_context.clone(),
            multipart: parking_lot::Mutex::new(None),
            path: parking_lot::Mutex::new(self.current_path()),
            patches: parking_lot::Mutex::new(Vec::new()),
            errors: parking_lot::Mutex::new(Vec::new()),
            upstream_errors: parking_lot::Mutex::new(Vec::new()),
            data_loader: self.data_loader.clone(),
            request_id: self.request_id.clone(),
        }
    }

    /// Fork a child context for a concurrently-resolved element (async array
    /// item, parallel fetch branch), extending the path by `extra`.
    #[must_use]
    pub fn fork_for_path(&self, extra: PathSegment) -> Self {
        let child = self.fork();
        child.path.lock().push(extra);
        child
    }

    /// Push a path segment, returning a guard that pops it again on drop
    /// (including on an early `?` return).
    pub fn push_path(&self, segment: PathSegment) -> PathGuard<'_> {
        self.path.lock().push(segment);
        PathGuard { ctx: self }
    }

    /// Snapshot the current response path.
    #[must_use]
    pub fn current_path(&self) -> Vec<PathSegment> {
        self.path.lock().clone()
    }

    /// Record a resolve-domain error at the current path.
    pub fn record_error(&self, message: impl Into<String>, position: Option<Position>) {
        self.errors.lock().push(ResolveErrorEntry {
            message: message.into(),
            path: self.current_path(),
            position,
        });
    }

    /// Drain and return all resolve-domain errors recorded so far, in
    /// occurrence order.
    pub fn drain_errors(&self) -> Vec<ResolveErrorEntry> {
        std::mem::take(&mut *self.errors.lock())
    }

    /// Record a non-empty upstream error blob (already-rendered error
    /// objects, comma-joined, no surrounding brackets) returned by a fetch.
    pub fn record_upstream_errors(&self, errors: Bytes) {
        if !errors.is_empty() {
            self.upstream_errors.lock().push(errors);
        }
    }

    /// Drain and return all upstream error blobs recorded so far.
    pub fn drain_upstream_errors(&self) -> Vec<Bytes> {
        std::mem::take(&mut *self.upstream_errors.lock())
    }

    /// Attach a multipart file upload map ahead of dispatch. `map` follows
    /// the GraphQL multipart request spec's `map` shape (field path to
    /// variable path); `files` holds each uploaded file's bytes keyed the
    /// same way.
    pub fn set_multipart(&self, map: serde_json::Value, files: HashMap<String, Bytes>) {
        *self.multipart.lock() = Some((map, files));
    }

    /// Take and clear the multipart upload, if one was attached. Clearing
    /// prevents a retried fetch from wrapping the body a second time.
    pub fn take_multipart(&self) -> Option<(serde_json::Value, HashMap<String, Bytes>)> {
        self.multipart.lock().take()
    }

    /// Enqueue a patch captured at the current path.
    pub fn enqueue_patch(&self, index: usize, extra_path: Vec<PathSegment>, data: Bytes) {
        self.patches.lock().push(Patch {
            index,
            path: self.current_path(),
            extra_path,
            data,
        });
    }

    /// Drain and return all patches enqueued so far, in enqueue order.
    pub fn drain_patches(&self) -> Vec<Patch> {
        std::mem::take(&mut *self.patches.lock())
    }
}

fn generate_request_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive_and_joins_values() {
        let mut headers = HashMap::new();
        headers.insert(
            "x-trace".to_string(),
            vec!["a".to_string(), "b".to_string()],
        );
        let ctx = Context::new(Bytes::from_static(b"{}"), headers);
        assert_eq!(ctx.header("X-Trace"), Some("a,b".to_string()));
        assert_eq!(ctx.header("missing"), None);
    }

    #[test]
    fn fork_for_path_extends_path_without_sharing_patches() {
        let ctx = Context::new(Bytes::from_static(b"{}"), HashMap::new());
        ctx.enqueue_patch(0, vec![], Bytes::from_static(b"null"));
        let child = ctx.fork_for_path(PathSegment::Index(2));
        assert_eq!(child.current_path(), vec![PathSegment::Index(2)]);
        assert!(child.drain_patches().is_empty());
        assert_eq!(ctx.drain_patches().len(), 1);
    }

    #[test]
    fn push_path_pops_on_drop_even_on_early_return() {
        let ctx = Context::new(Bytes::from_static(b"{}"), HashMap::new());
        {
            let _guard = ctx.push_path(PathSegment::Field("a".to_string()));
            assert_eq!(ctx.current_path(), vec![PathSegment::Field("a".to_string())]);
        }
        assert!(ctx.current_path().is_empty());
    }

    #[test]
    fn request_ids_are_unique() {
        let a = Context::new(Bytes::from_static(b"{}"), HashMap::new());
        let b = Context::new(Bytes::from_static(b"{}"), HashMap::new());
        assert_ne!(a.request_id, b.request_id);
    }
}
