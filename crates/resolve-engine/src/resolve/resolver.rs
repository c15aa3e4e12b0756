//! Tree walk over [`Node`]s: narrows data by path, runs fetches, recurses
//! into fields/elements, and collapses non-nullable failures to the nearest
//! nullable ancestor.

use super::node::{Field, Node, Stream};
use crate::context::{Context, PathSegment};
use crate::fetch::dataloader::DataLoader;
use crate::fetch::{Fetch, Fetcher};
use crate::json::{self, PathElem, ValueType};
use bytes::{Bytes, BytesMut};
use resolve_error::ResolveError;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The result of resolving one node, distinct from `ResolveError`: these are
/// internal signals the enclosing node collapses or forwards, never errors
/// handed back to the caller of the public entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The node wrote its rendering into the caller's buffer.
    Rendered,
    /// A non-nullable value was missing; the nearest nullable ancestor must
    /// collapse to `null`, or propagate further if it too is non-nullable.
    NonNullableNull,
    /// Every field of an Object was filtered out by `onTypeName`; the
    /// enclosing Object collapses without writing anything of its own.
    TypeNameSkipped,
}

#[derive(Default)]
struct ResultSet(HashMap<usize, Bytes>);

impl ResultSet {
    fn insert(&mut self, id: usize, data: Bytes) {
        self.0.insert(id, data);
    }

    fn buffer(&self, id: usize) -> Option<&Bytes> {
        self.0.get(&id)
    }

    fn extend(&mut self, other: Self) {
        self.0.extend(other.0);
    }
}

/// Resolves a response plan against a fetcher. Stateless beyond the shared
/// fetcher; one instance can serve any number of concurrent requests.
pub struct Resolver {
    fetcher: Arc<Fetcher>,
}

impl Resolver {
    /// Build a resolver over the given fetcher.
    #[must_use]
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self { fetcher }
    }

    /// Resolve a single-shot response: `{"data":…}` or
    /// `{"errors":[…],"data":…}`.
    #[tracing::instrument(skip_all, fields(request_id = %ctx.request_id))]
    pub async fn resolve_graphql_response(&self, ctx: &Context, plan: &Node, data: &[u8]) -> Bytes {
        let mut guard = self.fetcher.buf_pool().acquire();
        let outcome = resolve_node(ctx, &self.fetcher, plan, data, &mut guard.data).await;
        let data_bytes = match outcome {
            Ok(Outcome::Rendered) => guard.take().data.freeze(),
            Ok(Outcome::NonNullableNull | Outcome::TypeNameSkipped) => Bytes::from_static(b"null"),
            Err(e) => {
                ctx.record_error(e.to_string(), None);
                Bytes::from_static(b"null")
            }
        };
        crate::writer::write_envelope(&data_bytes, &ctx.drain_errors(), &ctx.drain_upstream_errors())
    }

    /// Resolve the initial response, then flush any `@defer`/`@stream`
    /// patches enqueued while producing it.
    ///
    /// # Errors
    ///
    /// Returns an error only if sending to `flush` itself is not possible in
    /// a way the caller should know about; a closed `flush` channel simply
    /// ends the loop early.
    pub async fn resolve_graphql_streaming_response(
        &self,
        ctx: &Context,
        plan: &Node,
        data: &[u8],
        flush: &tokio::sync::mpsc::Sender<Bytes>,
    ) -> Result<(), ResolveError> {
        let envelope = self.resolve_graphql_response(ctx, plan, data).await;
        if flush.send(envelope).await.is_err() {
            return Ok(());
        }

        let flush_interval = std::time::Duration::from_millis(
            self.fetcher.config().streaming.flush_interval_ms,
        );
        loop {
            let patches = ctx.drain_patches();
            if patches.is_empty() {
                return Ok(());
            }
            let frame = crate::writer::write_patch_frame(&patches);
            if flush.send(frame).await.is_err() {
                return Ok(());
            }
            tokio::select! {
                () = ctx.cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(flush_interval) => {}
            }
        }
    }

    /// Resolve a subscription: run the single-shot path once per message
    /// arriving on `messages`, flushing each resulting envelope.
    ///
    /// # Errors
    ///
    /// Never returns an error itself; terminates cleanly on cancellation or
    /// once `messages` closes.
    pub async fn resolve_graphql_subscription(
        &self,
        ctx: &Context,
        plan: &Node,
        mut messages: tokio::sync::mpsc::Receiver<Vec<u8>>,
        flush: &tokio::sync::mpsc::Sender<Bytes>,
    ) -> Result<(), ResolveError> {
        loop {
            tokio::select! {
                () = ctx.cancel.cancelled() => return Ok(()),
                message = messages.recv() => {
                    match message {
                        Some(payload) => {
                            let envelope = self.resolve_graphql_response(ctx, plan, &payload).await;
                            if flush.send(envelope).await.is_err() {
                                return Ok(());
                            }
                        }
                        None => return Ok(()),
                    }
                }
            }
        }
    }
}

fn resolve_node<'a>(
    ctx: &'a Context,
    fetcher: &'a Arc<Fetcher>,
    node: &'a Node,
    parent_data: &'a [u8],
    out: &'a mut BytesMut,
) -> BoxFuture<'a, Result<Outcome, ResolveError>> {
    Box::pin(async move {
        #[cfg(feature = "trace-path")]
        tracing::trace!(path = ?ctx.current_path(), "resolving node");

        match node {
            Node::Object {
                nullable,
                path,
                fields,
                fetch,
            } => resolve_object(ctx, fetcher, *nullable, path, fields, fetch, parent_data, out).await,
            Node::Array {
                nullable,
                path,
                item,
                resolve_asynchronous,
                stream,
            } => {
                resolve_array(
                    ctx,
                    fetcher,
                    *nullable,
                    path,
                    item,
                    *resolve_asynchronous,
                    *stream,
                    parent_data,
                    out,
                )
                .await
            }
            Node::String { path, nullable } => {
                Ok(resolve_primitive(ctx, parent_data, path, *nullable, ValueType::String, out))
            }
            Node::Boolean { path, nullable } => {
                Ok(resolve_primitive(ctx, parent_data, path, *nullable, ValueType::Boolean, out))
            }
            Node::Integer { path, nullable } | Node::Float { path, nullable } => {
                Ok(resolve_primitive(ctx, parent_data, path, *nullable, ValueType::Number, out))
            }
            Node::Null { defer } => {
                out.extend_from_slice(b"null");
                if let Some(d) = defer {
                    if d.enabled {
                        ctx.enqueue_patch(d.patch_index, Vec::new(), Bytes::from_static(b"null"));
                    }
                }
                Ok(Outcome::Rendered)
            }
            Node::EmptyObject => {
                out.extend_from_slice(b"{}");
                Ok(Outcome::Rendered)
            }
            Node::EmptyArray => {
                out.extend_from_slice(b"[]");
                Ok(Outcome::Rendered)
            }
        }
    })
}

/// Narrow `data` by `path`, returning the located bytes (quotes included for
/// strings) and its JSON type. A missing path or a path into the wrong
/// shape is reported as `(b"", Null)`, the same sentinel used for a literal
/// `null`, so callers only need one null-or-missing check.
fn narrow<'a>(data: &'a [u8], path: &[PathElem]) -> (&'a [u8], ValueType) {
    if path.is_empty() {
        let value_type = json::detect_type(data).unwrap_or(ValueType::Null);
        return (data, value_type);
    }
    match json::get_raw(data, path) {
        Ok(located) => (located.bytes(data), located.value_type),
        Err(_) => (b"", ValueType::Null),
    }
}

/// Named per the Design Notes' open question: treats "no bytes located" and
/// the literal `null` identically as the null trigger for nullability
/// collapse. Swapping this for a stricter "only a literal `null` counts"
/// policy is a one-line change confined to this function.
fn is_null_or_empty(bytes: &[u8]) -> bool {
    bytes.is_empty() || bytes == b"null"
}

#[allow(clippy::too_many_arguments)]
async fn resolve_object(
    ctx: &Context,
    fetcher: &Arc<Fetcher>,
    nullable: bool,
    path: &[PathElem],
    fields: &[Field],
    fetch: &Option<Fetch>,
    parent_data: &[u8],
    out: &mut BytesMut,
) -> Result<Outcome, ResolveError> {
    let (narrowed, _value_type) = narrow(parent_data, path);
    if is_null_or_empty(narrowed) {
        if nullable {
            out.extend_from_slice(b"null");
            return Ok(Outcome::Rendered);
        }
        ctx.record_error("non-nullable field value is null", None);
        return Ok(Outcome::NonNullableNull);
    }

    let type_name = read_type_name(narrowed);
    let filtered_fetch = fetch
        .as_ref()
        .and_then(|f| filter_object_fetch(f, fields, type_name.as_deref()));

    let result_set = match filtered_fetch {
        Some(filtered) => match run_fetch(ctx, fetcher, &filtered, narrowed).await {
            Ok(set) => Some(set),
            Err(e) => {
                ctx.record_error(e.to_string(), None);
                if nullable {
                    out.extend_from_slice(b"null");
                    return Ok(Outcome::Rendered);
                }
                return Ok(Outcome::NonNullableNull);
            }
        },
        None => None,
    };

    let mut scratch_guard = fetcher.buf_pool().acquire();
    let mut any_rendered = false;
    let mut any_skipped = false;
    let mut first = true;

    for field in fields {
        if let Some(expected) = &field.on_type_name {
            if type_name.as_deref() != Some(expected.as_str()) {
                any_skipped = true;
                continue;
            }
        }

        let field_data: &[u8] = match (field.buffer_id, &result_set) {
            (Some(id), Some(set)) => set.buffer(id).map_or(b"".as_slice(), |b| b.as_ref()),
            _ => narrowed,
        };

        if let Some(defer) = field.defer.filter(|d| d.enabled) {
            write_field_prefix(&mut scratch_guard.data, &mut first, &field.name);
            scratch_guard.data.extend_from_slice(b"null");
            any_rendered = true;

            let mut deferred_guard = fetcher.buf_pool().acquire();
            let _guard = ctx.push_path(PathSegment::Field(field.name.clone()));
            if let Ok(Outcome::Rendered) =
                resolve_node(ctx, fetcher, &field.value, field_data, &mut deferred_guard.data).await
            {
                ctx.enqueue_patch(
                    defer.patch_index,
                    Vec::new(),
                    Bytes::copy_from_slice(&deferred_guard.data),
                );
            }
            continue;
        }

        let mut field_guard = fetcher.buf_pool().acquire();
        let outcome = {
            let _guard = ctx.push_path(PathSegment::Field(field.name.clone()));
            resolve_node(ctx, fetcher, &field.value, field_data, &mut field_guard.data).await?
        };

        match outcome {
            Outcome::Rendered => {
                write_field_prefix(&mut scratch_guard.data, &mut first, &field.name);
                scratch_guard.data.extend_from_slice(&field_guard.data);
                any_rendered = true;
            }
            Outcome::NonNullableNull => {
                if nullable {
                    out.extend_from_slice(b"null");
                    return Ok(Outcome::Rendered);
                }
                return Ok(Outcome::NonNullableNull);
            }
            Outcome::TypeNameSkipped => any_skipped = true,
        }
    }

    if any_rendered {
        out.extend_from_slice(b"{");
        out.extend_from_slice(&scratch_guard.data);
        out.extend_from_slice(b"}");
        Ok(Outcome::Rendered)
    } else if any_skipped {
        Ok(Outcome::TypeNameSkipped)
    } else if nullable {
        out.extend_from_slice(b"{}");
        Ok(Outcome::Rendered)
    } else {
        ctx.record_error("object resolved with no renderable fields", None);
        Ok(Outcome::NonNullableNull)
    }
}

fn write_field_prefix(out: &mut BytesMut, first: &mut bool, name: &str) {
    if !*first {
        out.extend_from_slice(b",");
    }
    *first = false;
    out.extend_from_slice(b"\"");
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b"\":");
}

fn read_type_name(data: &[u8]) -> Option<String> {
    let located = json::get(data, &[PathElem::from("__typename")]).ok()?;
    if located.value_type == ValueType::String {
        Some(String::from_utf8_lossy(located.bytes(data)).into_owned())
    } else {
        None
    }
}

/// Keep a fetch only if one of its buffers serves a field that will
/// actually render for `type_name`. A missing `type_name` (no `__typename`
/// in the narrowed data to discriminate against) returns the fetch
/// unfiltered, since there's nothing to filter against.
fn filter_object_fetch(fetch: &Fetch, fields: &[Field], type_name: Option<&str>) -> Option<Fetch> {
    let Some(type_name) = type_name else {
        return Some(fetch.clone());
    };
    let mut required_buffer_ids = std::collections::HashSet::new();
    for field in fields {
        let renders_for_type = field
            .on_type_name
            .as_deref()
            .map_or(true, |want| want == type_name);
        if renders_for_type {
            if let Some(id) = field.buffer_id {
                required_buffer_ids.insert(id);
            }
        }
    }
    filter_fetch_by_required_buffers(fetch, &required_buffer_ids)
}

fn filter_fetch_by_required_buffers(
    fetch: &Fetch,
    required_buffer_ids: &std::collections::HashSet<usize>,
) -> Option<Fetch> {
    match fetch {
        Fetch::Single(sf) => required_buffer_ids.contains(&sf.buffer_id).then(|| fetch.clone()),
        Fetch::Batch(bf) => required_buffer_ids
            .contains(&bf.single.buffer_id)
            .then(|| fetch.clone()),
        Fetch::Parallel(list) => {
            let filtered: Vec<Fetch> = list
                .iter()
                .filter_map(|f| filter_fetch_by_required_buffers(f, required_buffer_ids))
                .collect();
            if filtered.is_empty() {
                None
            } else {
                Some(Fetch::Parallel(filtered))
            }
        }
    }
}

fn run_fetch<'a>(
    ctx: &'a Context,
    fetcher: &'a Arc<Fetcher>,
    fetch: &'a Fetch,
    parent_data: &'a [u8],
) -> BoxFuture<'a, Result<ResultSet, ResolveError>> {
    Box::pin(async move {
        match fetch {
            Fetch::Single(sf) => {
                let mut input_guard = fetcher.buf_pool().acquire();
                sf.input_template.render(ctx, parent_data, &mut input_guard.data)?;
                let (data, errors) = fetcher.fetch(ctx, sf, &input_guard.data).await?;
                ctx.record_upstream_errors(errors);
                let mut set = ResultSet::default();
                set.insert(sf.buffer_id, data);
                Ok(set)
            }
            Fetch::Batch(bf) => {
                let mut input_guard = fetcher.buf_pool().acquire();
                bf.single.input_template.render(ctx, parent_data, &mut input_guard.data)?;
                let input = input_guard.take().data.freeze();
                let (data, errors) = if fetcher.config().data_loader_enabled {
                    if let Some(loader) = &ctx.data_loader {
                        loader.load(ctx, input).await?
                    } else {
                        fetcher.load_and_extract(ctx, &bf.single, &input).await?
                    }
                } else {
                    fetcher.load_and_extract(ctx, &bf.single, &input).await?
                };
                ctx.record_upstream_errors(errors);
                let mut set = ResultSet::default();
                set.insert(bf.single.buffer_id, data);
                Ok(set)
            }
            Fetch::Parallel(fetches) => {
                let mut handles = Vec::with_capacity(fetches.len());
                for f in fetches {
                    let child_ctx = ctx.fork();
                    let fetcher = fetcher.clone();
                    let f = f.clone();
                    let parent_owned = Bytes::copy_from_slice(parent_data);
                    handles.push(tokio::spawn(async move {
                        let result = run_fetch(&child_ctx, &fetcher, &f, &parent_owned).await;
                        (result, child_ctx)
                    }));
                }
                let mut set = ResultSet::default();
                for handle in handles {
                    let (result, child_ctx) =
                        handle.await.map_err(|_| ResolveError::Connection)?;
                    for entry in child_ctx.drain_errors() {
                        ctx.record_error(entry.message, entry.position);
                    }
                    for blob in child_ctx.drain_upstream_errors() {
                        ctx.record_upstream_errors(blob);
                    }
                    set.extend(result?);
                }
                Ok(set)
            }
        }
    })
}

fn resolve_primitive(
    ctx: &Context,
    parent_data: &[u8],
    path: &[PathElem],
    nullable: bool,
    expected: ValueType,
    out: &mut BytesMut,
) -> Outcome {
    let (narrowed, value_type) = narrow(parent_data, path);
    if is_null_or_empty(narrowed) {
        if nullable {
            out.extend_from_slice(b"null");
            return Outcome::Rendered;
        }
        ctx.record_error("non-nullable field value is null", None);
        return Outcome::NonNullableNull;
    }
    if value_type != expected {
        ctx.record_error(
            format!("expected {expected:?}, found {value_type:?}"),
            None,
        );
        if nullable {
            out.extend_from_slice(b"null");
            return Outcome::Rendered;
        }
        return Outcome::NonNullableNull;
    }
    out.extend_from_slice(narrowed);
    Outcome::Rendered
}

#[allow(clippy::too_many_arguments)]
async fn resolve_array(
    ctx: &Context,
    fetcher: &Arc<Fetcher>,
    nullable: bool,
    path: &[PathElem],
    item: &Arc<Node>,
    resolve_asynchronous: bool,
    stream: Option<Stream>,
    parent_data: &[u8],
    out: &mut BytesMut,
) -> Result<Outcome, ResolveError> {
    let (narrowed, value_type) = narrow(parent_data, path);
    if is_null_or_empty(narrowed) {
        if nullable {
            out.extend_from_slice(b"null");
            return Ok(Outcome::Rendered);
        }
        ctx.record_error("non-nullable array value is null", None);
        return Ok(Outcome::NonNullableNull);
    }
    if value_type != ValueType::Array {
        ctx.record_error(format!("expected Array, found {value_type:?}"), None);
        if nullable {
            out.extend_from_slice(b"null");
            return Ok(Outcome::Rendered);
        }
        return Ok(Outcome::NonNullableNull);
    }

    let mut elements: Vec<Bytes> = Vec::new();
    json::array_each(narrowed, |_, bytes, _vtype| {
        elements.push(Bytes::copy_from_slice(bytes));
        Ok(())
    })
    .map_err(ResolveError::Json)?;

    if elements.is_empty() {
        out.extend_from_slice(b"[]");
        return Ok(Outcome::Rendered);
    }

    let total = elements.len();
    let stream_cfg = stream.filter(|s| s.enabled);
    let initial_batch = stream_cfg.map_or(total, |s| s.initial_batch_size.min(total));

    let loader = batch_fetch_loader(item, fetcher, total);

    let mut rendered: Vec<Option<crate::buf::PooledBufPair>> =
        (0..initial_batch).map(|_| None).collect();
    let mut collapse: Option<bool> = None;

    if resolve_asynchronous && stream_cfg.is_none() && loader.is_none() {
        let mut handles = Vec::with_capacity(initial_batch);
        for (idx, element) in elements.iter().take(initial_batch).cloned().enumerate() {
            let child_ctx = ctx.fork_for_path(PathSegment::Index(idx));
            let fetcher = fetcher.clone();
            let item = item.clone();
            handles.push(tokio::spawn(async move {
                let mut buf = fetcher.buf_pool().acquire();
                let outcome = resolve_node(&child_ctx, &fetcher, &item, &element, &mut buf.data).await;
                (outcome, buf, child_ctx)
            }));
        }
        for (idx, handle) in handles.into_iter().enumerate() {
            let (outcome, buf, child_ctx) = handle.await.map_err(|_| ResolveError::Connection)?;
            merge_child_context(ctx, &child_ctx);
            match outcome? {
                Outcome::Rendered | Outcome::TypeNameSkipped => rendered[idx] = Some(buf),
                Outcome::NonNullableNull => collapse = Some(nullable),
            }
        }
    } else {
        for (idx, element) in elements.iter().take(initial_batch).enumerate() {
            let mut child_ctx = ctx.fork_for_path(PathSegment::Index(idx));
            if let Some(loader) = &loader {
                child_ctx.data_loader = Some(loader.clone());
            }
            let mut buf = fetcher.buf_pool().acquire();
            let outcome = resolve_node(&child_ctx, fetcher, item, element, &mut buf.data).await?;
            merge_child_context(ctx, &child_ctx);
            match outcome {
                Outcome::Rendered | Outcome::TypeNameSkipped => rendered[idx] = Some(buf),
                Outcome::NonNullableNull => {
                    collapse = Some(nullable);
                    break;
                }
            }
        }
    }

    if let Some(is_nullable) = collapse {
        if is_nullable {
            out.extend_from_slice(b"null");
            return Ok(Outcome::Rendered);
        }
        return Ok(Outcome::NonNullableNull);
    }

    out.extend_from_slice(b"[");
    let mut first = true;
    for slot in rendered.into_iter().flatten() {
        if !first {
            out.extend_from_slice(b",");
        }
        first = false;
        out.extend_from_slice(&slot.data);
    }
    out.extend_from_slice(b"]");

    if let Some(stream_cfg) = stream_cfg {
        for (idx, element) in elements.iter().enumerate().skip(initial_batch) {
            let child_ctx = ctx.fork_for_path(PathSegment::Index(idx));
            let mut buf = fetcher.buf_pool().acquire();
            let outcome = resolve_node(&child_ctx, fetcher, item, element, &mut buf.data).await?;
            merge_child_context(ctx, &child_ctx);
            if matches!(outcome, Outcome::Rendered) {
                ctx.enqueue_patch(
                    stream_cfg.patch_index,
                    vec![PathSegment::Index(idx)],
                    Bytes::copy_from_slice(&buf.data),
                );
            }
        }
    }

    Ok(Outcome::Rendered)
}

/// If `item` is an Object carrying a `Batch` fetch and the data loader is
/// enabled, build a data loader sized to the array's element count — the
/// array resolution step is exactly the place that knows that count.
fn batch_fetch_loader(item: &Node, fetcher: &Arc<Fetcher>, total: usize) -> Option<Arc<DataLoader>> {
    if !fetcher.config().data_loader_enabled {
        return None;
    }
    let Node::Object {
        fetch: Some(Fetch::Batch(bf)),
        ..
    } = item
    else {
        return None;
    };
    Some(Arc::new(DataLoader::new(
        total,
        fetcher.clone(),
        bf.batch_factory.clone(),
        bf.single.clone(),
    )))
}

/// Propagate a forked child context's recorded errors/upstream
/// errors/patches back to its parent once the child's subtree is done.
fn merge_child_context(parent: &Context, child: &Context) {
    for entry in child.drain_errors() {
        parent.record_error(entry.message, entry.position);
    }
    for blob in child.drain_upstream_errors() {
        parent.record_upstream_errors(blob);
    }
    parent.patches.lock().extend(child.drain_patches());
}
