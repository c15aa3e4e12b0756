//! Single-flight deduplicated execution of a [`SingleFetch`], plus upstream
//! response extraction.

use super::{hash64, DataSource, SingleFetch};
use crate::buf::BufPairPool;
use crate::config::ResolveConfig;
use crate::context::Context;
use crate::json::{self, PathElem};
use bytes::{Bytes, BytesMut};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use resolve_error::{FetchError, ResolveError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::Notify;

/// The outcome of one completed upstream call, shared read-only across all
/// single-flight waiters.
#[derive(Clone)]
struct FetchOutcome {
    data: Bytes,
    errors: Bytes,
    error: Option<String>,
}

struct InFlightEntry {
    notify: Notify,
    free_waiters: AtomicUsize,
    outcome: OnceLock<FetchOutcome>,
}

impl InFlightEntry {
    fn new() -> Self {
        Self {
            notify: Notify::new(),
            free_waiters: AtomicUsize::new(0),
            outcome: OnceLock::new(),
        }
    }
}

/// Executes [`SingleFetch`]s, deduplicating concurrent identical inputs via
/// an in-flight map keyed by a content hash.
///
/// The in-flight map is the only fetch-level cache shared across requests;
/// entries live only for the duration of one concurrent flight and are
/// removed as soon as the load completes, never across a suspension point
/// held under its own lock (`DashMap`'s per-shard locks are only held
/// inside `entry`/`remove` calls, never across the `await` on the shared
/// result).
pub struct Fetcher {
    config: ResolveConfig,
    in_flight: DashMap<u64, Arc<InFlightEntry>>,
    buf_pool: Arc<BufPairPool>,
}

impl Fetcher {
    /// Build a fetcher over the given configuration.
    #[must_use]
    pub fn new(config: ResolveConfig) -> Self {
        Self {
            config,
            in_flight: DashMap::new(),
            buf_pool: Arc::new(BufPairPool::new()),
        }
    }

    /// The configuration this fetcher was built with.
    #[must_use]
    pub fn config(&self) -> &ResolveConfig {
        &self.config
    }

    /// The process-wide buffer pool backing this fetcher's upstream reads;
    /// shared with the resolver so scratch buffers along the same request
    /// are drawn from the same free list.
    #[must_use]
    pub fn buf_pool(&self) -> &Arc<BufPairPool> {
        &self.buf_pool
    }

    /// Execute a single fetch, applying single-flight deduplication when
    /// enabled and not disallowed on this fetch.
    ///
    /// # Errors
    ///
    /// Returns the `DataSource`'s error, or a response-extraction failure.
    pub async fn fetch(
        &self,
        ctx: &Context,
        fetch: &SingleFetch,
        input: &[u8],
    ) -> Result<(Bytes, Bytes), ResolveError> {
        let allow_single_flight = self.config.single_flight_enabled && !fetch.disallow_single_flight;
        if !allow_single_flight {
            return self.load_and_extract(ctx, fetch, input).await;
        }

        let hash = hash64(input);
        loop {
            match self.in_flight.entry(hash) {
                Entry::Occupied(e) => {
                    let entry = e.get().clone();
                    drop(e);
                    entry.free_waiters.fetch_add(1, Ordering::AcqRel);
                    tracing::trace!(single_flight = true, hash, "waiting on in-flight fetch");
                    let result = loop {
                        if let Some(outcome) = entry.outcome.get() {
                            break outcome.clone();
                        }
                        let notified = entry.notify.notified();
                        if entry.outcome.get().is_some() {
                            continue;
                        }
                        notified.await;
                    };
                    entry.free_waiters.fetch_sub(1, Ordering::AcqRel);
                    return result.into();
                }
                Entry::Vacant(v) => {
                    let entry = Arc::new(InFlightEntry::new());
                    v.insert(entry.clone());
                    tracing::trace!(single_flight = false, hash, "dispatching fetch");
                    let outcome = self.load_and_extract(ctx, fetch, input).await;
                    let stored = match &outcome {
                        Ok((data, errors)) => FetchOutcome {
                            data: data.clone(),
                            errors: errors.clone(),
                            error: None,
                        },
                        Err(e) => FetchOutcome {
                            data: Bytes::new(),
                            errors: Bytes::new(),
                            error: Some(e.to_string()),
                        },
                    };
                    let _ = entry.outcome.set(stored);
                    entry.notify.notify_waiters();
                    self.in_flight.remove(&hash);
                    return outcome;
                }
            }
        }
    }

    /// Execute `fetch` directly, bypassing single-flight dedup. Used by the
    /// data loader, whose merged batch input is already deduplicated at the
    /// representation level and would not benefit from a second dedup pass.
    pub(crate) async fn load_and_extract(
        &self,
        ctx: &Context,
        fetch: &SingleFetch,
        input: &[u8],
    ) -> Result<(Bytes, Bytes), ResolveError> {
        let prepared = apply_multipart(ctx, input);
        let mut guard = self.buf_pool.acquire();
        fetch.data_source.load(ctx, &prepared, &mut guard.data).await?;
        let raw = guard.take().data.freeze();
        if !fetch.extract_graphql_response {
            return Ok((raw, Bytes::new()));
        }
        extract_response(&raw, fetch.extract_federation_entities).map_err(ResolveError::Fetch)
    }
}

impl From<FetchOutcome> for Result<(Bytes, Bytes), ResolveError> {
    fn from(outcome: FetchOutcome) -> Self {
        if let Some(message) = outcome.error {
            Err(ResolveError::Fetch(FetchError::DataSource(message)))
        } else {
            Ok((outcome.data, outcome.errors))
        }
    }
}

/// Walk the upstream JSON for `errors` and `data` in one pass; optionally
/// descend further into `data._entities` for federation batch responses.
///
/// # Errors
///
/// Returns [`FetchError::Extraction`] if the two keys can't be located.
pub fn extract_response(
    raw: &[u8],
    extract_federation_entities: bool,
) -> Result<(Bytes, Bytes), FetchError> {
    let mut data_bytes: Option<Bytes> = None;
    let mut errors_bytes: Option<Bytes> = None;

    json::each_key(raw, &["errors", "data"], |idx, bytes, _vtype| {
        if idx == 0 {
            errors_bytes = Some(render_errors_array(bytes));
        } else {
            data_bytes = Some(Bytes::copy_from_slice(bytes));
        }
    })
    .map_err(FetchError::Extraction)?;

    let data = match data_bytes {
        Some(data) if extract_federation_entities => {
            let located =
                json::get_raw(&data, &[PathElem::from("_entities")]).map_err(FetchError::Extraction)?;
            Bytes::copy_from_slice(located.bytes(&data))
        }
        Some(data) => data,
        None => Bytes::from_static(b"null"),
    };

    Ok((data, errors_bytes.unwrap_or_default()))
}

fn render_errors_array(errors: &[u8]) -> Bytes {
    let mut out = Vec::new();
    let mut first = true;
    let _ = json::array_each(errors, |_, entry, _vtype| {
        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(entry) {
            let filtered = filter_error_fields(value);
            if !first {
                out.push(b',');
            }
            first = false;
            if let Ok(bytes) = serde_json::to_vec(&filtered) {
                out.extend_from_slice(&bytes);
            }
        }
        Ok(())
    });
    Bytes::from(out)
}

fn filter_error_fields(value: serde_json::Value) -> serde_json::Value {
    let serde_json::Value::Object(map) = value else {
        return serde_json::json!({ "message": value.to_string() });
    };
    let mut out = serde_json::Map::new();
    for key in ["message", "locations", "path", "extensions"] {
        if let Some(v) = map.get(key) {
            out.insert(key.to_string(), v.clone());
        }
    }
    serde_json::Value::Object(out)
}

/// If a multipart upload was attached to `ctx`, rewrite `input` into a
/// `multipart/form-data` request body per the GraphQL multipart upload
/// convention, base64-encoding the whole body into the `body` field and
/// overwriting the `Content-Type` header. Clears the upload from `ctx` so a
/// retried fetch doesn't wrap it twice.
fn apply_multipart(ctx: &Context, input: &[u8]) -> Vec<u8> {
    let Some((map, files)) = ctx.take_multipart() else {
        return input.to_vec();
    };
    match build_multipart_body(input, &map, &files) {
        Ok(rewritten) => rewritten,
        Err(_) => input.to_vec(),
    }
}

fn build_multipart_body(
    input: &[u8],
    map: &serde_json::Value,
    files: &std::collections::HashMap<String, Bytes>,
) -> Result<Vec<u8>, FetchError> {
    use base64::Engine as _;

    let body_located =
        json::get_raw(input, &[PathElem::from("body")]).map_err(FetchError::Extraction)?;
    let mut body_value: serde_json::Value = serde_json::from_slice(body_located.bytes(input))
        .map_err(|e| FetchError::Multipart(e.to_string()))?;
    if let serde_json::Value::Object(obj) = &mut body_value {
        obj.remove("operationName");
    }
    let operations =
        serde_json::to_vec(&body_value).map_err(|e| FetchError::Multipart(e.to_string()))?;
    let map_bytes = serde_json::to_vec(map).map_err(|e| FetchError::Multipart(e.to_string()))?;

    let boundary = format!("resolve-engine-{:016x}", hash64(input));
    let mut multipart = Vec::new();
    write_text_field(&mut multipart, &boundary, "operations", &operations);
    write_text_field(&mut multipart, &boundary, "map", &map_bytes);
    for (name, bytes) in files {
        write_file_field(&mut multipart, &boundary, name, bytes);
    }
    multipart.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    let encoded = base64::engine::general_purpose::STANDARD.encode(&multipart);
    let body_bytes = serde_json::to_vec(&serde_json::Value::String(encoded))
        .map_err(|e| FetchError::Multipart(e.to_string()))?;
    let with_body =
        json::set(input, &[PathElem::from("body")], &body_bytes).map_err(FetchError::Extraction)?;

    let content_type = format!("multipart/form-data; boundary={boundary}");
    let ct_bytes = serde_json::to_vec(&serde_json::Value::String(content_type))
        .map_err(|e| FetchError::Multipart(e.to_string()))?;
    match json::get_raw(&with_body, &[PathElem::from("header")]) {
        Ok(_) => json::set(
            &with_body,
            &[PathElem::from("header"), PathElem::from("Content-Type")],
            &ct_bytes,
        )
        .map_err(FetchError::Extraction),
        Err(_) => {
            let header_obj = serde_json::to_vec(&serde_json::json!({ "Content-Type": content_type }))
                .map_err(|e| FetchError::Multipart(e.to_string()))?;
            json::set(&with_body, &[PathElem::from("header")], &header_obj).map_err(FetchError::Extraction)
        }
    }
}

fn write_text_field(out: &mut Vec<u8>, boundary: &str, name: &str, value: &[u8]) {
    out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    out.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
    );
    out.extend_from_slice(value);
    out.extend_from_slice(b"\r\n");
}

fn write_file_field(out: &mut Vec<u8>, boundary: &str, name: &str, value: &Bytes) {
    out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    out.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    out.extend_from_slice(value);
    out.extend_from_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::DataSource;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize as Counter, Ordering as Ord};

    struct CountingDataSource {
        calls: Arc<Counter>,
        response: &'static [u8],
    }

    #[async_trait]
    impl DataSource for CountingDataSource {
        async fn load(
            &self,
            _ctx: &Context,
            _input: &[u8],
            out: &mut BytesMut,
        ) -> Result<(), ResolveError> {
            self.calls.fetch_add(1, Ord::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            out.extend_from_slice(self.response);
            Ok(())
        }
    }

    fn make_fetch(calls: Arc<Counter>) -> SingleFetch {
        SingleFetch {
            buffer_id: 0,
            input_template: crate::template::InputTemplate::new(vec![]),
            data_source: Arc::new(CountingDataSource {
                calls,
                response: br#"{"data":{"x":1}}"#,
            }),
            disallow_single_flight: false,
            extract_graphql_response: true,
            extract_federation_entities: false,
            on_type_name: None,
        }
    }

    #[tokio::test]
    async fn single_flight_dedupes_concurrent_identical_fetches() {
        let calls = Arc::new(Counter::new(0));
        let fetcher = Arc::new(Fetcher::new(ResolveConfig::default()));
        let fetch = Arc::new(make_fetch(calls.clone()));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let fetcher = fetcher.clone();
            let fetch = fetch.clone();
            handles.push(tokio::spawn(async move {
                let ctx = Context::new(bytes::Bytes::from_static(b"{}"), HashMap::new());
                fetcher.fetch(&ctx, &fetch, b"same-input").await.unwrap()
            }));
        }
        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap());
        }
        assert_eq!(calls.load(Ord::SeqCst), 1);
        for (data, _errors) in &results {
            assert_eq!(data, &results[0].0);
        }
    }

    #[tokio::test]
    async fn disallowed_single_flight_calls_once_per_request() {
        let calls = Arc::new(Counter::new(0));
        let fetcher = Fetcher::new(ResolveConfig::default());
        let mut fetch = make_fetch(calls.clone());
        fetch.disallow_single_flight = true;
        let ctx = Context::new(bytes::Bytes::from_static(b"{}"), HashMap::new());
        fetcher.fetch(&ctx, &fetch, b"input-a").await.unwrap();
        fetcher.fetch(&ctx, &fetch, b"input-a").await.unwrap();
        assert_eq!(calls.load(Ord::SeqCst), 2);
    }

    #[test]
    fn extract_response_splits_errors_and_data() {
        let raw = br#"{"errors":[{"message":"bad","extra":"drop me"}],"data":{"x":1}}"#;
        let (data, errors) = extract_response(raw, false).unwrap();
        assert_eq!(&data[..], br#"{"x":1}"#);
        assert_eq!(&errors[..], br#"{"message":"bad"}"#);
    }

    #[test]
    fn extract_response_descends_into_entities_for_federation() {
        let raw = br#"{"data":{"_entities":[{"id":"1"},{"id":"2"}]}}"#;
        let (data, _errors) = extract_response(raw, true).unwrap();
        assert_eq!(&data[..], br#"[{"id":"1"},{"id":"2"}]"#);
    }

    #[test]
    fn multipart_rewrite_strips_operation_name_and_sets_content_type() {
        let input = br#"{"body":{"operationName":"Upload","query":"..."}}"#;
        let map = serde_json::json!({ "0": ["variables.file"] });
        let mut files = HashMap::new();
        files.insert("0".to_string(), Bytes::from_static(b"file-bytes"));
        let rewritten = build_multipart_body(input, &map, &files).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&rewritten).unwrap();
        assert!(value["header"]["Content-Type"]
            .as_str()
            .unwrap()
            .starts_with("multipart/form-data; boundary="));
        assert!(value["body"].is_string());
    }
}
