//! A single multiplexed `graphql-ws` client: one upstream connection per
//! distinct `(url, headers)` pair, fanned out to any number of local
//! subscribers.

use super::protocol::{self, IncomingFrame};
use crate::config::SubscriptionConfig;
use crate::context::Context;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use resolve_error::{ResolveError, SubscriptionError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// Parameters for one subscription request.
pub struct SubscribeOptions {
    /// Upstream WebSocket URL.
    pub url: String,
    /// Request headers, forwarded as the `connection_init` payload and as
    /// the dial's handshake headers.
    pub headers: HashMap<String, Vec<String>>,
    /// The GraphQL request body (`{query, variables, ...}`) sent as the
    /// `start` message's payload.
    pub body: Value,
}

struct Subscription {
    body: Value,
    next: mpsc::Sender<Vec<u8>>,
    cancel: tokio_util::sync::CancellationToken,
}

struct ConnectionHandler {
    new_subs: mpsc::Sender<Subscription>,
}

/// Holds one upstream connection per `handlerID = hash(url, headers)`,
/// multiplexing any number of local subscribers onto it.
pub struct WebSocketGraphQLSubscriptionClient {
    config: SubscriptionConfig,
    handlers: parking_lot::Mutex<HashMap<u64, ConnectionHandler>>,
    next_id: AtomicU64,
}

impl WebSocketGraphQLSubscriptionClient {
    /// Build a client. One instance should be shared process-wide.
    #[must_use]
    pub fn new(config: SubscriptionConfig) -> Self {
        Self {
            config,
            handlers: parking_lot::Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe, reusing an existing upstream connection for `options`'s
    /// `(url, headers)` pair if one is already live, otherwise dialing a
    /// new one. Delivered messages (or a `{"errors":[…]}` envelope on
    /// failure) arrive on `next`. Unsubscribe by cancelling `ctx.cancel`.
    pub async fn subscribe(
        self: &Arc<Self>,
        ctx: &Context,
        options: SubscribeOptions,
        next: mpsc::Sender<Vec<u8>>,
    ) {
        let handler_id = hash_handler_id(&options.url, &options.headers);
        let sub = Subscription {
            body: options.body.clone(),
            next: next.clone(),
            cancel: ctx.cancel.clone(),
        };

        let existing = self.handlers.lock().get(&handler_id).map(|h| h.new_subs.clone());
        if let Some(new_subs) = existing {
            if new_subs.send(sub).await.is_err() {
                deliver_connection_error(&next).await;
            }
            return;
        }

        match dial(&options).await {
            Ok((write, read)) => {
                let (new_subs_tx, new_subs_rx) = mpsc::channel(64);
                self.handlers.lock().insert(
                    handler_id,
                    ConnectionHandler {
                        new_subs: new_subs_tx.clone(),
                    },
                );
                let client = Arc::clone(self);
                tokio::spawn(async move {
                    client.run_connection(handler_id, write, read, new_subs_rx).await;
                });
                if new_subs_tx.send(sub).await.is_err() {
                    deliver_connection_error(&next).await;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, url = %options.url, "subscription dial failed");
                deliver_connection_error(&next).await;
            }
        }
    }

    async fn run_connection(
        self: Arc<Self>,
        handler_id: u64,
        mut write: WsWrite,
        mut read: WsRead,
        mut new_subs: mpsc::Receiver<Subscription>,
    ) {
        let mut subs: HashMap<String, Subscription> = HashMap::new();
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.read_timeout_ms));
        let mut reader_done = false;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let cancelled: Vec<String> = subs
                        .iter()
                        .filter(|(_, s)| s.cancel.is_cancelled())
                        .map(|(id, _)| id.clone())
                        .collect();
                    for id in cancelled {
                        subs.remove(&id);
                        let _ = write.send(Message::Text(protocol::stop(&id).to_string().into())).await;
                    }
                    if subs.is_empty() && reader_done {
                        break;
                    }
                }
                maybe_sub = new_subs.recv() => {
                    match maybe_sub {
                        Some(sub) => {
                            let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
                            let start = protocol::start(&id, &sub.body).to_string();
                            if write.send(Message::Text(start.into())).await.is_err() {
                                deliver_connection_error(&sub.next).await;
                            } else {
                                subs.insert(id, sub);
                            }
                        }
                        None if subs.is_empty() && reader_done => break,
                        None => {}
                    }
                }
                maybe_frame = read.next(), if !reader_done => {
                    match maybe_frame {
                        Some(Ok(Message::Text(text))) => {
                            handle_frame(&text, &mut subs).await;
                            if subs.is_empty() && reader_done {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            reader_done = true;
                            if subs.is_empty() {
                                break;
                            }
                            broadcast_connection_error(&subs).await;
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(_)) => {
                            reader_done = true;
                            broadcast_connection_error(&subs).await;
                            break;
                        }
                    }
                }
            }
        }

        let _ = write.close().await;
        self.handlers.lock().remove(&handler_id);
    }
}

async fn handle_frame(text: &str, subs: &mut HashMap<String, Subscription>) {
    match protocol::parse_incoming(text) {
        IncomingFrame::Data { id, payload } => {
            if let Some(sub) = subs.get(&id) {
                bounded_send(&sub.next, serde_json::json!({ "data": payload })).await;
            }
        }
        IncomingFrame::Error { id, payload } => {
            if let Some(sub) = subs.remove(&id) {
                bounded_send(&sub.next, protocol::wrap_error_payload(&payload)).await;
            }
        }
        IncomingFrame::Complete { id } => {
            subs.remove(&id);
        }
        IncomingFrame::ConnectionError { .. } => {
            broadcast_connection_error(subs).await;
            subs.clear();
        }
        IncomingFrame::ConnectionAck | IncomingFrame::Other => {}
    }
}

async fn broadcast_connection_error(subs: &HashMap<String, Subscription>) {
    for sub in subs.values() {
        deliver_connection_error(&sub.next).await;
    }
}

async fn deliver_connection_error(next: &mpsc::Sender<Vec<u8>>) {
    let envelope = serde_json::json!({ "errors": [{ "message": "connection error" }] });
    bounded_send(next, envelope).await;
}

async fn bounded_send(next: &mpsc::Sender<Vec<u8>>, value: Value) {
    let bytes = value.to_string().into_bytes();
    if tokio::time::timeout(Duration::from_secs(5), next.send(bytes))
        .await
        .is_err()
    {
        tracing::warn!("subscriber delivery timed out after 5s");
    }
}

fn hash_handler_id(url: &str, headers: &HashMap<String, Vec<String>>) -> u64 {
    let mut sorted: Vec<(&String, &Vec<String>)> = headers.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let mut key = url.to_string();
    for (k, v) in sorted {
        key.push('\n');
        key.push_str(k);
        key.push('=');
        key.push_str(&v.join(","));
    }
    crate::fetch::hash64(key.as_bytes())
}

async fn dial(options: &SubscribeOptions) -> Result<(WsWrite, WsRead), ResolveError> {
    let mut request = options
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| SubscriptionError::Handshake(e.to_string()))?;
    for (name, values) in &options.headers {
        if let Ok(header_name) =
            tokio_tungstenite::tungstenite::http::HeaderName::from_bytes(name.as_bytes())
        {
            if let Ok(header_value) =
                tokio_tungstenite::tungstenite::http::HeaderValue::from_str(&values.join(","))
            {
                request.headers_mut().insert(header_name, header_value);
            }
        }
    }
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        tokio_tungstenite::tungstenite::http::HeaderValue::from_static("graphql-ws"),
    );

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| SubscriptionError::Handshake(e.to_string()))?;
    let (mut write, mut read) = ws_stream.split();

    let init = protocol::connection_init(&options.headers).to_string();
    write
        .send(Message::Text(init.into()))
        .await
        .map_err(|e| SubscriptionError::Transport(e.to_string()))?;

    let ack = tokio::time::timeout(Duration::from_secs(3), read.next())
        .await
        .map_err(|_| SubscriptionError::AckTimeout)?
        .ok_or(SubscriptionError::AckTimeout)?
        .map_err(|e| SubscriptionError::Transport(e.to_string()))?;
    let Message::Text(text) = ack else {
        return Err(ResolveError::Subscription(SubscriptionError::AckTimeout));
    };
    match protocol::parse_incoming(&text) {
        IncomingFrame::ConnectionAck => {}
        _ => return Err(ResolveError::Subscription(SubscriptionError::AckTimeout)),
    }

    Ok((write, read))
}

/// Adapts a [`WebSocketGraphQLSubscriptionClient`] bound to a fixed upstream
/// URL into the engine's generic [`crate::fetch::SubscriptionDataSource`],
/// so a response plan's subscription fetch can use it like any other data
/// source.
pub struct GraphQLWsDataSource {
    client: Arc<WebSocketGraphQLSubscriptionClient>,
    url: String,
}

impl GraphQLWsDataSource {
    /// Build a data source that subscribes against `url` through `client`.
    #[must_use]
    pub fn new(client: Arc<WebSocketGraphQLSubscriptionClient>, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait::async_trait]
impl crate::fetch::SubscriptionDataSource for GraphQLWsDataSource {
    async fn start(
        &self,
        ctx: &Context,
        input: &[u8],
        next: mpsc::Sender<Vec<u8>>,
    ) -> Result<(), ResolveError> {
        let body: Value = serde_json::from_slice(input)
            .map_err(|e| SubscriptionError::Transport(e.to_string()))?;
        let options = SubscribeOptions {
            url: self.url.clone(),
            headers: ctx.headers.clone(),
            body,
        };
        self.client.subscribe(ctx, options, next).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_id_is_order_independent_over_headers() {
        let mut a = HashMap::new();
        a.insert("x".to_string(), vec!["1".to_string()]);
        a.insert("y".to_string(), vec!["2".to_string()]);
        let mut b = HashMap::new();
        b.insert("y".to_string(), vec!["2".to_string()]);
        b.insert("x".to_string(), vec!["1".to_string()]);
        assert_eq!(
            hash_handler_id("wss://example/graphql", &a),
            hash_handler_id("wss://example/graphql", &b)
        );
    }

    #[test]
    fn handler_id_distinguishes_urls() {
        let headers = HashMap::new();
        assert_ne!(
            hash_handler_id("wss://a", &headers),
            hash_handler_id("wss://b", &headers)
        );
    }
}
