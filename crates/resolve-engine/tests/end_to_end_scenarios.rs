//! The literal end-to-end scenarios exercised against the public
//! `Resolver`/subscription API, not any single component in isolation.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use resolve_engine::config::ResolveConfig;
use resolve_engine::context::Context;
use resolve_engine::fetch::batch::FederationBatchFactory;
use resolve_engine::fetch::fetcher::Fetcher;
use resolve_engine::fetch::{BatchFetch, DataSource, Fetch, SingleFetch};
use resolve_engine::json::PathElem;
use resolve_engine::resolve::{Defer, Field, Node};
use resolve_engine::template::InputTemplate;
use resolve_engine::Resolver;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn field(name: &str, value: Node) -> Field {
    Field {
        name: name.to_string(),
        value,
        position: Default::default(),
        buffer_id: None,
        on_type_name: None,
        defer: None,
        stream: None,
    }
}

fn resolver() -> Resolver {
    Resolver::new(Arc::new(Fetcher::new(ResolveConfig::default())))
}

fn ctx() -> Context {
    Context::new(Bytes::from_static(b"{}"), HashMap::new())
}

/// A single string field renders straight through with no wrapping errors.
#[tokio::test]
async fn single_field() {
    let plan = Node::Object {
        nullable: false,
        path: vec![],
        fields: vec![field(
            "x",
            Node::String {
                path: vec![PathElem::from("x")],
                nullable: true,
            },
        )],
        fetch: None,
    };
    let envelope = resolver()
        .resolve_graphql_response(&ctx(), &plan, br#"{"x":"a"}"#)
        .await;
    assert_eq!(&envelope[..], br#"{"data":{"x":"a"}}"#);
}

/// A deferred field renders as `null` in the initial flush, then its real
/// value arrives as a separate patch frame.
#[tokio::test]
async fn deferred_null() {
    let plan = Node::Object {
        nullable: false,
        path: vec![],
        fields: vec![field(
            "x",
            Node::Null {
                defer: Some(Defer {
                    enabled: true,
                    patch_index: 0,
                }),
            },
        )],
        fetch: None,
    };
    let context = ctx();
    let (flush_tx, mut flush_rx) = tokio::sync::mpsc::channel(8);
    resolver()
        .resolve_graphql_streaming_response(&context, &plan, b"{}", &flush_tx)
        .await
        .unwrap();
    drop(flush_tx);

    let initial = flush_rx.recv().await.unwrap();
    let initial: serde_json::Value = serde_json::from_slice(&initial).unwrap();
    assert!(initial["data"]["x"].is_null());

    let patch_frame = flush_rx.recv().await.unwrap();
    let patches: serde_json::Value = serde_json::from_slice(&patch_frame).unwrap();
    assert_eq!(patches[0]["path"], "/x");
    assert_eq!(patches[0]["value"], "null");
    assert!(flush_rx.recv().await.is_none());
}

/// An async array of objects preserves input order in the output even
/// though each element resolves on its own spawned task.
#[tokio::test]
async fn async_array() {
    let item = Arc::new(Node::Object {
        nullable: false,
        path: vec![],
        fields: vec![field(
            "id",
            Node::String {
                path: vec![PathElem::from("id")],
                nullable: false,
            },
        )],
        fetch: None,
    });
    let plan = Node::Array {
        nullable: false,
        path: vec![],
        item,
        resolve_asynchronous: true,
        stream: None,
    };
    let envelope = resolver()
        .resolve_graphql_response(&ctx(), &plan, br#"[{"id":"a"},{"id":"b"},{"id":"c"}]"#)
        .await;
    assert_eq!(
        &envelope[..],
        br#"{"data":[{"id":"a"},{"id":"b"},{"id":"c"}]}"#
    );
}

struct EntitiesDataSource {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl DataSource for EntitiesDataSource {
    async fn load(&self, _ctx: &Context, input: &[u8], out: &mut BytesMut) -> Result<(), resolve_error::ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let located = resolve_engine::json::get_raw(
            input,
            &[
                PathElem::from("body"),
                PathElem::from("variables"),
                PathElem::from("representations"),
            ],
        )
        .unwrap();
        let mut entities = Vec::from(b"[".as_slice());
        let mut first = true;
        resolve_engine::json::array_each(located.bytes(input), |_, rep, _vtype| {
            if !first {
                entities.push(b',');
            }
            first = false;
            let id = resolve_engine::json::get_raw(rep, &[PathElem::from("id")]).unwrap();
            entities.extend_from_slice(b"{\"id\":");
            entities.extend_from_slice(id.bytes(rep));
            entities.push(b'}');
            Ok(())
        })
        .unwrap();
        entities.push(b']');
        out.extend_from_slice(format!(r#"{{"data":{{"_entities":{}}}}}"#, String::from_utf8(entities).unwrap()).as_bytes());
        Ok(())
    }
}

fn representation_template() -> InputTemplate {
    InputTemplate::new(vec![
        resolve_engine::template::Segment::Static(
            br#"{"body":{"variables":{"representations":["#.to_vec(),
        ),
        resolve_engine::template::Segment::Variable(resolve_engine::template::Variable {
            source: resolve_engine::template::VariableSource::Object,
            path: vec![],
            expected_type: resolve_engine::template::ExpectedType::Object,
            element_type: None,
            flags: resolve_engine::template::RenderFlags {
                as_plain_value: true,
                ..Default::default()
            },
        }),
        resolve_engine::template::Segment::Static(b"]}}}".to_vec()),
    ])
}

/// Driven through a real array → object → batch-fetch plan rather than the
/// data loader in isolation: three siblings, two distinct representations,
/// one upstream call, duplicate representation gets the duplicate's bytes
/// back.
#[tokio::test]
async fn federation_batch_through_full_resolve() {
    let calls = Arc::new(AtomicUsize::new(0));
    let single = SingleFetch {
        buffer_id: 0,
        input_template: representation_template(),
        data_source: Arc::new(EntitiesDataSource {
            calls: calls.clone(),
        }),
        disallow_single_flight: true,
        extract_graphql_response: true,
        extract_federation_entities: true,
        on_type_name: None,
    };
    let mut id_field = field(
        "id",
        Node::String {
            path: vec![PathElem::from("id")],
            nullable: false,
        },
    );
    id_field.buffer_id = Some(0);
    let item = Arc::new(Node::Object {
        nullable: false,
        path: vec![],
        fields: vec![id_field],
        fetch: Some(Fetch::Batch(BatchFetch {
            single,
            batch_factory: Arc::new(FederationBatchFactory),
        })),
    });
    let plan = Node::Array {
        nullable: false,
        path: vec![],
        item,
        resolve_asynchronous: false,
        stream: None,
    };

    let data = br#"[
        {"__typename":"User","id":"1"},
        {"__typename":"User","id":"2"},
        {"__typename":"User","id":"1"}
    ]"#;
    let envelope = resolver().resolve_graphql_response(&ctx(), &plan, data).await;
    let value: serde_json::Value = serde_json::from_slice(&envelope).unwrap();
    assert_eq!(value["data"][0]["id"], "1");
    assert_eq!(value["data"][1]["id"], "2");
    assert_eq!(value["data"][2]["id"], "1");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// A `graphql-ws` `error` frame is delivered to the subscriber as a
/// `{"errors":[…]}` envelope, against a real local WebSocket server.
#[tokio::test]
async fn subscription_error_frame() {
    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        // connection_init
        let _ = ws.next().await;
        ws.send(Message::Text(r#"{"type":"connection_ack"}"#.to_string().into()))
            .await
            .unwrap();
        // start
        let _ = ws.next().await;
        ws.send(Message::Text(
            r#"{"type":"error","id":"1","payload":[{"message":"bad"}]}"#
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    });

    let client = Arc::new(resolve_engine::subscription::WebSocketGraphQLSubscriptionClient::new(
        Default::default(),
    ));
    let source = resolve_engine::subscription::GraphQLWsDataSource::new(
        client,
        format!("ws://{addr}"),
    );

    let request_ctx = ctx();
    let (next_tx, mut next_rx) = tokio::sync::mpsc::channel(8);
    resolve_engine::fetch::SubscriptionDataSource::start(
        &source,
        &request_ctx,
        br#"{"query":"subscription{x}"}"#,
        next_tx,
    )
    .await
    .unwrap();

    let message = tokio::time::timeout(std::time::Duration::from_secs(2), next_rx.recv())
        .await
        .unwrap()
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&message).unwrap();
    assert_eq!(value["errors"][0]["message"], "bad");
}
