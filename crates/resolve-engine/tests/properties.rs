//! Property-based tests for the two round-trip invariants that hold
//! regardless of plan shape: Static-only templates render as exact
//! concatenation, and resolving an array synchronously or asynchronously
//! yields byte-identical output.

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use resolve_engine::config::ResolveConfig;
use resolve_engine::context::Context;
use resolve_engine::fetch::fetcher::Fetcher;
use resolve_engine::json::PathElem;
use resolve_engine::resolve::{Field, Node};
use resolve_engine::template::{InputTemplate, Segment};
use resolve_engine::Resolver;
use std::collections::HashMap;
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

fn ascii_chunk() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(prop::sample::select(&b"abcdefghij0123456789"[..]), 0..12)
}

proptest! {
    #[test]
    fn static_only_template_renders_exact_concatenation(chunks in proptest::collection::vec(ascii_chunk(), 1..6)) {
        let segments: Vec<Segment> = chunks.iter().cloned().map(Segment::Static).collect();
        let template = InputTemplate::new(segments);
        let mut out = BytesMut::new();
        let context = ctx();
        template.render(&context, b"{}", &mut out).unwrap();

        let expected: Vec<u8> = chunks.into_iter().flatten().collect();
        prop_assert_eq!(out.freeze().to_vec(), expected);
    }
}

fn object_plan(id: &str) -> serde_json::Value {
    serde_json::json!({ "id": id })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]
    #[test]
    fn async_array_resolve_is_byte_equal_to_sequential(
        ids in proptest::collection::vec("[a-z]{1,8}", 0..10),
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async move {
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

            let data: Vec<serde_json::Value> = ids.iter().map(|id| object_plan(id)).collect();
            let data_bytes = serde_json::to_vec(&data).unwrap();

            let sync_plan = Node::Array {
                nullable: false,
                path: vec![],
                item: item.clone(),
                resolve_asynchronous: false,
                stream: None,
            };
            let async_plan = Node::Array {
                nullable: false,
                path: vec![],
                item,
                resolve_asynchronous: true,
                stream: None,
            };

            let sync_out = resolver().resolve_graphql_response(&ctx(), &sync_plan, &data_bytes).await;
            let async_out = resolver().resolve_graphql_response(&ctx(), &async_plan, &data_bytes).await;

            prop_assert_eq!(sync_out, async_out);
            Ok(())
        })?;
    }
}
