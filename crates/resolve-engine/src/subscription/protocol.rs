//! `graphql-ws` control-frame encoding/decoding. These are small, fully
//! in-memory control messages (unlike upstream data responses), so plain
//! `serde_json::Value` is used rather than the byte-level scanner in
//! [`crate::json`].

use serde_json::{json, Value};
use std::collections::HashMap;

/// Build the `connection_init` message, carrying request headers as its
/// payload.
#[must_use]
pub fn connection_init(headers: &HashMap<String, Vec<String>>) -> Value {
    let payload: serde_json::Map<String, Value> = headers
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.join(","))))
        .collect();
    json!({ "type": "connection_init", "payload": Value::Object(payload) })
}

/// Build a `start` message for subscription `id`.
#[must_use]
pub fn start(id: &str, body: &Value) -> Value {
    json!({ "type": "start", "id": id, "payload": body })
}

/// Build a `stop` message for subscription `id`.
#[must_use]
pub fn stop(id: &str) -> Value {
    json!({ "type": "stop", "id": id })
}

/// A decoded server→client `graphql-ws` frame.
#[derive(Debug, Clone)]
pub enum IncomingFrame {
    ConnectionAck,
    ConnectionError { payload: Option<Value> },
    Data { id: String, payload: Value },
    Error { id: String, payload: Value },
    Complete { id: String },
    /// Anything this client doesn't need to act on (e.g. `ka` keepalives).
    Other,
}

/// Parse one text frame into an [`IncomingFrame`]. Malformed JSON or an
/// unrecognized `type` both fall back to `Other` rather than erroring — a
/// single bad frame shouldn't tear down the connection.
#[must_use]
pub fn parse_incoming(text: &str) -> IncomingFrame {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return IncomingFrame::Other;
    };
    let Some(frame_type) = value.get("type").and_then(Value::as_str) else {
        return IncomingFrame::Other;
    };
    match frame_type {
        "connection_ack" => IncomingFrame::ConnectionAck,
        "connection_error" => IncomingFrame::ConnectionError {
            payload: value.get("payload").cloned(),
        },
        "data" => match value.get("id").and_then(Value::as_str) {
            Some(id) => IncomingFrame::Data {
                id: id.to_string(),
                payload: value.get("payload").cloned().unwrap_or(Value::Null),
            },
            None => IncomingFrame::Other,
        },
        "error" => match value.get("id").and_then(Value::as_str) {
            Some(id) => IncomingFrame::Error {
                id: id.to_string(),
                payload: value.get("payload").cloned().unwrap_or(Value::Null),
            },
            None => IncomingFrame::Other,
        },
        "complete" => match value.get("id").and_then(Value::as_str) {
            Some(id) => IncomingFrame::Complete { id: id.to_string() },
            None => IncomingFrame::Other,
        },
        _ => IncomingFrame::Other,
    }
}

/// Wrap an `error` frame's payload into a `{"errors":[…]}` envelope,
/// per its JSON shape: an array of error objects is used as-is, anything
/// else is wrapped as the sole element.
#[must_use]
pub fn wrap_error_payload(payload: &Value) -> Value {
    match payload {
        Value::Array(_) => json!({ "errors": payload }),
        other => json!({ "errors": [other] }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_data_frame() {
        let frame = parse_incoming(r#"{"type":"data","id":"1","payload":{"x":1}}"#);
        assert!(matches!(frame, IncomingFrame::Data { id, .. } if id == "1"));
    }

    #[test]
    fn unknown_type_is_other() {
        assert!(matches!(parse_incoming(r#"{"type":"ka"}"#), IncomingFrame::Other));
        assert!(matches!(parse_incoming("not json"), IncomingFrame::Other));
    }

    #[test]
    fn wraps_array_payload_as_is() {
        let wrapped = wrap_error_payload(&json!([{"message": "a"}]));
        assert_eq!(wrapped["errors"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn wraps_object_payload_as_sole_element() {
        let wrapped = wrap_error_payload(&json!({"message": "a"}));
        assert_eq!(wrapped["errors"].as_array().unwrap().len(), 1);
        assert_eq!(wrapped["errors"][0]["message"], "a");
    }
}
