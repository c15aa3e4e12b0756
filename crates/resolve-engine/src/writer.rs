//! Serializes resolved data into response envelopes: single-shot
//! `{errors?, data}` objects, an errors-only variant for requests that never
//! reach resolution, and streaming patch frames for `@defer`/`@stream`.

use crate::context::{Patch, PathSegment, ResolveErrorEntry};
use bytes::{Bytes, BytesMut};

/// Build the single-shot envelope `{"errors":[…],"data":…}`, omitting the
/// `errors` key entirely when there are none.
#[must_use]
pub fn write_envelope(
    data: &[u8],
    errors: &[ResolveErrorEntry],
    upstream_errors: &[Bytes],
) -> Bytes {
    let mut out = BytesMut::new();
    out.extend_from_slice(b"{");
    if !errors.is_empty() || upstream_errors.iter().any(|e| !e.is_empty()) {
        out.extend_from_slice(b"\"errors\":[");
        write_errors_body(&mut out, errors, upstream_errors);
        out.extend_from_slice(b"],");
    }
    out.extend_from_slice(b"\"data\":");
    out.extend_from_slice(data);
    out.extend_from_slice(b"}");
    out.freeze()
}

/// Build an errors-only envelope, `data` omitted entirely. Used when a
/// request fails before a response plan is even available to resolve.
#[must_use]
pub fn write_errors_only(errors: &[ResolveErrorEntry]) -> Bytes {
    let mut out = BytesMut::new();
    out.extend_from_slice(b"{\"errors\":[");
    write_errors_body(&mut out, errors, &[]);
    out.extend_from_slice(b"]}");
    out.freeze()
}

/// Render a batch of enqueued patches as one streaming frame:
/// `[{"op":…,"path":…,"value":…},…]`.
#[must_use]
pub fn write_patch_frame(patches: &[Patch]) -> Bytes {
    let mut out = BytesMut::new();
    out.extend_from_slice(b"[");
    let mut first = true;
    for patch in patches {
        if !first {
            out.extend_from_slice(b",");
        }
        first = false;
        out.extend_from_slice(b"{\"op\":\"add\",\"path\":\"");
        write_json_pointer(&mut out, &patch.path, &patch.extra_path);
        out.extend_from_slice(b"\",\"value\":");
        out.extend_from_slice(&patch.data);
        out.extend_from_slice(b"}");
    }
    out.extend_from_slice(b"]");
    out.freeze()
}

fn write_errors_body(out: &mut BytesMut, errors: &[ResolveErrorEntry], upstream_errors: &[Bytes]) {
    let mut first = true;
    for entry in errors {
        if !first {
            out.extend_from_slice(b",");
        }
        first = false;
        out.extend_from_slice(b"{\"message\":");
        write_json_string(out, &entry.message);
        if !entry.path.is_empty() {
            out.extend_from_slice(b",\"path\":[");
            write_path_array(out, &entry.path);
            out.extend_from_slice(b"]");
        }
        if let Some(pos) = entry.position {
            out.extend_from_slice(
                format!(",\"locations\":[{{\"line\":{},\"column\":{}}}]", pos.line, pos.column)
                    .as_bytes(),
            );
        }
        out.extend_from_slice(b"}");
    }
    for blob in upstream_errors {
        if blob.is_empty() {
            continue;
        }
        if !first {
            out.extend_from_slice(b",");
        }
        first = false;
        out.extend_from_slice(blob);
    }
}

fn write_path_array(out: &mut BytesMut, path: &[PathSegment]) {
    let mut first = true;
    for seg in path {
        if !first {
            out.extend_from_slice(b",");
        }
        first = false;
        match seg {
            PathSegment::Field(name) => write_json_string(out, name),
            PathSegment::Index(i) => out.extend_from_slice(i.to_string().as_bytes()),
        }
    }
}

fn write_json_pointer(out: &mut BytesMut, path: &[PathSegment], extra: &[PathSegment]) {
    for seg in path.iter().chain(extra.iter()) {
        out.extend_from_slice(b"/");
        match seg {
            PathSegment::Field(name) => out.extend_from_slice(escape_pointer(name).as_bytes()),
            PathSegment::Index(i) => out.extend_from_slice(i.to_string().as_bytes()),
        }
    }
}

fn escape_pointer(s: &str) -> String {
    s.replace('~', "~0").replace('/', "~1")
}

fn write_json_string(out: &mut BytesMut, s: &str) {
    let rendered = serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string());
    out.extend_from_slice(rendered.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Position;

    #[test]
    fn omits_errors_key_when_empty() {
        let envelope = write_envelope(b"{\"x\":1}", &[], &[]);
        assert_eq!(&envelope[..], br#"{"data":{"x":1}}"#);
    }

    #[test]
    fn includes_message_path_and_location() {
        let errors = vec![ResolveErrorEntry {
            message: "boom".to_string(),
            path: vec![PathSegment::Field("a".to_string()), PathSegment::Index(0)],
            position: Some(Position { line: 2, column: 5 }),
        }];
        let envelope = write_envelope(b"null", &errors, &[]);
        let value: serde_json::Value = serde_json::from_slice(&envelope).unwrap();
        assert_eq!(value["errors"][0]["message"], "boom");
        assert_eq!(value["errors"][0]["path"][0], "a");
        assert_eq!(value["errors"][0]["path"][1], 0);
        assert_eq!(value["errors"][0]["locations"][0]["line"], 2);
    }

    #[test]
    fn merges_upstream_error_blobs() {
        let upstream = vec![Bytes::from_static(br#"{"message":"upstream"}"#)];
        let envelope = write_envelope(b"null", &[], &upstream);
        let value: serde_json::Value = serde_json::from_slice(&envelope).unwrap();
        assert_eq!(value["errors"][0]["message"], "upstream");
    }

    #[test]
    fn patch_frame_renders_json_pointer_path() {
        let patches = vec![Patch {
            index: 0,
            path: vec![PathSegment::Field("a".to_string())],
            extra_path: vec![PathSegment::Index(3)],
            data: Bytes::from_static(b"\"late\""),
        }];
        let frame = write_patch_frame(&patches);
        let value: serde_json::Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(value[0]["path"], "/a/3");
        assert_eq!(value[0]["value"], "late");
    }
}
