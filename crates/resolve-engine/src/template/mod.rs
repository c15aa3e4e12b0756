//! Renders an upstream request body from a list of [`Segment`]s, pulling
//! variable values from parent data, the request's own variables, HTTP
//! headers, or ad-hoc operation context values.

use crate::context::Context;
use crate::json::{self, PathElem, ValueType};
use bytes::BytesMut;
use resolve_error::TemplateError;

/// The JSON type a variable segment declares for its source value. Used both
/// to validate what was found and, for arrays, to pick the element type for
/// `asArrayCSV` rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedType {
    String,
    Int,
    Float,
    Boolean,
    Object,
    Array,
}

impl ExpectedType {
    fn matches(self, actual: ValueType) -> bool {
        matches!(
            (self, actual),
            (Self::String, ValueType::String)
                | (Self::Int | Self::Float, ValueType::Number)
                | (Self::Boolean, ValueType::Boolean)
                | (Self::Object, ValueType::Object)
                | (Self::Array, ValueType::Array)
        )
    }

    fn name(self) -> &'static str {
        match self {
            Self::String => "String",
            Self::Int => "Int",
            Self::Float => "Float",
            Self::Boolean => "Boolean",
            Self::Object => "Object",
            Self::Array => "Array",
        }
    }
}

fn type_name(t: ValueType) -> &'static str {
    match t {
        ValueType::Object => "Object",
        ValueType::Array => "Array",
        ValueType::String => "String",
        ValueType::Number => "Number",
        ValueType::Boolean => "Boolean",
        ValueType::Null => "Null",
    }
}

/// Where a [`Variable`] segment's value comes from.
#[derive(Debug, Clone)]
pub enum VariableSource {
    /// The current parent `data` JSON (the narrowed value passed down by the
    /// resolver).
    Object,
    /// The operation's variables blob (`ctx.variables`).
    Context,
    /// An HTTP request header. `path` must have exactly one element.
    RequestHeader,
    /// An arbitrary per-request context key. `path` must have exactly one
    /// element.
    OperationContext,
}

/// Rendering flags for a [`Variable`] segment.
#[derive(Debug, Clone, Default)]
pub struct RenderFlags {
    /// Write the source bytes verbatim (pre-encoded JSON).
    pub as_plain_value: bool,
    /// Iterate an array, writing comma-separated values of `element_type`
    /// only.
    pub as_array_csv: bool,
    /// Unquote object keys when rendering as a GraphQL literal.
    pub omit_object_key_quotes: bool,
    /// Escape `"` in string values (for embedding inside a JSON string).
    pub escape_quotes: bool,
}

/// A single template variable reference.
#[derive(Debug, Clone)]
pub struct Variable {
    /// Where to read the value from.
    pub source: VariableSource,
    /// Path into that source.
    pub path: Vec<PathElem>,
    /// The type the segment declares for its value.
    pub expected_type: ExpectedType,
    /// Element type, used only when `expected_type` is `Array` (for
    /// `asArrayCSV`) or when the Context special-case list-wraps a scalar.
    pub element_type: Option<ExpectedType>,
    /// Rendering flags.
    pub flags: RenderFlags,
}

/// One unit of an [`InputTemplate`]: either literal bytes or a variable
/// reference.
#[derive(Debug, Clone)]
pub enum Segment {
    /// Literal bytes, appended verbatim.
    Static(Vec<u8>),
    /// A variable reference, rendered according to its source and flags.
    Variable(Variable),
}

/// An ordered list of [`Segment`]s that together render one upstream request
/// body.
#[derive(Debug, Clone, Default)]
pub struct InputTemplate {
    segments: Vec<Segment>,
}

impl InputTemplate {
    /// Build a template from its segments.
    #[must_use]
    pub fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// Render every segment into `out`, in order.
    ///
    /// # Errors
    ///
    /// Returns a [`TemplateError`] if a variable's path is invalid for its
    /// source kind or its value doesn't match the declared type.
    pub fn render(
        &self,
        ctx: &Context,
        parent_data: &[u8],
        out: &mut BytesMut,
    ) -> Result<(), TemplateError> {
        for segment in &self.segments {
            match segment {
                Segment::Static(bytes) => out.extend_from_slice(bytes),
                Segment::Variable(var) => render_variable(ctx, parent_data, var, out)?,
            }
        }
        Ok(())
    }
}

fn render_variable(
    ctx: &Context,
    parent_data: &[u8],
    var: &Variable,
    out: &mut BytesMut,
) -> Result<(), TemplateError> {
    match var.source {
        VariableSource::Object => render_from_bytes(parent_data, var, out),
        VariableSource::Context => render_context(ctx, var, out),
        VariableSource::RequestHeader => render_header(ctx, var, out),
        VariableSource::OperationContext => render_operation_context(ctx, var, out),
    }
}

fn render_from_bytes(
    source: &[u8],
    var: &Variable,
    out: &mut BytesMut,
) -> Result<(), TemplateError> {
    let located = match json::get_raw(source, &var.path) {
        Ok(located) => located,
        Err(_) => {
            out.extend_from_slice(b"null");
            return Ok(());
        }
    };
    if located.is_null() {
        out.extend_from_slice(b"null");
        return Ok(());
    }
    write_value(source, located.start, located.end, located.value_type, var, out)
}

fn render_context(ctx: &Context, var: &Variable, out: &mut BytesMut) -> Result<(), TemplateError> {
    let located = match json::get_raw(&ctx.variables, &var.path) {
        Ok(located) => located,
        Err(_) => {
            out.extend_from_slice(b"null");
            return Ok(());
        }
    };
    if located.is_null() {
        out.extend_from_slice(b"null");
        return Ok(());
    }
    // Special case: expected Array but the fetched value is a scalar
    // matching elementType — render as a bare scalar so a list-wrapped
    // scalar variable can be supplied a single value.
    if var.expected_type == ExpectedType::Array
        && !matches!(located.value_type, ValueType::Array)
    {
        if let Some(elem) = var.element_type {
            if elem.matches(located.value_type) {
                return write_value(
                    &ctx.variables,
                    located.start,
                    located.end,
                    located.value_type,
                    var,
                    out,
                );
            }
        }
    }
    write_value(&ctx.variables, located.start, located.end, located.value_type, var, out)
}

fn render_header(ctx: &Context, var: &Variable, out: &mut BytesMut) -> Result<(), TemplateError> {
    let [PathElem::Key(name)] = var.path.as_slice() else {
        return Err(TemplateError::InvalidHeaderPath(var.path.len()));
    };
    if let Some(value) = ctx.header(name) {
        write_string_variable(&value, &var.flags, out);
    }
    Ok(())
}

fn render_operation_context(
    ctx: &Context,
    var: &Variable,
    out: &mut BytesMut,
) -> Result<(), TemplateError> {
    let [PathElem::Key(name)] = var.path.as_slice() else {
        return Err(TemplateError::InvalidContextPath(var.path.len()));
    };
    if let Some(value) = ctx.operation_context.get(name) {
        write_string_variable(value, &var.flags, out);
    }
    Ok(())
}

/// Renders a plain (non-JSON-embedded) string value honoring `flags`: the
/// same `as_plain_value`/`escape_quotes` knobs `write_value` applies to
/// bytes already living inside a JSON document.
fn write_string_variable(value: &str, flags: &RenderFlags, out: &mut BytesMut) {
    if flags.as_plain_value {
        out.extend_from_slice(value.as_bytes());
        return;
    }
    out.extend_from_slice(b"\"");
    if flags.escape_quotes {
        escape_into(value.as_bytes(), out);
    } else {
        out.extend_from_slice(value.as_bytes());
    }
    out.extend_from_slice(b"\"");
}

fn write_value(
    data: &[u8],
    start: usize,
    end: usize,
    value_type: ValueType,
    var: &Variable,
    out: &mut BytesMut,
) -> Result<(), TemplateError> {
    if !var.expected_type.matches(value_type) && !matches!(value_type, ValueType::Null) {
        return Err(TemplateError::TypeMismatch {
            path: format!("{:?}", var.path),
            actual: type_name(value_type),
            expected: var.expected_type.name(),
        });
    }

    if var.flags.as_plain_value {
        out.extend_from_slice(&data[start..end]);
        return Ok(());
    }

    if var.flags.as_array_csv {
        let Some(element_type) = var.element_type else {
            return Err(TemplateError::TypeMismatch {
                path: format!("{:?}", var.path),
                actual: "Array",
                expected: "Array with elementType",
            });
        };
        let mut first = true;
        json::array_each(&data[start..end], |_, bytes, vtype| {
            if element_type.matches(vtype) {
                if !first {
                    out.extend_from_slice(b",");
                }
                first = false;
                out.extend_from_slice(bytes);
            }
            Ok(())
        })
        .map_err(TemplateError::Source)?;
        return Ok(());
    }

    render_graphql_value(data, start, end, value_type, var.flags.omit_object_key_quotes, var.flags.escape_quotes, out)
        .map_err(TemplateError::Source)
}

fn render_graphql_value(
    data: &[u8],
    start: usize,
    end: usize,
    value_type: ValueType,
    omit_object_key_quotes: bool,
    escape_quotes: bool,
    out: &mut BytesMut,
) -> Result<(), resolve_error::JsonPathError> {
    match value_type {
        ValueType::Null => out.extend_from_slice(b"null"),
        ValueType::Boolean | ValueType::Number => out.extend_from_slice(&data[start..end]),
        ValueType::String => {
            out.extend_from_slice(b"\"");
            if escape_quotes {
                escape_into(&data[start + 1..end - 1], out);
            } else {
                out.extend_from_slice(&data[start + 1..end - 1]);
            }
            out.extend_from_slice(b"\"");
        }
        ValueType::Array => {
            out.extend_from_slice(b"[");
            let mut first = true;
            json::array_each(&data[start..end], |_, bytes, vtype| {
                if !first {
                    out.extend_from_slice(b",");
                }
                first = false;
                let (vstart, vend) = element_span(bytes, vtype);
                render_graphql_value(bytes, vstart, vend, vtype, omit_object_key_quotes, escape_quotes, out)
            })?;
            out.extend_from_slice(b"]");
        }
        ValueType::Object => {
            out.extend_from_slice(b"{");
            let mut first = true;
            json::object_each(&data[start..end], |key, bytes, vtype| {
                if !first {
                    out.extend_from_slice(b",");
                }
                first = false;
                if omit_object_key_quotes {
                    out.extend_from_slice(key);
                } else {
                    out.extend_from_slice(b"\"");
                    out.extend_from_slice(key);
                    out.extend_from_slice(b"\"");
                }
                out.extend_from_slice(b":");
                let (vstart, vend) = element_span(bytes, vtype);
                render_graphql_value(bytes, vstart, vend, vtype, omit_object_key_quotes, escape_quotes, out)
            })?;
            out.extend_from_slice(b"}");
        }
    }
    Ok(())
}

/// `array_each`/`object_each` hand back the element's own slice (already
/// re-quoted for strings), so the element's own span is just its full
/// extent.
fn element_span(bytes: &[u8], _value_type: ValueType) -> (usize, usize) {
    (0, bytes.len())
}

fn escape_into(bytes: &[u8], out: &mut BytesMut) {
    for &b in bytes {
        if b == b'"' || b == b'\\' {
            out.extend_from_slice(b"\\");
        }
        out.extend_from_slice(&[b]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ctx() -> Context {
        Context::new(
            bytes::Bytes::from_static(br#"{"id":"v1","ids":[1,2,3]}"#),
            HashMap::new(),
        )
    }

    #[test]
    fn static_only_template_renders_exact_concatenation() {
        let tpl = InputTemplate::new(vec![
            Segment::Static(b"{\"a\":".to_vec()),
            Segment::Static(b"1}".to_vec()),
        ]);
        let mut out = BytesMut::new();
        tpl.render(&ctx(), b"{}", &mut out).unwrap();
        assert_eq!(&out[..], b"{\"a\":1}");
    }

    #[test]
    fn object_variable_renders_graphql_value() {
        let var = Variable {
            source: VariableSource::Object,
            path: vec![PathElem::from("name")],
            expected_type: ExpectedType::String,
            element_type: None,
            flags: RenderFlags::default(),
        };
        let tpl = InputTemplate::new(vec![Segment::Variable(var)]);
        let mut out = BytesMut::new();
        tpl.render(&ctx(), br#"{"name":"Ada"}"#, &mut out).unwrap();
        assert_eq!(&out[..], b"\"Ada\"");
    }

    #[test]
    fn missing_object_path_renders_null() {
        let var = Variable {
            source: VariableSource::Object,
            path: vec![PathElem::from("missing")],
            expected_type: ExpectedType::String,
            element_type: None,
            flags: RenderFlags::default(),
        };
        let tpl = InputTemplate::new(vec![Segment::Variable(var)]);
        let mut out = BytesMut::new();
        tpl.render(&ctx(), br#"{"name":"Ada"}"#, &mut out).unwrap();
        assert_eq!(&out[..], b"null");
    }

    #[test]
    fn context_scalar_matching_element_type_renders_as_scalar() {
        let var = Variable {
            source: VariableSource::Context,
            path: vec![PathElem::from("id")],
            expected_type: ExpectedType::Array,
            element_type: Some(ExpectedType::String),
            flags: RenderFlags::default(),
        };
        let tpl = InputTemplate::new(vec![Segment::Variable(var)]);
        let mut out = BytesMut::new();
        tpl.render(&ctx(), b"{}", &mut out).unwrap();
        assert_eq!(&out[..], b"\"v1\"");
    }

    #[test]
    fn array_csv_filters_by_element_type() {
        let var = Variable {
            source: VariableSource::Context,
            path: vec![PathElem::from("ids")],
            expected_type: ExpectedType::Array,
            element_type: Some(ExpectedType::Int),
            flags: RenderFlags {
                as_array_csv: true,
                ..RenderFlags::default()
            },
        };
        let tpl = InputTemplate::new(vec![Segment::Variable(var)]);
        let mut out = BytesMut::new();
        tpl.render(&ctx(), b"{}", &mut out).unwrap();
        assert_eq!(&out[..], b"1,2,3");
    }

    #[test]
    fn header_path_with_more_than_one_segment_errors() {
        let var = Variable {
            source: VariableSource::RequestHeader,
            path: vec![PathElem::from("a"), PathElem::from("b")],
            expected_type: ExpectedType::String,
            element_type: None,
            flags: RenderFlags::default(),
        };
        let tpl = InputTemplate::new(vec![Segment::Variable(var)]);
        let mut out = BytesMut::new();
        let err = tpl.render(&ctx(), b"{}", &mut out).unwrap_err();
        assert!(matches!(err, TemplateError::InvalidHeaderPath(2)));
    }

    #[test]
    fn header_value_is_joined_and_quoted() {
        let mut headers = HashMap::new();
        headers.insert("x-id".to_string(), vec!["a".to_string(), "b".to_string()]);
        let ctx = Context::new(bytes::Bytes::from_static(b"{}"), headers);
        let var = Variable {
            source: VariableSource::RequestHeader,
            path: vec![PathElem::from("x-id")],
            expected_type: ExpectedType::String,
            element_type: None,
            flags: RenderFlags::default(),
        };
        let tpl = InputTemplate::new(vec![Segment::Variable(var)]);
        let mut out = BytesMut::new();
        tpl.render(&ctx, b"{}", &mut out).unwrap();
        assert_eq!(&out[..], b"\"a,b\"");
    }

    #[test]
    fn plain_value_flag_splices_raw_bytes() {
        let var = Variable {
            source: VariableSource::Object,
            path: vec![PathElem::from("nested")],
            expected_type: ExpectedType::Object,
            element_type: None,
            flags: RenderFlags {
                as_plain_value: true,
                ..RenderFlags::default()
            },
        };
        let tpl = InputTemplate::new(vec![Segment::Variable(var)]);
        let mut out = BytesMut::new();
        tpl.render(&ctx(), br#"{"nested":{"a":1}}"#, &mut out)
            .unwrap();
        assert_eq!(&out[..], br#"{"a":1}"#);
    }
}
