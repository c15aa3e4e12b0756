//! The response plan's node types: an immutable tree describing how to
//! render a JSON value, built once by an external planner and shared
//! read-only across requests.

use crate::fetch::Fetch;
use crate::json::PathElem;
use std::sync::Arc;

/// One field of an [`Node::Object`], in declared output order.
pub struct Field {
    /// The field's output name, written as `"name":` before its value.
    pub name: String,
    /// How to render the field's value.
    pub value: Node,
    /// Source position, carried through for error locations.
    pub position: crate::context::Position,
    /// When set, the field's data comes from a fetch result buffer instead
    /// of the current parent data.
    pub buffer_id: Option<usize>,
    /// Only render this field when the narrowed parent's `__typename`
    /// equals this byte string.
    pub on_type_name: Option<String>,
    /// `@defer` directive applied to this field's value, if any.
    pub defer: Option<Defer>,
    /// `@stream` directive applied to this field's value, if any (only
    /// meaningful when `value` is an `Array`).
    pub stream: Option<Stream>,
}

/// Incremental-delivery configuration for a deferred fragment.
#[derive(Debug, Clone, Copy)]
pub struct Defer {
    /// Whether defer is active for this field (kept so a plan can carry the
    /// directive but disable it, e.g. behind an `if` argument).
    pub enabled: bool,
    /// Which patch template to render when this field's value arrives late.
    pub patch_index: usize,
}

/// Incremental-delivery configuration for a streamed array.
#[derive(Debug, Clone, Copy)]
pub struct Stream {
    /// Whether streaming is active for this array.
    pub enabled: bool,
    /// Number of leading elements rendered inline before switching to
    /// patch-per-element delivery.
    pub initial_batch_size: usize,
    /// Which patch template to render for elements beyond the initial
    /// batch.
    pub patch_index: usize,
}

/// A response plan node: an immutable description of how to produce one
/// JSON value. Plans are strictly tree-shaped (no back-pointers); children
/// are owned by their parent.
pub enum Node {
    /// Produce `{…}` by descending `fields` after optionally running
    /// `fetch`.
    Object {
        /// Whether `null` is an acceptable rendering for this node.
        nullable: bool,
        /// Path to narrow the parent `data` by before rendering, empty if
        /// this object should render the parent data as-is.
        path: Vec<PathElem>,
        /// Fields rendered in declared order.
        fields: Vec<Field>,
        /// Fetch to run before rendering fields, if any.
        fetch: Option<Fetch>,
    },
    /// Produce `[…]` by resolving `item` once per element of the narrowed
    /// array.
    Array {
        /// Whether `null` is an acceptable rendering for this node.
        nullable: bool,
        /// Path to narrow the parent `data` by.
        path: Vec<PathElem>,
        /// How to render each element. Shared (not owned) so an
        /// asynchronously-resolved element can hand a spawned task a cheap
        /// clone instead of deep-copying the subtree.
        item: Arc<Node>,
        /// Resolve elements concurrently (only applies when neither
        /// streaming nor a data loader is in effect for this array).
        resolve_asynchronous: bool,
        /// Streaming configuration, if this array is `@stream`-annotated.
        stream: Option<Stream>,
    },
    /// Project a JSON string from `data` at `path`.
    String {
        /// Path to the value.
        path: Vec<PathElem>,
        /// Whether `null` is an acceptable rendering.
        nullable: bool,
    },
    /// Project a JSON boolean.
    Boolean {
        /// Path to the value.
        path: Vec<PathElem>,
        /// Whether `null` is an acceptable rendering.
        nullable: bool,
    },
    /// Project a JSON integer.
    Integer {
        /// Path to the value.
        path: Vec<PathElem>,
        /// Whether `null` is an acceptable rendering.
        nullable: bool,
    },
    /// Project a JSON float.
    Float {
        /// Path to the value.
        path: Vec<PathElem>,
        /// Whether `null` is an acceptable rendering.
        nullable: bool,
    },
    /// Emit `null`, optionally enqueueing a patch for the deferred value
    /// once it becomes available.
    Null {
        /// `@defer` configuration, if this null stands in for a deferred
        /// value.
        defer: Option<Defer>,
    },
    /// Literal `{}`.
    EmptyObject,
    /// Literal `[]`.
    EmptyArray,
}
