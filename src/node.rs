//! The method tree (spec component B): an in-memory, path-addressed
//! hierarchy of OSC nodes, plus serialization to the wire JSON shape.
//!
//! Grounded on `other_examples/x37v-oscquery-rs`'s `root.rs`: a
//! `petgraph::stable_graph::StableGraph` holding node payloads, with parent
//! links expressed as graph edges rather than `Rc<RefCell<..>>` back-pointers
//! (spec §9 "Back-references"), and the whole graph behind one
//! `Arc<RwLock<..>>` per spec §5's single-reader-writer-lock requirement.
//! Unlike that source, attribute projection here builds `serde_json::Value`
//! directly instead of implementing `Serialize` generically over the wire
//! format — there is no compiler available in this exercise to check a
//! borrowed, lifetime-heavy `Serializer` impl, and the tree is queried at
//! HTTP-response granularity anyway, so a `Value` tree is the lower-risk
//! choice.

use crate::error::{OscQueryError, Result};
use crate::osc_type::{type_string, OSCType};
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::Direction;
use rosc::OscType as OscValue;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Read/write policy per node. `NoValue` marks pure containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Access {
    #[default]
    NoValue = 0,
    ReadOnly = 1,
    WriteOnly = 2,
    ReadWrite = 3,
}

impl Access {
    fn accepts_value_query(self) -> bool {
        !matches!(self, Access::NoValue | Access::WriteOnly)
    }
}

/// An argument's clip behavior at its range boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipMode {
    None,
    Low,
    High,
    Both,
}

/// `RANGE[i]`: either a scalar bound set, or — for array-typed arguments — a
/// parallel sequence of bounds, one per element.
#[derive(Debug, Clone, PartialEq)]
pub enum RangeEntry {
    Scalar {
        min: Option<f64>,
        max: Option<f64>,
        vals: Option<Vec<Value>>,
    },
    Nested(Vec<Option<RangeEntry>>),
}

impl RangeEntry {
    pub fn min_max(min: Option<f64>, max: Option<f64>) -> Self {
        RangeEntry::Scalar { min, max, vals: None }
    }

    fn to_json(&self) -> Value {
        match self {
            RangeEntry::Scalar { min, max, vals } => {
                let mut m = Map::new();
                if let Some(v) = min {
                    m.insert("MIN".into(), json!(v));
                }
                if let Some(v) = max {
                    m.insert("MAX".into(), json!(v));
                }
                if let Some(v) = vals {
                    m.insert("VALS".into(), json!(v));
                }
                Value::Object(m)
            }
            RangeEntry::Nested(items) => {
                Value::Array(items.iter().map(|i| i.as_ref().map_or(Value::Null, RangeEntry::to_json)).collect())
            }
        }
    }
}

/// One declared argument slot on a method node.
#[derive(Debug, Clone)]
pub struct ArgumentDescriptor {
    pub ty: OSCType,
    pub range: Option<RangeEntry>,
    pub clipmode: Option<ClipMode>,
    pub value: Option<OscValue>,
}

impl ArgumentDescriptor {
    pub fn new(ty: OSCType) -> Self {
        Self { ty, range: None, clipmode: None, value: None }
    }

    pub fn with_range(mut self, range: RangeEntry) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_clipmode(mut self, clipmode: ClipMode) -> Self {
        self.clipmode = Some(clipmode);
        self
    }

    pub fn with_value(mut self, value: OscValue) -> Self {
        self.value = Some(value);
        self
    }
}

/// The full set of declared attributes for a node, as passed to `setOpts` /
/// `addMethod`. An empty `NodeOpts` clears a node back to a pure container.
#[derive(Debug, Clone, Default)]
pub struct NodeOpts {
    pub description: Option<String>,
    pub access: Access,
    pub tags: Vec<String>,
    pub critical: bool,
    pub arguments: Option<Vec<ArgumentDescriptor>>,
}

#[derive(Debug, Clone, Default)]
struct NodeData {
    name: String,
    description: Option<String>,
    access: Access,
    tags: Vec<String>,
    critical: bool,
    arguments: Option<Vec<ArgumentDescriptor>>,
}

impl NodeData {
    fn is_empty(&self) -> bool {
        self.access == Access::NoValue
            && self.arguments.is_none()
            && self.description.is_none()
            && self.tags.is_empty()
            && !self.critical
    }
}

struct NodeWrapper {
    full_path: String,
    data: NodeData,
}

/// A stable reference to a node in a `Tree`. Cheap to copy; invalidated only
/// if the node it points to is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHandle(NodeIndex);

/// The subset of `SerializedNode` attributes that may be requested via
/// `GET /<path>?<ATTR>` (spec §4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeQueryParam {
    FullPath,
    Contents,
    Type,
    Access,
    Range,
    Description,
    Tags,
    Critical,
    ClipMode,
    Value,
}

impl NodeQueryParam {
    pub fn from_query_str(s: &str) -> Option<Self> {
        Some(match s {
            "FULL_PATH" => Self::FullPath,
            "CONTENTS" => Self::Contents,
            "TYPE" => Self::Type,
            "ACCESS" => Self::Access,
            "RANGE" => Self::Range,
            "DESCRIPTION" => Self::Description,
            "TAGS" => Self::Tags,
            "CRITICAL" => Self::Critical,
            "CLIPMODE" => Self::ClipMode,
            "VALUE" => Self::Value,
            _ => return None,
        })
    }

    pub fn as_key(self) -> &'static str {
        match self {
            Self::FullPath => "FULL_PATH",
            Self::Contents => "CONTENTS",
            Self::Type => "TYPE",
            Self::Access => "ACCESS",
            Self::Range => "RANGE",
            Self::Description => "DESCRIPTION",
            Self::Tags => "TAGS",
            Self::Critical => "CRITICAL",
            Self::ClipMode => "CLIPMODE",
            Self::Value => "VALUE",
        }
    }
}

struct TreeInner {
    graph: StableGraph<NodeWrapper, ()>,
    root: NodeIndex,
    index_map: HashMap<String, NodeIndex>,
}

impl TreeInner {
    fn new() -> Self {
        let mut graph = StableGraph::default();
        let root = graph.add_node(NodeWrapper {
            full_path: String::new(),
            data: NodeData { access: Access::NoValue, ..Default::default() },
        });
        let mut index_map = HashMap::new();
        index_map.insert(String::new(), root);
        Self { graph, root, index_map }
    }

    fn display_path(&self, idx: NodeIndex) -> String {
        if idx == self.root {
            "/".to_string()
        } else {
            self.graph[idx].full_path.clone()
        }
    }

    fn child_named(&self, parent: NodeIndex, seg: &str) -> Option<NodeIndex> {
        self.graph
            .neighbors_directed(parent, Direction::Outgoing)
            .find(|&c| self.graph[c].data.name == seg)
    }

    fn children(&self, parent: NodeIndex) -> Vec<NodeIndex> {
        self.graph.neighbors_directed(parent, Direction::Outgoing).collect()
    }

    fn parent_of(&self, idx: NodeIndex) -> Option<NodeIndex> {
        self.graph.neighbors_directed(idx, Direction::Incoming).next()
    }

    fn get_or_create_child(&mut self, parent: NodeIndex, seg: &str) -> NodeIndex {
        if let Some(existing) = self.child_named(parent, seg) {
            return existing;
        }
        let parent_path = self.graph[parent].full_path.clone();
        let full_path = format!("{parent_path}/{seg}");
        let idx = self.graph.add_node(NodeWrapper {
            full_path: full_path.clone(),
            data: NodeData { name: seg.to_string(), ..Default::default() },
        });
        self.graph.add_edge(parent, idx, ());
        self.index_map.insert(full_path, idx);
        idx
    }

    fn remove_node(&mut self, idx: NodeIndex) {
        if let Some(w) = self.graph.remove_node(idx) {
            self.index_map.remove(&w.full_path);
        }
    }

    fn resolve(&self, path: &str) -> Option<NodeIndex> {
        let segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segs.is_empty() {
            return Some(self.root);
        }
        let mut current = self.root;
        for seg in segs {
            current = self.child_named(current, seg)?;
        }
        Some(current)
    }

    fn node_to_json(&self, idx: NodeIndex) -> Value {
        let w = &self.graph[idx];
        let mut map = Map::new();
        map.insert("FULL_PATH".into(), json!(self.display_path(idx)));
        map.insert("ACCESS".into(), json!(w.data.access));
        if let Some(d) = &w.data.description {
            map.insert("DESCRIPTION".into(), json!(d));
        }
        if !w.data.tags.is_empty() {
            map.insert("TAGS".into(), json!(w.data.tags));
        }
        if w.data.critical {
            map.insert("CRITICAL".into(), json!(true));
        }
        if let Some(args) = &w.data.arguments {
            let types: Vec<OSCType> = args.iter().map(|a| a.ty.clone()).collect();
            map.insert("TYPE".into(), json!(type_string(&types)));
            if args.iter().any(|a| a.value.is_some() || a.range.is_some() || a.clipmode.is_some()) {
                map.insert("VALUE".into(), Value::Array(args.iter().map(|a| value_to_json(&a.value)).collect()));
                map.insert(
                    "RANGE".into(),
                    Value::Array(args.iter().map(|a| a.range.as_ref().map_or(Value::Null, RangeEntry::to_json)).collect()),
                );
                map.insert(
                    "CLIPMODE".into(),
                    Value::Array(args.iter().map(|a| a.clipmode.map_or(Value::Null, |c| json!(c))).collect()),
                );
            }
        }
        let children = self.children(idx);
        if !children.is_empty() {
            let mut contents = Map::new();
            for c in children {
                contents.insert(self.graph[c].data.name.clone(), self.node_to_json(c));
            }
            map.insert("CONTENTS".into(), Value::Object(contents));
        }
        Value::Object(map)
    }

    fn attribute_json(&self, idx: NodeIndex, param: NodeQueryParam) -> Option<Value> {
        let w = &self.graph[idx];
        Some(match param {
            NodeQueryParam::FullPath => json!(self.display_path(idx)),
            NodeQueryParam::Access => json!(w.data.access),
            NodeQueryParam::Description => json!(w.data.description),
            NodeQueryParam::Tags => json!(w.data.tags),
            NodeQueryParam::Critical => json!(w.data.critical),
            NodeQueryParam::Contents => {
                let children = self.children(idx);
                let mut contents = Map::new();
                for c in children {
                    contents.insert(self.graph[c].data.name.clone(), self.node_to_json(c));
                }
                Value::Object(contents)
            }
            NodeQueryParam::Type => {
                let args = w.data.arguments.as_ref()?;
                let types: Vec<OSCType> = args.iter().map(|a| a.ty.clone()).collect();
                json!(type_string(&types))
            }
            NodeQueryParam::Range => {
                let args = w.data.arguments.as_ref()?;
                Value::Array(args.iter().map(|a| a.range.as_ref().map_or(Value::Null, RangeEntry::to_json)).collect())
            }
            NodeQueryParam::ClipMode => {
                let args = w.data.arguments.as_ref()?;
                Value::Array(args.iter().map(|a| a.clipmode.map_or(Value::Null, |c| json!(c))).collect())
            }
            NodeQueryParam::Value => {
                let args = w.data.arguments.as_ref()?;
                if !w.data.access.accepts_value_query() {
                    return None;
                }
                Value::Array(args.iter().map(|a| value_to_json(&a.value)).collect())
            }
        })
    }
}

fn value_to_json(v: &Option<OscValue>) -> Value {
    match v {
        None => Value::Null,
        Some(OscValue::Int(i)) => json!(i),
        Some(OscValue::Long(i)) => json!(i),
        Some(OscValue::Float(f)) => json!(f),
        Some(OscValue::Double(f)) => json!(f),
        Some(OscValue::String(s)) => json!(s),
        Some(OscValue::Char(c)) => json!(c.to_string()),
        Some(OscValue::Bool(b)) => json!(b),
        Some(OscValue::Blob(b)) => json!(b),
        Some(OscValue::Color(c)) => json!([c.red, c.green, c.blue, c.alpha]),
        Some(OscValue::Midi(m)) => json!([m.port, m.status, m.data1, m.data2]),
        Some(OscValue::Nil) => Value::Null,
        Some(OscValue::Inf) => json!("+Inf"),
        Some(OscValue::Time(t)) => json!([t.seconds, t.fractional]),
        Some(OscValue::Array(arr)) => Value::Array(arr.content.iter().map(|i| value_to_json(&Some(i.clone()))).collect()),
    }
}

/// The method tree. Clones share the underlying graph (`Arc<RwLock<..>>`);
/// this is the single writable shared resource spec §5 describes.
#[derive(Clone)]
pub struct Tree {
    inner: Arc<RwLock<TreeInner>>,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        Self { inner: Arc::new(RwLock::new(TreeInner::new())) }
    }

    pub fn root(&self) -> NodeHandle {
        NodeHandle(self.inner.read().expect("tree lock poisoned").root)
    }

    pub fn resolve_path(&self, path: &str) -> Option<NodeHandle> {
        self.inner.read().expect("tree lock poisoned").resolve(path).map(NodeHandle)
    }

    pub fn full_path(&self, handle: NodeHandle) -> String {
        self.inner.read().expect("tree lock poisoned").display_path(handle.0)
    }

    pub fn get_or_create_child(&self, parent: NodeHandle, seg: &str) -> NodeHandle {
        NodeHandle(self.inner.write().expect("tree lock poisoned").get_or_create_child(parent.0, seg))
    }

    pub fn has_child(&self, parent: NodeHandle, seg: &str) -> bool {
        self.inner.read().expect("tree lock poisoned").child_named(parent.0, seg).is_some()
    }

    pub fn get_child(&self, parent: NodeHandle, seg: &str) -> Option<NodeHandle> {
        self.inner.read().expect("tree lock poisoned").child_named(parent.0, seg).map(NodeHandle)
    }

    pub fn remove_child(&self, parent: NodeHandle, seg: &str) {
        let mut inner = self.inner.write().expect("tree lock poisoned");
        if let Some(idx) = inner.child_named(parent.0, seg) {
            inner.remove_node(idx);
        }
    }

    pub fn set_opts(&self, handle: NodeHandle, opts: NodeOpts) {
        let mut inner = self.inner.write().expect("tree lock poisoned");
        let w = &mut inner.graph[handle.0];
        w.data.description = opts.description;
        w.data.access = opts.access;
        w.data.tags = opts.tags;
        w.data.critical = opts.critical;
        w.data.arguments = opts.arguments;
    }

    pub fn set_value(&self, handle: NodeHandle, index: usize, value: OscValue) -> Result<()> {
        let mut inner = self.inner.write().expect("tree lock poisoned");
        let w = &mut inner.graph[handle.0];
        let args = w.data.arguments.as_mut().ok_or(OscQueryError::InvalidIndex { index, len: 0 })?;
        let len = args.len();
        let slot = args.get_mut(index).ok_or(OscQueryError::InvalidIndex { index, len })?;
        slot.value = Some(value);
        Ok(())
    }

    pub fn unset_value(&self, handle: NodeHandle, index: usize) -> Result<()> {
        let mut inner = self.inner.write().expect("tree lock poisoned");
        let w = &mut inner.graph[handle.0];
        let args = w.data.arguments.as_mut().ok_or(OscQueryError::InvalidIndex { index, len: 0 })?;
        let len = args.len();
        let slot = args.get_mut(index).ok_or(OscQueryError::InvalidIndex { index, len })?;
        slot.value = None;
        Ok(())
    }

    pub fn is_empty(&self, handle: NodeHandle) -> bool {
        let inner = self.inner.read().expect("tree lock poisoned");
        inner.graph[handle.0].data.is_empty() && inner.children(handle.0).is_empty()
    }

    pub fn serialize(&self, handle: NodeHandle) -> Value {
        self.inner.read().expect("tree lock poisoned").node_to_json(handle.0)
    }

    pub fn attribute(&self, handle: NodeHandle, param: NodeQueryParam) -> Option<Value> {
        self.inner.read().expect("tree lock poisoned").attribute_json(handle.0, param)
    }

    pub fn access(&self, handle: NodeHandle) -> Access {
        self.inner.read().expect("tree lock poisoned").graph[handle.0].data.access
    }

    pub fn has_arguments(&self, handle: NodeHandle) -> bool {
        self.inner.read().expect("tree lock poisoned").graph[handle.0].data.arguments.is_some()
    }

    /// Pre-order full paths of every descendant (inclusive) carrying
    /// arguments. Collected eagerly under one read lock rather than as a
    /// true lazy generator — see module docs.
    pub fn method_paths(&self, handle: NodeHandle) -> Vec<String> {
        let inner = self.inner.read().expect("tree lock poisoned");
        let mut out = Vec::new();
        let mut stack = vec![handle.0];
        while let Some(idx) = stack.pop() {
            if inner.graph[idx].data.arguments.is_some() {
                out.push(inner.display_path(idx));
            }
            let mut kids = inner.children(idx);
            kids.reverse();
            stack.extend(kids);
        }
        out
    }

    /// Materializes intermediate containers as needed, sets the final
    /// segment's declared attributes, and returns its handle and full path.
    pub fn add_method(&self, path: &str, opts: NodeOpts) -> (NodeHandle, String) {
        let segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut inner = self.inner.write().expect("tree lock poisoned");
        let mut current = inner.root;
        for seg in &segs {
            current = inner.get_or_create_child(current, seg);
        }
        {
            let w = &mut inner.graph[current];
            w.data.description = opts.description;
            w.data.access = opts.access;
            w.data.tags = opts.tags;
            w.data.critical = opts.critical;
            w.data.arguments = opts.arguments;
        }
        (NodeHandle(current), inner.display_path(current))
    }

    /// Clears the target's declared attributes, then walks toward the root
    /// pruning nodes that became empty. Returns every path that changed:
    /// the target first, then each pruned ancestor, in that order (spec
    /// §4.F, §8 scenario 5). An unknown path yields an empty vector.
    pub fn remove_method(&self, path: &str) -> Vec<String> {
        let mut inner = self.inner.write().expect("tree lock poisoned");
        let Some(target) = inner.index_map.get(path).copied() else {
            return Vec::new();
        };
        {
            let name = inner.graph[target].data.name.clone();
            inner.graph[target].data = NodeData { name, ..Default::default() };
        }

        let mut changed = vec![path.to_string()];
        let mut current = Some(target);
        let mut first = true;
        while let Some(idx) = current {
            if idx == inner.root || !inner.graph[idx].data.is_empty() || !inner.children(idx).is_empty() {
                break;
            }
            let parent = inner.parent_of(idx);
            let full_path = inner.graph[idx].full_path.clone();
            inner.remove_node(idx);
            if !first {
                changed.push(full_path);
            }
            first = false;
            current = parent;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osc_type::SimpleType;
    use serde_json::json;

    fn tree_with_foo() -> (Tree, NodeHandle) {
        let tree = Tree::new();
        let (handle, _) = tree.add_method(
            "/foo",
            NodeOpts {
                access: Access::ReadOnly,
                arguments: Some(vec![ArgumentDescriptor::new(OSCType::Simple(SimpleType::Float))
                    .with_range(RangeEntry::min_max(Some(0.0), Some(100.0)))]),
                ..Default::default()
            },
        );
        (tree, handle)
    }

    #[test]
    fn add_method_materializes_intermediate_containers() {
        let tree = Tree::new();
        let (_, path) = tree.add_method("/a/b/c", NodeOpts::default());
        assert_eq!(path, "/a/b/c");
        assert!(tree.resolve_path("/a").is_some());
        assert!(tree.resolve_path("/a/b").is_some());
    }

    #[test]
    fn set_value_and_serialize() {
        let (tree, handle) = tree_with_foo();
        tree.set_value(handle, 0, OscValue::Float(0.5)).unwrap();
        let json = tree.serialize(handle);
        assert_eq!(json["TYPE"], "f");
        assert_eq!(json["RANGE"], json!([{"MIN": 0.0, "MAX": 100.0}]));
        assert_eq!(json["VALUE"], json!([0.5]));
    }

    #[test]
    fn set_value_out_of_range_is_invalid_index() {
        let (tree, handle) = tree_with_foo();
        let err = tree.set_value(handle, 5, OscValue::Float(1.0)).unwrap_err();
        assert!(matches!(err, OscQueryError::InvalidIndex { index: 5, len: 1 }));
    }

    #[test]
    fn nested_array_type_round_trips_through_serialize() {
        let tree = Tree::new();
        let (handle, _) = tree.add_method(
            "/t",
            NodeOpts {
                arguments: Some(vec![
                    ArgumentDescriptor::new(OSCType::Simple(SimpleType::String)),
                    ArgumentDescriptor::new(OSCType::Array(vec![
                        OSCType::Simple(SimpleType::Int),
                        OSCType::Simple(SimpleType::False),
                    ]))
                    .with_range(RangeEntry::Nested(vec![Some(RangeEntry::min_max(Some(-100.0), None)), None])),
                ]),
                ..Default::default()
            },
        );
        let json = tree.serialize(handle);
        assert_eq!(json["TYPE"], "s[iF]");
        assert_eq!(json["RANGE"], json!([null, [{"MIN": -100.0}, null]]));
    }

    #[test]
    fn remove_method_prunes_empty_ancestors() {
        let tree = Tree::new();
        tree.add_method(
            "/g/h",
            NodeOpts {
                arguments: Some(vec![ArgumentDescriptor::new(OSCType::Simple(SimpleType::Int))]),
                ..Default::default()
            },
        );
        let changed = tree.remove_method("/g/h");
        assert_eq!(changed, vec!["/g/h".to_string(), "/g".to_string()]);
        assert!(tree.resolve_path("/g/h").is_none());
        assert!(tree.resolve_path("/g").is_none());
    }

    #[test]
    fn remove_method_stops_at_non_empty_ancestor() {
        let tree = Tree::new();
        tree.add_method("/g/h", NodeOpts { arguments: Some(vec![ArgumentDescriptor::new(OSCType::Simple(SimpleType::Int))]), ..Default::default() });
        tree.add_method("/g/keep", NodeOpts { arguments: Some(vec![ArgumentDescriptor::new(OSCType::Simple(SimpleType::Int))]), ..Default::default() });
        let changed = tree.remove_method("/g/h");
        assert_eq!(changed, vec!["/g/h".to_string()]);
        assert!(tree.resolve_path("/g").is_some());
    }

    #[test]
    fn value_query_on_write_only_node_has_no_value_attribute() {
        let tree = Tree::new();
        let (handle, _) = tree.add_method(
            "/w",
            NodeOpts {
                access: Access::WriteOnly,
                arguments: Some(vec![ArgumentDescriptor::new(OSCType::Simple(SimpleType::Int))]),
                ..Default::default()
            },
        );
        assert!(tree.attribute(handle, NodeQueryParam::Value).is_none());
    }
}
