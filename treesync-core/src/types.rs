//! Domain types for the treesync object model.
//!
//! A [`Node`] is one element of a formatting-preserving syntax tree. The
//! diff protocol never inspects a node's meaning, only its identity, its
//! [`Kind`] tag, and its ordered fields. Identity for diffing purposes is
//! `Rc` pointer equality ([`Node::same`]), never structural equality;
//! [`NodeId`] is the stable identity that survives copy-on-write edits.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Stable identity of a tree element. Survives copy-on-write edits: a node
/// rebuilt with changed fields keeps its `NodeId` but gets a fresh `Rc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Discriminator tag identifying a node's schema/type. Each schema owns a
/// closed, disjoint set of kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Kind(pub String);

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for Kind {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Kind {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Small integer assigned to a previously-transmitted identity, enabling
/// back-references on the wire. Assigned once per identity per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RefId(pub u32);

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Formatting model
// ---------------------------------------------------------------------------

/// A formatting slot: whitespace plus any comments that occupy it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Space {
    pub whitespace: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<String>,
}

impl Space {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn whitespace(ws: impl Into<String>) -> Self {
        Self {
            whitespace: ws.into(),
            comments: vec![],
        }
    }
}

/// A value paired with its adjacent formatting slot. Whether the space sits
/// to the left or the right of the value is a schema naming concern; the
/// wire shape is identical either way.
#[derive(Debug, Clone, PartialEq)]
pub struct Padded {
    pub space: Space,
    pub element: Value,
}

impl Padded {
    pub fn new(space: Space, element: Value) -> Self {
        Self { space, element }
    }
}

/// An ordered list of padded values plus a leading formatting slot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Container {
    pub before: Space,
    pub elements: Vec<Padded>,
}

/// One metadata marker. Markers are matched by id, not by position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub id: NodeId,
    pub name: String,
}

/// An extensible, order-irrelevant metadata bag attached to a node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Markers {
    pub markers: Vec<Marker>,
}

impl Markers {
    /// Order-insensitive equivalence: two bags are equivalent when they hold
    /// the same markers regardless of order.
    pub fn equivalent(&self, other: &Markers) -> bool {
        if self.markers.len() != other.markers.len() {
            return false;
        }
        let mut a: Vec<&Marker> = self.markers.iter().collect();
        let mut b: Vec<&Marker> = other.markers.iter().collect();
        a.sort_by_key(|m| m.id.0);
        b.sort_by_key(|m| m.id.0);
        a == b
    }
}

// ---------------------------------------------------------------------------
// Value union
// ---------------------------------------------------------------------------

/// Everything a node field can hold. Absent/null is a distinct representable
/// value at every position, not an encoding artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    /// A raw scalar payload (bool, number, string) in wire form.
    Scalar(serde_json::Value),
    Node(Rc<Node>),
    Padded(Box<Padded>),
    Container(Container),
    Space(Space),
    Markers(Markers),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn scalar(v: impl Into<serde_json::Value>) -> Self {
        Value::Scalar(v.into())
    }

    pub fn node(node: Rc<Node>) -> Self {
        Value::Node(node)
    }

    pub fn padded(space: Space, element: Value) -> Self {
        Value::Padded(Box::new(Padded::new(space, element)))
    }

    pub fn as_node(&self) -> Option<&Rc<Node>> {
        match self {
            Value::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Scalar(v) => Some(v),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// One tree element being synchronized: stable id, closed kind tag, and
/// kind-specific fields in declaration order.
#[derive(Debug, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub kind: Kind,
    pub fields: Vec<Value>,
}

impl Node {
    /// Build a fresh node with a random stable id.
    pub fn new(kind: impl Into<Kind>, fields: Vec<Value>) -> Rc<Self> {
        Rc::new(Self {
            id: NodeId::random(),
            kind: kind.into(),
            fields,
        })
    }

    /// Build a node with an explicit id (receive-side reconstruction).
    pub fn with_id(id: NodeId, kind: Kind, fields: Vec<Value>) -> Rc<Self> {
        Rc::new(Self { id, kind, fields })
    }

    /// Copy-on-write rebuild: same stable id and kind, new fields, fresh
    /// reference identity. Visitors must call this only when at least one
    /// field actually changed, so untouched subtrees keep their identity.
    pub fn replace_fields(self: &Rc<Self>, fields: Vec<Value>) -> Rc<Node> {
        Rc::new(Node {
            id: self.id,
            kind: self.kind.clone(),
            fields,
        })
    }

    /// Reference identity: the comparison the diff protocol runs on.
    pub fn same(a: &Rc<Node>, b: &Rc<Node>) -> bool {
        Rc::ptr_eq(a, b)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
