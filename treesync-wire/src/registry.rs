//! Kind → codec dispatch tables and the cross-schema delegation proxy.
//!
//! Dispatch is by [`Kind`] tag, never by structural matching. Each schema
//! claims a closed, disjoint set of kinds; [`DelegatingRegistry`] composes
//! tables so a specialized schema falls back to a generic one (and vice
//! versa) for kinds it does not own, with the specialized table always
//! winning. A kind with no codec in any composed table is fatal
//! ([`ProtocolError::UnknownKind`]).

use std::collections::HashMap;
use std::sync::Arc;

use treesync_core::{Kind, Node, Padded, Space, Value};

use crate::error::ProtocolError;
use crate::receive::ReceiveQueue;
use crate::send::SendQueue;

// ---------------------------------------------------------------------------
// Field shapes
// ---------------------------------------------------------------------------

/// Wire shape of one node field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldShape {
    /// Raw scalar payload.
    Scalar,
    /// Child node; consults the reference map before recursing.
    Child,
    /// Formatting slot.
    Space,
    /// Metadata bag.
    Markers,
    /// Space-wrapped value; the wrapping space is emitted before the inner
    /// value.
    Padded(Box<FieldShape>),
    /// Leading space plus a count-free padded element sequence, terminated
    /// by the container's own END_OF_OBJECT boundary.
    Container(Box<FieldShape>),
}

impl FieldShape {
    pub fn padded(inner: FieldShape) -> Self {
        FieldShape::Padded(Box::new(inner))
    }

    pub fn container(inner: FieldShape) -> Self {
        FieldShape::Container(Box::new(inner))
    }
}

/// One field declaration: name (diagnostic only) plus wire shape. Field
/// order on the wire is the declaration order of these specs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub shape: FieldShape,
}

impl FieldSpec {
    pub fn new(name: &'static str, shape: FieldShape) -> Self {
        Self { name, shape }
    }
}

// ---------------------------------------------------------------------------
// NodeCodec
// ---------------------------------------------------------------------------

/// Encodes/decodes one node's fields in declaration order.
///
/// The default implementations drive the generic field walk; a codec only
/// overrides them when its local shape differs from its wire shape.
pub trait NodeCodec {
    fn fields(&self) -> &[FieldSpec];

    fn encode_fields(
        &self,
        queue: &mut SendQueue<'_>,
        after: &Node,
        before: Option<&Node>,
    ) -> Result<(), ProtocolError> {
        let null = Value::Null;
        for (index, spec) in self.fields().iter().enumerate() {
            let after_value = after.fields.get(index).unwrap_or(&null);
            let before_value = before.map(|b| b.fields.get(index).unwrap_or(&null));
            queue.send_field(spec, after_value, before_value)?;
        }
        Ok(())
    }

    fn decode_fields(
        &self,
        queue: &mut ReceiveQueue<'_, '_, '_>,
        before: Option<&Node>,
    ) -> Result<Vec<Value>, ProtocolError> {
        let null = Value::Null;
        let mut fields = Vec::with_capacity(self.fields().len());
        for (index, spec) in self.fields().iter().enumerate() {
            let prior = before.map(|b| b.fields.get(index).unwrap_or(&null));
            fields.push(queue.receive_field(spec, prior)?);
        }
        Ok(fields)
    }
}

/// Table-driven codec: the common case, one ordered field-spec list.
#[derive(Debug)]
pub struct StructCodec {
    fields: Vec<FieldSpec>,
}

impl StructCodec {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }
}

impl NodeCodec for StructCodec {
    fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }
}

// ---------------------------------------------------------------------------
// PadBridgeCodec: the shape-translation exception
// ---------------------------------------------------------------------------

/// Codec for a kind shaped differently on each side of the wire: one field
/// is a bare child locally but a padded wrapper on the wire (the peer's
/// schema models it padded). The translation is symmetric on send and
/// receive, so either peer can own either shape.
#[derive(Debug)]
pub struct PadBridgeCodec {
    fields: Vec<FieldSpec>,
    bridged: usize,
}

impl PadBridgeCodec {
    /// `fields[bridged]` must be declared [`FieldShape::Child`]; it travels
    /// as `Padded(Child)` with an empty wrapping space.
    pub fn new(fields: Vec<FieldSpec>, bridged: usize) -> Self {
        debug_assert!(matches!(
            fields.get(bridged).map(|f| &f.shape),
            Some(FieldShape::Child)
        ));
        Self { fields, bridged }
    }

    fn wire_spec(&self, spec: &FieldSpec) -> FieldSpec {
        FieldSpec::new(spec.name, FieldShape::padded(FieldShape::Child))
    }
}

fn wrap_bare(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        other => Value::Padded(Box::new(Padded::new(Space::empty(), other.clone()))),
    }
}

fn unwrap_bare(value: Value) -> Value {
    match value {
        Value::Padded(padded) => padded.element,
        other => other,
    }
}

impl NodeCodec for PadBridgeCodec {
    fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    fn encode_fields(
        &self,
        queue: &mut SendQueue<'_>,
        after: &Node,
        before: Option<&Node>,
    ) -> Result<(), ProtocolError> {
        let null = Value::Null;
        for (index, spec) in self.fields.iter().enumerate() {
            let after_value = after.fields.get(index).unwrap_or(&null);
            let before_value = before.map(|b| b.fields.get(index).unwrap_or(&null));
            if index == self.bridged {
                let wrapped_after = wrap_bare(after_value);
                let wrapped_before = before_value.map(wrap_bare);
                queue.send_field(&self.wire_spec(spec), &wrapped_after, wrapped_before.as_ref())?;
            } else {
                queue.send_field(spec, after_value, before_value)?;
            }
        }
        Ok(())
    }

    fn decode_fields(
        &self,
        queue: &mut ReceiveQueue<'_, '_, '_>,
        before: Option<&Node>,
    ) -> Result<Vec<Value>, ProtocolError> {
        let null = Value::Null;
        let mut fields = Vec::with_capacity(self.fields.len());
        for (index, spec) in self.fields.iter().enumerate() {
            let prior = before.map(|b| b.fields.get(index).unwrap_or(&null));
            if index == self.bridged {
                let wrapped_prior = prior.map(wrap_bare);
                let decoded =
                    queue.receive_field(&self.wire_spec(spec), wrapped_prior.as_ref())?;
                fields.push(unwrap_bare(decoded));
            } else {
                fields.push(queue.receive_field(spec, prior)?);
            }
        }
        Ok(fields)
    }
}

// ---------------------------------------------------------------------------
// Registries
// ---------------------------------------------------------------------------

/// Resolves a kind tag to its canonical codec.
pub trait CodecLookup {
    fn codec_for(&self, kind: &Kind) -> Option<Arc<dyn NodeCodec>>;
}

/// One schema's dispatch table.
pub struct SchemaRegistry {
    name: String,
    codecs: HashMap<Kind, Arc<dyn NodeCodec>>,
}

impl SchemaRegistry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            codecs: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register the canonical codec for a kind this schema owns.
    pub fn register(
        &mut self,
        kind: impl Into<Kind>,
        codec: Arc<dyn NodeCodec>,
    ) -> Result<(), ProtocolError> {
        let kind = kind.into();
        if self.codecs.contains_key(&kind) {
            return Err(ProtocolError::DuplicateKind {
                kind,
                schema: self.name.clone(),
            });
        }
        self.codecs.insert(kind, codec);
        Ok(())
    }

    pub fn owns(&self, kind: &Kind) -> bool {
        self.codecs.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &Kind> {
        self.codecs.keys()
    }
}

impl CodecLookup for SchemaRegistry {
    fn codec_for(&self, kind: &Kind) -> Option<Arc<dyn NodeCodec>> {
        self.codecs.get(kind).cloned()
    }
}

/// Composes dispatch tables so each kind is produced/consumed by exactly one
/// canonical codec regardless of which schema's walker initiated the
/// recursion. Earlier tables win; composition rejects overlapping claims.
pub struct DelegatingRegistry {
    tables: Vec<Arc<SchemaRegistry>>,
}

impl std::fmt::Debug for DelegatingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegatingRegistry")
            .field("tables", &self.tables.len())
            .finish()
    }
}

impl DelegatingRegistry {
    /// Specialized table first, generic fallback second.
    pub fn compose(
        specialized: Arc<SchemaRegistry>,
        general: Arc<SchemaRegistry>,
    ) -> Result<Self, ProtocolError> {
        let mut registry = Self {
            tables: vec![specialized],
        };
        registry.push_fallback(general)?;
        Ok(registry)
    }

    /// Append a further fallback table; its kind set must be disjoint from
    /// every table already composed.
    pub fn push_fallback(&mut self, table: Arc<SchemaRegistry>) -> Result<(), ProtocolError> {
        for existing in &self.tables {
            for kind in existing.kinds() {
                if table.owns(kind) {
                    return Err(ProtocolError::DuplicateKind {
                        kind: kind.clone(),
                        schema: table.name().to_string(),
                    });
                }
            }
        }
        self.tables.push(table);
        Ok(())
    }
}

impl CodecLookup for DelegatingRegistry {
    fn codec_for(&self, kind: &Kind) -> Option<Arc<dyn NodeCodec>> {
        self.tables.iter().find_map(|table| table.codec_for(kind))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
