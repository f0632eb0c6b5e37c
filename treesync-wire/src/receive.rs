//! Receive queue: replays a unit stream against the receiver's own prior
//! mirror of the same identity.
//!
//! NO_CHANGE fields are taken verbatim from the mirror; ADD/CHANGE fields
//! are decoded recursively; DELETE produces an absent value. The
//! terminating END_OF_OBJECT is always consumed before control returns to
//! the caller; a missing or extra terminator is a fatal desync, never
//! silently absorbed.

use std::rc::Rc;

use treesync_core::{
    Container, Kind, Markers, Node, NodeId, ObjectState, Padded, RefId, Space, Value, WireUnit,
};

use crate::batch::{BatchSource, RefSource, VecBatches};
use crate::error::{desync, ProtocolError};
use crate::refmap::ReceiverRefMap;
use crate::registry::{CodecLookup, FieldShape, FieldSpec};
use crate::send::{container_of, markers_of, padded_of, space_of};

/// Decode one object from a batched unit stream, reconstructing `after`
/// from the receiver's prior `before` mirror plus the delivered units.
///
/// Returns `None` when the stream carries DELETE for the object.
pub fn decode_object(
    registry: &dyn CodecLookup,
    refs: &mut ReceiverRefMap,
    source: &mut dyn BatchSource,
    ref_source: Option<&mut dyn RefSource>,
    before: Option<&Rc<Node>>,
) -> Result<Option<Rc<Node>>, ProtocolError> {
    let mut queue = ReceiveQueue::new(registry, refs, source, ref_source);
    let root_is_stream = {
        let first = queue.peek_unit()?;
        !first.is_reference()
            && matches!(first.state(), ObjectState::Add | ObjectState::Change)
    };
    let decoded = queue.receive_node(before)?;
    // Node streams consume their own terminator; single-unit roots are
    // followed by the top-level one.
    if !root_is_stream {
        queue.expect_end_of_object()?;
    }
    queue.expect_exhausted()?;
    tracing::debug!("decoded object stream of {} units", queue.consumed);
    Ok(decoded)
}

// ---------------------------------------------------------------------------
// ReceiveQueue
// ---------------------------------------------------------------------------

/// Drives the walker over one inbound unit stream. Not reusable across
/// objects.
///
/// `&mut dyn` is invariant in the trait-object lifetime, so the source and
/// ref source keep their own (`'src`, `'rs`); callers' borrows and the
/// nested fetch queue need not outlive `'a`.
pub struct ReceiveQueue<'a, 'src, 'rs> {
    registry: &'a dyn CodecLookup,
    refs: &'a mut ReceiverRefMap,
    source: &'a mut (dyn BatchSource + 'src),
    ref_source: Option<&'a mut (dyn RefSource + 'rs)>,
    buffer: Vec<WireUnit>,
    pos: usize,
    consumed: usize,
    current_object: Option<NodeId>,
    current_kind: Option<Kind>,
}

impl<'a, 'src, 'rs> ReceiveQueue<'a, 'src, 'rs> {
    fn new(
        registry: &'a dyn CodecLookup,
        refs: &'a mut ReceiverRefMap,
        source: &'a mut (dyn BatchSource + 'src),
        ref_source: Option<&'a mut (dyn RefSource + 'rs)>,
    ) -> Self {
        Self {
            registry,
            refs,
            source,
            ref_source,
            buffer: Vec::new(),
            pos: 0,
            consumed: 0,
            current_object: None,
            current_kind: None,
        }
    }

    // -- unit cursor --------------------------------------------------------

    /// The only suspension point: exhausting the delivered batch pulls the
    /// next one from the source.
    fn fill(&mut self) -> Result<(), ProtocolError> {
        while self.pos >= self.buffer.len() {
            let batch = self.source.next_batch()?;
            if batch.is_empty() {
                return Err(self.desync_here("unit stream ended before END_OF_OBJECT"));
            }
            self.buffer = batch;
            self.pos = 0;
        }
        Ok(())
    }

    fn peek_unit(&mut self) -> Result<&WireUnit, ProtocolError> {
        self.fill()?;
        Ok(&self.buffer[self.pos])
    }

    fn peek_state(&mut self) -> Result<ObjectState, ProtocolError> {
        Ok(self.peek_unit()?.state())
    }

    fn next_unit(&mut self) -> Result<WireUnit, ProtocolError> {
        self.fill()?;
        let unit = self.buffer[self.pos].clone();
        self.pos += 1;
        self.consumed += 1;
        Ok(unit)
    }

    fn desync_here(&self, detail: impl Into<String>) -> ProtocolError {
        desync(
            self.current_object,
            self.current_kind.as_ref(),
            self.consumed,
            detail,
        )
    }

    fn object_label(&self) -> String {
        self.current_object
            .map(|id| id.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn expect_end_of_object(&mut self) -> Result<(), ProtocolError> {
        let unit = self.next_unit()?;
        if unit.state() != ObjectState::EndOfObject {
            return Err(self.desync_here(format!(
                "expected END_OF_OBJECT, got state {:?}",
                unit.state()
            )));
        }
        Ok(())
    }

    fn expect_exhausted(&mut self) -> Result<(), ProtocolError> {
        if self.pos < self.buffer.len() {
            return Err(self.desync_here(format!(
                "{} extra units remain after object",
                self.buffer.len() - self.pos
            )));
        }
        // A stray unit may sit in a window not yet pulled; the source must
        // have nothing left either.
        let batch = self.source.next_batch()?;
        if !batch.is_empty() {
            return Err(self.desync_here(format!(
                "{} extra units delivered after object",
                batch.len()
            )));
        }
        Ok(())
    }

    // -- node decoding ------------------------------------------------------

    /// Receiver-side per-node state machine, the mirror of the sender's.
    fn receive_node(
        &mut self,
        before: Option<&Rc<Node>>,
    ) -> Result<Option<Rc<Node>>, ProtocolError> {
        let unit = self.next_unit()?;

        if unit.is_reference() {
            let ref_id = unit
                .ref_id()
                .ok_or_else(|| self.desync_here("malformed reference unit"))?;
            return Ok(Some(self.resolve_reference(ref_id)?));
        }

        match unit.state() {
            ObjectState::NoChange => Ok(before.cloned()),
            ObjectState::Delete => Ok(None),
            ObjectState::Add | ObjectState::Change => {
                let kind = Kind::from(
                    unit.value_type()
                        .ok_or_else(|| self.desync_here("node unit carries no kind"))?,
                );
                let (id, ref_id) = unit
                    .node_header()
                    .ok_or_else(|| self.desync_here("node unit carries no id/ref header"))?;
                let codec = self.registry.codec_for(&kind).ok_or_else(|| {
                    ProtocolError::UnknownKind {
                        kind: kind.clone(),
                        object_id: id,
                    }
                })?;

                let before = match unit.state() {
                    ObjectState::Change => {
                        let matching = before.filter(|b| b.kind == kind);
                        if matching.is_none() {
                            // Peer believes we hold a prior value we do not
                            // have: reference-state divergence.
                            return Err(desync(
                                Some(id),
                                Some(&kind),
                                self.consumed,
                                "CHANGE received with no matching prior value",
                            ));
                        }
                        matching
                    }
                    _ => None,
                };

                let outer_object = self.current_object.replace(id);
                let outer_kind = self.current_kind.replace(kind.clone());
                let fields = codec.decode_fields(self, before.map(Rc::as_ref))?;
                self.expect_end_of_object()?;
                self.current_object = outer_object;
                self.current_kind = outer_kind;

                let node = Node::with_id(id, kind, fields);
                self.refs.insert(ref_id, node.clone());
                Ok(Some(node))
            }
            ObjectState::EndOfObject => {
                Err(self.desync_here("unexpected END_OF_OBJECT in node position"))
            }
        }
    }

    fn resolve_reference(&mut self, ref_id: RefId) -> Result<Rc<Node>, ProtocolError> {
        if let Some(node) = self.refs.lookup(ref_id) {
            return Ok(node);
        }
        let object_id = self.object_label();
        let unit_index = self.consumed;
        let units = match self.ref_source.as_mut() {
            Some(source) => {
                tracing::debug!("lazy fetch of unresolved ref {}", ref_id);
                source.fetch_ref(ref_id)?
            }
            None => {
                return Err(ProtocolError::MissingReference {
                    ref_id,
                    object_id,
                    unit_index,
                })
            }
        };

        // The fetched stream may itself reference identities we have not
        // materialized, so the nested queue keeps the ref source.
        let mut fetched = VecBatches::single(units);
        let node = {
            let ref_source = self.ref_source.as_mut().map(|s| &mut **s);
            let mut nested =
                ReceiveQueue::new(self.registry, &mut *self.refs, &mut fetched, ref_source);
            let node = nested.receive_node(None)?;
            nested.expect_exhausted()?;
            node
        };
        node.ok_or(ProtocolError::MissingReference {
            ref_id,
            object_id,
            unit_index,
        })
    }

    // -- field decoding -----------------------------------------------------

    /// Decode one field in declaration order. Called by codecs.
    pub fn receive_field(
        &mut self,
        spec: &FieldSpec,
        prior: Option<&Value>,
    ) -> Result<Value, ProtocolError> {
        self.receive_shaped(&spec.shape, prior)
    }

    fn receive_shaped(
        &mut self,
        shape: &FieldShape,
        prior: Option<&Value>,
    ) -> Result<Value, ProtocolError> {
        match shape {
            FieldShape::Scalar => self.receive_scalar(prior.and_then(Value::as_scalar)),
            FieldShape::Child => {
                Ok(match self.receive_node(prior.and_then(Value::as_node))? {
                    Some(node) => Value::Node(node),
                    None => Value::Null,
                })
            }
            FieldShape::Space => Ok(match self.receive_space(prior.and_then(space_of))? {
                Some(space) => Value::Space(space),
                None => Value::Null,
            }),
            FieldShape::Markers => self.receive_markers(prior.and_then(markers_of)),
            FieldShape::Padded(inner) => self.receive_padded(inner, prior.and_then(padded_of)),
            FieldShape::Container(inner) => {
                self.receive_container(inner, prior.and_then(container_of))
            }
        }
    }

    fn receive_scalar(
        &mut self,
        prior: Option<&serde_json::Value>,
    ) -> Result<Value, ProtocolError> {
        let unit = self.next_unit()?;
        match unit.state() {
            ObjectState::NoChange => Ok(prior
                .cloned()
                .map(Value::Scalar)
                .unwrap_or(Value::Null)),
            ObjectState::Delete => Ok(Value::Null),
            ObjectState::Add | ObjectState::Change => {
                let value = unit
                    .value()
                    .cloned()
                    .ok_or_else(|| self.desync_here("scalar unit carries no value"))?;
                Ok(Value::Scalar(value))
            }
            ObjectState::EndOfObject => {
                Err(self.desync_here("unexpected END_OF_OBJECT in scalar field"))
            }
        }
    }

    fn receive_space(&mut self, prior: Option<&Space>) -> Result<Option<Space>, ProtocolError> {
        let unit = self.next_unit()?;
        match unit.state() {
            ObjectState::NoChange => Ok(prior.cloned()),
            ObjectState::Delete => Ok(None),
            ObjectState::Add | ObjectState::Change => {
                let value = unit
                    .value()
                    .cloned()
                    .ok_or_else(|| self.desync_here("space unit carries no value"))?;
                Ok(Some(serde_json::from_value(value)?))
            }
            ObjectState::EndOfObject => {
                Err(self.desync_here("unexpected END_OF_OBJECT in space field"))
            }
        }
    }

    fn receive_markers(&mut self, prior: Option<&Markers>) -> Result<Value, ProtocolError> {
        let unit = self.next_unit()?;
        match unit.state() {
            ObjectState::NoChange => Ok(prior
                .cloned()
                .map(Value::Markers)
                .unwrap_or(Value::Null)),
            ObjectState::Delete => Ok(Value::Null),
            ObjectState::Add | ObjectState::Change => {
                let value = unit
                    .value()
                    .cloned()
                    .ok_or_else(|| self.desync_here("markers unit carries no value"))?;
                Ok(Value::Markers(serde_json::from_value(value)?))
            }
            ObjectState::EndOfObject => {
                Err(self.desync_here("unexpected END_OF_OBJECT in markers field"))
            }
        }
    }

    fn receive_padded(
        &mut self,
        inner: &FieldShape,
        prior: Option<&Padded>,
    ) -> Result<Value, ProtocolError> {
        match self.peek_state()? {
            ObjectState::Delete => {
                self.next_unit()?;
                Ok(Value::Null)
            }
            // With no prior padded value, a leading NO_CHANGE can only mean
            // "slot still absent"; a present padded always opens with its
            // space unit.
            ObjectState::NoChange if prior.is_none() => {
                self.next_unit()?;
                Ok(Value::Null)
            }
            _ => {
                let space = self
                    .receive_space(prior.map(|p| &p.space))?
                    .unwrap_or_default();
                let element = self.receive_shaped(inner, prior.map(|p| &p.element))?;
                Ok(Value::Padded(Box::new(Padded { space, element })))
            }
        }
    }

    fn receive_container(
        &mut self,
        inner: &FieldShape,
        prior: Option<&Container>,
    ) -> Result<Value, ProtocolError> {
        match self.peek_state()? {
            ObjectState::Delete => {
                self.next_unit()?;
                Ok(Value::Null)
            }
            ObjectState::NoChange if prior.is_none() => {
                self.next_unit()?;
                Ok(Value::Null)
            }
            _ => {
                let before = self
                    .receive_space(prior.map(|c| &c.before))?
                    .unwrap_or_default();
                let mut elements = Vec::new();
                // The element sequence has no count on the wire; it runs to
                // the container's own END_OF_OBJECT boundary.
                loop {
                    if self.peek_state()? == ObjectState::EndOfObject {
                        self.next_unit()?;
                        break;
                    }
                    let prior_element = prior.and_then(|c| c.elements.get(elements.len()));
                    let space = self
                        .receive_space(prior_element.map(|p| &p.space))?
                        .unwrap_or_default();
                    let element =
                        self.receive_shaped(inner, prior_element.map(|p| &p.element))?;
                    elements.push(Padded { space, element });
                }
                Ok(Value::Container(Container { before, elements }))
            }
        }
    }
}
