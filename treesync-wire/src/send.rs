//! Send queue: pre-order walk of one object graph, comparing an `after`
//! snapshot against a `before` snapshot to emit a minimal unit stream.
//!
//! The two short-circuits that make re-sending a large tree cheap:
//! - reference-equal subtrees collapse to a single NO_CHANGE unit without
//!   recursing;
//! - an identity already registered in the session's [`ReferenceMap`]
//!   collapses to a bare ref unit instead of being re-walked.

use std::rc::Rc;

use treesync_core::{
    Container, Markers, Node, ObjectState, Padded, Space, Value, WireUnit,
    wire::{MARKERS_VALUE_TYPE, SCALAR_VALUE_TYPE, SPACE_VALUE_TYPE},
};

use crate::error::ProtocolError;
use crate::refmap::ReferenceMap;
use crate::registry::{CodecLookup, FieldShape, FieldSpec};

/// Encode one object: diff `after` against `before` and return the complete
/// unit stream, terminated by exactly one top-level END_OF_OBJECT.
pub fn encode_object(
    registry: &dyn CodecLookup,
    refs: &mut ReferenceMap,
    after: Option<&Rc<Node>>,
    before: Option<&Rc<Node>>,
) -> Result<Vec<WireUnit>, ProtocolError> {
    let mut queue = SendQueue::new(registry, refs, false);
    queue.send_node(after, before)?;
    Ok(queue.finish())
}

/// Encode the full state of a ref-map target for lazy GetRef resolution.
///
/// The ref-map short-circuit is suppressed at the root only; the target is
/// by definition already registered; nested already-sent children still
/// compress to ref units.
pub fn encode_ref_target(
    registry: &dyn CodecLookup,
    refs: &mut ReferenceMap,
    target: &Rc<Node>,
) -> Result<Vec<WireUnit>, ProtocolError> {
    let mut queue = SendQueue::new(registry, refs, true);
    queue.send_node(Some(target), None)?;
    Ok(queue.finish())
}

// ---------------------------------------------------------------------------
// SendQueue
// ---------------------------------------------------------------------------

/// Drives the walker over one object graph. Not reusable across objects.
pub struct SendQueue<'a> {
    registry: &'a dyn CodecLookup,
    refs: &'a mut ReferenceMap,
    out: Vec<WireUnit>,
    suppress_ref_root: bool,
    depth: usize,
}

impl<'a> SendQueue<'a> {
    fn new(registry: &'a dyn CodecLookup, refs: &'a mut ReferenceMap, suppress_ref_root: bool) -> Self {
        Self {
            registry,
            refs,
            out: Vec::new(),
            suppress_ref_root,
            depth: 0,
        }
    }

    /// Close the top-level stream. Node streams (ADD/CHANGE) terminate
    /// themselves; single-unit roots (NO_CHANGE, DELETE, ref) get the
    /// terminator appended here.
    fn finish(mut self) -> Vec<WireUnit> {
        if self.out.last().map(WireUnit::state) != Some(ObjectState::EndOfObject) {
            self.out.push(WireUnit::end_of_object());
        }
        tracing::debug!("encoded object stream of {} units", self.out.len());
        self.out
    }

    /// Sender-side per-node state machine:
    /// `START → {ADD|CHANGE|NO_CHANGE|DELETE} → [fields iff ADD|CHANGE] →
    /// END_OF_OBJECT`.
    fn send_node(
        &mut self,
        after: Option<&Rc<Node>>,
        before: Option<&Rc<Node>>,
    ) -> Result<(), ProtocolError> {
        let Some(after) = after else {
            self.out.push(match before {
                Some(_) => WireUnit::delete(),
                None => WireUnit::no_change(),
            });
            return Ok(());
        };

        if let Some(before) = before {
            if Node::same(after, before) {
                self.out.push(WireUnit::no_change());
                return Ok(());
            }
        }

        let (ref_id, is_new) = self.refs.get_or_add(after);
        // A differing kind means the peer cannot reuse any prior field
        // state; the subtree goes out as a full ADD.
        let before = before.filter(|b| b.kind == after.kind);
        let state = match before {
            Some(_) => ObjectState::Change,
            None => ObjectState::Add,
        };

        if !is_new && !(self.depth == 0 && self.suppress_ref_root) {
            tracing::trace!("back-reference {} for node {}", ref_id, after.id);
            self.out.push(WireUnit::reference(state, ref_id));
            return Ok(());
        }

        let codec = self
            .registry
            .codec_for(&after.kind)
            .ok_or_else(|| ProtocolError::UnknownKind {
                kind: after.kind.clone(),
                object_id: after.id,
            })?;

        self.out.push(WireUnit::open_node(
            state,
            after.kind.0.clone(),
            after.id,
            ref_id,
        ));
        self.depth += 1;
        let walked = codec.encode_fields(self, after, before.map(Rc::as_ref));
        self.depth -= 1;
        walked?;
        self.out.push(WireUnit::end_of_object());
        Ok(())
    }

    /// Encode one field in declaration order. Called by codecs.
    pub fn send_field(
        &mut self,
        spec: &FieldSpec,
        after: &Value,
        before: Option<&Value>,
    ) -> Result<(), ProtocolError> {
        self.send_shaped(&spec.shape, after, before)
    }

    fn send_shaped(
        &mut self,
        shape: &FieldShape,
        after: &Value,
        before: Option<&Value>,
    ) -> Result<(), ProtocolError> {
        match shape {
            FieldShape::Scalar => {
                self.send_scalar(after.as_scalar(), before.and_then(Value::as_scalar));
                Ok(())
            }
            FieldShape::Child => self.send_node(after.as_node(), before.and_then(Value::as_node)),
            FieldShape::Space => {
                self.send_space(space_of(after), before.and_then(space_of))?;
                Ok(())
            }
            FieldShape::Markers => {
                self.send_markers(markers_of(after), before.and_then(markers_of))
            }
            FieldShape::Padded(inner) => {
                self.send_padded(inner, padded_of(after), before.and_then(padded_of))
            }
            FieldShape::Container(inner) => {
                self.send_container(inner, container_of(after), before.and_then(container_of))
            }
        }
    }

    fn send_scalar(&mut self, after: Option<&serde_json::Value>, prior: Option<&serde_json::Value>) {
        self.out.push(match (after, prior) {
            (None, None) => WireUnit::no_change(),
            (None, Some(_)) => WireUnit::delete(),
            (Some(a), Some(p)) if a == p => WireUnit::no_change(),
            (Some(a), Some(_)) => {
                WireUnit::value_unit(ObjectState::Change, SCALAR_VALUE_TYPE, a.clone())
            }
            (Some(a), None) => WireUnit::value_unit(ObjectState::Add, SCALAR_VALUE_TYPE, a.clone()),
        });
    }

    fn send_space(
        &mut self,
        after: Option<&Space>,
        prior: Option<&Space>,
    ) -> Result<(), ProtocolError> {
        let unit = match (after, prior) {
            (None, None) => WireUnit::no_change(),
            (None, Some(_)) => WireUnit::delete(),
            (Some(a), Some(p)) if a == p => WireUnit::no_change(),
            (Some(a), prior) => WireUnit::value_unit(
                match prior {
                    Some(_) => ObjectState::Change,
                    None => ObjectState::Add,
                },
                SPACE_VALUE_TYPE,
                serde_json::to_value(a)?,
            ),
        };
        self.out.push(unit);
        Ok(())
    }

    fn send_markers(
        &mut self,
        after: Option<&Markers>,
        prior: Option<&Markers>,
    ) -> Result<(), ProtocolError> {
        let unit = match (after, prior) {
            (None, None) => WireUnit::no_change(),
            (None, Some(_)) => WireUnit::delete(),
            // Markers are an order-irrelevant bag; reordering alone is not a
            // change.
            (Some(a), Some(p)) if a.equivalent(p) => WireUnit::no_change(),
            (Some(a), prior) => WireUnit::value_unit(
                match prior {
                    Some(_) => ObjectState::Change,
                    None => ObjectState::Add,
                },
                MARKERS_VALUE_TYPE,
                serde_json::to_value(a)?,
            ),
        };
        self.out.push(unit);
        Ok(())
    }

    fn send_padded(
        &mut self,
        inner: &FieldShape,
        after: Option<&Padded>,
        prior: Option<&Padded>,
    ) -> Result<(), ProtocolError> {
        match (after, prior) {
            (None, None) => {
                self.out.push(WireUnit::no_change());
                Ok(())
            }
            (None, Some(_)) => {
                self.out.push(WireUnit::delete());
                Ok(())
            }
            (Some(a), prior) => {
                self.send_space(Some(&a.space), prior.map(|p| &p.space))?;
                self.send_shaped(inner, &a.element, prior.map(|p| &p.element))
            }
        }
    }

    /// Container stream: leading space, then each element's padded stream,
    /// closed by the container's own END_OF_OBJECT boundary. No element
    /// count goes on the wire, so insertions and deletions are
    /// representable.
    fn send_container(
        &mut self,
        inner: &FieldShape,
        after: Option<&Container>,
        prior: Option<&Container>,
    ) -> Result<(), ProtocolError> {
        match (after, prior) {
            (None, None) => {
                self.out.push(WireUnit::no_change());
                Ok(())
            }
            (None, Some(_)) => {
                self.out.push(WireUnit::delete());
                Ok(())
            }
            (Some(a), prior) => {
                self.send_space(Some(&a.before), prior.map(|c| &c.before))?;
                for (index, element) in a.elements.iter().enumerate() {
                    let prior_element = prior.and_then(|c| c.elements.get(index));
                    self.send_space(Some(&element.space), prior_element.map(|p| &p.space))?;
                    self.send_shaped(
                        inner,
                        &element.element,
                        prior_element.map(|p| &p.element),
                    )?;
                }
                self.out.push(WireUnit::end_of_object());
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Value extraction helpers
// ---------------------------------------------------------------------------

pub(crate) fn space_of(value: &Value) -> Option<&Space> {
    match value {
        Value::Space(space) => Some(space),
        _ => None,
    }
}

pub(crate) fn markers_of(value: &Value) -> Option<&Markers> {
    match value {
        Value::Markers(markers) => Some(markers),
        _ => None,
    }
}

pub(crate) fn padded_of(value: &Value) -> Option<&Padded> {
    match value {
        Value::Padded(padded) => Some(padded),
        _ => None,
    }
}

pub(crate) fn container_of(value: &Value) -> Option<&Container> {
    match value {
        Value::Container(container) => Some(container),
        _ => None,
    }
}
