//! Wire protocol constants and the unit type exchanged between peers.
//!
//! One wire unit is the triple `[state, valueType, value]`. `value` is null
//! for NO_CHANGE / DELETE / END_OF_OBJECT. A back-reference to an
//! already-transmitted identity is a unit with `valueType = "ref"` whose
//! value is the ref id.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::StateError;
use crate::types::{NodeId, RefId};

/// `valueType` marker for back-reference units.
pub const REF_VALUE_TYPE: &str = "ref";

/// `valueType` marker for raw scalar units.
pub const SCALAR_VALUE_TYPE: &str = "scalar";

/// `valueType` marker for formatting-slot units.
pub const SPACE_VALUE_TYPE: &str = "space";

/// `valueType` marker for marker-bag units.
pub const MARKERS_VALUE_TYPE: &str = "markers";

// ---------------------------------------------------------------------------
// ObjectState
// ---------------------------------------------------------------------------

/// Per-unit protocol state. Wire codes are fixed; never reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ObjectState {
    /// Value is new to the peer; identity never sent before.
    Add = 0,
    /// Value differs from the peer's last known value.
    Change = 1,
    /// Identical to the peer's last known value; payload omitted.
    NoChange = 2,
    /// Value removed / absent.
    Delete = 3,
    /// Terminates one object's field stream.
    EndOfObject = 4,
}

impl From<ObjectState> for u8 {
    fn from(state: ObjectState) -> u8 {
        state as u8
    }
}

impl TryFrom<u8> for ObjectState {
    type Error = StateError;

    fn try_from(code: u8) -> Result<Self, StateError> {
        match code {
            0 => Ok(ObjectState::Add),
            1 => Ok(ObjectState::Change),
            2 => Ok(ObjectState::NoChange),
            3 => Ok(ObjectState::Delete),
            4 => Ok(ObjectState::EndOfObject),
            other => Err(StateError::UnknownState { code: other }),
        }
    }
}

// ---------------------------------------------------------------------------
// WireUnit
// ---------------------------------------------------------------------------

/// One protocol unit: `[state, valueType, value]`.
///
/// Serializes as a 3-element JSON array, matching the transport framing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireUnit(
    pub ObjectState,
    pub Option<String>,
    pub Option<serde_json::Value>,
);

impl WireUnit {
    pub fn state(&self) -> ObjectState {
        self.0
    }

    pub fn value_type(&self) -> Option<&str> {
        self.1.as_deref()
    }

    pub fn value(&self) -> Option<&serde_json::Value> {
        self.2.as_ref()
    }

    // -- constructors -------------------------------------------------------

    pub fn no_change() -> Self {
        WireUnit(ObjectState::NoChange, None, None)
    }

    pub fn delete() -> Self {
        WireUnit(ObjectState::Delete, None, None)
    }

    pub fn end_of_object() -> Self {
        WireUnit(ObjectState::EndOfObject, None, None)
    }

    /// Payload-carrying unit (ADD or CHANGE).
    pub fn value_unit(
        state: ObjectState,
        value_type: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        WireUnit(state, Some(value_type.into()), Some(value))
    }

    /// Opens a node's field stream. The value carries the node's stable id
    /// and its session ref id so both peers' reference maps stay aligned.
    pub fn open_node(
        state: ObjectState,
        kind: impl Into<String>,
        id: NodeId,
        ref_id: RefId,
    ) -> Self {
        WireUnit(
            state,
            Some(kind.into()),
            Some(json!({ "id": id, "ref": ref_id.0 })),
        )
    }

    /// Bare back-reference to an already-transmitted identity.
    pub fn reference(state: ObjectState, ref_id: RefId) -> Self {
        WireUnit(state, Some(REF_VALUE_TYPE.to_string()), Some(json!(ref_id.0)))
    }

    // -- accessors ----------------------------------------------------------

    pub fn is_reference(&self) -> bool {
        self.value_type() == Some(REF_VALUE_TYPE)
    }

    /// Ref id of a bare reference unit.
    pub fn ref_id(&self) -> Option<RefId> {
        if !self.is_reference() {
            return None;
        }
        self.value()
            .and_then(serde_json::Value::as_u64)
            .map(|n| RefId(n as u32))
    }

    /// `(id, ref)` pair carried by a node-opening unit.
    pub fn node_header(&self) -> Option<(NodeId, RefId)> {
        let value = self.value()?;
        let id = serde_json::from_value(value.get("id")?.clone()).ok()?;
        let ref_id = value.get("ref")?.as_u64()? as u32;
        Some((id, RefId(ref_id)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
