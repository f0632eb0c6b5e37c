//! Error types for treesync-wire.

use thiserror::Error;

use treesync_core::{Kind, NodeId, RefId};

/// All errors that can arise while encoding or decoding a unit stream.
///
/// Every fatal variant carries the object id, the kind when it could be
/// resolved, and the index of the last successfully consumed wire unit.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A reachable node's kind resolves to no codec in any composed table.
    /// Fatal: a schema mismatch is not recoverable mid-session.
    #[error("unknown kind `{kind}` for object {object_id}")]
    UnknownKind { kind: Kind, object_id: NodeId },

    /// END_OF_OBJECT missing, or extra units remain after consuming one
    /// object. Fatal: continuing would corrupt every subsequent object.
    #[error("protocol desync for object {object_id} (kind {kind}) at unit {unit_index}: {detail}")]
    Desync {
        object_id: String,
        kind: String,
        unit_index: usize,
        detail: String,
    },

    /// A ref unit points at an id this session never registered. Indicates
    /// sender/receiver reference map divergence; requires resetting the
    /// session's maps, not a local retry.
    #[error("missing reference {ref_id} for object {object_id} at unit {unit_index}")]
    MissingReference {
        ref_id: RefId,
        object_id: String,
        unit_index: usize,
    },

    /// A kind was registered twice. Each schema must claim a disjoint set.
    #[error("kind `{kind}` already claimed by schema `{schema}`")]
    DuplicateKind { kind: Kind, schema: String },

    /// A transport failure surfaced by a batch or ref source. Never retried
    /// here; the session layer decides whether to restart.
    #[error("transport error: {detail}")]
    Transport { detail: String },

    /// Malformed unit payload.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Out-of-range state byte.
    #[error("state error: {0}")]
    State(#[from] treesync_core::StateError),
}

/// Convenience constructor for [`ProtocolError::Desync`].
pub(crate) fn desync(
    object_id: Option<NodeId>,
    kind: Option<&Kind>,
    unit_index: usize,
    detail: impl Into<String>,
) -> ProtocolError {
    ProtocolError::Desync {
        object_id: object_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        kind: kind
            .map(|k| k.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        unit_index,
        detail: detail.into(),
    }
}
