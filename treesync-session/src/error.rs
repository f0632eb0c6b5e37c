//! Error types for treesync-session.

use thiserror::Error;

use treesync_core::{NodeId, RefId};
use treesync_wire::ProtocolError;

/// Error surface for session cache, RPC, and rendering operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A fatal wire protocol error. Requires discarding the affected
    /// object, or resetting the session's maps for reference divergence.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The requested object is not in this session's cache.
    #[error("object {id} not found in session cache")]
    ObjectNotFound { id: NodeId },

    /// `GetRef` was asked for an id this session never allocated.
    #[error("ref id {ref_id} is not registered with this session")]
    UnknownRef { ref_id: RefId },

    /// `Visit` named a visitor nothing registered.
    #[error("no visitor registered under `{name}`")]
    UnknownVisitor { name: String },

    /// `Print` was called with no renderer installed.
    #[error("no renderer installed for this session")]
    NoRenderer,

    /// Request/response serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
