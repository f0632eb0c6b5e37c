//! Error types for treesync-core.

use thiserror::Error;

/// Errors decoding raw protocol constants.
#[derive(Debug, Error)]
pub enum StateError {
    /// A state byte outside the closed `ObjectState` code set.
    #[error("unknown object state code {code}")]
    UnknownState { code: u8 },
}
