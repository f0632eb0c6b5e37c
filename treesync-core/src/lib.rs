//! # treesync-core
//!
//! Object model and wire constants for the tree synchronization protocol:
//! - [`types`]: [`Node`], identity newtypes, formatting model, [`Value`]
//! - [`wire`]: [`ObjectState`], [`WireUnit`]
//! - [`error`]: [`StateError`]

pub mod error;
pub mod types;
pub mod wire;

pub use error::StateError;
pub use types::{
    Container, Kind, Marker, Markers, Node, NodeId, Padded, RefId, Space, Value,
};
pub use wire::{
    ObjectState, WireUnit, MARKERS_VALUE_TYPE, REF_VALUE_TYPE, SCALAR_VALUE_TYPE,
    SPACE_VALUE_TYPE,
};
