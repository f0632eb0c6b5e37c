//! # treesync-wire
//!
//! The tree synchronization core: object-state diffing, reference
//! deduplication, the generic kind-dispatched walker, cross-schema
//! delegation, and batched delivery.
//!
//! Call [`encode_object`] to diff an `after` snapshot against a `before`
//! snapshot into a wire-unit stream, and [`decode_object`] to replay such a
//! stream against the receiver's own prior mirror.

pub mod batch;
pub mod error;
pub mod receive;
pub mod refmap;
pub mod registry;
pub mod send;

pub use batch::{windows, BatchCursor, BatchSource, RefSource, VecBatches};
pub use error::ProtocolError;
pub use receive::{decode_object, ReceiveQueue};
pub use refmap::{ReceiverRefMap, ReferenceMap};
pub use registry::{
    CodecLookup, DelegatingRegistry, FieldShape, FieldSpec, NodeCodec, PadBridgeCodec,
    SchemaRegistry, StructCodec,
};
pub use send::{encode_object, encode_ref_target, SendQueue};
