//! Session state: object caches, reference maps, and the pending-object
//! table for one paired sender/receiver relationship.
//!
//! Sessions share nothing: each owns its reference maps, caches, and
//! pending table. Object caches are mutated only by the queue currently
//! processing that object id; the pending table serializes delivery so one
//! id is never walked twice concurrently within a session.

use std::collections::HashMap;
use std::rc::Rc;

use chrono::{DateTime, Utc};

use treesync_core::{Kind, Node, NodeId};
use treesync_wire::{BatchCursor, CodecLookup, ReceiverRefMap, ReferenceMap};

use crate::config::SessionConfig;

/// External transformation logic, registered by name and driven through the
/// `Visit` call.
///
/// Returns the rebuilt tree when something changed, `None` when untouched.
/// Implementations must preserve reference identity for untouched subtrees;
/// the NO_CHANGE short-circuit of the diff depends on it.
pub trait Visitor {
    fn visit(
        &self,
        tree: Rc<Node>,
        params: Option<Rc<Node>>,
        cursor: &[NodeId],
    ) -> Option<Rc<Node>>;
}

/// External pretty-printer driven through the `Print` call.
pub trait Renderer {
    fn render(&self, tree: &Node, kind: &Kind) -> String;
}

/// One object's outbound stream awaiting full delivery.
pub(crate) struct PendingSend {
    pub(crate) cursor: BatchCursor,
    /// Snapshot promoted to the mirror once the stream is fully delivered.
    pub(crate) after: Option<Rc<Node>>,
}

/// One synchronization session.
pub struct Session {
    pub(crate) registry: Rc<dyn CodecLookup>,
    pub(crate) config: SessionConfig,
    pub(crate) send_refs: ReferenceMap,
    pub(crate) recv_refs: ReceiverRefMap,
    /// Objects this peer holds, by stable id.
    pub(crate) local: HashMap<NodeId, Rc<Node>>,
    /// The peer's last fully-acknowledged value per id: the `before`
    /// snapshot for the next diff.
    pub(crate) mirror: HashMap<NodeId, Rc<Node>>,
    pub(crate) pending: HashMap<NodeId, PendingSend>,
    pub(crate) visitors: HashMap<String, Rc<dyn Visitor>>,
    pub(crate) renderer: Option<Box<dyn Renderer>>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(registry: Rc<dyn CodecLookup>, config: SessionConfig) -> Self {
        let now = Utc::now();
        Self {
            registry,
            config,
            send_refs: ReferenceMap::new(),
            recv_refs: ReceiverRefMap::new(),
            local: HashMap::new(),
            mirror: HashMap::new(),
            pending: HashMap::new(),
            visitors: HashMap::new(),
            renderer: None,
            created_at: now,
            last_activity: now,
        }
    }

    // -- cache management ---------------------------------------------------

    /// Insert or replace an object in the local cache under its stable id.
    pub fn put_object(&mut self, node: Rc<Node>) {
        self.touch();
        self.local.insert(node.id, node);
    }

    pub fn local_object(&self, id: NodeId) -> Option<Rc<Node>> {
        self.local.get(&id).cloned()
    }

    /// Drop an object from the local cache. The peer learns of the eviction
    /// through the `[DELETE, END_OF_OBJECT]` reply to its next GetObject.
    pub fn evict(&mut self, id: NodeId) {
        self.touch();
        self.local.remove(&id);
    }

    pub fn register_visitor(&mut self, name: impl Into<String>, visitor: Rc<dyn Visitor>) {
        self.visitors.insert(name.into(), visitor);
    }

    pub fn set_renderer(&mut self, renderer: Box<dyn Renderer>) {
        self.renderer = Some(renderer);
    }

    // -- sync state ---------------------------------------------------------

    /// Discard one object's partially-delivered outbound stream. Safe at any
    /// window boundary: nothing is committed on the peer until it observes
    /// the final END_OF_OBJECT, so the next GetObject simply restarts.
    pub fn discard_pending(&mut self, id: NodeId) {
        if self.pending.remove(&id).is_some() {
            tracing::debug!(object = %id, "discarded pending delivery");
        }
    }

    /// Recovery from reference-map divergence: reset every piece of shared
    /// sync state. Local objects survive; the next exchange re-sends full
    /// state. Never a per-object retry.
    pub fn reset_sync_state(&mut self) {
        tracing::warn!("resetting session sync state");
        self.send_refs.clear();
        self.recv_refs.clear();
        self.mirror.clear();
        self.pending.clear();
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    pub(crate) fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}
