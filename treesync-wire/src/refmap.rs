//! Reference maps: per-session registries of object identity to ref id.
//!
//! The sender map keys on `Rc` pointer identity, never structural equality.
//! Both maps are scoped to exactly one session, are not thread-safe without
//! external synchronization, and must never be shared across sessions.

use std::collections::HashMap;
use std::rc::Rc;

use treesync_core::{Node, RefId};

// ---------------------------------------------------------------------------
// Sender side
// ---------------------------------------------------------------------------

/// Sender-side registry: identity → ref id, assigned once per identity and
/// stable for the life of the session.
#[derive(Debug, Default)]
pub struct ReferenceMap {
    by_identity: HashMap<*const Node, RefId>,
    // Holds a strong reference per entry so an address is never freed and
    // reused for a different node while the session is alive.
    by_ref: HashMap<RefId, Rc<Node>>,
    next: u32,
}

impl ReferenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing ref id for this identity, or allocates the next
    /// one. The boolean is `true` when the identity was not seen before.
    pub fn get_or_add(&mut self, node: &Rc<Node>) -> (RefId, bool) {
        let ptr = Rc::as_ptr(node);
        if let Some(&ref_id) = self.by_identity.get(&ptr) {
            return (ref_id, false);
        }
        let ref_id = RefId(self.next);
        self.next += 1;
        self.by_identity.insert(ptr, ref_id);
        self.by_ref.insert(ref_id, node.clone());
        tracing::trace!("allocated ref {} for node {}", ref_id, node.id);
        (ref_id, true)
    }

    /// Reverse lookup.
    pub fn lookup(&self, ref_id: RefId) -> Option<Rc<Node>> {
        self.by_ref.get(&ref_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_ref.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ref.is_empty()
    }

    /// Drops every registration. Only valid as part of a whole-session
    /// sync-state reset; ref ids restart from zero.
    pub fn clear(&mut self) {
        self.by_identity.clear();
        self.by_ref.clear();
        self.next = 0;
    }
}

// ---------------------------------------------------------------------------
// Receiver side
// ---------------------------------------------------------------------------

/// Receiver-side registry: ref id → reconstructed node, filled from the
/// `(id, ref)` headers of decoded ADD/CHANGE streams.
#[derive(Debug, Default)]
pub struct ReceiverRefMap {
    by_ref: HashMap<RefId, Rc<Node>>,
}

impl ReceiverRefMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, ref_id: RefId, node: Rc<Node>) {
        if let Some(previous) = self.by_ref.insert(ref_id, node) {
            tracing::debug!("ref {} re-registered (was node {})", ref_id, previous.id);
        }
    }

    pub fn lookup(&self, ref_id: RefId) -> Option<Rc<Node>> {
        self.by_ref.get(&ref_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_ref.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ref.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_ref.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use treesync_core::{Node, Value};

    #[test]
    fn ref_ids_are_stable_and_sequential() {
        let mut map = ReferenceMap::new();
        let a = Node::new("t.A", vec![]);
        let b = Node::new("t.B", vec![]);

        assert_eq!(map.get_or_add(&a), (RefId(0), true));
        assert_eq!(map.get_or_add(&b), (RefId(1), true));
        assert_eq!(map.get_or_add(&a), (RefId(0), false));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn identity_is_pointer_not_structure() {
        let mut map = ReferenceMap::new();
        let a = Node::new("t.A", vec![Value::scalar(1)]);
        let twin = Node::with_id(a.id, a.kind.clone(), a.fields.clone());

        let (first, _) = map.get_or_add(&a);
        let (second, is_new) = map.get_or_add(&twin);
        assert!(is_new, "structurally equal nodes are distinct identities");
        assert_ne!(first, second);
    }

    #[test]
    fn lookup_returns_registered_node() {
        let mut map = ReferenceMap::new();
        let a = Node::new("t.A", vec![]);
        let (ref_id, _) = map.get_or_add(&a);
        let found = map.lookup(ref_id).expect("registered");
        assert!(Node::same(&a, &found));
        assert!(map.lookup(RefId(99)).is_none());
    }

    #[test]
    fn clear_restarts_allocation() {
        let mut map = ReferenceMap::new();
        let a = Node::new("t.A", vec![]);
        map.get_or_add(&a);
        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.get_or_add(&a), (RefId(0), true));
    }

    #[test]
    fn receiver_map_insert_lookup() {
        let mut map = ReceiverRefMap::new();
        let a = Node::new("t.A", vec![]);
        map.insert(RefId(3), a.clone());
        assert!(Node::same(&map.lookup(RefId(3)).expect("present"), &a));
        assert!(map.lookup(RefId(0)).is_none());
    }
}
