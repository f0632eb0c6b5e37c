//! The four session RPC operations (GetObject, GetRef, Visit, Print) plus
//! the inbound receive path they build on.
//!
//! Transport plumbing lives outside this crate; each operation here is one
//! call's worth of work against the session's caches and queues.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use treesync_core::{Kind, Node, NodeId, RefId, WireUnit};
use treesync_wire::{
    decode_object, encode_object, encode_ref_target, BatchCursor, BatchSource, RefSource,
};

use crate::error::SessionError;
use crate::session::{PendingSend, Session};

/// One transport call's worth of a unit stream. `complete` marks the final
/// window; the peer keeps calling until it sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub units: Vec<WireUnit>,
    pub complete: bool,
}

/// Reply shape of the `Visit` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitOutcome {
    pub modified: bool,
}

impl Session {
    /// `GetObject(id, kindHint)`: next window of the diff between the local
    /// object and the peer's last-acknowledged value.
    ///
    /// Repeated calls resume the pending stream rather than restarting it.
    /// An id absent from the local cache yields exactly
    /// `[DELETE, END_OF_OBJECT]`. The mirror is promoted only once the
    /// stream is fully delivered.
    pub fn get_object(
        &mut self,
        id: NodeId,
        kind_hint: Option<&Kind>,
    ) -> Result<Batch, SessionError> {
        self.touch();

        if let Some(mut pending) = self.pending.remove(&id) {
            let units = pending.cursor.next_window(self.config.batch_size);
            let complete = pending.cursor.is_done();
            tracing::debug!(object = %id, complete, "resumed pending delivery");
            if complete {
                self.promote_mirror(id, pending.after);
            } else {
                self.pending.insert(id, pending);
            }
            return Ok(Batch { units, complete });
        }

        let after = self.local.get(&id).cloned();
        if let (Some(hint), Some(node)) = (kind_hint, after.as_ref()) {
            if &node.kind != hint {
                tracing::warn!(object = %id, hint = %hint, actual = %node.kind, "kind hint mismatch");
            }
        }

        let units = match after.as_ref() {
            None => vec![WireUnit::delete(), WireUnit::end_of_object()],
            Some(node) => {
                let before = self.mirror.get(&id).cloned();
                let registry = Rc::clone(&self.registry);
                encode_object(
                    registry.as_ref(),
                    &mut self.send_refs,
                    Some(node),
                    before.as_ref(),
                )?
            }
        };

        let mut cursor = BatchCursor::new(units);
        let units = cursor.next_window(self.config.batch_size);
        let complete = cursor.is_done();
        if complete {
            self.promote_mirror(id, after);
        } else {
            self.pending.insert(id, PendingSend { cursor, after });
        }
        Ok(Batch { units, complete })
    }

    /// `GetRef(refId)`: full state of an already-registered identity, for a
    /// peer that has not materialized it yet. Same wire shape as GetObject.
    pub fn get_ref(&mut self, ref_id: RefId) -> Result<Batch, SessionError> {
        self.touch();
        let Some(node) = self.send_refs.lookup(ref_id) else {
            return Err(SessionError::UnknownRef { ref_id });
        };
        let registry = Rc::clone(&self.registry);
        let units = encode_ref_target(registry.as_ref(), &mut self.send_refs, &node)?;
        Ok(Batch {
            units,
            complete: true,
        })
    }

    /// Inbound path: replay one object's unit stream against this session's
    /// own prior copy, committing the result to the local cache.
    ///
    /// A transport or protocol failure leaves the cache untouched for this
    /// id; nothing commits before END_OF_OBJECT is consumed.
    pub fn receive_object(
        &mut self,
        id: NodeId,
        source: &mut dyn BatchSource,
        ref_source: Option<&mut dyn RefSource>,
    ) -> Result<Option<Rc<Node>>, SessionError> {
        self.touch();
        let before = self.local.get(&id).cloned();
        let ref_source = if self.config.lazy_ref_fetch {
            ref_source
        } else {
            None
        };
        let registry = Rc::clone(&self.registry);
        let decoded = decode_object(
            registry.as_ref(),
            &mut self.recv_refs,
            source,
            ref_source,
            before.as_ref(),
        )?;
        match decoded.as_ref() {
            Some(node) => {
                if node.id != id {
                    tracing::warn!(requested = %id, received = %node.id, "object id mismatch");
                }
                self.local.insert(id, node.clone());
            }
            None => {
                self.local.remove(&id);
            }
        }
        Ok(decoded)
    }

    /// `Visit(visitorName, treeId, paramsId, cursorPath)`: run a registered
    /// visitor over a cached tree. The session's only obligation is the
    /// cache read/write around the external transformation logic.
    pub fn visit(
        &mut self,
        visitor_name: &str,
        tree_id: NodeId,
        params_id: Option<NodeId>,
        cursor_path: &[NodeId],
    ) -> Result<VisitOutcome, SessionError> {
        self.touch();
        let visitor = self
            .visitors
            .get(visitor_name)
            .cloned()
            .ok_or_else(|| SessionError::UnknownVisitor {
                name: visitor_name.to_string(),
            })?;
        let tree = self
            .local
            .get(&tree_id)
            .cloned()
            .ok_or(SessionError::ObjectNotFound { id: tree_id })?;
        let params = params_id.and_then(|id| self.local.get(&id).cloned());

        match visitor.visit(tree.clone(), params, cursor_path) {
            Some(rebuilt) if !Node::same(&rebuilt, &tree) => {
                tracing::debug!(tree = %tree_id, visitor = visitor_name, "tree modified");
                self.local.insert(tree_id, rebuilt);
                Ok(VisitOutcome { modified: true })
            }
            _ => Ok(VisitOutcome { modified: false }),
        }
    }

    /// `Print(treeId, kind)`: resolve the tree via the receive path when an
    /// inbound stream is supplied, then hand off to the external renderer.
    pub fn print(
        &mut self,
        tree_id: NodeId,
        kind: &Kind,
        inbound: Option<&mut dyn BatchSource>,
    ) -> Result<String, SessionError> {
        self.touch();
        if let Some(source) = inbound {
            self.receive_object(tree_id, source, None)?;
        }
        let tree = self
            .local
            .get(&tree_id)
            .cloned()
            .ok_or(SessionError::ObjectNotFound { id: tree_id })?;
        let renderer = self.renderer.as_ref().ok_or(SessionError::NoRenderer)?;
        Ok(renderer.render(tree.as_ref(), kind))
    }

    fn promote_mirror(&mut self, id: NodeId, after: Option<Rc<Node>>) {
        match after {
            Some(node) => {
                self.mirror.insert(id, node);
            }
            None => {
                self.mirror.remove(&id);
            }
        }
    }
}
