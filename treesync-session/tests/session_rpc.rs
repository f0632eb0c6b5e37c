//! Session RPC tests: two in-process sessions exchanging unit streams,
//! driving the GetObject / GetRef / Visit / Print surface end to end.

use std::rc::Rc;
use std::sync::Arc;

use rstest::rstest;

use treesync_core::{Kind, Node, NodeId, ObjectState, RefId, Space, Value, WireUnit};
use treesync_wire::{
    CodecLookup, FieldShape, FieldSpec, ProtocolError, RefSource, SchemaRegistry, StructCodec,
    VecBatches,
};

use treesync_session::{Renderer, Session, SessionConfig, SessionError, Visitor};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn schema() -> SchemaRegistry {
    let mut schema = SchemaRegistry::new("doc");
    schema
        .register(
            "doc.Root",
            Arc::new(StructCodec::new(vec![
                FieldSpec::new("first", FieldShape::Child),
                FieldSpec::new("second", FieldShape::Child),
            ])),
        )
        .expect("register");
    schema
        .register(
            "doc.Literal",
            Arc::new(StructCodec::new(vec![
                FieldSpec::new("value", FieldShape::Scalar),
                FieldSpec::new("prefix", FieldShape::Space),
            ])),
        )
        .expect("register");
    schema
}

fn session(batch_size: usize) -> Session {
    let registry: Rc<dyn CodecLookup> = Rc::new(schema());
    Session::new(
        registry,
        SessionConfig {
            batch_size,
            lazy_ref_fetch: true,
        },
    )
}

fn lit(value: i64) -> Rc<Node> {
    Node::new(
        "doc.Literal",
        vec![Value::scalar(value), Value::Space(Space::whitespace(" "))],
    )
}

fn tree() -> Rc<Node> {
    Node::new("doc.Root", vec![Value::Node(lit(1)), Value::Node(lit(2))])
}

/// Pull windows from the sender until the stream completes, then replay them
/// into the receiver.
fn deliver(sender: &mut Session, receiver: &mut Session, id: NodeId) -> Option<Rc<Node>> {
    let mut batches = Vec::new();
    loop {
        let batch = sender.get_object(id, None).expect("get_object");
        let complete = batch.complete;
        batches.push(batch.units);
        if complete {
            break;
        }
    }
    let mut source = VecBatches::new(batches);
    receiver
        .receive_object(id, &mut source, None)
        .expect("receive_object")
}

/// Ref source backed by the peer session's GetRef call.
struct PeerRefSource<'a> {
    peer: &'a mut Session,
}

impl RefSource for PeerRefSource<'_> {
    fn fetch_ref(&mut self, ref_id: RefId) -> Result<Vec<WireUnit>, ProtocolError> {
        let batch = self
            .peer
            .get_ref(ref_id)
            .map_err(|e| ProtocolError::Transport {
                detail: e.to_string(),
            })?;
        Ok(batch.units)
    }
}

// ---------------------------------------------------------------------------
// GetObject
// ---------------------------------------------------------------------------

#[test]
fn absent_object_yields_delete_stream() {
    let mut sender = session(256);
    let batch = sender.get_object(NodeId::random(), None).expect("get");
    assert!(batch.complete);
    assert_eq!(
        batch.units,
        vec![WireUnit::delete(), WireUnit::end_of_object()]
    );
}

#[test]
fn full_sync_then_no_change() {
    let mut sender = session(256);
    let mut receiver = session(256);
    let tree = tree();
    sender.put_object(tree.clone());

    let received = deliver(&mut sender, &mut receiver, tree.id).expect("present");
    assert_eq!(received, tree);
    assert_eq!(receiver.local_object(tree.id), Some(received));

    // Mirror was promoted; an unchanged object now costs two units.
    let batch = sender.get_object(tree.id, None).expect("get");
    assert!(batch.complete);
    assert_eq!(
        batch.units.iter().map(WireUnit::state).collect::<Vec<_>>(),
        vec![ObjectState::NoChange, ObjectState::EndOfObject]
    );
}

#[rstest]
#[case(1)]
#[case(3)]
fn windowed_delivery_is_transparent(#[case] batch_size: usize) {
    let mut sender = session(batch_size);
    let mut receiver = session(256);
    let tree = tree();
    sender.put_object(tree.clone());

    let first = sender.get_object(tree.id, None).expect("get");
    assert!(!first.complete, "stream must span several windows");
    assert!(first.units.len() <= batch_size);

    let mut batches = vec![first.units];
    loop {
        let batch = sender.get_object(tree.id, None).expect("get");
        let complete = batch.complete;
        batches.push(batch.units);
        if complete {
            break;
        }
    }
    let mut source = VecBatches::new(batches);
    let received = receiver
        .receive_object(tree.id, &mut source, None)
        .expect("receive")
        .expect("present");
    assert_eq!(received, tree);
}

#[test]
fn discarded_delivery_recovers_through_ref_fetch() {
    let mut sender = session(4);
    let mut receiver = session(256);
    let tree = tree();
    sender.put_object(tree.clone());

    // Abandon a partially-delivered stream mid-flight.
    let first = sender.get_object(tree.id, None).expect("get");
    assert!(!first.complete);
    sender.discard_pending(tree.id);

    // The tree is already registered in the sender's reference map, so the
    // restarted stream is a bare back-reference the receiver must fetch.
    let batch = sender.get_object(tree.id, None).expect("get");
    assert!(batch.complete);
    assert!(batch.units[0].is_reference());

    let mut source = VecBatches::single(batch.units);
    let mut refs = PeerRefSource { peer: &mut sender };
    let received = receiver
        .receive_object(tree.id, &mut source, Some(&mut refs))
        .expect("receive")
        .expect("present");
    assert_eq!(received, tree);
}

#[test]
fn evicted_object_propagates_as_delete() {
    let mut sender = session(256);
    let mut receiver = session(256);
    let tree = tree();
    sender.put_object(tree.clone());
    deliver(&mut sender, &mut receiver, tree.id);

    sender.evict(tree.id);
    let batch = sender.get_object(tree.id, None).expect("get");
    assert_eq!(
        batch.units,
        vec![WireUnit::delete(), WireUnit::end_of_object()]
    );

    let mut source = VecBatches::single(batch.units);
    let received = receiver
        .receive_object(tree.id, &mut source, None)
        .expect("receive");
    assert!(received.is_none());
    assert!(receiver.local_object(tree.id).is_none());
}

#[test]
fn reset_sync_state_resends_full_state() {
    let mut sender = session(256);
    let mut receiver = session(256);
    let tree = tree();
    sender.put_object(tree.clone());
    deliver(&mut sender, &mut receiver, tree.id);

    sender.reset_sync_state();
    receiver.reset_sync_state();

    let batch = sender.get_object(tree.id, None).expect("get");
    assert_eq!(
        batch.units[0].state(),
        ObjectState::Add,
        "cleared mirror forces a full re-send"
    );
    let mut source = VecBatches::single(batch.units);
    let received = receiver
        .receive_object(tree.id, &mut source, None)
        .expect("receive")
        .expect("present");
    assert_eq!(received, tree);
}

// ---------------------------------------------------------------------------
// GetRef
// ---------------------------------------------------------------------------

#[test]
fn get_ref_of_unregistered_id_fails() {
    let mut sender = session(256);
    let err = sender.get_ref(RefId(99)).expect_err("unknown ref");
    assert!(matches!(
        err,
        SessionError::UnknownRef { ref_id: RefId(99) }
    ));
}

// ---------------------------------------------------------------------------
// Visit
// ---------------------------------------------------------------------------

struct BumpFirstLiteral;

impl Visitor for BumpFirstLiteral {
    fn visit(
        &self,
        tree: Rc<Node>,
        _params: Option<Rc<Node>>,
        _cursor: &[NodeId],
    ) -> Option<Rc<Node>> {
        let lit = tree.fields[0].as_node()?;
        let bumped = lit.replace_fields(vec![Value::scalar(99), lit.fields[1].clone()]);
        let mut fields = tree.fields.clone();
        fields[0] = Value::Node(bumped);
        Some(tree.replace_fields(fields))
    }
}

struct Noop;

impl Visitor for Noop {
    fn visit(
        &self,
        _tree: Rc<Node>,
        _params: Option<Rc<Node>>,
        _cursor: &[NodeId],
    ) -> Option<Rc<Node>> {
        None
    }
}

#[test]
fn visit_rewrites_cached_tree_and_reports_modified() {
    let mut sender = session(256);
    let tree = tree();
    sender.put_object(tree.clone());
    sender.register_visitor("bump", Rc::new(BumpFirstLiteral));

    let outcome = sender.visit("bump", tree.id, None, &[]).expect("visit");
    assert!(outcome.modified);

    let rebuilt = sender.local_object(tree.id).expect("present");
    assert_eq!(rebuilt.id, tree.id, "stable id survives the rewrite");
    let first = rebuilt.fields[0].as_node().expect("child");
    assert_eq!(first.fields[0].as_scalar(), Some(&serde_json::json!(99)));
}

#[test]
fn visit_after_sync_produces_a_change_only_diff() {
    let mut sender = session(256);
    let mut receiver = session(256);
    let tree = tree();
    sender.put_object(tree.clone());
    deliver(&mut sender, &mut receiver, tree.id);

    sender.register_visitor("bump", Rc::new(BumpFirstLiteral));
    sender.visit("bump", tree.id, None, &[]).expect("visit");

    let batch = sender.get_object(tree.id, None).expect("get");
    assert!(
        !batch
            .units
            .iter()
            .any(|u| u.state() == ObjectState::Add),
        "untouched subtrees never re-transmit as ADD"
    );
    assert!(batch
        .units
        .iter()
        .any(|u| u.state() == ObjectState::NoChange));

    let mut source = VecBatches::single(batch.units);
    let received = receiver
        .receive_object(tree.id, &mut source, None)
        .expect("receive")
        .expect("present");
    assert_eq!(Some(received), sender.local_object(tree.id));
}

#[test]
fn visit_without_rebuild_reports_unmodified() {
    let mut sender = session(256);
    let tree = tree();
    sender.put_object(tree.clone());
    sender.register_visitor("noop", Rc::new(Noop));

    let outcome = sender.visit("noop", tree.id, None, &[]).expect("visit");
    assert!(!outcome.modified);
    assert!(Node::same(
        &sender.local_object(tree.id).expect("present"),
        &tree
    ));
}

#[test]
fn visit_errors_name_the_missing_piece() {
    let mut sender = session(256);
    let tree = tree();
    sender.put_object(tree.clone());

    let err = sender
        .visit("missing", tree.id, None, &[])
        .expect_err("unknown visitor");
    assert!(matches!(err, SessionError::UnknownVisitor { .. }));

    sender.register_visitor("noop", Rc::new(Noop));
    let err = sender
        .visit("noop", NodeId::random(), None, &[])
        .expect_err("unknown tree");
    assert!(matches!(err, SessionError::ObjectNotFound { .. }));
}

// ---------------------------------------------------------------------------
// Print
// ---------------------------------------------------------------------------

struct FlatRenderer;

impl Renderer for FlatRenderer {
    fn render(&self, tree: &Node, _kind: &Kind) -> String {
        let mut out = String::new();
        collect_node(tree, &mut out);
        out
    }
}

fn collect_node(node: &Node, out: &mut String) {
    for field in &node.fields {
        collect_value(field, out);
    }
}

fn collect_value(value: &Value, out: &mut String) {
    match value {
        Value::Scalar(v) => match v.as_str() {
            Some(s) => out.push_str(s),
            None => out.push_str(&v.to_string()),
        },
        Value::Node(node) => collect_node(node, out),
        Value::Space(space) => out.push_str(&space.whitespace),
        Value::Padded(padded) => {
            out.push_str(&padded.space.whitespace);
            collect_value(&padded.element, out);
        }
        Value::Container(container) => {
            out.push_str(&container.before.whitespace);
            for padded in &container.elements {
                out.push_str(&padded.space.whitespace);
                collect_value(&padded.element, out);
            }
        }
        Value::Null | Value::Markers(_) => {}
    }
}

#[test]
fn print_renders_cached_tree() {
    let mut sender = session(256);
    let tree = tree();
    sender.put_object(tree.clone());
    sender.set_renderer(Box::new(FlatRenderer));

    let text = sender
        .print(tree.id, &Kind::from("doc.Root"), None)
        .expect("print");
    assert_eq!(text, "1 2 ");
}

#[test]
fn print_resolves_inbound_stream_first() {
    let mut sender = session(256);
    let mut receiver = session(256);
    let tree = tree();
    sender.put_object(tree.clone());
    receiver.set_renderer(Box::new(FlatRenderer));

    let batch = sender.get_object(tree.id, None).expect("get");
    assert!(batch.complete);
    let mut source = VecBatches::single(batch.units);
    let text = receiver
        .print(tree.id, &Kind::from("doc.Root"), Some(&mut source))
        .expect("print");
    assert_eq!(text, "1 2 ");
    assert!(receiver.local_object(tree.id).is_some());
}

#[test]
fn print_without_renderer_fails() {
    let mut sender = session(256);
    let tree = tree();
    sender.put_object(tree.clone());
    let err = sender
        .print(tree.id, &Kind::from("doc.Root"), None)
        .expect_err("no renderer");
    assert!(matches!(err, SessionError::NoRenderer));
}
