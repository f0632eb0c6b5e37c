//! Wire-format serde tests: units and formatting values must survive the
//! JSON transport framing byte-for-byte compatibly between peers.

use rstest::rstest;
use serde_json::json;

use treesync_core::{
    Marker, Markers, NodeId, ObjectState, RefId, Space, WireUnit, SCALAR_VALUE_TYPE,
    SPACE_VALUE_TYPE,
};

#[rstest]
#[case::no_change(WireUnit::no_change())]
#[case::delete(WireUnit::delete())]
#[case::end_of_object(WireUnit::end_of_object())]
#[case::scalar(WireUnit::value_unit(ObjectState::Add, SCALAR_VALUE_TYPE, json!("hello")))]
#[case::space(WireUnit::value_unit(
    ObjectState::Change,
    SPACE_VALUE_TYPE,
    json!({"whitespace": "  "})
))]
#[case::reference(WireUnit::reference(ObjectState::Add, RefId(12)))]
#[case::open(WireUnit::open_node(ObjectState::Change, "tree.Root", NodeId::random(), RefId(0)))]
fn unit_survives_transport(#[case] unit: WireUnit) {
    let wire = serde_json::to_string(&unit).unwrap();
    let back: WireUnit = serde_json::from_str(&wire).unwrap();
    assert_eq!(back, unit);
}

#[test]
fn unit_stream_frames_as_json_array_of_triples() {
    let units = vec![
        WireUnit::value_unit(ObjectState::Change, SCALAR_VALUE_TYPE, json!(2)),
        WireUnit::no_change(),
        WireUnit::end_of_object(),
    ];
    let wire = serde_json::to_string(&units).unwrap();
    assert_eq!(wire, r#"[[1,"scalar",2],[2,null,null],[4,null,null]]"#);

    let back: Vec<WireUnit> = serde_json::from_str(&wire).unwrap();
    assert_eq!(back, units);
}

#[test]
fn unknown_state_code_is_rejected() {
    let err = serde_json::from_str::<WireUnit>("[9,null,null]").unwrap_err();
    assert!(err.to_string().contains("unknown object state code"));
}

#[test]
fn space_omits_empty_comments() {
    let wire = serde_json::to_value(Space::whitespace("\n  ")).unwrap();
    assert_eq!(wire, json!({"whitespace": "\n  "}));

    let commented = Space {
        whitespace: " ".to_string(),
        comments: vec!["// note".to_string()],
    };
    let back: Space = serde_json::from_value(serde_json::to_value(&commented).unwrap()).unwrap();
    assert_eq!(back, commented);

    // A peer that never sends the comments field still parses.
    let sparse: Space = serde_json::from_value(json!({"whitespace": "\t"})).unwrap();
    assert_eq!(sparse, Space::whitespace("\t"));
}

#[test]
fn markers_roundtrip_with_ids() {
    let markers = Markers {
        markers: vec![Marker {
            id: NodeId::random(),
            name: "searchResult".to_string(),
        }],
    };
    let back: Markers = serde_json::from_value(serde_json::to_value(&markers).unwrap()).unwrap();
    assert_eq!(back, markers);
    assert!(back.equivalent(&markers));
}
