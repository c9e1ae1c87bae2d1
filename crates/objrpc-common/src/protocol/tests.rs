//! Serde round-trip tests for the protocol types.

use std::collections::BTreeMap;

use serde_json::json;

use crate::protocol::{
    Action, Definition, FieldDescriptor, Packet, PacketBody, Reference, WireError, WireValue,
};

fn sample_definition() -> Definition {
    let mut fields = BTreeMap::new();
    fields.insert("add".to_string(), FieldDescriptor::method());
    fields.insert(
        "total".to_string(),
        FieldDescriptor::data(true).with_type("number"),
    );
    fields.insert("label".to_string(), FieldDescriptor::data(false));
    Definition {
        id: 3,
        parent_id: 0,
        name: "Calculator".to_string(),
        ctx_id: Some("calc".to_string()),
        fields,
        remote: false,
        proxy_def: None,
    }
}

#[test]
fn test_definition_round_trip() {
    let def = sample_definition();
    let encoded = serde_json::to_value(&def).unwrap();
    let decoded: Definition = serde_json::from_value(encoded).unwrap();
    assert_eq!(def, decoded);
}

#[test]
fn test_field_descriptor_tagged_repr() {
    let method = serde_json::to_value(FieldDescriptor::method()).unwrap();
    assert_eq!(method, json!({"kind": "method"}));

    let data = serde_json::to_value(FieldDescriptor::data(true)).unwrap();
    assert_eq!(data, json!({"kind": "data", "readonly": true}));
}

#[test]
fn test_field_descriptor_checks() {
    assert!(FieldDescriptor::method().is_method());
    assert!(!FieldDescriptor::method().is_readonly());
    assert!(FieldDescriptor::data(true).is_readonly());
    assert!(!FieldDescriptor::data(false).is_readonly());
}

#[test]
fn test_definition_field_lookup() {
    let def = sample_definition();
    assert!(def.has_field("add"));
    assert!(def.field("add").unwrap().is_method());
    assert!(!def.has_field("missing"));
}

#[test]
fn test_nested_proxy_definition_round_trip() {
    let mut def = sample_definition();
    let mut proxy = sample_definition();
    proxy.id = 9;
    proxy.ctx_id = None;
    def.remote = true;
    def.proxy_def = Some(Box::new(proxy));

    let encoded = serde_json::to_string(&def).unwrap();
    let decoded: Definition = serde_json::from_str(&encoded).unwrap();
    assert!(decoded.remote);
    assert_eq!(decoded.proxy_def_id(), Some(9));
}

#[test]
fn test_wire_value_variants_round_trip() {
    let values = vec![
        WireValue::raw(json!({"n": 42})),
        WireValue::Definition(sample_definition()),
        WireValue::Definitions(vec![sample_definition()]),
        WireValue::Reference(Reference::new(17)),
    ];
    for value in values {
        let encoded = serde_json::to_string(&value).unwrap();
        let decoded: WireValue = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value, decoded);
    }
}

#[test]
fn test_packet_round_trip() {
    let packet = Packet::request(
        11,
        Action::Get,
        PacketBody::Get {
            def_id: 3,
            name: "add".to_string(),
            args: vec![WireValue::raw(json!([1, 2]))],
        },
    );
    let encoded = serde_json::to_string(&packet).unwrap();
    let decoded: Packet = serde_json::from_str(&encoded).unwrap();
    assert_eq!(packet, decoded);
    assert!(decoded.impulse());
    assert_eq!(decoded.action().unwrap(), Action::Get);
}

#[test]
fn test_error_packet_round_trip() {
    let packet = Packet::error_response(5, Action::Set, WireError::new("not_found", "missing"));
    let encoded = serde_json::to_string(&packet).unwrap();
    let decoded: Packet = serde_json::from_str(&encoded).unwrap();
    assert!(decoded.is_error());
    match decoded.body {
        PacketBody::Error(err) => assert_eq!(err.kind, "not_found"),
        other => panic!("expected error body, got {other:?}"),
    }
}

#[test]
fn test_wire_error_maps_back_to_typed_variants() {
    use crate::protocol::ObjrpcError;

    let err = WireError::new("invalid_access", "'x' is not writable").into_error();
    assert!(matches!(err, ObjrpcError::InvalidAccess(_)));

    let err = WireError::new("timeout", "remote timed out").into_error();
    assert!(matches!(err, ObjrpcError::Remote { .. }));
}

#[test]
fn test_wire_error_from_error_preserves_kind() {
    use crate::protocol::ObjrpcError;

    let wire = WireError::from(&ObjrpcError::NotFound("'x' not exists".to_string()));
    assert_eq!(wire.kind, "not_found");
    assert!(matches!(wire.into_error(), ObjrpcError::NotFound(_)));
}
