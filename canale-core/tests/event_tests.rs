//! Integration tests for the event module.

use canale_core::event::{ChangeMessage, OperationType};

#[test]
fn test_operation_type_parse_known() {
    assert_eq!(OperationType::parse("insert"), OperationType::Insert);
    assert_eq!(OperationType::parse("update"), OperationType::Update);
    assert_eq!(OperationType::parse("replace"), OperationType::Replace);
    assert_eq!(OperationType::parse("delete"), OperationType::Delete);
    assert_eq!(OperationType::parse("invalidate"), OperationType::Invalidate);
    assert_eq!(OperationType::parse("drop"), OperationType::Drop);
    assert_eq!(
        OperationType::parse("dropDatabase"),
        OperationType::DropDatabase
    );
    assert_eq!(OperationType::parse("rename"), OperationType::Rename);
}

#[test]
fn test_operation_type_parse_unknown_preserves_raw() {
    let op = OperationType::parse("shardCollection");
    assert_eq!(op, OperationType::Unknown("shardCollection".to_string()));
    assert_eq!(op.as_str(), "shardCollection");
    assert!(!op.is_publishable());
}

#[test]
fn test_publishable_set_is_exactly_the_four_data_operations() {
    assert!(OperationType::Insert.is_publishable());
    assert!(OperationType::Update.is_publishable());
    assert!(OperationType::Replace.is_publishable());
    assert!(OperationType::Delete.is_publishable());

    assert!(!OperationType::Invalidate.is_publishable());
    assert!(!OperationType::Drop.is_publishable());
    assert!(!OperationType::DropDatabase.is_publishable());
    assert!(!OperationType::Rename.is_publishable());
}

#[test]
fn test_invalidate_predicate() {
    assert!(OperationType::Invalidate.is_invalidate());
    assert!(!OperationType::Drop.is_invalidate());
}

#[test]
fn test_subject_building() {
    assert_eq!(OperationType::Insert.subject("COLL1"), "COLL1.insert");
    assert_eq!(OperationType::Delete.subject("ORDERS"), "ORDERS.delete");
}

#[test]
fn test_operation_type_serde_roundtrip() {
    let json = serde_json::to_string(&OperationType::Insert).unwrap();
    assert_eq!(json, r#""insert""#);

    let back: OperationType = serde_json::from_str(&json).unwrap();
    assert_eq!(back, OperationType::Insert);

    let json = serde_json::to_string(&OperationType::DropDatabase).unwrap();
    assert_eq!(json, r#""dropdatabase""#);
}

#[test]
fn test_change_message_construction() {
    let msg = ChangeMessage::new(
        OperationType::Insert.subject("COLL1"),
        "8264BEB9F3000000012B0229296E04",
        br#"{"operationType":"insert"}"#.to_vec(),
    );

    assert_eq!(msg.subject, "COLL1.insert");
    assert_eq!(msg.id, "8264BEB9F3000000012B0229296E04");
    assert!(!msg.payload.is_empty());
}

#[test]
fn test_display_matches_as_str() {
    assert_eq!(OperationType::Update.to_string(), "update");
    assert_eq!(
        OperationType::Unknown("modify".to_string()).to_string(),
        "modify"
    );
}
