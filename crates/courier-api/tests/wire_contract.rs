use courier_api::types::{
    Ack, ContentType, DeliveryStatus, Envelope, StorageLocation,
};
use serde_json::Value;
use uuid::Uuid;

fn envelope() -> Envelope {
    Envelope {
        id: Uuid::nil(),
        thread_id: "thread".to_string(),
        sequence: 3,
        sender: "aa".repeat(32),
        recipient: "bb".repeat(32),
        content: "deadbeef".to_string(),
        content_type: ContentType::Text,
        encryption_key_id: "k1".to_string(),
        nonce: "00".repeat(24),
        timestamp: 1_700_000_000_000,
        ttl: 60_000,
        delivery_status: DeliveryStatus::Sent,
        acks: vec![Ack {
            peer_id: "cc".repeat(32),
            timestamp: 1_700_000_000_500,
        }],
        storage_location: StorageLocation::Hot,
        signature: "ff".repeat(64),
        cold_reference: None,
        delivery_token: None,
        chain_ref: None,
    }
}

#[test]
fn envelope_serializes_camel_case() {
    let value: Value = serde_json::to_value(envelope()).expect("serialize");
    let object = value.as_object().expect("object");
    for key in [
        "id",
        "threadId",
        "sequence",
        "sender",
        "recipient",
        "content",
        "contentType",
        "encryptionKeyId",
        "nonce",
        "timestamp",
        "ttl",
        "deliveryStatus",
        "acks",
        "storageLocation",
        "signature",
    ] {
        assert!(object.contains_key(key), "missing {}", key);
    }
    assert_eq!(object["deliveryStatus"], "sent");
    assert_eq!(object["contentType"], "text");
    assert_eq!(object["storageLocation"], "hot");
    assert_eq!(object["acks"][0]["peerId"], "cc".repeat(32));
}

#[test]
fn absent_optionals_stay_off_the_wire() {
    let value: Value = serde_json::to_value(envelope()).expect("serialize");
    let object = value.as_object().expect("object");
    assert!(!object.contains_key("coldReference"));
    assert!(!object.contains_key("deliveryToken"));
    assert!(!object.contains_key("chainRef"));

    let mut full = envelope();
    full.cold_reference = Some("cid".to_string());
    full.delivery_token = Some("tok".to_string());
    full.chain_ref = Some("mint".to_string());
    let value: Value = serde_json::to_value(full).expect("serialize");
    let object = value.as_object().expect("object");
    assert_eq!(object["coldReference"], "cid");
    assert_eq!(object["deliveryToken"], "tok");
    assert_eq!(object["chainRef"], "mint");
}

#[test]
fn unknown_fields_are_rejected() {
    let mut value = serde_json::to_value(envelope()).expect("serialize");
    value
        .as_object_mut()
        .expect("object")
        .insert("surprise".to_string(), Value::Bool(true));
    let parsed: Result<Envelope, _> = serde_json::from_value(value);
    assert!(parsed.is_err());
}

#[test]
fn wire_roundtrip_preserves_envelope() {
    let original = envelope();
    let bytes = serde_json::to_vec(&original).expect("serialize");
    let parsed: Envelope = serde_json::from_slice(&bytes).expect("parse");
    assert_eq!(parsed, original);
}
