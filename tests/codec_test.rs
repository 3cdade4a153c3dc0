//! 消息编解码测试

use std::collections::BTreeMap;

use locust_drone::{Message, MessageType, ProtocolError};
use proptest::prelude::*;
use rmpv::Value;

fn arb_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Nil),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        any::<u64>().prop_map(Value::from),
        (-1.0e12f64..1.0e12).prop_map(Value::F64),
        "[a-z_.]{0,12}".prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::vec((any::<i64>().prop_map(Value::from), inner.clone()), 0..6)
                .prop_map(Value::Map),
            prop::collection::vec(("[a-z]{1,8}".prop_map(Value::from), inner), 0..6)
                .prop_map(Value::Map),
        ]
    })
}

fn arb_type() -> impl Strategy<Value = MessageType> {
    prop_oneof![
        Just(MessageType::ClientReady),
        Just(MessageType::ClientStopped),
        Just(MessageType::Heartbeat),
        Just(MessageType::Stats),
        Just(MessageType::Spawn),
        Just(MessageType::Spawning),
        Just(MessageType::SpawningComplete),
        Just(MessageType::Stop),
        Just(MessageType::Quit),
        Just(MessageType::Exception),
    ]
}

proptest! {
    #[test]
    fn test_frame_roundtrip(ty in arb_type(), data in arb_value(), id in "[a-zA-Z0-9_-]{1,40}") {
        let msg = Message::new(ty, data, id);
        let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
        prop_assert_eq!(decoded.kind().unwrap(), ty);
        prop_assert_eq!(decoded, msg);
    }

    #[test]
    fn test_wrong_arity_is_decode_error(items in prop::collection::vec(arb_value(), 0..8)) {
        prop_assume!(items.len() != 3);
        let mut frame = Vec::new();
        rmpv::encode::write_value(&mut frame, &Value::Array(items)).unwrap();
        let result = Message::decode(&frame);
        prop_assert!(matches!(result, Err(ProtocolError::FrameShape(_))));
    }
}

#[test]
fn test_numeric_keys_survive_encoding() {
    let mut per_sec: BTreeMap<i64, u64> = BTreeMap::new();
    per_sec.insert(1_700_000_000, 4);
    per_sec.insert(1_700_000_001, 2);

    let msg = Message::with_payload(MessageType::Stats, &per_sec, "w1").unwrap();
    let decoded = Message::decode(&msg.encode().unwrap()).unwrap();

    let map = decoded.data.as_map().expect("payload is a map");
    assert_eq!(map.len(), 2);
    for (key, _) in map {
        assert!(key.is_i64() || key.is_u64(), "key {} was coerced", key);
    }
    assert_eq!(map[0].0.as_i64(), Some(1_700_000_000));
    assert_eq!(map[0].1.as_u64(), Some(4));

    let back: BTreeMap<i64, u64> = decoded.payload().unwrap();
    assert_eq!(back, per_sec);
}

#[test]
fn test_structs_encode_as_named_maps() {
    #[derive(serde::Serialize)]
    struct Sample {
        state: &'static str,
        current_cpu_usage: f64,
    }

    let msg = Message::with_payload(
        MessageType::Heartbeat,
        &Sample {
            state: "ready",
            current_cpu_usage: 1.5,
        },
        "w1",
    )
    .unwrap();

    let map = msg.data.as_map().unwrap();
    assert_eq!(map[0].0.as_str(), Some("state"));
    assert_eq!(map[0].1.as_str(), Some("ready"));
    assert_eq!(map[1].0.as_str(), Some("current_cpu_usage"));
    assert_eq!(map[1].1.as_f64(), Some(1.5));
}

#[test]
fn test_non_array_and_garbage_frames() {
    let mut frame = Vec::new();
    rmpv::encode::write_value(&mut frame, &Value::from("spawn")).unwrap();
    assert!(matches!(
        Message::decode(&frame),
        Err(ProtocolError::FrameShape(_))
    ));

    assert!(matches!(
        Message::decode(&[]),
        Err(ProtocolError::Decode(_))
    ));
    // 0xdc 声明了一个长数组但没有内容
    assert!(matches!(
        Message::decode(&[0xdc, 0x00, 0x10]),
        Err(ProtocolError::Decode(_))
    ));
}

#[test]
fn test_non_string_type_rejected() {
    let mut frame = Vec::new();
    let value = Value::Array(vec![Value::from(7), Value::Nil, Value::from("w1")]);
    rmpv::encode::write_value(&mut frame, &value).unwrap();
    assert!(matches!(
        Message::decode(&frame),
        Err(ProtocolError::FrameShape(_))
    ));
}

#[test]
fn test_unknown_type_decodes_but_does_not_parse() {
    let mut frame = Vec::new();
    let value = Value::Array(vec![Value::from("ack"), Value::from(1), Value::from("w1")]);
    rmpv::encode::write_value(&mut frame, &value).unwrap();

    let msg = Message::decode(&frame).unwrap();
    assert_eq!(msg.msg_type, "ack");
    assert!(matches!(
        msg.kind(),
        Err(ProtocolError::UnknownMessageType(t)) if t == "ack"
    ));
}
