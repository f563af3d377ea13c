//! Configuration store behavior against the in-process engine.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use strand_core::{CALLBACK_SUFFIX, ConfKind, ConfigStore, Engine, StrandError};
use strand_engine::{FaultType, MemoryEngine};

fn setup(kind: ConfKind) -> (Arc<MemoryEngine>, ConfigStore) {
    let engine = Arc::new(MemoryEngine::new());
    let dyn_engine: Arc<dyn Engine> = engine.clone();
    let store = ConfigStore::new(dyn_engine, kind).unwrap();
    (engine, store)
}

#[test]
fn test_set_then_get() {
    let (_engine, store) = setup(ConfKind::Topic);
    store.set("request.required.acks", "1").unwrap();
    assert_eq!(store.get("request.required.acks").unwrap(), "1");
}

#[test]
fn test_get_returns_default() {
    let (_engine, store) = setup(ConfKind::Global);
    assert_eq!(store.get("client.id").unwrap(), "rdkafka");
    assert_eq!(store.get("enable.partition.eof").unwrap(), "true");
}

#[test]
fn test_bool_values_normalized() {
    let (_engine, store) = setup(ConfKind::Global);
    store.set("enable.auto.commit", "False").unwrap();
    assert_eq!(store.get("enable.auto.commit").unwrap(), "false");
}

#[test]
fn test_unknown_property_leaves_store_unchanged() {
    let (_engine, store) = setup(ConfKind::Topic);
    let before = store.dump().unwrap();

    let err = store.set("no.such.property", "1").unwrap_err();
    match err {
        StrandError::UnknownProperty { name, reason } => {
            assert_eq!(name, "no.such.property");
            assert!(reason.contains("No such configuration property"), "{reason}");
        },
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(store.dump().unwrap(), before);
}

#[test]
fn test_invalid_value_carries_engine_diagnostic() {
    let (_engine, store) = setup(ConfKind::Global);
    let err = store.set("session.timeout.ms", "not-a-number").unwrap_err();
    match err {
        StrandError::InvalidProperty { name, reason } => {
            assert_eq!(name, "session.timeout.ms");
            assert!(reason.contains("not-a-number"), "{reason}");
        },
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(store.get("session.timeout.ms").unwrap(), "45000");
}

#[test]
fn test_get_unknown_names_key() {
    let (_engine, store) = setup(ConfKind::Global);
    let err = store.get("mystery").unwrap_err();
    assert_eq!(
        err.to_string(),
        "Unknown configuration property \"mystery\": No such configuration property: mystery"
    );
}

#[test]
fn test_dump_filters_callbacks() {
    let (engine, store) = setup(ConfKind::Topic);
    store.set("request.required.acks", "1").unwrap();

    let dump = store.dump().unwrap();
    assert_eq!(dump.get("request.required.acks"), Some("1"));
    assert!(!dump.is_empty());
    assert!(dump.keys().all(|k| !k.ends_with(CALLBACK_SUFFIX)));
    assert!(!dump.contains_key("partitioner_cb"));
    assert_eq!(engine.outstanding_dumps(), 0);

    let (_engine, global) = setup(ConfKind::Global);
    let dump = global.dump().unwrap();
    assert!(dump.contains_key("group.id"));
    assert!(!dump.contains_key("rebalance_cb"));
    assert!(!dump.contains_key("error_cb"));
}

#[test]
fn test_dump_preserves_engine_order() {
    let (_engine, store) = setup(ConfKind::Topic);
    let keys: Vec<String> = store.dump().unwrap().keys().map(str::to_string).collect();
    assert_eq!(keys.first().map(String::as_str), Some("request.required.acks"));
}

#[test]
fn test_odd_dump_rejected_and_freed() {
    let (engine, store) = setup(ConfKind::Topic);
    engine.faults().arm(FaultType::OddDump, 1);

    let err = store.dump().unwrap_err();
    assert!(matches!(err, StrandError::MalformedDump(n) if n % 2 == 1));
    assert_eq!(engine.outstanding_dumps(), 0);
    assert_eq!(engine.invalid_frees(), 0);

    assert!(store.dump().is_ok());
}

#[test]
fn test_null_dump() {
    let (engine, store) = setup(ConfKind::Global);
    engine.faults().arm(FaultType::NullDump, 1);
    assert_eq!(store.dump().unwrap_err(), StrandError::EmptyDump(ConfKind::Global));
}

#[test]
fn test_unexpected_result_code() {
    let (engine, store) = setup(ConfKind::Global);
    engine.faults().arm(FaultType::UnexpectedResult, 2);

    assert!(matches!(
        store.set("client.id", "x"),
        Err(StrandError::UnexpectedEngine { code: -99, .. })
    ));
    assert!(matches!(
        store.get("client.id"),
        Err(StrandError::UnexpectedEngine { code: -99, .. })
    ));
    assert_eq!(store.get("client.id").unwrap(), "rdkafka");
}

#[test]
fn test_duplicate_is_independent() {
    let (engine, store) = setup(ConfKind::Topic);
    store.set("message.timeout.ms", "1000").unwrap();

    let copy = store.duplicate().unwrap();
    assert_eq!(engine.live_handles(), 2);
    assert_eq!(copy.get("message.timeout.ms").unwrap(), "1000");

    copy.set("message.timeout.ms", "2000").unwrap();
    assert_eq!(store.get("message.timeout.ms").unwrap(), "1000");

    drop(store);
    assert_eq!(copy.get("message.timeout.ms").unwrap(), "2000");
    drop(copy);
    assert_eq!(engine.live_handles(), 0);
}

#[test]
fn test_duplicate_failure() {
    let (engine, store) = setup(ConfKind::Global);
    engine.faults().arm(FaultType::CreateFailure, 1);
    assert!(matches!(store.duplicate(), Err(StrandError::CreationFailed(_))));
}

#[test]
fn test_use_after_release() {
    let (_engine, store) = setup(ConfKind::Global);
    assert!(store.release());
    assert!(store.is_invalid());
    assert!(matches!(store.set("client.id", "x"), Err(StrandError::InvalidHandle(_))));
    assert!(matches!(store.get("client.id"), Err(StrandError::InvalidHandle(_))));
    assert!(matches!(store.dump(), Err(StrandError::InvalidHandle(_))));
}

#[test]
fn test_default_topic_config() {
    let engine = Arc::new(MemoryEngine::new());
    let dyn_engine: Arc<dyn Engine> = engine.clone();
    let global = ConfigStore::new(dyn_engine.clone(), ConfKind::Global).unwrap();
    let topic = ConfigStore::new(dyn_engine.clone(), ConfKind::Topic).unwrap();
    topic.set("auto.offset.reset", "earliest").unwrap();

    global.set_default_topic_config(topic).unwrap();
    assert_eq!(global.get("auto.offset.reset").unwrap(), "earliest");
    assert_eq!(engine.live_handles(), 1);

    let other_topic = ConfigStore::new(dyn_engine.clone(), ConfKind::Topic).unwrap();
    let not_global = ConfigStore::new(dyn_engine, ConfKind::Topic).unwrap();
    assert_eq!(
        not_global.set_default_topic_config(other_topic).unwrap_err(),
        StrandError::WrongKind(ConfKind::Topic)
    );
}
