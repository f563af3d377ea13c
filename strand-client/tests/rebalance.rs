//! Group rebalance handling across several consumers.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use strand_client::{
    AssignmentStrategy, AutoOffsetReset, ClientConfig, Consumer, ConsumerContext, ConsumerState,
    MemoryOffsetStore, OffsetStore, StoredOffsetContext,
};
use strand_core::{Engine, TopicPartition};
use strand_engine::MemoryEngine;

const TIMEOUT: Duration = Duration::from_millis(100);

fn setup() -> (Arc<MemoryEngine>, Arc<dyn Engine>) {
    let engine = Arc::new(MemoryEngine::new());
    let dyn_engine: Arc<dyn Engine> = engine.clone();
    (engine, dyn_engine)
}

fn group_config() -> ClientConfig {
    ClientConfig::new()
        .group_id("workers")
        .auto_offset_reset(AutoOffsetReset::Earliest)
        .enable_partition_eof(false)
}

/// Poll until the consumer reaches `state` or the attempts run out.
fn poll_until<C: ConsumerContext>(consumer: &mut Consumer<C>, state: ConsumerState) {
    for _ in 0..10 {
        if consumer.state() == state {
            return;
        }
        consumer.poll(TIMEOUT).unwrap();
    }
    assert_eq!(consumer.state(), state);
}

fn partitions<C: ConsumerContext>(consumer: &Consumer<C>) -> Vec<i32> {
    let mut parts: Vec<i32> = consumer.assignment().iter().map(|tpo| tpo.partition).collect();
    parts.sort_unstable();
    parts
}

#[test]
fn test_second_member_triggers_revoke_then_assign() {
    let (engine, dyn_engine) = setup();
    engine.create_topic("t", 4);

    let mut first = Consumer::new(dyn_engine.clone(), &group_config()).unwrap();
    first.subscribe(&["t"]).unwrap();
    poll_until(&mut first, ConsumerState::Assigned);
    assert_eq!(partitions(&first), vec![0, 1, 2, 3]);

    let mut second = Consumer::new(dyn_engine, &group_config()).unwrap();
    second.subscribe(&["t"]).unwrap();

    assert!(first.poll(TIMEOUT).unwrap().is_none());
    assert_eq!(first.state(), ConsumerState::Revoking);
    assert!(first.assignment().is_empty());

    poll_until(&mut first, ConsumerState::Assigned);
    poll_until(&mut second, ConsumerState::Assigned);
    assert_eq!(partitions(&first), vec![0, 1]);
    assert_eq!(partitions(&second), vec![2, 3]);
    assert_eq!(engine.group_generation("workers"), Some(2));
}

#[test]
fn test_round_robin_strategy() {
    let (engine, dyn_engine) = setup();
    engine.create_topic("t", 4);
    let config = group_config().partition_assignment_strategy(AssignmentStrategy::RoundRobin);

    let mut first = Consumer::new(dyn_engine.clone(), &config).unwrap();
    let mut second = Consumer::new(dyn_engine, &config).unwrap();
    first.subscribe(&["t"]).unwrap();
    second.subscribe(&["t"]).unwrap();

    for _ in 0..4 {
        first.poll(TIMEOUT).unwrap();
        second.poll(TIMEOUT).unwrap();
    }
    assert_eq!(partitions(&first), vec![0, 2]);
    assert_eq!(partitions(&second), vec![1, 3]);
}

#[test]
fn test_leaving_member_hands_partitions_over() {
    let (engine, dyn_engine) = setup();
    engine.create_topic("t", 2);

    let mut first = Consumer::new(dyn_engine.clone(), &group_config()).unwrap();
    let mut second = Consumer::new(dyn_engine, &group_config()).unwrap();
    first.subscribe(&["t"]).unwrap();
    second.subscribe(&["t"]).unwrap();
    for _ in 0..3 {
        first.poll(TIMEOUT).unwrap();
        second.poll(TIMEOUT).unwrap();
    }
    assert_eq!(partitions(&second), vec![1]);

    first.unsubscribe().unwrap();
    assert_eq!(first.state(), ConsumerState::Unsubscribed);
    assert!(first.assignment().is_empty());

    assert!(second.poll(TIMEOUT).unwrap().is_none());
    assert_eq!(second.state(), ConsumerState::Revoking);
    poll_until(&mut second, ConsumerState::Assigned);
    assert_eq!(partitions(&second), vec![0, 1]);
}

#[test]
fn test_topic_created_after_subscribe() {
    let (engine, dyn_engine) = setup();
    let mut consumer = Consumer::new(dyn_engine, &group_config()).unwrap();
    consumer.subscribe(&["late"]).unwrap();

    // The group hands out an empty share, which leaves the consumer pending
    for _ in 0..3 {
        assert!(consumer.poll(TIMEOUT).unwrap().is_none());
    }
    assert!(engine.group_generation("workers").is_some());
    assert_eq!(consumer.state(), ConsumerState::Subscribed);
    assert!(consumer.assignment().is_empty());

    engine.create_topic("late", 1);
    engine.produce("late", 0, None, b"hello").unwrap();
    // Revoke is skipped when nothing was held
    let record = consumer.consume(Duration::from_secs(1)).unwrap().unwrap();
    assert_eq!(record.offset, 0);
    assert_eq!(partitions(&consumer), vec![0]);
    assert_eq!(consumer.state(), ConsumerState::Assigned);
}

#[test]
fn test_stored_offsets_resume_and_save() {
    let (engine, dyn_engine) = setup();
    engine.create_topic("t", 1);
    for i in 0..6u8 {
        engine.produce("t", 0, None, &[i]).unwrap();
    }

    let store = Arc::new(MemoryOffsetStore::new());
    let tp = TopicPartition::new("t", 0);
    store.save(&tp, 3).unwrap();

    let context = StoredOffsetContext::new(store.clone());
    let mut consumer = Consumer::with_context(dyn_engine, &group_config(), context).unwrap();
    consumer.subscribe(&["t"]).unwrap();

    assert_eq!(consumer.consume(TIMEOUT).unwrap().unwrap().offset, 3);
    assert_eq!(consumer.consume(TIMEOUT).unwrap().unwrap().offset, 4);

    consumer.close().unwrap();
    assert_eq!(store.load(&tp).unwrap(), Some(5));
}

#[test]
fn test_resubscribe_from_assigned() {
    let (engine, dyn_engine) = setup();
    engine.create_topic("a", 1);
    engine.create_topic("b", 1);

    let mut consumer = Consumer::new(dyn_engine, &group_config()).unwrap();
    consumer.subscribe(&["a"]).unwrap();
    poll_until(&mut consumer, ConsumerState::Assigned);

    consumer.subscribe(&["a", "b"]).unwrap();
    assert_eq!(consumer.subscription(), ["a".to_string(), "b".to_string()]);
    poll_until(&mut consumer, ConsumerState::Revoking);
    poll_until(&mut consumer, ConsumerState::Assigned);
    assert_eq!(consumer.assignment().len(), 2);
}
