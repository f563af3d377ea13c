//! Async stream adapter.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use strand_client::{ClientConfig, Consumer, ConsumerState, ConsumerStream, StreamConfig};
use strand_core::{Engine, Offset, TopicPartitionOffset};
use strand_engine::MemoryEngine;

fn assigned_consumer(engine: &Arc<MemoryEngine>) -> Consumer {
    let dyn_engine: Arc<dyn Engine> = engine.clone();
    let mut consumer =
        Consumer::new(dyn_engine, &ClientConfig::new().enable_partition_eof(false)).unwrap();
    consumer
        .assign(&[TopicPartitionOffset::new("t", 0, Offset::Beginning)])
        .unwrap();
    consumer
}

#[tokio::test]
async fn test_stream_delivers_in_order_and_returns_consumer() {
    let engine = Arc::new(MemoryEngine::new());
    engine.create_topic("t", 1);
    for i in 0..5u8 {
        engine.produce("t", 0, None, &[i]).unwrap();
    }

    let config = StreamConfig::default().with_poll_interval(Duration::from_millis(20));
    let mut stream = ConsumerStream::spawn(assigned_consumer(&engine), config);

    for expected in 0..5 {
        let record = tokio::time::timeout(Duration::from_secs(5), stream.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(record.offset, expected);
    }

    let mut consumer = stream.stop().await.unwrap();
    assert_eq!(consumer.state(), ConsumerState::Assigned);
    consumer.close().unwrap();
    assert_eq!(engine.live_handles(), 0);
}

#[tokio::test]
async fn test_stream_picks_up_late_records() {
    let engine = Arc::new(MemoryEngine::new());
    engine.create_topic("t", 1);

    let config = StreamConfig::default()
        .with_channel_capacity(1)
        .with_poll_interval(Duration::from_millis(20));
    let mut stream = ConsumerStream::spawn(assigned_consumer(&engine), config);

    engine.produce("t", 0, None, b"late").unwrap();
    let record = tokio::time::timeout(Duration::from_secs(5), stream.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(record.payload.as_deref(), Some(&b"late"[..]));

    stream.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_with_full_channel() {
    let engine = Arc::new(MemoryEngine::new());
    engine.create_topic("t", 1);
    for i in 0..10u8 {
        engine.produce("t", 0, None, &[i]).unwrap();
    }

    let config = StreamConfig::default()
        .with_channel_capacity(1)
        .with_poll_interval(Duration::from_millis(20));
    let stream = ConsumerStream::spawn(assigned_consumer(&engine), config);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let consumer = tokio::time::timeout(Duration::from_secs(5), stream.stop())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(consumer.state(), ConsumerState::Assigned);
}

#[tokio::test]
async fn test_dropped_stream_releases_consumer() {
    let engine = Arc::new(MemoryEngine::new());
    engine.create_topic("t", 1);
    engine.produce("t", 0, None, b"only").unwrap();

    let config = StreamConfig::default()
        .with_channel_capacity(1)
        .with_poll_interval(Duration::from_millis(20));
    let stream = ConsumerStream::spawn(assigned_consumer(&engine), config);
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(stream);

    let released = tokio::time::timeout(Duration::from_secs(5), async {
        while engine.live_handles() != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(released.is_ok(), "consumer still live after stream drop");
    assert_eq!(engine.invalid_frees(), 0);
}
