//! Topic and partition logs held by the in-process engine.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use strand_core::{ErrorCode, RawMessage, Timestamp};

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<Bytes>,
    payload: Bytes,
    headers: Vec<(String, Bytes)>,
    timestamp_ms: i64,
}

/// Append-only record log for one partition.
#[derive(Debug, Clone, Default)]
pub(crate) struct PartitionLog {
    base_offset: i64,
    records: Vec<StoredRecord>,
}

impl PartitionLog {
    fn with_base(base_offset: i64) -> Self {
        Self {
            base_offset,
            records: Vec::new(),
        }
    }

    pub(crate) fn low_watermark(&self) -> i64 {
        self.base_offset
    }

    #[allow(clippy::cast_possible_wrap)]
    pub(crate) fn high_watermark(&self) -> i64 {
        self.base_offset + self.records.len() as i64
    }

    fn append(&mut self, key: Option<Bytes>, payload: Bytes, headers: Vec<(String, Bytes)>) -> i64 {
        let offset = self.high_watermark();
        self.records.push(StoredRecord {
            key,
            payload,
            headers,
            timestamp_ms: now_ms(),
        });
        offset
    }

    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    fn get(&self, offset: i64) -> Option<&StoredRecord> {
        if offset < self.base_offset {
            return None;
        }
        self.records.get((offset - self.base_offset) as usize)
    }
}

#[derive(Debug, Default)]
pub(crate) struct Cluster {
    topics: BTreeMap<String, Vec<PartitionLog>>,
}

impl Cluster {
    /// Returns false if the topic already exists.
    pub(crate) fn create_topic(&mut self, name: &str, partitions: usize, base_offset: i64) -> bool {
        if self.topics.contains_key(name) {
            return false;
        }
        let logs = (0..partitions.max(1))
            .map(|_| PartitionLog::with_base(base_offset.max(0)))
            .collect();
        self.topics.insert(name.to_string(), logs);
        true
    }

    pub(crate) fn partition_count(&self, topic: &str) -> Option<usize> {
        self.topics.get(topic).map(Vec::len)
    }

    pub(crate) fn partition(&self, topic: &str, partition: i32) -> Option<&PartitionLog> {
        let idx = usize::try_from(partition).ok()?;
        self.topics.get(topic)?.get(idx)
    }

    pub(crate) fn produce(
        &mut self,
        topic: &str,
        partition: i32,
        key: Option<Bytes>,
        payload: Bytes,
        headers: Vec<(String, Bytes)>,
    ) -> Result<i64, ErrorCode> {
        let idx = usize::try_from(partition).map_err(|_| ErrorCode::UnknownTopicOrPartition)?;
        let log = self
            .topics
            .get_mut(topic)
            .and_then(|logs| logs.get_mut(idx))
            .ok_or(ErrorCode::UnknownTopicOrPartition)?;
        Ok(log.append(key, payload, headers))
    }

    pub(crate) fn message(&self, topic: &str, partition: i32, offset: i64) -> Option<RawMessage> {
        let record = self.partition(topic, partition)?.get(offset)?;
        Some(RawMessage {
            topic: topic.to_string(),
            partition,
            offset,
            key: record.key.clone(),
            payload: Some(record.payload.clone()),
            headers: record.headers.clone(),
            timestamp: Timestamp::CreateTime(record.timestamp_ms),
        })
    }
}

#[allow(clippy::cast_possible_truncation)]
fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
