//! In-process engine implementing the native boundary.
//!
//! All state sits behind a single mutex, mirroring a non-reentrant native
//! library. Blocking polls wait on a condition variable that `produce`,
//! rebalances and `assign` signal.

use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use strand_core::{
    ConfEngine, ConfKind, ConfRes, ConsumerEngine, EngineEvent, ErrBuf, ErrorCode, Offset,
    RawHandle, RebalanceEvent, TopicPartition, TopicPartitionOffset,
};

use crate::cluster::Cluster;
use crate::conf::{ConfObject, SetOutcome};
use crate::fault::{FaultInjector, FaultType};
use crate::group::{AssignmentStrategy, Group, Member};

/// Result code outside the modelled configuration results.
const UNEXPECTED_CONF_RES: i32 = -99;

#[derive(Debug)]
struct FetchState {
    tp: TopicPartition,
    requested: Offset,
    next: Option<i64>,
    eof_sent: bool,
    failed: bool,
}

#[derive(Debug)]
struct ConsumerInstance {
    name: String,
    conf: ConfObject,
    queue: VecDeque<EngineEvent>,
    fetch: Vec<FetchState>,
    cursor: usize,
    member_of: Option<String>,
    closed: bool,
}

impl ConsumerInstance {
    fn group_id(&self) -> String {
        self.conf.value("group.id")
    }

    fn auto_offset_reset(&self) -> String {
        self.conf.value("auto.offset.reset")
    }
}

#[derive(Debug, Default)]
struct EngineState {
    next_handle: usize,
    next_consumer: u64,
    confs: HashMap<usize, ConfObject>,
    dumps: HashMap<usize, Vec<String>>,
    consumers: HashMap<usize, ConsumerInstance>,
    groups: HashMap<String, Group>,
    committed: HashMap<(String, TopicPartition), i64>,
    cluster: Cluster,
    invalid_frees: u64,
}

impl EngineState {
    fn allocate(&mut self) -> usize {
        self.next_handle += 1;
        self.next_handle
    }

    /// Recompute a group's assignment and queue revoke/assign events.
    fn rebalance(&mut self, group_id: &str) {
        let Some(group) = self.groups.get_mut(group_id) else {
            return;
        };
        group.generation += 1;

        let cluster = &self.cluster;
        let assignments = group.compute(|topic| cluster.partition_count(topic));

        for member in group.members.values() {
            if member.assignment.is_empty() {
                continue;
            }
            if let Some(consumer) = self.consumers.get_mut(&member.handle) {
                let revoked = member
                    .assignment
                    .iter()
                    .map(|tp| tp.clone().with_offset(Offset::Invalid))
                    .collect();
                consumer
                    .queue
                    .push_back(EngineEvent::Rebalance(RebalanceEvent::Revoke(revoked)));
            }
        }

        for (name, member) in &mut group.members {
            let assigned = assignments.get(name).cloned().unwrap_or_default();
            if let Some(consumer) = self.consumers.get_mut(&member.handle) {
                let event = assigned
                    .iter()
                    .map(|tp| tp.clone().with_offset(Offset::Invalid))
                    .collect();
                consumer
                    .queue
                    .push_back(EngineEvent::Rebalance(RebalanceEvent::Assign(event)));
            }
            member.assignment = assigned;
        }

        tracing::debug!(
            group = group_id,
            generation = group.generation,
            members = group.members.len(),
            "group rebalanced"
        );
    }

    /// Drop a consumer from its group without notifying it, then rebalance
    /// the remaining members.
    fn leave_group(&mut self, rk: usize) {
        let Some(consumer) = self.consumers.get_mut(&rk) else {
            return;
        };
        let Some(group_id) = consumer.member_of.take() else {
            return;
        };
        consumer
            .queue
            .retain(|ev| !matches!(ev, EngineEvent::Rebalance(_)));
        let name = consumer.name.clone();

        let now_empty = match self.groups.get_mut(&group_id) {
            Some(group) => {
                group.members.remove(&name);
                group.members.is_empty()
            },
            None => return,
        };
        if now_empty {
            self.groups.remove(&group_id);
        } else {
            self.rebalance(&group_id);
        }
    }

    /// Resolve a logical start offset for one partition.
    fn resolve(
        &self,
        consumer: &ConsumerInstance,
        tp: &TopicPartition,
        requested: Offset,
    ) -> Result<i64, EngineEvent> {
        let Some(log) = self.cluster.partition(&tp.topic, tp.partition) else {
            return Err(EngineEvent::Error {
                topic: tp.topic.clone(),
                partition: tp.partition,
                code: ErrorCode::UnknownTopicOrPartition,
                reason: format!("{tp}: Unknown topic or partition"),
            });
        };
        let (low, high) = (log.low_watermark(), log.high_watermark());

        let reset = |reason: String| -> Result<i64, EngineEvent> {
            match consumer.auto_offset_reset().as_str() {
                "smallest" | "earliest" | "beginning" => Ok(low),
                "error" => Err(EngineEvent::Error {
                    topic: tp.topic.clone(),
                    partition: tp.partition,
                    code: ErrorCode::OffsetOutOfRange,
                    reason,
                }),
                _ => Ok(high),
            }
        };

        match requested {
            Offset::Beginning => Ok(low),
            Offset::End => Ok(high),
            Offset::Offset(n) if (low..=high).contains(&n) => Ok(n),
            Offset::Offset(n) => reset(format!(
                "{tp}: offset {n} out of range [{low}, {high}]"
            )),
            Offset::Stored | Offset::Invalid => {
                let committed = self
                    .committed
                    .get(&(consumer.group_id(), tp.clone()))
                    .copied()
                    .filter(|c| (low..=high).contains(c));
                match committed {
                    Some(c) => Ok(c),
                    None => reset(format!("{tp}: no committed offset")),
                }
            },
        }
    }

    /// Next data record or EOF for a consumer's fetch set, round-robin
    /// across partitions.
    fn fetch_next(&mut self, rk: usize) -> Option<EngineEvent> {
        let count = self.consumers.get(&rk)?.fetch.len();
        for step in 0..count {
            let consumer = self.consumers.get(&rk)?;
            let idx = (consumer.cursor + step) % count;
            let state = &consumer.fetch[idx];
            if state.failed {
                continue;
            }

            let next = match state.next {
                Some(next) => Ok(next),
                None => self.resolve(consumer, &state.tp, state.requested),
            };
            let eof_enabled = consumer.conf.flag("enable.partition.eof");
            let tp = state.tp.clone();
            let eof_sent = state.eof_sent;

            let next = match next {
                Ok(next) => next,
                Err(event) => {
                    if let Some(consumer) = self.consumers.get_mut(&rk) {
                        consumer.fetch[idx].failed = true;
                    }
                    return Some(event);
                },
            };

            let message = self.cluster.message(&tp.topic, tp.partition, next);
            let high = self
                .cluster
                .partition(&tp.topic, tp.partition)
                .map_or(next, |log| log.high_watermark());

            let consumer = self.consumers.get_mut(&rk)?;
            let state = &mut consumer.fetch[idx];
            state.next = Some(next);

            if let Some(message) = message {
                state.next = Some(next + 1);
                state.eof_sent = false;
                consumer.cursor = (idx + 1) % count;
                return Some(EngineEvent::Message(message));
            }

            if eof_enabled && !eof_sent && next >= high {
                state.eof_sent = true;
                consumer.cursor = (idx + 1) % count;
                return Some(EngineEvent::PartitionEof {
                    topic: tp.topic,
                    partition: tp.partition,
                    offset: high,
                });
            }
        }
        None
    }
}

/// In-process engine: configuration objects, partition logs and a group
/// coordinator behind the native boundary traits.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    state: Mutex<EngineState>,
    wakeup: Condvar,
    faults: FaultInjector,
}

impl MemoryEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fault injection controller for this engine
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Create a topic whose partitions start at offset 0.
    pub fn create_topic(&self, name: &str, partitions: usize) -> bool {
        self.create_topic_at(name, partitions, 0)
    }

    /// Create a topic whose partitions start at `base_offset`. Groups
    /// subscribed to the topic are rebalanced.
    pub fn create_topic_at(&self, name: &str, partitions: usize, base_offset: i64) -> bool {
        let mut state = self.lock();
        if !state.cluster.create_topic(name, partitions, base_offset) {
            return false;
        }
        let interested: Vec<String> = state
            .groups
            .iter()
            .filter(|(_, g)| g.subscribed_topics().contains(name))
            .map(|(id, _)| id.clone())
            .collect();
        for group_id in interested {
            state.rebalance(&group_id);
        }
        drop(state);
        self.wakeup.notify_all();
        true
    }

    /// Append a record, returning its offset.
    ///
    /// # Errors
    /// `UnknownTopicOrPartition` if the partition does not exist.
    pub fn produce(
        &self,
        topic: &str,
        partition: i32,
        key: Option<&[u8]>,
        payload: &[u8],
    ) -> Result<i64, ErrorCode> {
        self.produce_with_headers(topic, partition, key, payload, &[])
    }

    /// Append a record carrying `headers`, returning its offset.
    ///
    /// # Errors
    /// `UnknownTopicOrPartition` if the partition does not exist.
    pub fn produce_with_headers(
        &self,
        topic: &str,
        partition: i32,
        key: Option<&[u8]>,
        payload: &[u8],
        headers: &[(&str, &[u8])],
    ) -> Result<i64, ErrorCode> {
        let headers = headers
            .iter()
            .map(|(name, value)| ((*name).to_string(), Bytes::copy_from_slice(value)))
            .collect();
        let offset = self.lock().cluster.produce(
            topic,
            partition,
            key.map(Bytes::copy_from_slice),
            Bytes::copy_from_slice(payload),
            headers,
        )?;
        self.wakeup.notify_all();
        Ok(offset)
    }

    /// Current `(low, high)` watermarks.
    pub fn watermarks(&self, topic: &str, partition: i32) -> Option<(i64, i64)> {
        self.lock()
            .cluster
            .partition(topic, partition)
            .map(|log| (log.low_watermark(), log.high_watermark()))
    }

    /// Configuration objects and consumers not yet destroyed.
    pub fn live_handles(&self) -> usize {
        let state = self.lock();
        state.confs.len() + state.consumers.len()
    }

    /// Dump arrays not yet freed.
    pub fn outstanding_dumps(&self) -> usize {
        self.lock().dumps.len()
    }

    /// Destroy calls that named an unknown or already freed handle.
    pub fn invalid_frees(&self) -> u64 {
        self.lock().invalid_frees
    }

    /// Committed offset for a group, if any.
    pub fn committed_offset(&self, group_id: &str, topic: &str, partition: i32) -> Option<i64> {
        self.lock()
            .committed
            .get(&(group_id.to_string(), TopicPartition::new(topic, partition)))
            .copied()
    }

    /// Current generation of a group, if it has members.
    pub fn group_generation(&self, group_id: &str) -> Option<u64> {
        self.lock().groups.get(group_id).map(|g| g.generation)
    }
}

impl ConfEngine for MemoryEngine {
    fn conf_new(&self, kind: ConfKind) -> RawHandle {
        if self.faults.should_inject(FaultType::CreateFailure) {
            return RawHandle::NULL;
        }
        let mut state = self.lock();
        let id = state.allocate();
        state.confs.insert(id, ConfObject::new(kind));
        RawHandle::from_usize(id)
    }

    fn conf_destroy(&self, kind: ConfKind, conf: RawHandle) {
        let mut state = self.lock();
        let known = state
            .confs
            .get(&conf.as_usize())
            .is_some_and(|obj| obj.kind == kind);
        if known {
            state.confs.remove(&conf.as_usize());
        } else {
            state.invalid_frees += 1;
            tracing::warn!(handle = %conf, %kind, "destroy of unknown configuration handle");
        }
    }

    fn conf_dup(&self, kind: ConfKind, conf: RawHandle) -> RawHandle {
        if self.faults.should_inject(FaultType::CreateFailure) {
            return RawHandle::NULL;
        }
        let mut state = self.lock();
        let Some(copy) = state
            .confs
            .get(&conf.as_usize())
            .filter(|obj| obj.kind == kind)
            .cloned()
        else {
            return RawHandle::NULL;
        };
        let id = state.allocate();
        state.confs.insert(id, copy);
        RawHandle::from_usize(id)
    }

    fn conf_set(
        &self,
        kind: ConfKind,
        conf: RawHandle,
        name: &str,
        value: &str,
        errstr: &mut ErrBuf,
    ) -> ConfRes {
        if self.faults.should_inject(FaultType::UnexpectedResult) {
            return ConfRes::Other(UNEXPECTED_CONF_RES);
        }
        let mut state = self.lock();
        let Some(obj) = state
            .confs
            .get_mut(&conf.as_usize())
            .filter(|obj| obj.kind == kind)
        else {
            errstr.write("Invalid configuration handle");
            return ConfRes::Invalid;
        };
        match obj.set(name, value) {
            SetOutcome::Ok => ConfRes::Ok,
            SetOutcome::Invalid(reason) => {
                errstr.write(&reason);
                ConfRes::Invalid
            },
            SetOutcome::Unknown(reason) => {
                errstr.write(&reason);
                ConfRes::Unknown
            },
        }
    }

    fn conf_get(
        &self,
        kind: ConfKind,
        conf: RawHandle,
        name: &str,
        dest: Option<&mut [u8]>,
        dest_size: &mut usize,
    ) -> ConfRes {
        if self.faults.should_inject(FaultType::UnexpectedResult) {
            return ConfRes::Other(UNEXPECTED_CONF_RES);
        }
        let state = self.lock();
        let Some(obj) = state
            .confs
            .get(&conf.as_usize())
            .filter(|obj| obj.kind == kind)
        else {
            return ConfRes::Invalid;
        };
        let Some(value) = obj.get(name) else {
            return ConfRes::Unknown;
        };

        let needed = value.len() + 1;
        if let Some(dest) = dest {
            if dest.len() < needed {
                *dest_size = needed;
                return ConfRes::Invalid;
            }
            dest[..value.len()].copy_from_slice(value.as_bytes());
            dest[value.len()] = 0;
        }
        *dest_size = needed;
        ConfRes::Ok
    }

    fn conf_dump(&self, kind: ConfKind, conf: RawHandle, cnt: &mut usize) -> RawHandle {
        if self.faults.should_inject(FaultType::NullDump) {
            *cnt = 0;
            return RawHandle::NULL;
        }
        let mut state = self.lock();
        let Some(mut entries) = state
            .confs
            .get(&conf.as_usize())
            .filter(|obj| obj.kind == kind)
            .map(ConfObject::dump)
        else {
            *cnt = 0;
            return RawHandle::NULL;
        };
        if self.faults.should_inject(FaultType::OddDump) {
            entries.push("dangling.key".to_string());
        }
        *cnt = entries.len();
        let id = state.allocate();
        state.dumps.insert(id, entries);
        RawHandle::from_usize(id)
    }

    fn conf_dump_entry(&self, arr: RawHandle, idx: usize) -> Option<String> {
        self.lock()
            .dumps
            .get(&arr.as_usize())
            .and_then(|entries| entries.get(idx).cloned())
    }

    fn conf_dump_free(&self, arr: RawHandle, cnt: usize) {
        let mut state = self.lock();
        match state.dumps.remove(&arr.as_usize()) {
            Some(entries) if entries.len() == cnt => {},
            Some(entries) => {
                tracing::warn!(
                    handle = %arr,
                    expected = entries.len(),
                    got = cnt,
                    "dump freed with mismatched count"
                );
            },
            None => {
                state.invalid_frees += 1;
                tracing::warn!(handle = %arr, "free of unknown dump array");
            },
        }
    }

    fn conf_set_default_topic_conf(&self, conf: RawHandle, tconf: RawHandle) {
        let mut state = self.lock();
        let Some(topic) = state.confs.remove(&tconf.as_usize()) else {
            state.invalid_frees += 1;
            tracing::warn!(handle = %tconf, "unknown topic configuration handed over");
            return;
        };
        match state.confs.get_mut(&conf.as_usize()) {
            Some(global) if global.kind == ConfKind::Global => {
                global.default_topic = Some(Box::new(topic));
            },
            _ => {
                tracing::warn!(handle = %conf, "default topic configuration set on unknown handle");
            },
        }
    }
}

impl ConsumerEngine for MemoryEngine {
    fn consumer_new(&self, conf: RawHandle, errstr: &mut ErrBuf) -> RawHandle {
        if self.faults.should_inject(FaultType::ConsumerCreateFailure) {
            errstr.write("Failed to create consumer: resource allocation failed");
            return RawHandle::NULL;
        }
        let mut state = self.lock();
        match state.confs.get(&conf.as_usize()) {
            Some(obj) if obj.kind == ConfKind::Global => {},
            _ => {
                errstr.write("Invalid client configuration handle");
                return RawHandle::NULL;
            },
        }
        let Some(conf_obj) = state.confs.remove(&conf.as_usize()) else {
            return RawHandle::NULL;
        };

        state.next_consumer += 1;
        let name = format!("{}#consumer-{}", conf_obj.value("client.id"), state.next_consumer);
        let id = state.allocate();
        state.consumers.insert(
            id,
            ConsumerInstance {
                name,
                conf: conf_obj,
                queue: VecDeque::new(),
                fetch: Vec::new(),
                cursor: 0,
                member_of: None,
                closed: false,
            },
        );
        RawHandle::from_usize(id)
    }

    fn consumer_destroy(&self, rk: RawHandle) {
        let mut state = self.lock();
        if !state.consumers.contains_key(&rk.as_usize()) {
            state.invalid_frees += 1;
            tracing::warn!(handle = %rk, "destroy of unknown consumer handle");
            return;
        }
        state.leave_group(rk.as_usize());
        state.consumers.remove(&rk.as_usize());
        drop(state);
        self.wakeup.notify_all();
    }

    fn consumer_name(&self, rk: RawHandle) -> Option<String> {
        self.lock()
            .consumers
            .get(&rk.as_usize())
            .map(|c| c.name.clone())
    }

    fn subscribe(&self, rk: RawHandle, topics: &[String]) -> ErrorCode {
        let mut state = self.lock();
        let Some(consumer) = state.consumers.get(&rk.as_usize()) else {
            return ErrorCode::Destroyed;
        };
        if consumer.closed {
            return ErrorCode::InvalidState;
        }
        let group_id = consumer.group_id();
        if group_id.is_empty() || topics.is_empty() {
            return ErrorCode::InvalidArgument;
        }
        let strategy =
            AssignmentStrategy::from_config(&consumer.conf.value("partition.assignment.strategy"));
        let name = consumer.name.clone();

        // Switching groups is not possible; re-subscribing replaces the topic list
        if let Some(current) = consumer.member_of.clone() {
            if current != group_id {
                return ErrorCode::InvalidState;
            }
        }

        let group = state.groups.entry(group_id.clone()).or_insert_with(|| Group {
            strategy,
            ..Group::default()
        });
        let assignment = group
            .members
            .get(&name)
            .map(|m| m.assignment.clone())
            .unwrap_or_default();
        group.members.insert(
            name,
            Member {
                handle: rk.as_usize(),
                subscription: topics.to_vec(),
                assignment,
            },
        );
        if let Some(consumer) = state.consumers.get_mut(&rk.as_usize()) {
            consumer.member_of = Some(group_id.clone());
        }
        state.rebalance(&group_id);
        drop(state);
        self.wakeup.notify_all();
        ErrorCode::NoError
    }

    fn unsubscribe(&self, rk: RawHandle) -> ErrorCode {
        let mut state = self.lock();
        if !state.consumers.contains_key(&rk.as_usize()) {
            return ErrorCode::Destroyed;
        }
        if self.faults.should_inject(FaultType::LeaveGroupFailure) {
            return ErrorCode::TimedOut;
        }
        state.leave_group(rk.as_usize());
        drop(state);
        self.wakeup.notify_all();
        ErrorCode::NoError
    }

    fn assign(&self, rk: RawHandle, partitions: Option<&[TopicPartitionOffset]>) -> ErrorCode {
        let mut state = self.lock();
        let Some(consumer) = state.consumers.get_mut(&rk.as_usize()) else {
            return ErrorCode::Destroyed;
        };
        if consumer.closed {
            return ErrorCode::InvalidState;
        }
        consumer.fetch = partitions
            .unwrap_or_default()
            .iter()
            .map(|tpo| FetchState {
                tp: tpo.topic_partition(),
                requested: tpo.offset,
                next: None,
                eof_sent: false,
                failed: false,
            })
            .collect();
        consumer.cursor = 0;
        drop(state);
        self.wakeup.notify_all();
        ErrorCode::NoError
    }

    fn consumer_poll(&self, rk: RawHandle, timeout: Duration) -> Option<EngineEvent> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            let consumer = state.consumers.get_mut(&rk.as_usize())?;
            if consumer.closed {
                return None;
            }
            if let Some(event) = consumer.queue.pop_front() {
                return Some(event);
            }
            if let Some(event) = state.fetch_next(rk.as_usize()) {
                return Some(event);
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self
                .wakeup
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn commit(&self, rk: RawHandle, offsets: &[TopicPartitionOffset]) -> ErrorCode {
        let mut state = self.lock();
        let Some(consumer) = state.consumers.get(&rk.as_usize()) else {
            return ErrorCode::Destroyed;
        };
        let group_id = consumer.group_id();
        if group_id.is_empty() {
            return ErrorCode::InvalidArgument;
        }
        for tpo in offsets {
            if let Offset::Offset(offset) = tpo.offset {
                state
                    .committed
                    .insert((group_id.clone(), tpo.topic_partition()), offset);
            }
        }
        ErrorCode::NoError
    }

    fn committed(
        &self,
        rk: RawHandle,
        partitions: &mut [TopicPartitionOffset],
        _timeout: Duration,
    ) -> ErrorCode {
        let state = self.lock();
        let Some(consumer) = state.consumers.get(&rk.as_usize()) else {
            return ErrorCode::Destroyed;
        };
        let group_id = consumer.group_id();
        for tpo in partitions.iter_mut() {
            tpo.offset = state
                .committed
                .get(&(group_id.clone(), tpo.topic_partition()))
                .map_or(Offset::Invalid, |&o| Offset::Offset(o));
        }
        ErrorCode::NoError
    }

    fn query_watermarks(
        &self,
        rk: RawHandle,
        topic: &str,
        partition: i32,
        _timeout: Duration,
    ) -> Result<(i64, i64), ErrorCode> {
        let state = self.lock();
        if !state.consumers.contains_key(&rk.as_usize()) {
            return Err(ErrorCode::Destroyed);
        }
        state
            .cluster
            .partition(topic, partition)
            .map(|log| (log.low_watermark(), log.high_watermark()))
            .ok_or(ErrorCode::UnknownTopicOrPartition)
    }

    fn consumer_close(&self, rk: RawHandle) -> ErrorCode {
        let mut state = self.lock();
        if !state.consumers.contains_key(&rk.as_usize()) {
            return ErrorCode::Destroyed;
        }
        state.leave_group(rk.as_usize());
        if let Some(consumer) = state.consumers.get_mut(&rk.as_usize()) {
            consumer.fetch.clear();
            consumer.queue.clear();
            consumer.closed = true;
        }
        drop(state);
        self.wakeup.notify_all();
        ErrorCode::NoError
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn consumer(engine: &MemoryEngine, props: &[(&str, &str)]) -> RawHandle {
        let conf = engine.conf_new(ConfKind::Global);
        let mut errstr = ErrBuf::default();
        for (k, v) in props {
            assert_eq!(engine.conf_set(ConfKind::Global, conf, k, v, &mut errstr), ConfRes::Ok);
        }
        let rk = engine.consumer_new(conf, &mut errstr);
        assert!(!rk.is_null(), "{}", errstr.as_str());
        rk
    }

    fn poll(engine: &MemoryEngine, rk: RawHandle) -> Option<EngineEvent> {
        engine.consumer_poll(rk, Duration::from_millis(10))
    }

    #[test]
    fn test_consumer_takes_conf_ownership() {
        let engine = MemoryEngine::new();
        let rk = consumer(&engine, &[]);
        assert_eq!(engine.live_handles(), 1);
        engine.consumer_destroy(rk);
        assert_eq!(engine.live_handles(), 0);
        assert_eq!(engine.invalid_frees(), 0);
    }

    #[test]
    fn test_fetch_then_eof_once() {
        let engine = MemoryEngine::new();
        engine.create_topic("t", 1);
        engine.produce("t", 0, None, b"a").unwrap();
        let rk = consumer(&engine, &[]);

        let tpo = [TopicPartitionOffset::new("t", 0, Offset::Beginning)];
        assert_eq!(engine.assign(rk, Some(&tpo)), ErrorCode::NoError);

        assert!(matches!(poll(&engine, rk), Some(EngineEvent::Message(m)) if m.offset == 0));
        assert!(matches!(
            poll(&engine, rk),
            Some(EngineEvent::PartitionEof { offset: 1, .. })
        ));
        assert!(poll(&engine, rk).is_none());

        engine.produce("t", 0, None, b"b").unwrap();
        assert!(matches!(poll(&engine, rk), Some(EngineEvent::Message(m)) if m.offset == 1));
        assert!(matches!(poll(&engine, rk), Some(EngineEvent::PartitionEof { .. })));
    }

    #[test]
    fn test_eof_disabled() {
        let engine = MemoryEngine::new();
        engine.create_topic("t", 1);
        let rk = consumer(&engine, &[("enable.partition.eof", "false")]);
        let tpo = [TopicPartitionOffset::new("t", 0, Offset::End)];
        engine.assign(rk, Some(&tpo));
        assert!(poll(&engine, rk).is_none());
    }

    #[test]
    fn test_subscribe_requires_group() {
        let engine = MemoryEngine::new();
        let rk = consumer(&engine, &[]);
        assert_eq!(engine.subscribe(rk, &["t".to_string()]), ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_rebalance_revokes_before_assigning() {
        let engine = MemoryEngine::new();
        engine.create_topic("t", 2);
        let a = consumer(&engine, &[("group.id", "g")]);
        let b = consumer(&engine, &[("group.id", "g")]);

        engine.subscribe(a, &["t".to_string()]);
        match poll(&engine, a) {
            Some(EngineEvent::Rebalance(RebalanceEvent::Assign(parts))) => assert_eq!(parts.len(), 2),
            other => panic!("unexpected {other:?}"),
        }

        engine.subscribe(b, &["t".to_string()]);
        assert!(matches!(
            poll(&engine, a),
            Some(EngineEvent::Rebalance(RebalanceEvent::Revoke(parts))) if parts.len() == 2
        ));
        assert!(matches!(
            poll(&engine, a),
            Some(EngineEvent::Rebalance(RebalanceEvent::Assign(parts))) if parts.len() == 1
        ));
        assert!(matches!(
            poll(&engine, b),
            Some(EngineEvent::Rebalance(RebalanceEvent::Assign(parts))) if parts.len() == 1
        ));
        assert_eq!(engine.group_generation("g"), Some(2));
    }

    #[test]
    fn test_committed_offset_resumes_fetch() {
        let engine = MemoryEngine::new();
        engine.create_topic("t", 1);
        for _ in 0..5 {
            engine.produce("t", 0, None, b"x").unwrap();
        }
        let rk = consumer(&engine, &[("group.id", "g")]);
        let committed = [TopicPartitionOffset::new("t", 0, Offset::Offset(3))];
        assert_eq!(engine.commit(rk, &committed), ErrorCode::NoError);

        let tpo = [TopicPartitionOffset::new("t", 0, Offset::Invalid)];
        engine.assign(rk, Some(&tpo));
        assert!(matches!(poll(&engine, rk), Some(EngineEvent::Message(m)) if m.offset == 3));
        assert_eq!(engine.committed_offset("g", "t", 0), Some(3));
    }

    #[test]
    fn test_out_of_range_with_error_reset() {
        let engine = MemoryEngine::new();
        engine.create_topic("t", 1);
        let rk = consumer(&engine, &[("auto.offset.reset", "error")]);
        let tpo = [TopicPartitionOffset::new("t", 0, Offset::Offset(50))];
        engine.assign(rk, Some(&tpo));
        assert!(matches!(
            poll(&engine, rk),
            Some(EngineEvent::Error { code: ErrorCode::OffsetOutOfRange, ref topic, partition: 0, .. })
                if topic == "t"
        ));
        assert!(poll(&engine, rk).is_none());
    }

    #[test]
    fn test_unknown_partition_reported() {
        let engine = MemoryEngine::new();
        let rk = consumer(&engine, &[]);
        let tpo = [TopicPartitionOffset::new("missing", 0, Offset::Beginning)];
        engine.assign(rk, Some(&tpo));
        assert!(matches!(
            poll(&engine, rk),
            Some(EngineEvent::Error { code: ErrorCode::UnknownTopicOrPartition, ref topic, partition: 0, .. })
                if topic == "missing"
        ));
    }

    #[test]
    fn test_blocking_poll_wakes_on_produce() {
        let engine = std::sync::Arc::new(MemoryEngine::new());
        engine.create_topic("t", 1);
        let rk = consumer(&engine, &[("enable.partition.eof", "false")]);
        let tpo = [TopicPartitionOffset::new("t", 0, Offset::End)];
        engine.assign(rk, Some(&tpo));

        let producer = engine.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.produce("t", 0, None, b"late").unwrap();
        });

        let event = engine.consumer_poll(rk, Duration::from_secs(5));
        handle.join().unwrap();
        assert!(matches!(event, Some(EngineEvent::Message(m)) if m.payload.as_deref() == Some(&b"late"[..])));
    }
}
