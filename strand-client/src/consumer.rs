//! Consumer group state machine
//!
//! ```text
//! Unsubscribed --subscribe--> Subscribed --assign event--> Assigned
//!      ^                                                   |    ^
//!      |                                       revoke event|    |assign event
//!      +------------------unsubscribe---------- Revoking <-+----+
//!
//! any state except Closed --close--> Closed
//! ```
//!
//! A group assignment with no partitions leaves the consumer `Subscribed`.
//!
//! Rebalance notifications are in-band events on the poll channel. `poll`
//! handles them synchronously through the [`ConsumerContext`] and reports
//! nothing to the caller for that cycle. Explicit `assign` / `unassign`
//! bypass the group entirely.
//!
//! A consumer is not safe for concurrent use; callers serialize `poll`,
//! `consume`, `assign` and `close`. In particular `close` must not race an
//! in-flight `poll`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use strand_core::{
    ConfKind, ConfigStore, ERRSTR_SIZE, Engine, EngineEvent, ErrBuf, ErrorCode, NativeHandle,
    Offset, RawHandle, RebalanceEvent, ResourceKind, StrandError, TopicPartition,
    TopicPartitionOffset,
};

use crate::config::{ClientConfig, ClientOptions};
use crate::context::{ConsumerContext, DefaultContext, Rebalance, apply_assignment};
use crate::error::{ClientError, Result};
use crate::record::ConsumedRecord;

/// Lifecycle state of a [`Consumer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// No subscription and no assignment
    Unsubscribed,
    /// Subscribed, waiting for the group to assign partitions
    Subscribed,
    /// Holding an assignment, from the group or set explicitly
    Assigned,
    /// The group revoked the assignment; a new one is pending
    Revoking,
    /// Terminal
    Closed,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unsubscribed => "unsubscribed",
            Self::Subscribed => "subscribed",
            Self::Assigned => "assigned",
            Self::Revoking => "revoking",
            Self::Closed => "closed",
        })
    }
}

/// A consumer bound to one engine consumer instance.
///
/// # Example
///
/// ```text
/// let config = ClientConfig::new().group_id("billing");
/// let mut consumer = Consumer::new(engine, &config)?;
/// consumer.subscribe(&["orders"])?;
///
/// while let Some(record) = consumer.consume(Duration::from_millis(100))? {
///     if record.is_partition_eof() {
///         continue;
///     }
///     handle(record.into_result()?);
/// }
/// consumer.close()?;
/// ```
pub struct Consumer<C: ConsumerContext = DefaultContext> {
    handle: NativeHandle,
    name: String,
    state: ConsumerState,
    subscription: Vec<String>,
    assignment: Vec<TopicPartitionOffset>,
    /// Next offset to consume, per partition that delivered something
    positions: HashMap<TopicPartition, i64>,
    options: ClientOptions,
    context: C,
}

impl Consumer<DefaultContext> {
    /// Create a consumer that accepts every rebalance as proposed.
    ///
    /// # Errors
    /// Configuration errors naming the rejected property, or
    /// `CreationFailed` with the engine's diagnostic.
    pub fn new(engine: Arc<dyn Engine>, config: &ClientConfig) -> Result<Self> {
        Self::with_context(engine, config, DefaultContext)
    }
}

impl<C: ConsumerContext> Consumer<C> {
    /// Create a consumer whose rebalances go through `context`.
    ///
    /// # Errors
    /// Configuration errors naming the rejected property, or
    /// `CreationFailed` with the engine's diagnostic.
    pub fn with_context(engine: Arc<dyn Engine>, config: &ClientConfig, context: C) -> Result<Self> {
        let options = config.client_options()?;
        let conf = config.create_store(engine.clone())?.into_raw()?;

        let mut errstr = ErrBuf::with_capacity(ERRSTR_SIZE);
        let rk = engine.consumer_new(conf, &mut errstr);
        if rk.is_null() {
            // The engine only takes the configuration on success
            drop(ConfigStore::from_raw(engine, ConfKind::Global, conf)?);
            return Err(StrandError::CreationFailed(format!("consumer: {}", errstr.as_str())).into());
        }

        let handle = NativeHandle::from_raw(engine.clone(), ResourceKind::Consumer, rk)?;
        let name = engine.consumer_name(rk).unwrap_or_default();
        tracing::info!(consumer = %name, "consumer created");

        Ok(Self {
            handle,
            name,
            state: ConsumerState::Unsubscribed,
            subscription: Vec::new(),
            assignment: Vec::new(),
            positions: HashMap::new(),
            options,
            context,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// Topics of the current subscription
    #[must_use]
    pub fn subscription(&self) -> &[String] {
        &self.subscription
    }

    /// Partitions currently assigned, with the offsets they were assigned at
    #[must_use]
    pub fn assignment(&self) -> &[TopicPartitionOffset] {
        &self.assignment
    }

    /// Next offset to be consumed from `tp`, if it delivered anything since
    /// it was assigned
    #[must_use]
    pub fn position(&self, tp: &TopicPartition) -> Option<i64> {
        self.positions.get(tp).copied()
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    fn engine(&self) -> &Arc<dyn Engine> {
        self.handle.engine()
    }

    fn raw(&self) -> Result<RawHandle> {
        if self.state == ConsumerState::Closed {
            return Err(ClientError::AlreadyClosed);
        }
        Ok(self.handle.raw()?)
    }

    fn transition(&mut self, next: ConsumerState) {
        if self.state != next {
            tracing::debug!(consumer = %self.name, from = %self.state, to = %next, "state change");
            self.state = next;
        }
    }

    /// Join the group for `topics`. Replaces a manual assignment.
    ///
    /// # Errors
    /// `InvalidState` unless unsubscribed or assigned, `InvalidArgument`
    /// for an empty topic list, `Engine` if the coordinator refuses.
    pub fn subscribe(&mut self, topics: &[&str]) -> Result<()> {
        let rk = self.raw()?;
        if !matches!(self.state, ConsumerState::Unsubscribed | ConsumerState::Assigned) {
            return Err(ClientError::InvalidState {
                op: "subscribe",
                state: self.state,
            });
        }
        if topics.is_empty() || topics.iter().any(|t| t.is_empty()) {
            return Err(ClientError::InvalidArgument(
                "subscription needs at least one non-empty topic".to_string(),
            ));
        }

        if self.subscription.is_empty() && !self.assignment.is_empty() {
            let engine = self.handle.engine().clone();
            apply_assignment(engine.as_ref(), rk, &mut self.assignment, &mut self.positions, &[])?;
        }

        let topics: Vec<String> = topics.iter().map(|t| (*t).to_string()).collect();
        let code = self.engine().subscribe(rk, &topics);
        if code != ErrorCode::NoError {
            return Err(ClientError::engine(code, "subscribe"));
        }

        tracing::info!(consumer = %self.name, topics = ?topics, "subscribed");
        self.subscription = topics;
        self.transition(ConsumerState::Subscribed);
        Ok(())
    }

    /// Leave the group, revoking any group-assigned partitions through the
    /// context first. The consumer is unsubscribed even when this fails.
    ///
    /// # Errors
    /// `AlreadyClosed`, an error from the revoke handler, or `Engine` if the
    /// coordinator reports a failure leaving the group.
    pub fn unsubscribe(&mut self) -> Result<()> {
        let rk = self.raw()?;
        if self.subscription.is_empty() {
            return Ok(());
        }

        let revoked = self.revoke_held(rk);
        let code = self.engine().unsubscribe(rk);
        self.subscription.clear();
        tracing::info!(consumer = %self.name, "unsubscribed");
        self.transition(ConsumerState::Unsubscribed);
        revoked?;
        if code != ErrorCode::NoError {
            return Err(ClientError::engine(code, "unsubscribe"));
        }
        Ok(())
    }

    /// Take ownership of `partitions` directly, bypassing the group.
    ///
    /// # Errors
    /// `AlreadyClosed`, or `Engine` if the engine rejects the assignment.
    pub fn assign(&mut self, partitions: &[TopicPartitionOffset]) -> Result<()> {
        if partitions.is_empty() {
            return self.unassign();
        }
        let rk = self.raw()?;
        let engine = self.handle.engine().clone();
        apply_assignment(engine.as_ref(), rk, &mut self.assignment, &mut self.positions, partitions)?;
        tracing::info!(consumer = %self.name, partitions = partitions.len(), "assigned");
        self.transition(ConsumerState::Assigned);
        Ok(())
    }

    /// Drop the current assignment. Nothing is delivered until the next
    /// assignment.
    ///
    /// # Errors
    /// `AlreadyClosed`, or `Engine` if the engine rejects the change.
    pub fn unassign(&mut self) -> Result<()> {
        let rk = self.raw()?;
        let engine = self.handle.engine().clone();
        apply_assignment(engine.as_ref(), rk, &mut self.assignment, &mut self.positions, &[])?;
        tracing::info!(consumer = %self.name, "unassigned");
        let next = if self.subscription.is_empty() {
            ConsumerState::Unsubscribed
        } else {
            ConsumerState::Subscribed
        };
        self.transition(next);
        Ok(())
    }

    /// Move the fetch position of an assigned partition.
    ///
    /// # Errors
    /// `InvalidState` if `tp` is not assigned, `Engine` on rejection.
    pub fn seek(&mut self, tp: &TopicPartition, offset: Offset) -> Result<()> {
        let rk = self.raw()?;
        if !self.assignment.iter().any(|tpo| tpo.same_partition(tp)) {
            return Err(ClientError::InvalidState {
                op: "seek an unassigned partition",
                state: self.state,
            });
        }

        // Other partitions continue where they are
        let partitions: Vec<TopicPartitionOffset> = self
            .assignment
            .iter()
            .map(|tpo| {
                let current = tpo.topic_partition();
                let offset = if tpo.same_partition(tp) {
                    offset
                } else {
                    self.positions
                        .get(&current)
                        .map_or(tpo.offset, |&pos| Offset::Offset(pos))
                };
                current.with_offset(offset)
            })
            .collect();

        let engine = self.handle.engine().clone();
        apply_assignment(engine.as_ref(), rk, &mut self.assignment, &mut self.positions, &partitions)?;
        self.positions.remove(tp);
        tracing::debug!(consumer = %self.name, partition = %tp, %offset, "seek");
        Ok(())
    }

    /// Wait up to `timeout` for one engine event.
    ///
    /// Data records, end-of-partition signals and per-partition errors are
    /// returned. Rebalance notifications are handled here and yield `None`.
    ///
    /// # Errors
    /// `AlreadyClosed`, or an error from a rebalance handler.
    pub fn poll(&mut self, timeout: Duration) -> Result<Option<ConsumedRecord>> {
        let rk = self.raw()?;
        let Some(event) = self.engine().consumer_poll(rk, timeout) else {
            return Ok(None);
        };

        match event {
            EngineEvent::Message(message) => {
                self.positions.insert(
                    TopicPartition::new(message.topic.clone(), message.partition),
                    message.offset + 1,
                );
                Ok(Some(ConsumedRecord::message(message, self.options)))
            },
            EngineEvent::PartitionEof {
                topic,
                partition,
                offset,
            } => {
                tracing::debug!(consumer = %self.name, %topic, partition, offset, "reached end of partition");
                Ok(Some(ConsumedRecord::partition_eof(topic, partition, offset)))
            },
            EngineEvent::Error {
                topic,
                partition,
                code,
                reason,
            } => {
                tracing::warn!(consumer = %self.name, %topic, partition, %code, %reason, "consume error");
                Ok(Some(ConsumedRecord::error(topic, partition, code, reason)))
            },
            EngineEvent::Rebalance(rebalance) => {
                self.handle_rebalance(rk, rebalance)?;
                Ok(None)
            },
        }
    }

    /// Poll until a record, end-of-partition signal or error arrives, or
    /// `timeout` elapses. Rebalances are handled transparently.
    ///
    /// # Errors
    /// As for [`Consumer::poll`].
    pub fn consume(&mut self, timeout: Duration) -> Result<Option<ConsumedRecord>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Some(record) = self.poll(remaining)? {
                return Ok(Some(record));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    fn handle_rebalance(&mut self, rk: RawHandle, event: RebalanceEvent) -> Result<()> {
        let engine = self.handle.engine().clone();
        let mut control = Rebalance::new(engine.as_ref(), rk, &mut self.assignment, &mut self.positions);

        let (handled, next) = match &event {
            RebalanceEvent::Assign(partitions) => {
                tracing::info!(consumer = %self.name, partitions = partitions.len(), "partitions assigned");
                let handled = self.context.partitions_assigned(&mut control, partitions);
                if !control.acted() {
                    control.assign(partitions)?;
                }
                (handled, None)
            },
            RebalanceEvent::Revoke(partitions) => {
                tracing::info!(consumer = %self.name, partitions = partitions.len(), "partitions revoked");
                let handled = self.context.partitions_revoked(&mut control, partitions);
                if !control.acted() {
                    control.unassign()?;
                }
                (handled, Some(ConsumerState::Revoking))
            },
        };

        // An empty share of the group is still pending assignment
        let next = next.unwrap_or(if self.assignment.is_empty() {
            ConsumerState::Subscribed
        } else {
            ConsumerState::Assigned
        });
        self.transition(next);
        handled
    }

    /// Revoke the current assignment through the context. Handler errors
    /// are returned after the assignment has been dropped.
    fn revoke_held(&mut self, rk: RawHandle) -> Result<()> {
        if self.assignment.is_empty() {
            return Ok(());
        }
        let held = self.assignment.clone();
        let engine = self.handle.engine().clone();
        let mut control = Rebalance::new(engine.as_ref(), rk, &mut self.assignment, &mut self.positions);
        let handled = self.context.partitions_revoked(&mut control, &held);
        if !control.acted() {
            control.unassign()?;
        }
        handled
    }

    /// Commit offsets for the consumer's group.
    ///
    /// # Errors
    /// `AlreadyClosed`, or `Engine` (e.g. `InvalidArgument` without a
    /// `group.id`).
    pub fn commit(&mut self, offsets: &[TopicPartitionOffset]) -> Result<()> {
        let rk = self.raw()?;
        let code = self.engine().commit(rk, offsets);
        if code != ErrorCode::NoError {
            return Err(ClientError::engine(code, "commit"));
        }
        tracing::debug!(consumer = %self.name, partitions = offsets.len(), "offsets committed");
        Ok(())
    }

    /// Commit the position of every assigned partition that delivered a
    /// record. Returns what was committed.
    ///
    /// # Errors
    /// As for [`Consumer::commit`].
    pub fn commit_consumed(&mut self) -> Result<Vec<TopicPartitionOffset>> {
        let offsets: Vec<TopicPartitionOffset> = self
            .assignment
            .iter()
            .filter_map(|tpo| {
                let tp = tpo.topic_partition();
                let pos = *self.positions.get(&tp)?;
                Some(tp.with_offset(Offset::Offset(pos)))
            })
            .collect();
        if offsets.is_empty() {
            self.raw()?;
            return Ok(offsets);
        }
        self.commit(&offsets)?;
        Ok(offsets)
    }

    /// Committed offsets for the current assignment. Partitions without a
    /// commit carry `Offset::Invalid`.
    ///
    /// # Errors
    /// `AlreadyClosed`, or `Engine` on failure.
    pub fn committed(&self, timeout: Duration) -> Result<Vec<TopicPartitionOffset>> {
        let rk = self.raw()?;
        let mut partitions: Vec<TopicPartitionOffset> = self
            .assignment
            .iter()
            .map(|tpo| tpo.topic_partition().with_offset(Offset::Invalid))
            .collect();
        let code = self.engine().committed(rk, &mut partitions, timeout);
        if code != ErrorCode::NoError {
            return Err(ClientError::engine(code, "committed"));
        }
        Ok(partitions)
    }

    /// Low and high watermarks of a partition.
    ///
    /// # Errors
    /// `AlreadyClosed`, or `Engine` (`UnknownTopicOrPartition`).
    pub fn fetch_watermarks(&self, topic: &str, partition: i32, timeout: Duration) -> Result<(i64, i64)> {
        let rk = self.raw()?;
        self.engine()
            .query_watermarks(rk, topic, partition, timeout)
            .map_err(|code| ClientError::engine(code, format!("watermarks for {topic} [{partition}]")))
    }

    /// Revoke held partitions, leave the group and release the engine
    /// consumer. Every later operation fails with `AlreadyClosed`.
    ///
    /// # Errors
    /// `AlreadyClosed` if called twice.
    pub fn close(&mut self) -> Result<()> {
        let rk = self.raw()?;

        if let Err(e) = self.revoke_held(rk) {
            tracing::warn!(consumer = %self.name, error = %e, "revoke handler failed during close");
            self.assignment.clear();
        }
        if !self.subscription.is_empty() {
            let code = self.engine().unsubscribe(rk);
            if code != ErrorCode::NoError {
                tracing::warn!(consumer = %self.name, %code, "leaving the group reported an error");
            }
            self.subscription.clear();
        }

        let code = self.engine().consumer_close(rk);
        if code != ErrorCode::NoError {
            tracing::warn!(consumer = %self.name, %code, "engine close reported an error");
        }
        self.handle.release();
        self.positions.clear();
        self.transition(ConsumerState::Closed);
        tracing::info!(consumer = %self.name, "consumer closed");
        Ok(())
    }
}

impl<C: ConsumerContext> Drop for Consumer<C> {
    fn drop(&mut self) {
        if self.state != ConsumerState::Closed {
            tracing::debug!(consumer = %self.name, state = %self.state, "consumer dropped without close");
        }
    }
}

impl<C: ConsumerContext> fmt::Debug for Consumer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("subscription", &self.subscription)
            .field("assignment", &self.assignment)
            .finish_non_exhaustive()
    }
}
