//! Rebalance handling
//!
//! The group coordinator's assign and revoke notifications are queued by the
//! engine and handled synchronously inside `poll`, on the polling thread. A
//! [`ConsumerContext`] sees each notification together with a [`Rebalance`]
//! control. If the handler neither assigns nor unassigns through the
//! control, the consumer applies the default: take the proposed partitions
//! verbatim on assign, drop everything on revoke.

use std::collections::HashMap;

use strand_core::{Engine, ErrorCode, Offset, RawHandle, TopicPartition, TopicPartitionOffset};

use crate::error::{ClientError, Result};
use crate::offset::OffsetStore;

/// Application hooks invoked during `poll`.
///
/// Handlers must not block on work that needs another `poll` cycle of the
/// same consumer to complete.
pub trait ConsumerContext: Send {
    /// The group proposes `partitions` for this consumer.
    ///
    /// # Errors
    /// Returned errors surface from the `poll` call that delivered the
    /// notification, after the default action has been applied.
    fn partitions_assigned(
        &mut self,
        rebalance: &mut Rebalance<'_>,
        partitions: &[TopicPartitionOffset],
    ) -> Result<()> {
        let _ = (rebalance, partitions);
        Ok(())
    }

    /// `partitions` are being taken away; they must be released before the
    /// group can complete the rebalance.
    ///
    /// # Errors
    /// As for [`ConsumerContext::partitions_assigned`].
    fn partitions_revoked(
        &mut self,
        rebalance: &mut Rebalance<'_>,
        partitions: &[TopicPartitionOffset],
    ) -> Result<()> {
        let _ = (rebalance, partitions);
        Ok(())
    }
}

/// Accepts every rebalance as proposed
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultContext;

impl ConsumerContext for DefaultContext {}

/// Assignment control handed to rebalance handlers
pub struct Rebalance<'a> {
    engine: &'a dyn Engine,
    rk: RawHandle,
    assignment: &'a mut Vec<TopicPartitionOffset>,
    positions: &'a mut HashMap<TopicPartition, i64>,
    acted: bool,
}

impl<'a> Rebalance<'a> {
    pub(crate) fn new(
        engine: &'a dyn Engine,
        rk: RawHandle,
        assignment: &'a mut Vec<TopicPartitionOffset>,
        positions: &'a mut HashMap<TopicPartition, i64>,
    ) -> Self {
        Self {
            engine,
            rk,
            assignment,
            positions,
            acted: false,
        }
    }

    /// Replace the consumer's assignment, e.g. with stored offsets.
    ///
    /// # Errors
    /// `Engine` if the engine rejects the assignment.
    pub fn assign(&mut self, partitions: &[TopicPartitionOffset]) -> Result<()> {
        self.acted = true;
        apply_assignment(self.engine, self.rk, self.assignment, self.positions, partitions)
    }

    /// Drop the consumer's assignment.
    ///
    /// # Errors
    /// `Engine` if the engine rejects the change.
    pub fn unassign(&mut self) -> Result<()> {
        self.acted = true;
        apply_assignment(self.engine, self.rk, self.assignment, self.positions, &[])
    }

    /// Current assignment
    #[must_use]
    pub fn assignment(&self) -> &[TopicPartitionOffset] {
        self.assignment
    }

    /// Next offset to consume for a partition, if anything was consumed
    #[must_use]
    pub fn position(&self, tp: &TopicPartition) -> Option<i64> {
        self.positions.get(tp).copied()
    }

    pub(crate) fn acted(&self) -> bool {
        self.acted
    }
}

/// Push an assignment to the engine and mirror it locally. Positions of
/// partitions no longer assigned are forgotten.
pub(crate) fn apply_assignment(
    engine: &dyn Engine,
    rk: RawHandle,
    assignment: &mut Vec<TopicPartitionOffset>,
    positions: &mut HashMap<TopicPartition, i64>,
    partitions: &[TopicPartitionOffset],
) -> Result<()> {
    let code = if partitions.is_empty() {
        engine.assign(rk, None)
    } else {
        engine.assign(rk, Some(partitions))
    };
    if code != ErrorCode::NoError {
        return Err(ClientError::engine(code, "assign"));
    }

    *assignment = partitions.to_vec();
    positions.retain(|tp, _| assignment.iter().any(|tpo| tpo.same_partition(tp)));
    for tpo in partitions {
        let tp = tpo.topic_partition();
        match tpo.offset {
            Offset::Offset(n) if positions.get(&tp) == Some(&n) => {},
            // Any other start point invalidates what was consumed
            _ => {
                positions.remove(&tp);
            },
        }
    }
    Ok(())
}

/// Resumes assigned partitions from an [`OffsetStore`] and saves the
/// position of every revoked partition back to it.
#[derive(Debug)]
pub struct StoredOffsetContext<S: OffsetStore> {
    store: S,
}

impl<S: OffsetStore> StoredOffsetContext<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: OffsetStore> ConsumerContext for StoredOffsetContext<S> {
    fn partitions_assigned(
        &mut self,
        rebalance: &mut Rebalance<'_>,
        partitions: &[TopicPartitionOffset],
    ) -> Result<()> {
        let mut resumed = Vec::with_capacity(partitions.len());
        for tpo in partitions {
            let mut tpo = tpo.clone();
            if let Some(offset) = self.store.load(&tpo.topic_partition())? {
                tpo.offset = Offset::Offset(offset);
            }
            resumed.push(tpo);
        }
        tracing::debug!(partitions = resumed.len(), "resuming from stored offsets");
        rebalance.assign(&resumed)
    }

    fn partitions_revoked(
        &mut self,
        rebalance: &mut Rebalance<'_>,
        partitions: &[TopicPartitionOffset],
    ) -> Result<()> {
        for tpo in partitions {
            let tp = tpo.topic_partition();
            if let Some(position) = rebalance.position(&tp) {
                self.store.save(&tp, position)?;
            }
        }
        rebalance.unassign()
    }
}
