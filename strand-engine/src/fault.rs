//! Deterministic fault injection for exercising client error paths.
//!
//! Each fault is armed for a number of occurrences and fires on the next
//! matching engine call until exhausted.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Engine misbehaviors that can be injected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultType {
    /// `conf_new` and `conf_dup` return the null handle
    CreateFailure,
    /// `consumer_new` returns the null handle
    ConsumerCreateFailure,
    /// `conf_dump` reports an odd string count
    OddDump,
    /// `conf_dump` returns a null array
    NullDump,
    /// `conf_set` / `conf_get` return a result code outside the modelled set
    UnexpectedResult,
    /// `unsubscribe` times out and the consumer stays in its group
    LeaveGroupFailure,
}

impl FaultType {
    const ALL: [Self; 6] = [
        Self::CreateFailure,
        Self::ConsumerCreateFailure,
        Self::OddDump,
        Self::NullDump,
        Self::UnexpectedResult,
        Self::LeaveGroupFailure,
    ];

    fn slot(self) -> usize {
        match self {
            Self::CreateFailure => 0,
            Self::ConsumerCreateFailure => 1,
            Self::OddDump => 2,
            Self::NullDump => 3,
            Self::UnexpectedResult => 4,
            Self::LeaveGroupFailure => 5,
        }
    }
}

/// Fault injection controller
#[derive(Debug, Default)]
pub struct FaultInjector {
    armed: [AtomicU32; FaultType::ALL.len()],
    injection_count: AtomicU32,
    paused: AtomicBool,
}

impl FaultInjector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire `fault` on its next `times` opportunities.
    pub fn arm(&self, fault: FaultType, times: u32) {
        self.armed[fault.slot()].fetch_add(times, Ordering::Relaxed);
    }

    /// Disarm every fault.
    pub fn reset(&self) {
        for fault in FaultType::ALL {
            self.armed[fault.slot()].store(0, Ordering::Relaxed);
        }
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    /// Consume one occurrence of `fault` if armed.
    pub fn should_inject(&self, fault: FaultType) -> bool {
        if self.paused.load(Ordering::Relaxed) {
            return false;
        }
        let fired = self.armed[fault.slot()]
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if fired {
            self.injection_count.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(?fault, "injecting engine fault");
        }
        fired
    }

    /// Total faults fired so far
    pub fn injection_count(&self) -> u32 {
        self.injection_count.load(Ordering::Relaxed)
    }
}
