//! Lock-free invocation counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::context::InvocationState;

/// Counters shared by every call made through one invoker
#[derive(Debug, Default)]
pub struct InvocationStats {
    calls: AtomicU64,
    attempts: AtomicU64,
    retries: AtomicU64,
    succeeded: AtomicU64,
    timed_out: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

/// Point-in-time copy of [`InvocationStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Logical calls started
    pub calls: u64,
    /// Physical attempts sent
    pub attempts: u64,
    /// Retries scheduled after a retriable failure
    pub retries: u64,
    /// Calls that received a reply
    pub succeeded: u64,
    /// Calls that hit their invocation deadline
    pub timed_out: u64,
    /// Calls that ended with any other failure
    pub failed: u64,
    /// Calls cancelled by their caller
    pub cancelled: u64,
}

impl InvocationStats {
    /// Create zeroed counters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_outcome(&self, state: InvocationState) {
        let counter = match state {
            InvocationState::Succeeded => &self.succeeded,
            InvocationState::TimedOut => &self.timed_out,
            InvocationState::Failed => &self.failed,
            InvocationState::Cancelled => &self.cancelled,
            InvocationState::Idle | InvocationState::Attempting | InvocationState::Retrying => {
                return;
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counter values
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}
