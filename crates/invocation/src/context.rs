//! Per-call state owned by the invoker driving one logical call.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::classifier::FailureCategory;
use crate::config::InvocationTimeout;
use crate::transport::OperationMode;

/// Where a logical call is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvocationState {
    /// Created, nothing sent yet
    Idle,
    /// A physical attempt is in flight
    Attempting,
    /// Waiting out the delay before the next attempt
    Retrying,
    /// A reply was received
    Succeeded,
    /// The invocation deadline expired
    TimedOut,
    /// Terminated with a non-retried failure
    Failed,
    /// Cancelled by the caller
    Cancelled,
}

impl InvocationState {
    /// Whether the call can make no further progress
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::TimedOut | Self::Failed | Self::Cancelled
        )
    }
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Attempting => "attempting",
            Self::Retrying => "retrying",
            Self::Succeeded => "succeeded",
            Self::TimedOut => "timed-out",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// How one physical attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// A successful reply was received
    Succeeded,
    /// The attempt failed with this category
    Failed(FailureCategory),
    /// The caller cancelled while the attempt was in flight
    Abandoned,
}

/// Record of one physical attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptRecord {
    /// Attempt index, starting at 0
    pub index: u32,
    /// Time spent on the attempt
    pub elapsed: Duration,
    /// How the attempt ended
    pub outcome: AttemptOutcome,
}

/// Mutable state of one logical call.
///
/// Created fresh by the invoker for every call and dropped when the call
/// terminates.
#[derive(Debug)]
pub struct InvocationContext {
    operation: Arc<str>,
    mode: OperationMode,
    timeout: InvocationTimeout,
    started: Instant,
    deadline: Option<Instant>,
    attempt: u32,
    state: InvocationState,
    records: Vec<AttemptRecord>,
}

impl InvocationContext {
    /// Start a call now
    pub fn new(operation: Arc<str>, mode: OperationMode, timeout: InvocationTimeout) -> Self {
        Self::starting_at(operation, mode, timeout, Instant::now())
    }

    /// Start a call at a given instant
    pub fn starting_at(
        operation: Arc<str>,
        mode: OperationMode,
        timeout: InvocationTimeout,
        started: Instant,
    ) -> Self {
        Self {
            operation,
            mode,
            timeout,
            started,
            // A deadline past the clock's range is no deadline at all.
            deadline: timeout.duration().and_then(|d| started.checked_add(d)),
            attempt: 0,
            state: InvocationState::Idle,
            records: Vec::new(),
        }
    }

    /// Operation name
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Whether the operation is idempotent
    pub fn is_idempotent(&self) -> bool {
        self.mode.is_idempotent()
    }

    /// Configured invocation timeout
    pub fn timeout(&self) -> InvocationTimeout {
        self.timeout
    }

    /// Absolute deadline, if the call has one
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Index of the current (or next) attempt
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Number of attempts sent so far
    pub fn attempts_made(&self) -> u32 {
        self.records.len() as u32
    }

    /// Current lifecycle state
    pub fn state(&self) -> InvocationState {
        self.state
    }

    /// Per-attempt results
    pub fn records(&self) -> &[AttemptRecord] {
        &self.records
    }

    /// Time since the call started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether the deadline has passed at `now`
    pub fn deadline_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Time left before the deadline at `now`; `None` without a deadline
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    pub(crate) fn transition(&mut self, state: InvocationState) {
        debug_assert!(
            !self.state.is_terminal(),
            "transition out of terminal state {}",
            self.state
        );
        tracing::trace!(
            operation = %self.operation,
            attempt = self.attempt,
            from = %self.state,
            to = %state,
            "invocation state change"
        );
        self.state = state;
    }

    pub(crate) fn record(&mut self, elapsed: Duration, outcome: AttemptOutcome) {
        self.records.push(AttemptRecord {
            index: self.attempt,
            elapsed,
            outcome,
        });
    }

    pub(crate) fn advance(&mut self) {
        self.attempt += 1;
    }
}
