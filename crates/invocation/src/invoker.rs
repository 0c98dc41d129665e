//! The invocation state machine.
//!
//! An [`Invoker`] drives one logical call from the first physical attempt to
//! a terminal outcome: it sends attempts through the connection pool, feeds
//! every failure to the classifier, consults the retry schedule and enforces
//! the invocation deadline. Only the invoker decides whether to retry.
//!
//! The deadline is set once, when the call starts, and keeps running across
//! attempts and retry delays. It is checked at every retry decision and after
//! every delay, and it wins over any retries the schedule still allows.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classifier::{AttemptFailure, FailureCategory};
use crate::config::InvocationConfig;
use crate::context::{AttemptOutcome, InvocationContext, InvocationState};
use crate::error::{ConfigResult, InvocationError, InvocationResult, TransportError};
use crate::pool::ConnectionPool;
use crate::proxy::{Endpoint, Proxy};
use crate::schedule::{RetryDecision, RetrySchedule};
use crate::stats::{InvocationStats, StatsSnapshot};
use crate::transport::{OperationMode, ReplyStatus, Request, TransportFactory};

/// What the invoker does after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Wait this long, then send another attempt
    Retry(Duration),
    /// Terminate with an invocation timeout
    TimedOut,
    /// Terminate with the failure of the last attempt
    Fail,
}

/// Decide what follows a failed attempt.
///
/// Only connection-level failures are retried, and only for idempotent
/// operations. A retriable failure observed at or after the deadline ends the
/// call with a timeout even when the schedule still has intervals left.
#[must_use]
pub fn decide(
    ctx: &InvocationContext,
    category: FailureCategory,
    schedule: &RetrySchedule,
    now: Instant,
) -> Step {
    match category {
        FailureCategory::InvocationTimeout => Step::TimedOut,
        FailureCategory::NonRetriableLocal
        | FailureCategory::NonRetriableRemote
        | FailureCategory::ApplicationError => Step::Fail,
        FailureCategory::ConnectionLost | FailureCategory::ConnectionTimeout => {
            if !ctx.is_idempotent() {
                return Step::Fail;
            }
            if ctx.deadline_expired(now) {
                return Step::TimedOut;
            }
            match schedule.next_delay(ctx.attempt()) {
                RetryDecision::Delay(delay) => Step::Retry(delay),
                RetryDecision::Exhausted => Step::Fail,
            }
        }
    }
}

/// Client-side driver for remote invocations.
///
/// Cheap to clone; clones share the configuration, the connection pool and
/// the counters.
#[derive(Debug, Clone)]
pub struct Invoker {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: InvocationConfig,
    pool: ConnectionPool,
    stats: InvocationStats,
}

impl Invoker {
    /// Create an invoker that opens connections through `transport`
    pub fn new(
        config: InvocationConfig,
        transport: Arc<dyn TransportFactory>,
    ) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                pool: ConnectionPool::new(transport),
                stats: InvocationStats::new(),
            }),
        })
    }

    /// Configuration this invoker was built with
    pub fn config(&self) -> &InvocationConfig {
        &self.inner.config
    }

    /// Connection cache shared by every call
    pub fn pool(&self) -> &ConnectionPool {
        &self.inner.pool
    }

    /// Current counter values
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Build a proxy carrying this invoker's default timeouts
    pub fn proxy(&self, identity: impl Into<String>, endpoints: Vec<Endpoint>) -> Proxy {
        Proxy::with_defaults(identity, endpoints, &self.inner.config)
    }

    /// Invoke `operation` and wait for its terminal outcome
    pub async fn call(
        &self,
        proxy: &Proxy,
        operation: &str,
        args: Bytes,
        mode: OperationMode,
    ) -> InvocationResult<Bytes> {
        let request = Request::new(operation, mode, args);
        self.invoke(proxy, request, &CancellationToken::new()).await
    }

    /// Drive `request` to a terminal outcome.
    ///
    /// Cancelling `cancel` stops the call at the next suspension point. An
    /// attempt already handed to the transport is not recalled.
    #[tracing::instrument(
        name = "invoke",
        skip_all,
        fields(
            proxy = %proxy,
            operation = %request.operation,
            idempotent = request.mode.is_idempotent(),
        )
    )]
    pub async fn invoke(
        &self,
        proxy: &Proxy,
        request: Request,
        cancel: &CancellationToken,
    ) -> InvocationResult<Bytes> {
        let mut ctx = InvocationContext::new(
            Arc::clone(&request.operation),
            request.mode,
            proxy.invocation_timeout(),
        );
        self.inner.stats.record_call();

        let result = self.run(proxy, &request, &mut ctx, cancel).await;
        self.inner.stats.record_outcome(ctx.state());

        match &result {
            Ok(_) => debug!(
                attempts = ctx.attempts_made(),
                elapsed_ms = ctx.elapsed().as_millis(),
                "invocation succeeded"
            ),
            Err(err) => match err.category() {
                Some(category) if category.is_remote() => debug!(
                    attempts = ctx.attempts_made(),
                    %category,
                    error = %err,
                    "invocation answered with an error"
                ),
                Some(
                    category @ (FailureCategory::ConnectionLost
                    | FailureCategory::ConnectionTimeout
                    | FailureCategory::NonRetriableLocal),
                ) => warn!(
                    attempts = ctx.attempts_made(),
                    elapsed_ms = ctx.elapsed().as_millis(),
                    %category,
                    error = %err,
                    "invocation failed"
                ),
                _ => info!(
                    attempts = ctx.attempts_made(),
                    elapsed_ms = ctx.elapsed().as_millis(),
                    state = %ctx.state(),
                    error = %err,
                    "invocation ended"
                ),
            },
        }
        result
    }

    async fn run(
        &self,
        proxy: &Proxy,
        request: &Request,
        ctx: &mut InvocationContext,
        cancel: &CancellationToken,
    ) -> InvocationResult<Bytes> {
        let schedule = &self.inner.config.retry_intervals;

        loop {
            if cancel.is_cancelled() {
                return Err(cancelled(ctx));
            }

            ctx.transition(InvocationState::Attempting);
            self.inner.stats.record_attempt();
            debug!(attempt = ctx.attempt(), "sending attempt");

            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                outcome = self.attempt(proxy, request, ctx) => Some(outcome),
            };
            let elapsed = started.elapsed();

            let failure = match outcome {
                None => {
                    ctx.record(elapsed, AttemptOutcome::Abandoned);
                    return Err(cancelled(ctx));
                }
                Some(Ok(payload)) => {
                    ctx.record(elapsed, AttemptOutcome::Succeeded);
                    ctx.transition(InvocationState::Succeeded);
                    return Ok(payload);
                }
                Some(Err(failure)) => failure,
            };

            let category = failure.classify();
            ctx.record(elapsed, AttemptOutcome::Failed(category));

            match decide(ctx, category, schedule, Instant::now()) {
                Step::Retry(delay) => {
                    warn!(
                        attempt = ctx.attempt(),
                        %category,
                        error = %failure,
                        delay_ms = delay.as_millis(),
                        "attempt failed, retrying"
                    );
                    ctx.transition(InvocationState::Retrying);
                    self.inner.stats.record_retry();
                    wait(ctx, delay, cancel).await?;
                    ctx.advance();
                }
                Step::TimedOut => {
                    ctx.transition(InvocationState::TimedOut);
                    return Err(match failure {
                        AttemptFailure::InvocationTimeout { .. } => {
                            InvocationError::from_failure(failure, category, ctx.attempts_made())
                        }
                        _ => timed_out(ctx),
                    });
                }
                Step::Fail => {
                    ctx.transition(InvocationState::Failed);
                    return Err(InvocationError::from_failure(
                        failure,
                        category,
                        ctx.attempts_made(),
                    ));
                }
            }
        }
    }

    /// One physical attempt: acquire a connection and exchange one request.
    ///
    /// With a connection timeout, opening and the exchange are each bounded
    /// by it. Without one, the whole attempt is bounded by whatever is left
    /// of the invocation deadline.
    async fn attempt(
        &self,
        proxy: &Proxy,
        request: &Request,
        ctx: &InvocationContext,
    ) -> Result<Bytes, AttemptFailure> {
        let exchange = self.exchange(proxy, request);
        match (proxy.connection_timeout(), ctx.remaining(Instant::now())) {
            (None, Some(remaining)) => tokio::time::timeout(remaining, exchange)
                .await
                .unwrap_or_else(|_| {
                    Err(AttemptFailure::InvocationTimeout {
                        timeout: ctx.timeout().duration().unwrap_or(remaining),
                    })
                }),
            _ => exchange.await,
        }
    }

    async fn exchange(&self, proxy: &Proxy, request: &Request) -> Result<Bytes, AttemptFailure> {
        let connection = self.inner.pool.acquire(proxy).await?;
        let send = connection.send(request);

        let sent = match proxy.connection_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, send)
                .await
                .unwrap_or_else(|_| Err(TransportError::connection_timeout(timeout))),
            None => send.await,
        };

        match sent {
            Ok(reply) if reply.status == ReplyStatus::Ok => Ok(reply.payload),
            Ok(reply) => Err(AttemptFailure::Remote(reply)),
            Err(err) => {
                let failure = AttemptFailure::from(err);
                if let AttemptFailure::Transport(err) = &failure
                    && failure.classify().is_transport_retriable()
                {
                    self.inner.pool.mark_failed(&connection, err);
                }
                Err(failure)
            }
        }
    }
}

/// Sleep out a retry delay without overrunning the deadline
async fn wait(
    ctx: &mut InvocationContext,
    delay: Duration,
    cancel: &CancellationToken,
) -> InvocationResult<()> {
    let wake = Instant::now() + delay;
    let until = ctx.deadline().map_or(wake, |deadline| wake.min(deadline));

    tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(cancelled(ctx)),
        () = tokio::time::sleep_until(until) => {}
    }

    if ctx.deadline_expired(Instant::now()) {
        ctx.transition(InvocationState::TimedOut);
        return Err(timed_out(ctx));
    }
    Ok(())
}

fn cancelled(ctx: &mut InvocationContext) -> InvocationError {
    ctx.transition(InvocationState::Cancelled);
    InvocationError::Cancelled {
        attempts: ctx.attempts_made(),
    }
}

fn timed_out(ctx: &InvocationContext) -> InvocationError {
    InvocationError::InvocationTimeout {
        timeout: ctx.timeout().duration().unwrap_or_default(),
        attempts: ctx.attempts_made(),
    }
}
