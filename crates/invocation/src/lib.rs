//! # Nebula Invocation
//!
//! Client-side retry and timeout core for remote invocations. Given a
//! [`Proxy`] naming a remote object, an [`Invoker`] sends an operation over a
//! pooled [`Connection`], classifies every failure, and decides per call
//! whether to retry, how long to wait, and when to give up.
//!
//! ## Rules
//!
//! - Only connection-level failures are retried, and only for idempotent
//!   operations. A non-idempotent call that loses its connection fails
//!   immediately, since the server may already have run it.
//! - Retries follow the configured [`RetrySchedule`] exactly; the schedule is
//!   never extended past its last interval.
//! - The invocation deadline spans every attempt and delay, and wins over any
//!   retries left in the schedule.
//! - Blocking ([`BlockingInvoker`]) and future-based
//!   ([`Invoker::call_async`]) calls share one state machine.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use async_trait::async_trait;
//! use bytes::Bytes;
//! use nebula_invocation::prelude::*;
//!
//! #[derive(Debug)]
//! struct Echo(Endpoint);
//!
//! #[async_trait]
//! impl Connection for Echo {
//!     fn endpoint(&self) -> &Endpoint {
//!         &self.0
//!     }
//!
//!     async fn send(&self, request: &Request) -> Result<Reply, TransportError> {
//!         Ok(Reply::ok(request.payload.clone()))
//!     }
//!
//!     fn close(&self, _reason: &TransportError) {}
//! }
//!
//! struct EchoTransport;
//!
//! #[async_trait]
//! impl TransportFactory for EchoTransport {
//!     async fn open(
//!         &self,
//!         endpoint: &Endpoint,
//!         _timeout: Option<Duration>,
//!     ) -> Result<Arc<dyn Connection>, TransportError> {
//!         Ok(Arc::new(Echo(endpoint.clone())))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = InvocationConfig::new()
//!         .with_retry_intervals("0 1 10000".parse()?)
//!         .with_invocation_timeout(InvocationTimeout::After(Duration::from_millis(500)));
//!     let invoker = Invoker::new(config, Arc::new(EchoTransport))?;
//!     let proxy = invoker.proxy("retry", vec![Endpoint::tcp("localhost", 10000)]);
//!
//!     let reply = invoker
//!         .call(&proxy, "op", Bytes::from_static(b"ping"), OperationMode::Idempotent)
//!         .await?;
//!     assert_eq!(&reply[..], b"ping");
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]

mod adapter;
mod classifier;
mod config;
mod context;
mod error;
mod invoker;
mod pool;
mod proxy;
mod schedule;
mod stats;
mod transport;

pub use adapter::{BlockingInvoker, InvocationFuture};
pub use classifier::{AttemptFailure, FailureCategory, classify};
pub use config::{EndpointSelection, InvocationConfig, InvocationTimeout, MAX_TIMEOUT};
pub use context::{AttemptOutcome, AttemptRecord, InvocationContext, InvocationState};
pub use error::{
    ConfigError, ConfigResult, InvocationError, InvocationResult, TransportError,
};
pub use invoker::{Invoker, Step, decide};
pub use pool::ConnectionPool;
pub use proxy::{Endpoint, Proxy};
pub use schedule::{MAX_RETRY_INTERVAL, RetryDecision, RetrySchedule};
pub use stats::{InvocationStats, StatsSnapshot};
pub use transport::{Connection, OperationMode, Reply, ReplyStatus, Request, TransportFactory};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::{
        BlockingInvoker, Connection, Endpoint, InvocationConfig, InvocationError,
        InvocationFuture, InvocationResult, InvocationTimeout, Invoker, OperationMode, Proxy,
        Reply, Request, RetrySchedule, TransportError, TransportFactory,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
