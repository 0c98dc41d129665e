//! Failure classification.
//!
//! [`AttemptFailure::classify`] is the only place that looks at the concrete
//! shape of a failure. Everything downstream decides on the
//! [`FailureCategory`] tag alone.

use std::fmt;
use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::TransportError;
use crate::transport::{Reply, ReplyStatus};

/// Retry-relevant category of a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureCategory {
    /// The connection broke; the request may have reached the peer
    ConnectionLost,
    /// The connection stayed silent for longer than its timeout
    ConnectionTimeout,
    /// The end-to-end deadline expired
    InvocationTimeout,
    /// A local failure that retrying cannot fix
    NonRetriableLocal,
    /// The peer processed the request and replied with a system failure
    NonRetriableRemote,
    /// The peer replied with a user-level error
    ApplicationError,
}

impl FailureCategory {
    /// Whether an idempotent call may be retried after this failure
    #[must_use]
    pub fn is_transport_retriable(self) -> bool {
        matches!(self, Self::ConnectionLost | Self::ConnectionTimeout)
    }

    /// Whether a reply was received from the peer
    #[must_use]
    pub fn is_remote(self) -> bool {
        matches!(self, Self::NonRetriableRemote | Self::ApplicationError)
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConnectionLost => "connection-lost",
            Self::ConnectionTimeout => "connection-timeout",
            Self::InvocationTimeout => "invocation-timeout",
            Self::NonRetriableLocal => "non-retriable-local",
            Self::NonRetriableRemote => "non-retriable-remote",
            Self::ApplicationError => "application-error",
        };
        f.write_str(name)
    }
}

/// Failure raised by one physical attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    /// The transport failed to deliver a reply
    #[error(transparent)]
    Transport(TransportError),

    /// A reply arrived with a non-`Ok` status
    #[error("reply status: {}", .0.status)]
    Remote(Reply),

    /// The attempt ran into the invocation deadline
    #[error("invocation deadline of {timeout:?} reached during attempt")]
    InvocationTimeout {
        /// Configured invocation timeout
        timeout: Duration,
    },
}

impl AttemptFailure {
    /// Map this failure onto its retry-relevant category
    #[must_use]
    pub fn classify(&self) -> FailureCategory {
        match self {
            Self::Transport(err) => classify_transport(err),
            Self::Remote(reply) => classify_reply(reply.status),
            Self::InvocationTimeout { .. } => FailureCategory::InvocationTimeout,
        }
    }

    pub(crate) fn into_transport_error(self) -> TransportError {
        match self {
            Self::Transport(err) => err,
            other => TransportError::other(other.to_string()),
        }
    }
}

impl From<TransportError> for AttemptFailure {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}

/// Classify a failure; shorthand for [`AttemptFailure::classify`]
#[must_use]
pub fn classify(failure: &AttemptFailure) -> FailureCategory {
    failure.classify()
}

fn classify_transport(err: &TransportError) -> FailureCategory {
    match err {
        TransportError::ConnectionLost { .. }
        | TransportError::ConnectionRefused { .. }
        | TransportError::CloseConnection => FailureCategory::ConnectionLost,
        TransportError::ConnectionTimeout { .. } | TransportError::ConnectTimeout { .. } => {
            FailureCategory::ConnectionTimeout
        }
        TransportError::Socket { kind, .. } => classify_io_kind(*kind),
        TransportError::Marshal { .. }
        | TransportError::Protocol { .. }
        | TransportError::Shutdown
        | TransportError::NoEndpoints
        | TransportError::Other { .. } => FailureCategory::NonRetriableLocal,
    }
}

fn classify_io_kind(kind: io::ErrorKind) -> FailureCategory {
    use io::ErrorKind::{
        BrokenPipe, ConnectionAborted, ConnectionRefused, ConnectionReset, NotConnected,
        TimedOut, UnexpectedEof,
    };

    match kind {
        ConnectionReset | ConnectionAborted | ConnectionRefused | BrokenPipe | NotConnected
        | UnexpectedEof => FailureCategory::ConnectionLost,
        TimedOut => FailureCategory::ConnectionTimeout,
        _ => FailureCategory::NonRetriableLocal,
    }
}

fn classify_reply(status: ReplyStatus) -> FailureCategory {
    match status {
        ReplyStatus::UserException => FailureCategory::ApplicationError,
        // `Ok` is never wrapped as a failure by the invoker.
        ReplyStatus::Ok => FailureCategory::NonRetriableLocal,
        ReplyStatus::ObjectNotExist
        | ReplyStatus::FacetNotExist
        | ReplyStatus::OperationNotExist
        | ReplyStatus::UnknownLocalException
        | ReplyStatus::UnknownUserException
        | ReplyStatus::UnknownException => FailureCategory::NonRetriableRemote,
    }
}
