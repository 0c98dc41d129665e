//! Error types for remote invocations
//!
//! Three layers of errors live here:
//!
//! - [`TransportError`] is what the transport collaborators raise.
//! - [`InvocationError`] is the terminal outcome a caller observes.
//! - [`ConfigError`] reports configuration that cannot be interpreted.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

use crate::classifier::{AttemptFailure, FailureCategory};
use crate::proxy::Endpoint;
use crate::transport::ReplyStatus;

/// Failures raised by a [`Connection`](crate::Connection) or a
/// [`TransportFactory`](crate::TransportFactory).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection broke while a request was outstanding
    #[error("connection lost: {reason}")]
    ConnectionLost {
        /// What the transport observed
        reason: String,
    },

    /// The peer refused to accept a new connection
    #[error("connection refused by {endpoint}")]
    ConnectionRefused {
        /// Endpoint that refused
        endpoint: Endpoint,
    },

    /// The peer closed the connection gracefully
    #[error("connection closed by peer")]
    CloseConnection,

    /// No activity on an established connection within the timeout
    #[error("connection timed out after {timeout:?} without activity")]
    ConnectionTimeout {
        /// Silence window that was exceeded
        timeout: Duration,
    },

    /// Establishing the connection took longer than the timeout
    #[error("connect timed out after {timeout:?}")]
    ConnectTimeout {
        /// Timeout that was exceeded
        timeout: Duration,
    },

    /// Raw socket failure
    #[error("socket error ({kind:?}): {message}")]
    Socket {
        /// OS error kind
        kind: io::ErrorKind,
        /// Error text
        message: String,
    },

    /// Request or reply could not be encoded or decoded
    #[error("marshal error: {message}")]
    Marshal {
        /// Error text
        message: String,
    },

    /// The peer violated the wire protocol
    #[error("protocol error: {message}")]
    Protocol {
        /// Error text
        message: String,
    },

    /// The transport layer is shutting down
    #[error("transport is shut down")]
    Shutdown,

    /// The proxy carries no endpoint to connect to
    #[error("no endpoints to connect to")]
    NoEndpoints,

    /// Anything the transport could not describe more precisely
    #[error("{message}")]
    Other {
        /// Error text
        message: String,
    },
}

impl TransportError {
    /// Create a connection lost error
    pub fn connection_lost(reason: impl Into<String>) -> Self {
        Self::ConnectionLost {
            reason: reason.into(),
        }
    }

    /// Create a connection timeout error
    #[must_use]
    pub fn connection_timeout(timeout: Duration) -> Self {
        Self::ConnectionTimeout { timeout }
    }

    /// Create a marshal error
    pub fn marshal(message: impl Into<String>) -> Self {
        Self::Marshal {
            message: message.into(),
        }
    }

    /// Create an unclassified error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::Socket {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Terminal outcome of a failed logical call.
///
/// Every variant records how many physical attempts were sent before the
/// call terminated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvocationError {
    /// The end-to-end invocation deadline expired
    #[error("invocation timed out after {timeout:?} ({attempts} attempts)")]
    InvocationTimeout {
        /// Configured invocation timeout
        timeout: Duration,
        /// Physical attempts made
        attempts: u32,
    },

    /// An attempt hit its connection timeout and was not retried
    #[error("connection timeout after {attempts} attempts: {source}")]
    ConnectionTimeout {
        /// Underlying transport failure
        source: TransportError,
        /// Physical attempts made
        attempts: u32,
    },

    /// The connection was lost and the call was not retried
    #[error("connection lost after {attempts} attempts: {source}")]
    ConnectionLost {
        /// Underlying transport failure
        source: TransportError,
        /// Physical attempts made
        attempts: u32,
    },

    /// A local failure that is never retried
    #[error("local failure: {source}")]
    Local {
        /// Underlying transport failure
        source: TransportError,
        /// Physical attempts made
        attempts: u32,
    },

    /// The peer replied with a system-level failure
    #[error("remote failure: {status}")]
    Remote {
        /// Reply status sent by the peer
        status: ReplyStatus,
        /// Reply body, if any
        payload: Bytes,
        /// Physical attempts made
        attempts: u32,
    },

    /// The operation raised a user-level error
    #[error("application error ({} bytes)", .payload.len())]
    Application {
        /// Encoded user exception
        payload: Bytes,
        /// Physical attempts made
        attempts: u32,
    },

    /// The caller cancelled the call
    #[error("invocation cancelled after {attempts} attempts")]
    Cancelled {
        /// Physical attempts made
        attempts: u32,
    },
}

impl InvocationError {
    /// Build the terminal error for a failure, choosing the variant from the
    /// classified category.
    pub(crate) fn from_failure(
        failure: AttemptFailure,
        category: FailureCategory,
        attempts: u32,
    ) -> Self {
        match (category, failure) {
            (FailureCategory::ApplicationError, AttemptFailure::Remote(reply)) => {
                Self::Application {
                    payload: reply.payload,
                    attempts,
                }
            }
            (FailureCategory::NonRetriableRemote, AttemptFailure::Remote(reply)) => Self::Remote {
                status: reply.status,
                payload: reply.payload,
                attempts,
            },
            (FailureCategory::InvocationTimeout, AttemptFailure::InvocationTimeout { timeout }) => {
                Self::InvocationTimeout { timeout, attempts }
            }
            (FailureCategory::ConnectionLost, AttemptFailure::Transport(source)) => {
                Self::ConnectionLost { source, attempts }
            }
            (FailureCategory::ConnectionTimeout, AttemptFailure::Transport(source)) => {
                Self::ConnectionTimeout { source, attempts }
            }
            (_, failure) => Self::Local {
                source: failure.into_transport_error(),
                attempts,
            },
        }
    }

    /// Category of the failure that ended the call; `None` for cancellation
    pub fn category(&self) -> Option<FailureCategory> {
        match self {
            Self::InvocationTimeout { .. } => Some(FailureCategory::InvocationTimeout),
            Self::ConnectionTimeout { .. } => Some(FailureCategory::ConnectionTimeout),
            Self::ConnectionLost { .. } => Some(FailureCategory::ConnectionLost),
            Self::Local { .. } => Some(FailureCategory::NonRetriableLocal),
            Self::Remote { .. } => Some(FailureCategory::NonRetriableRemote),
            Self::Application { .. } => Some(FailureCategory::ApplicationError),
            Self::Cancelled { .. } => None,
        }
    }

    /// Number of physical attempts made before the call terminated
    pub fn attempts(&self) -> u32 {
        match self {
            Self::InvocationTimeout { attempts, .. }
            | Self::ConnectionTimeout { attempts, .. }
            | Self::ConnectionLost { attempts, .. }
            | Self::Local { attempts, .. }
            | Self::Remote { attempts, .. }
            | Self::Application { attempts, .. }
            | Self::Cancelled { attempts } => *attempts,
        }
    }

    /// Whether the call ended on either timer
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::InvocationTimeout { .. } | Self::ConnectionTimeout { .. }
        )
    }
}

/// Result type for invocations
pub type InvocationResult<T> = Result<T, InvocationError>;

/// Configuration that cannot be interpreted
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A retry interval entry is malformed
    #[error("invalid retry interval `{value}`: {reason}")]
    InvalidRetryInterval {
        /// Offending entry
        value: String,
        /// Why it was rejected
        reason: String,
    },

    /// An invocation timeout sentinel is not recognised
    #[error("invalid invocation timeout: {millis} ms")]
    InvalidInvocationTimeout {
        /// Offending value
        millis: i64,
    },

    /// A value is out of its accepted range
    #[error("configuration validation failed: {message}")]
    Validation {
        /// Error text
        message: String,
    },
}

impl ConfigError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Result type for configuration interpretation
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Reply;

    #[test]
    fn io_errors_keep_their_kind() {
        let err = TransportError::from(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert!(matches!(
            err,
            TransportError::Socket {
                kind: io::ErrorKind::ConnectionReset,
                ..
            }
        ));
    }

    #[test]
    fn application_failure_keeps_payload() {
        let payload = Bytes::from_static(b"user-exception");
        let err = InvocationError::from_failure(
            AttemptFailure::Remote(Reply::user_exception(payload.clone())),
            FailureCategory::ApplicationError,
            1,
        );

        assert_eq!(
            err,
            InvocationError::Application {
                payload,
                attempts: 1
            }
        );
        assert_eq!(err.category(), Some(FailureCategory::ApplicationError));
    }

    #[test]
    fn transport_failure_maps_by_category() {
        let source = TransportError::connection_timeout(Duration::from_millis(200));
        let err = InvocationError::from_failure(
            AttemptFailure::Transport(source.clone()),
            FailureCategory::ConnectionTimeout,
            3,
        );

        assert_eq!(
            err,
            InvocationError::ConnectionTimeout {
                source,
                attempts: 3
            }
        );
        assert!(err.is_timeout());
        assert_eq!(err.attempts(), 3);
    }

    #[test]
    fn mismatched_category_falls_back_to_local() {
        let err = InvocationError::from_failure(
            AttemptFailure::Transport(TransportError::marshal("bad frame")),
            FailureCategory::NonRetriableLocal,
            1,
        );
        assert_eq!(err.category(), Some(FailureCategory::NonRetriableLocal));
    }
}
