//! Interfaces the invocation core needs from the transport layer.
//!
//! Wire encoding, socket IO and connection establishment live behind
//! [`Connection`] and [`TransportFactory`]; the core only sees requests,
//! replies and classified [`TransportError`]s.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::proxy::Endpoint;

/// Whether an operation may safely execute more than once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    /// Executing twice may duplicate side effects
    #[default]
    Normal,
    /// Executing twice has the same effect as executing once
    Idempotent,
}

impl OperationMode {
    /// Build the mode from an idempotency flag
    #[must_use]
    pub fn from_idempotent(idempotent: bool) -> Self {
        if idempotent {
            Self::Idempotent
        } else {
            Self::Normal
        }
    }

    /// Whether this mode allows transparent retries after a lost connection
    #[must_use]
    pub fn is_idempotent(self) -> bool {
        self == Self::Idempotent
    }
}

/// One operation call as handed to a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Operation name
    pub operation: Arc<str>,
    /// Idempotency of the operation
    pub mode: OperationMode,
    /// Encoded in-parameters
    pub payload: Bytes,
    /// Per-call key/value context sent along with the request
    pub context: BTreeMap<String, String>,
}

impl Request {
    /// Create a request with an empty context
    pub fn new(operation: impl Into<Arc<str>>, mode: OperationMode, payload: Bytes) -> Self {
        Self {
            operation: operation.into(),
            mode,
            payload,
            context: BTreeMap::new(),
        }
    }

    /// Add a context entry
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Status the peer attached to a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplyStatus {
    /// The operation completed
    Ok,
    /// The operation raised a user exception
    UserException,
    /// The target object does not exist
    ObjectNotExist,
    /// The target facet does not exist
    FacetNotExist,
    /// The object does not implement the operation
    OperationNotExist,
    /// The servant raised a local exception
    UnknownLocalException,
    /// The servant raised an undeclared user exception
    UnknownUserException,
    /// The servant raised something else
    UnknownException,
}

impl fmt::Display for ReplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "ok",
            Self::UserException => "user exception",
            Self::ObjectNotExist => "object does not exist",
            Self::FacetNotExist => "facet does not exist",
            Self::OperationNotExist => "operation does not exist",
            Self::UnknownLocalException => "unknown local exception",
            Self::UnknownUserException => "unknown user exception",
            Self::UnknownException => "unknown exception",
        };
        f.write_str(name)
    }
}

/// Reply received for a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply status
    pub status: ReplyStatus,
    /// Encoded out-parameters or exception
    pub payload: Bytes,
}

impl Reply {
    /// Successful reply
    pub fn ok(payload: impl Into<Bytes>) -> Self {
        Self {
            status: ReplyStatus::Ok,
            payload: payload.into(),
        }
    }

    /// Reply carrying a user exception
    pub fn user_exception(payload: impl Into<Bytes>) -> Self {
        Self {
            status: ReplyStatus::UserException,
            payload: payload.into(),
        }
    }

    /// Reply with an arbitrary status and no body
    #[must_use]
    pub fn with_status(status: ReplyStatus) -> Self {
        Self {
            status,
            payload: Bytes::new(),
        }
    }
}

/// An established transport session to one endpoint.
///
/// A connection may be shared by many concurrent calls; implementations must
/// tolerate `send` being invoked concurrently and `close` being invoked while
/// other calls are still waiting on it.
#[async_trait]
pub trait Connection: Send + Sync + fmt::Debug {
    /// Endpoint this connection is bound to
    fn endpoint(&self) -> &Endpoint;

    /// Send one request and wait for its reply
    async fn send(&self, request: &Request) -> Result<Reply, TransportError>;

    /// Abort the connection after the invoker marked it failed
    fn close(&self, reason: &TransportError);
}

/// Opens new connections
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Open a connection to `endpoint`; `timeout` bounds the establishment
    async fn open(
        &self,
        endpoint: &Endpoint,
        timeout: Option<Duration>,
    ) -> Result<Arc<dyn Connection>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_from_flag() {
        assert_eq!(OperationMode::from_idempotent(true), OperationMode::Idempotent);
        assert_eq!(OperationMode::from_idempotent(false), OperationMode::Normal);
        assert!(!OperationMode::default().is_idempotent());
    }

    #[test]
    fn request_context_is_kept() {
        let request = Request::new("op", OperationMode::Normal, Bytes::new())
            .with_context("tenant", "a")
            .with_context("trace", "1");
        assert_eq!(request.context.len(), 2);
        assert_eq!(request.context.get("tenant").map(String::as_str), Some("a"));
    }
}
