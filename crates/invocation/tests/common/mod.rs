//! Scripted transport shared by the integration tests.
//!
//! Every `send` pops the next [`Outcome`] from a shared script; an empty
//! script answers with an empty successful reply.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use nebula_invocation::{Connection, Endpoint, Reply, Request, TransportError, TransportFactory};
use parking_lot::Mutex;

/// What the next `send` does
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Fail with a lost connection
    Lost,
    /// Fail with this transport error
    Fail(TransportError),
    /// Never answer
    Hang,
    /// Answer with this reply
    Reply(Reply),
    /// Answer successfully after this long
    Slow(Duration, Bytes),
}

impl Outcome {
    pub fn ok(payload: &'static [u8]) -> Self {
        Self::Reply(Reply::ok(Bytes::from_static(payload)))
    }
}

#[derive(Debug, Default)]
struct Shared {
    script: Mutex<VecDeque<Outcome>>,
    stall_open: AtomicBool,
    sent: AtomicU32,
    opened: AtomicU32,
    closed: AtomicU32,
    sends: Mutex<Vec<u32>>,
}

/// Transport whose connections follow a script
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    shared: Arc<Shared>,
}

impl ScriptedTransport {
    pub fn new(script: impl IntoIterator<Item = Outcome>) -> Self {
        let transport = Self::default();
        transport.push(script);
        transport
    }

    /// Append outcomes to the script
    pub fn push(&self, outcomes: impl IntoIterator<Item = Outcome>) {
        self.shared.script.lock().extend(outcomes);
    }

    /// Make every later `open` wait forever
    pub fn stall_open(&self) {
        self.shared.stall_open.store(true, Ordering::SeqCst);
    }

    /// Physical attempts received
    pub fn sent(&self) -> u32 {
        self.shared.sent.load(Ordering::SeqCst)
    }

    /// Connections opened
    pub fn opened(&self) -> u32 {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// Connections closed by the pool
    pub fn closed(&self) -> u32 {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Connection id that carried each attempt, in order
    pub fn sends(&self) -> Vec<u32> {
        self.shared.sends.lock().clone()
    }

    pub fn factory(&self) -> Arc<dyn TransportFactory> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl TransportFactory for ScriptedTransport {
    async fn open(
        &self,
        endpoint: &Endpoint,
        _timeout: Option<Duration>,
    ) -> Result<Arc<dyn Connection>, TransportError> {
        if self.shared.stall_open.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let id = self.shared.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedConnection {
            id,
            endpoint: endpoint.clone(),
            closed: AtomicBool::new(false),
            shared: Arc::clone(&self.shared),
        }))
    }
}

#[derive(Debug)]
struct ScriptedConnection {
    id: u32,
    endpoint: Endpoint,
    closed: AtomicBool,
    shared: Arc<Shared>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn send(&self, _request: &Request) -> Result<Reply, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::CloseConnection);
        }
        self.shared.sent.fetch_add(1, Ordering::SeqCst);
        self.shared.sends.lock().push(self.id);

        let next = self.shared.script.lock().pop_front();
        match next.unwrap_or_else(|| Outcome::ok(b"")) {
            Outcome::Lost => Err(TransportError::connection_lost("connection reset by peer")),
            Outcome::Fail(err) => Err(err),
            Outcome::Hang => std::future::pending().await,
            Outcome::Reply(reply) => Ok(reply),
            Outcome::Slow(delay, payload) => {
                tokio::time::sleep(delay).await;
                Ok(Reply::ok(payload))
            }
        }
    }

    fn close(&self, _reason: &TransportError) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shared.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub fn endpoint() -> Endpoint {
    Endpoint::tcp("localhost", 10000)
}
