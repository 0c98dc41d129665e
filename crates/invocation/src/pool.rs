//! Connection reuse across calls.
//!
//! One connection per endpoint is cached and shared by every call that
//! targets that endpoint. A connection leaves the cache only when a call
//! marks it failed; a connection already replaced by a concurrent call is
//! left alone.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::proxy::{Endpoint, Proxy};
use crate::transport::{Connection, TransportFactory};

/// Cache of open connections keyed by endpoint
pub struct ConnectionPool {
    factory: Arc<dyn TransportFactory>,
    connections: Mutex<HashMap<Endpoint, Arc<dyn Connection>>>,
}

impl ConnectionPool {
    /// Create an empty pool backed by `factory`
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            factory,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Reuse a cached connection to one of the proxy's endpoints or open a
    /// new one, trying endpoints in selection order.
    ///
    /// When every endpoint fails the last error is returned.
    pub async fn acquire(&self, proxy: &Proxy) -> Result<Arc<dyn Connection>, TransportError> {
        let endpoints = proxy.ordered_endpoints();
        if endpoints.is_empty() {
            return Err(TransportError::NoEndpoints);
        }

        if let Some(connection) = self.cached(&endpoints) {
            return Ok(connection);
        }

        let timeout = proxy.connection_timeout();
        let mut last_error = TransportError::NoEndpoints;
        for endpoint in endpoints {
            match self.open(&endpoint, timeout).await {
                Ok(connection) => {
                    debug!(%endpoint, "opened connection");
                    return Ok(self.insert(endpoint, connection));
                }
                Err(err) => {
                    warn!(%endpoint, error = %err, "failed to open connection");
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    /// Drop `connection` from the cache and close it, unless another call
    /// already replaced it. Returns whether this call evicted it.
    pub fn mark_failed(&self, connection: &Arc<dyn Connection>, reason: &TransportError) -> bool {
        let evicted = {
            let mut connections = self.connections.lock();
            let cached = connections
                .get(connection.endpoint())
                .is_some_and(|cached| Arc::ptr_eq(cached, connection));
            if cached {
                connections.remove(connection.endpoint());
            }
            cached
        };

        if evicted {
            debug!(endpoint = %connection.endpoint(), %reason, "closing failed connection");
            connection.close(reason);
        }
        evicted
    }

    /// Number of cached connections
    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    /// Cache a freshly opened connection. If a concurrent call cached one
    /// for the same endpoint first, that one wins and ours is closed.
    fn insert(&self, endpoint: Endpoint, connection: Arc<dyn Connection>) -> Arc<dyn Connection> {
        let winner = match self.connections.lock().entry(endpoint) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => return Arc::clone(entry.insert(connection)),
        };

        debug!(endpoint = %connection.endpoint(), "closing duplicate connection");
        connection.close(&TransportError::other("superseded by a concurrently opened connection"));
        winner
    }

    fn cached(&self, endpoints: &[Endpoint]) -> Option<Arc<dyn Connection>> {
        let connections = self.connections.lock();
        endpoints
            .iter()
            .find_map(|endpoint| connections.get(endpoint).cloned())
    }

    async fn open(
        &self,
        endpoint: &Endpoint,
        timeout: Option<Duration>,
    ) -> Result<Arc<dyn Connection>, TransportError> {
        let open = self.factory.open(endpoint, timeout);
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, open)
                .await
                .map_err(|_| TransportError::ConnectTimeout { timeout })?,
            None => open.await,
        }
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("connections", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Reply, Request};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug)]
    struct StubConnection {
        endpoint: Endpoint,
        closed: AtomicBool,
    }

    #[async_trait]
    impl Connection for StubConnection {
        fn endpoint(&self) -> &Endpoint {
            &self.endpoint
        }

        async fn send(&self, _request: &Request) -> Result<Reply, TransportError> {
            Ok(Reply::ok(&b""[..]))
        }

        fn close(&self, _reason: &TransportError) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct StubFactory {
        opened: AtomicUsize,
        refuse: Vec<Endpoint>,
        hang: bool,
        delay: Option<Duration>,
        created: Mutex<Vec<Arc<StubConnection>>>,
    }

    #[async_trait]
    impl TransportFactory for StubFactory {
        async fn open(
            &self,
            endpoint: &Endpoint,
            _timeout: Option<Duration>,
        ) -> Result<Arc<dyn Connection>, TransportError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.refuse.contains(endpoint) {
                return Err(TransportError::ConnectionRefused {
                    endpoint: endpoint.clone(),
                });
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            let connection = Arc::new(StubConnection {
                endpoint: endpoint.clone(),
                closed: AtomicBool::new(false),
            });
            self.created.lock().push(Arc::clone(&connection));
            Ok(connection)
        }
    }

    fn proxy(endpoints: Vec<Endpoint>) -> Proxy {
        Proxy::new("pool", endpoints)
    }

    #[tokio::test]
    async fn reuses_cached_connection() {
        let factory = Arc::new(StubFactory::default());
        let pool = ConnectionPool::new(factory.clone());
        let proxy = proxy(vec![Endpoint::tcp("a", 1)]);

        let first = pool.acquire(&proxy).await.unwrap();
        let second = pool.acquire(&proxy).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.opened.load(Ordering::SeqCst), 1);
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn falls_through_to_next_endpoint() {
        let factory = Arc::new(StubFactory {
            refuse: vec![Endpoint::tcp("a", 1)],
            ..StubFactory::default()
        });
        let pool = ConnectionPool::new(factory);
        let proxy = proxy(vec![Endpoint::tcp("a", 1), Endpoint::tcp("b", 2)]);

        let connection = pool.acquire(&proxy).await.unwrap();
        assert_eq!(connection.endpoint(), &Endpoint::tcp("b", 2));
    }

    #[tokio::test]
    async fn reports_last_error_when_all_endpoints_fail() {
        let factory = Arc::new(StubFactory {
            refuse: vec![Endpoint::tcp("a", 1), Endpoint::tcp("b", 2)],
            ..StubFactory::default()
        });
        let pool = ConnectionPool::new(factory);
        let proxy = proxy(vec![Endpoint::tcp("a", 1), Endpoint::tcp("b", 2)]);

        let err = pool.acquire(&proxy).await.unwrap_err();
        assert_eq!(
            err,
            TransportError::ConnectionRefused {
                endpoint: Endpoint::tcp("b", 2)
            }
        );
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn no_endpoints_is_an_error() {
        let pool = ConnectionPool::new(Arc::new(StubFactory::default()));
        let err = pool.acquire(&proxy(Vec::new())).await.unwrap_err();
        assert_eq!(err, TransportError::NoEndpoints);
    }

    #[tokio::test(start_paused = true)]
    async fn open_is_bounded_by_connection_timeout() {
        let factory = Arc::new(StubFactory {
            hang: true,
            ..StubFactory::default()
        });
        let pool = ConnectionPool::new(factory);
        let proxy = proxy(vec![Endpoint::tcp("a", 1)])
            .with_connection_timeout(Some(Duration::from_millis(200)));

        let err = pool.acquire(&proxy).await.unwrap_err();
        assert_eq!(
            err,
            TransportError::ConnectTimeout {
                timeout: Duration::from_millis(200)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_open_keeps_one_and_closes_the_other() {
        let factory = Arc::new(StubFactory {
            delay: Some(Duration::from_millis(10)),
            ..StubFactory::default()
        });
        let pool = ConnectionPool::new(factory.clone());
        let proxy = proxy(vec![Endpoint::tcp("a", 1)]);

        let (first, second) = tokio::join!(pool.acquire(&proxy), pool.acquire(&proxy));
        let (first, second) = (first.unwrap(), second.unwrap());

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.opened.load(Ordering::SeqCst), 2);
        assert_eq!(pool.len(), 1);

        let closed: Vec<bool> = factory
            .created
            .lock()
            .iter()
            .map(|c| c.closed.load(Ordering::SeqCst))
            .collect();
        assert_eq!(closed, vec![false, true]);
    }

    #[tokio::test]
    async fn only_the_cached_connection_is_closed() {
        let factory = Arc::new(StubFactory::default());
        let pool = ConnectionPool::new(factory.clone());
        let proxy = proxy(vec![Endpoint::tcp("a", 1)]);
        let reason = TransportError::connection_lost("reset");

        let stale = pool.acquire(&proxy).await.unwrap();
        assert!(pool.mark_failed(&stale, &reason));

        let fresh = pool.acquire(&proxy).await.unwrap();
        assert!(!Arc::ptr_eq(&stale, &fresh));
        assert_eq!(factory.opened.load(Ordering::SeqCst), 2);

        // A late failure report on the stale connection must not evict the
        // replacement.
        assert!(!pool.mark_failed(&stale, &reason));
        assert_eq!(pool.len(), 1);
    }
}
