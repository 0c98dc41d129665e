//! Client-side references to remote objects.
//!
//! A [`Proxy`] is an immutable value: every override returns a new proxy and
//! leaves the original untouched, so a proxy can be shared freely between
//! concurrent calls.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{EndpointSelection, InvocationConfig, InvocationTimeout};

/// Network address of a remote object adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    /// Transport protocol name, e.g. `tcp`
    pub protocol: String,
    /// Host name or address
    pub host: String,
    /// Port number
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint
    pub fn new(protocol: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol: protocol.into(),
            host: host.into(),
            port,
        }
    }

    /// Shorthand for a `tcp` endpoint
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::new("tcp", host, port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -h {} -p {}", self.protocol, self.host, self.port)
    }
}

/// Reference to a remote object together with its per-call overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proxy {
    identity: Arc<str>,
    endpoints: Arc<[Endpoint]>,
    invocation_timeout: InvocationTimeout,
    connection_timeout: Option<Duration>,
    endpoint_selection: EndpointSelection,
}

impl Proxy {
    /// Create a proxy with no timeouts and ordered endpoint selection.
    pub fn new(identity: impl Into<String>, endpoints: Vec<Endpoint>) -> Self {
        Self {
            identity: Arc::from(identity.into()),
            endpoints: endpoints.into(),
            invocation_timeout: InvocationTimeout::Infinite,
            connection_timeout: None,
            endpoint_selection: EndpointSelection::Ordered,
        }
    }

    /// Create a proxy that inherits its default timeouts and endpoint
    /// selection from `config`.
    pub fn with_defaults(
        identity: impl Into<String>,
        endpoints: Vec<Endpoint>,
        config: &InvocationConfig,
    ) -> Self {
        Self::new(identity, endpoints)
            .with_invocation_timeout(config.invocation_timeout)
            .with_connection_timeout(config.connection_timeout)
            .with_endpoint_selection(config.endpoint_selection)
    }

    /// Object identity
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Endpoints this proxy may connect to
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// End-to-end invocation timeout
    pub fn invocation_timeout(&self) -> InvocationTimeout {
        self.invocation_timeout
    }

    /// Per-attempt connection timeout
    pub fn connection_timeout(&self) -> Option<Duration> {
        self.connection_timeout
    }

    /// How connections are chosen among the endpoints
    pub fn endpoint_selection(&self) -> EndpointSelection {
        self.endpoint_selection
    }

    /// Copy of this proxy with a different invocation timeout
    pub fn with_invocation_timeout(&self, timeout: InvocationTimeout) -> Self {
        Self {
            invocation_timeout: timeout,
            ..self.clone()
        }
    }

    /// Copy of this proxy with a different connection timeout
    pub fn with_connection_timeout(&self, timeout: Option<Duration>) -> Self {
        Self {
            connection_timeout: timeout,
            ..self.clone()
        }
    }

    /// Copy of this proxy pointing at other endpoints
    pub fn with_endpoints(&self, endpoints: Vec<Endpoint>) -> Self {
        Self {
            endpoints: endpoints.into(),
            ..self.clone()
        }
    }

    /// Copy of this proxy with another endpoint selection policy
    pub fn with_endpoint_selection(&self, selection: EndpointSelection) -> Self {
        Self {
            endpoint_selection: selection,
            ..self.clone()
        }
    }

    /// Endpoints in the order they should be tried for a new connection.
    pub(crate) fn ordered_endpoints(&self) -> Vec<Endpoint> {
        let mut endpoints = self.endpoints.to_vec();
        if self.endpoint_selection == EndpointSelection::Random {
            fastrand::shuffle(&mut endpoints);
        }
        endpoints
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identity)?;
        for endpoint in self.endpoints.iter() {
            write!(f, ":{endpoint}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn proxy() -> Proxy {
        Proxy::new("retry", vec![Endpoint::tcp("127.0.0.1", 10000)])
    }

    #[test]
    fn overrides_do_not_mutate_original() {
        let base = proxy();
        let timed = base
            .with_invocation_timeout(InvocationTimeout::After(Duration::from_millis(500)))
            .with_connection_timeout(Some(Duration::from_millis(200)));

        assert_eq!(base.invocation_timeout(), InvocationTimeout::Infinite);
        assert_eq!(base.connection_timeout(), None);
        assert_eq!(
            timed.invocation_timeout(),
            InvocationTimeout::After(Duration::from_millis(500))
        );
        assert_eq!(timed.connection_timeout(), Some(Duration::from_millis(200)));
        assert_eq!(timed.identity(), base.identity());
    }

    #[test]
    fn display_lists_endpoints() {
        assert_eq!(proxy().to_string(), "retry:tcp -h 127.0.0.1 -p 10000");
    }

    #[test]
    fn random_selection_keeps_every_endpoint() {
        let endpoints: Vec<_> = (0..8).map(|p| Endpoint::tcp("host", 4000 + p)).collect();
        let proxy = proxy()
            .with_endpoints(endpoints.clone())
            .with_endpoint_selection(EndpointSelection::Random);

        let mut shuffled = proxy.ordered_endpoints();
        shuffled.sort();
        assert_eq!(shuffled, endpoints);
    }

    #[test]
    fn defaults_come_from_config() {
        let config = InvocationConfig::default()
            .with_invocation_timeout(InvocationTimeout::After(Duration::from_secs(2)))
            .with_connection_timeout(Some(Duration::from_secs(1)));
        let proxy = Proxy::with_defaults("svc", vec![Endpoint::tcp("h", 1)], &config);

        assert_eq!(
            proxy.invocation_timeout(),
            InvocationTimeout::After(Duration::from_secs(2))
        );
        assert_eq!(proxy.connection_timeout(), Some(Duration::from_secs(1)));
    }
}
