//! Invocation configuration
//!
//! Configuration is interpreted here, not loaded: callers deserialize or build
//! an [`InvocationConfig`] once and inject it into the
//! [`Invoker`](crate::Invoker). Invokers built from different configurations
//! coexist freely.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::schedule::RetrySchedule;

/// Longest accepted timeout
pub const MAX_TIMEOUT: Duration = Duration::from_secs(3600);

/// End-to-end deadline policy for one logical call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum InvocationTimeout {
    /// No deadline
    #[default]
    Infinite,
    /// No deadline; only the connection timeout bounds each attempt
    Disabled,
    /// Deadline this long after the call starts
    After(Duration),
}

impl InvocationTimeout {
    /// Interpret a millisecond setting: `-1` is infinite, `0` and `-2` are
    /// disabled, positive values are a duration.
    pub fn from_millis(millis: i64) -> ConfigResult<Self> {
        match millis {
            -1 => Ok(Self::Infinite),
            0 | -2 => Ok(Self::Disabled),
            ms if ms > 0 => Ok(Self::After(Duration::from_millis(ms.unsigned_abs()))),
            ms => Err(ConfigError::InvalidInvocationTimeout { millis: ms }),
        }
    }

    /// The deadline duration, if any
    #[must_use]
    pub fn duration(self) -> Option<Duration> {
        match self {
            Self::After(duration) => Some(duration),
            Self::Infinite | Self::Disabled => None,
        }
    }
}

impl TryFrom<i64> for InvocationTimeout {
    type Error = ConfigError;

    fn try_from(millis: i64) -> Result<Self, Self::Error> {
        Self::from_millis(millis)
    }
}

impl From<InvocationTimeout> for i64 {
    fn from(timeout: InvocationTimeout) -> Self {
        match timeout {
            InvocationTimeout::Infinite => -1,
            InvocationTimeout::Disabled => -2,
            InvocationTimeout::After(d) => i64::try_from(d.as_millis()).unwrap_or(i64::MAX),
        }
    }
}

impl From<Duration> for InvocationTimeout {
    fn from(duration: Duration) -> Self {
        Self::After(duration)
    }
}

/// How a new connection picks among a proxy's endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointSelection {
    /// Try endpoints in the order they were given
    #[default]
    Ordered,
    /// Shuffle endpoints for every new connection
    Random,
}

/// Configuration consumed by the invoker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvocationConfig {
    /// Delays between attempts of the same call
    pub retry_intervals: RetrySchedule,

    /// Default invocation timeout for proxies built from this configuration
    pub invocation_timeout: InvocationTimeout,

    /// Default connection timeout for proxies built from this configuration
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Option<Duration>,

    /// Default endpoint selection for proxies built from this configuration
    pub endpoint_selection: EndpointSelection,
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            retry_intervals: RetrySchedule::default(),
            invocation_timeout: InvocationTimeout::Infinite,
            connection_timeout: None,
            endpoint_selection: EndpointSelection::Ordered,
        }
    }
}

impl InvocationConfig {
    /// Create the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retry intervals
    pub fn with_retry_intervals(mut self, schedule: RetrySchedule) -> Self {
        self.retry_intervals = schedule;
        self
    }

    /// Set the default invocation timeout
    pub fn with_invocation_timeout(mut self, timeout: InvocationTimeout) -> Self {
        self.invocation_timeout = timeout;
        self
    }

    /// Set the default connection timeout
    pub fn with_connection_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the default endpoint selection
    pub fn with_endpoint_selection(mut self, selection: EndpointSelection) -> Self {
        self.endpoint_selection = selection;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let InvocationTimeout::After(timeout) = self.invocation_timeout {
            check_timeout("invocation_timeout", timeout)?;
        }

        if let Some(timeout) = self.connection_timeout {
            check_timeout("connection_timeout", timeout)?;
        }

        RetrySchedule::new(self.retry_intervals.intervals().to_vec())?;
        Ok(())
    }
}

fn check_timeout(field: &str, timeout: Duration) -> ConfigResult<()> {
    if timeout.is_zero() {
        return Err(ConfigError::validation(format!(
            "{field} must be greater than 0"
        )));
    }
    if timeout > MAX_TIMEOUT {
        return Err(ConfigError::validation(format!(
            "{field} cannot exceed {MAX_TIMEOUT:?}"
        )));
    }
    Ok(())
}
