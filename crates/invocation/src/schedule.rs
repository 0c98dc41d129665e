//! Retry interval schedule
//!
//! A [`RetrySchedule`] is an ordered list of delays. The delay at index `i`
//! is waited after attempt `i` failed and before attempt `i + 1` is sent.
//! Once the attempt index reaches the length of the list the schedule is
//! exhausted; the last entry is never reused.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Upper bound for one retry interval
pub const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(3600);

/// Outcome of consulting the schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait this long, then send the next attempt
    Delay(Duration),
    /// No retries left
    Exhausted,
}

/// Ordered retry intervals, read-only once built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u64>", into = "Vec<u64>")]
pub struct RetrySchedule {
    intervals: Vec<Duration>,
}

impl RetrySchedule {
    /// Build a schedule, rejecting intervals above [`MAX_RETRY_INTERVAL`]
    pub fn new(intervals: Vec<Duration>) -> ConfigResult<Self> {
        if let Some(too_long) = intervals.iter().find(|d| **d > MAX_RETRY_INTERVAL) {
            return Err(ConfigError::InvalidRetryInterval {
                value: format!("{}", too_long.as_millis()),
                reason: format!("exceeds maximum of {MAX_RETRY_INTERVAL:?}"),
            });
        }
        Ok(Self { intervals })
    }

    /// Build a schedule from millisecond values
    pub fn from_millis(intervals: &[u64]) -> ConfigResult<Self> {
        Self::new(intervals.iter().map(|&ms| Duration::from_millis(ms)).collect())
    }

    /// A schedule that never retries
    #[must_use]
    pub fn none() -> Self {
        Self {
            intervals: Vec::new(),
        }
    }

    /// Delay before the attempt following `attempt`, or exhaustion
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> RetryDecision {
        usize::try_from(attempt)
            .ok()
            .and_then(|index| self.intervals.get(index))
            .map_or(RetryDecision::Exhausted, |delay| RetryDecision::Delay(*delay))
    }

    /// Number of retries this schedule allows
    #[must_use]
    pub fn max_retries(&self) -> usize {
        self.intervals.len()
    }

    /// Sum of every interval
    #[must_use]
    pub fn total_delay(&self) -> Duration {
        self.intervals.iter().sum()
    }

    /// The configured intervals
    #[must_use]
    pub fn intervals(&self) -> &[Duration] {
        &self.intervals
    }
}

impl Default for RetrySchedule {
    /// One immediate retry
    fn default() -> Self {
        Self {
            intervals: vec![Duration::ZERO],
        }
    }
}

impl FromStr for RetrySchedule {
    type Err = ConfigError;

    /// Parse whitespace or comma separated milliseconds, e.g. `"0 1 10000"`.
    /// A lone `-1` disables retries.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = s
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty())
            .collect();

        if tokens == ["-1"] {
            return Ok(Self::none());
        }

        let millis = tokens
            .iter()
            .map(|token| {
                let value = token
                    .parse::<i64>()
                    .map_err(|e| ConfigError::InvalidRetryInterval {
                        value: (*token).to_string(),
                        reason: e.to_string(),
                    })?;
                u64::try_from(value).map_err(|_| ConfigError::InvalidRetryInterval {
                    value: (*token).to_string(),
                    reason: "intervals must not be negative".to_string(),
                })
            })
            .collect::<ConfigResult<Vec<u64>>>()?;

        Self::from_millis(&millis)
    }
}

impl fmt::Display for RetrySchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.intervals.is_empty() {
            return f.write_str("-1");
        }
        let parts: Vec<String> = self
            .intervals
            .iter()
            .map(|d| d.as_millis().to_string())
            .collect();
        f.write_str(&parts.join(" "))
    }
}

impl TryFrom<Vec<u64>> for RetrySchedule {
    type Error = ConfigError;

    fn try_from(millis: Vec<u64>) -> Result<Self, Self::Error> {
        Self::from_millis(&millis)
    }
}

impl From<RetrySchedule> for Vec<u64> {
    fn from(schedule: RetrySchedule) -> Self {
        schedule
            .intervals
            .iter()
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn exhaustion_is_exact() {
        let schedule: RetrySchedule = "0 1 10000".parse().unwrap();

        assert_eq!(schedule.next_delay(0), RetryDecision::Delay(Duration::ZERO));
        assert_eq!(
            schedule.next_delay(1),
            RetryDecision::Delay(Duration::from_millis(1))
        );
        assert_eq!(
            schedule.next_delay(2),
            RetryDecision::Delay(Duration::from_millis(10_000))
        );
        assert_eq!(schedule.next_delay(3), RetryDecision::Exhausted);
        assert_eq!(schedule.next_delay(u32::MAX), RetryDecision::Exhausted);
        assert_eq!(schedule.max_retries(), 3);
    }

    #[test]
    fn empty_schedule_never_retries() {
        assert_eq!(RetrySchedule::none().next_delay(0), RetryDecision::Exhausted);
        assert_eq!("-1".parse::<RetrySchedule>().unwrap(), RetrySchedule::none());
        assert_eq!("".parse::<RetrySchedule>().unwrap(), RetrySchedule::none());
    }

    #[test]
    fn default_is_single_immediate_retry() {
        let schedule = RetrySchedule::default();
        assert_eq!(schedule.next_delay(0), RetryDecision::Delay(Duration::ZERO));
        assert_eq!(schedule.next_delay(1), RetryDecision::Exhausted);
    }

    #[rstest]
    #[case("0,1, 10000")]
    #[case("  0 1\t10000 ")]
    fn accepts_commas_and_whitespace(#[case] input: &str) {
        let schedule: RetrySchedule = input.parse().unwrap();
        assert_eq!(schedule.to_string(), "0 1 10000");
    }

    #[rstest]
    #[case("0 -5")]
    #[case("-1 0")]
    #[case("ten")]
    #[case("1.5")]
    fn rejects_malformed_intervals(#[case] input: &str) {
        assert!(matches!(
            input.parse::<RetrySchedule>(),
            Err(ConfigError::InvalidRetryInterval { .. })
        ));
    }

    #[test]
    fn rejects_intervals_above_maximum() {
        let err = RetrySchedule::new(vec![MAX_RETRY_INTERVAL + Duration::from_millis(1)]);
        assert!(err.is_err());
    }

    #[test]
    fn serde_uses_milliseconds() {
        let schedule = RetrySchedule::from_millis(&[0, 1, 10_000]).unwrap();
        let json = serde_json::to_string(&schedule).unwrap();
        assert_eq!(json, "[0,1,10000]");

        let back: RetrySchedule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, schedule);
        assert_eq!(back.total_delay(), Duration::from_millis(10_001));
    }
}
