//! Session configuration.

use aquaclean_core::DataPointId;
use aquaclean_protocol::collector::{DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_MAX_PENDING_AGE};
use aquaclean_protocol::DEFAULT_MTU;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default time to wait for a response before retrying.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(15);

/// Default number of sends per transaction, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Default data point holding the model identifier.
pub const DEFAULT_MODEL_DATA_POINT: DataPointId = DataPointId(2);

/// Default capacity of the state change channel.
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// How much protocol detail to log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Debug,
    /// Also dumps every frame as hex.
    Trace,
}

impl Verbosity {
    /// Filter directive matching this verbosity.
    pub fn filter_directive(&self) -> &'static str {
        match self {
            Verbosity::Quiet => "warn",
            Verbosity::Normal => "info",
            Verbosity::Debug => "debug",
            Verbosity::Trace => "trace",
        }
    }

    pub fn dumps_frames(&self) -> bool {
        *self == Verbosity::Trace
    }
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Time to wait for a response to each attempt.
    pub response_timeout: Duration,
    /// Sends per transaction, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Factor applied to the delay for each further retry.
    pub backoff_multiplier: u32,
    /// Upper bound on the retry delay.
    pub max_backoff: Duration,
    /// Transport MTU in bytes.
    pub mtu: usize,
    /// Largest reassembled message accepted.
    pub max_message_size: usize,
    /// Unfinished messages older than this are dropped.
    pub max_pending_age: Duration,
    /// Capacity of the state change channel.
    pub event_capacity: usize,
    /// Data point read at identification.
    pub model_data_point: DataPointId,
    pub verbosity: Verbosity,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(500),
            backoff_multiplier: 2,
            max_backoff: Duration::from_secs(5),
            mtu: DEFAULT_MTU,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_pending_age: DEFAULT_MAX_PENDING_AGE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            model_data_point: DEFAULT_MODEL_DATA_POINT,
            verbosity: Verbosity::Normal,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Sets the number of sends per transaction. At least one.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, initial: Duration, multiplier: u32, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.backoff_multiplier = multiplier.max(1);
        self.max_backoff = max;
        self
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_max_pending_age(mut self, age: Duration) -> Self {
        self.max_pending_age = age;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn with_model_data_point(mut self, id: DataPointId) -> Self {
        self.model_data_point = id;
        self
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.response_timeout, Duration::from_secs(15));
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.mtu, 20);
        assert_eq!(config.max_message_size, 1024);
        assert_eq!(config.max_pending_age, Duration::from_secs(5));
        assert_eq!(config.model_data_point, DataPointId(2));
        assert_eq!(config.verbosity, Verbosity::Normal);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = SessionConfig::default();
        assert_eq!(config.backoff_for(1), Duration::from_millis(500));
        assert_eq!(config.backoff_for(2), Duration::from_secs(1));
        assert_eq!(config.backoff_for(3), Duration::from_secs(2));
        assert_eq!(config.backoff_for(5), Duration::from_secs(5));
        assert_eq!(config.backoff_for(40), Duration::from_secs(5));
    }

    #[test]
    fn test_builder_clamps() {
        let config = SessionConfig::new()
            .with_max_attempts(0)
            .with_event_capacity(0)
            .with_backoff(Duration::from_millis(10), 0, Duration::from_secs(1));
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.event_capacity, 1);
        assert_eq!(config.backoff_multiplier, 1);
        assert_eq!(config.backoff_for(3), Duration::from_millis(10));
    }

    #[test]
    fn test_verbosity() {
        assert_eq!(Verbosity::default(), Verbosity::Normal);
        assert_eq!(Verbosity::Debug.filter_directive(), "debug");
        assert!(Verbosity::Trace.dumps_frames());
        assert!(!Verbosity::Debug.dumps_frames());
        let v: Verbosity = serde_json::from_str("\"trace\"").unwrap();
        assert_eq!(v, Verbosity::Trace);
    }
}
