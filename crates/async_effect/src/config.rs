//! Configuration for the callback and effect runners

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::limits::{Limit, QueueCapacity, ResolvedLimits};

/// Configuration for an [`AsyncCallback`](crate::AsyncCallback)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    /// Return the in-flight task for structurally equal arguments instead of starting a new one
    pub combine: bool,

    /// Cancel in-flight calls with the `restarted` reason before admitting a new one
    pub cancel_previous: bool,

    /// Maximum number of tasks running at once
    pub concurrency: Limit,

    /// Maximum number of calls waiting for a running slot
    pub queue_capacity: QueueCapacity,

    /// Track and publish a status snapshot
    pub states: bool,

    /// Treat routine failures as handled once recorded in the status.
    /// Call sites read them through [`TaskHandle::caught`](crate::TaskHandle::caught).
    pub catch_errors: bool,

    /// Upper bound for a single task once it holds a running slot
    pub timeout: Option<Duration>,
}

impl CallbackConfig {
    /// Create a new callback configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_combine(mut self, combine: bool) -> Self {
        self.combine = combine;
        self
    }

    pub fn with_cancel_previous(mut self, cancel_previous: bool) -> Self {
        self.cancel_previous = cancel_previous;
        self
    }

    /// Set the concurrency limit, `0` meaning no limit
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Limit::from(concurrency);
        self
    }

    pub fn with_limit(mut self, limit: Limit) -> Self {
        self.concurrency = limit;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: QueueCapacity) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn with_states(mut self, states: bool) -> Self {
        self.states = states;
        self
    }

    pub fn with_catch_errors(mut self, catch_errors: bool) -> Self {
        self.catch_errors = catch_errors;
        self
    }

    /// Set the per-task timeout
    pub fn with_timeout(mut self, timeout: Duration) -> ConfigResult<Self> {
        if timeout.is_zero() {
            return Err(ConfigError::invalid_timeout(timeout));
        }
        self.timeout = Some(timeout);
        Ok(self)
    }

    /// Validate the configuration and resolve the effective limits
    pub fn validate(&self) -> ConfigResult<ResolvedLimits> {
        if let (true, Limit::Max(limit)) = (self.cancel_previous, self.concurrency) {
            if limit.get() > 1 {
                return Err(ConfigError::CancelPreviousWithConcurrency { limit: limit.get() });
            }
        }

        if let Some(timeout) = self.timeout {
            if timeout.is_zero() {
                return Err(ConfigError::invalid_timeout(timeout));
            }
        }

        let resolved = ResolvedLimits::resolve(
            self.concurrency,
            self.queue_capacity,
            self.cancel_previous || self.states,
        );

        if self.states && !resolved.is_single_slot() {
            return Err(ConfigError::StatusTrackingRequiresSingleSlot {
                limit: resolved.concurrency,
            });
        }

        Ok(resolved)
    }
}

/// Configuration for an [`AsyncEffect`](crate::AsyncEffect)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectConfig {
    /// Do not run for the very first epoch
    pub skip_first: bool,

    /// Run at most once over the lifetime of the runner
    pub once: bool,

    /// Track and publish a status snapshot
    pub states: bool,

    /// Treat routine failures as handled once recorded in the status.
    /// Call sites read them through [`TaskHandle::caught`](crate::TaskHandle::caught).
    pub catch_errors: bool,

    /// Upper bound for a single run
    pub timeout: Option<Duration>,
}

impl EffectConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_skip_first(mut self, skip_first: bool) -> Self {
        self.skip_first = skip_first;
        self
    }

    pub fn with_once(mut self, once: bool) -> Self {
        self.once = once;
        self
    }

    pub fn with_states(mut self, states: bool) -> Self {
        self.states = states;
        self
    }

    pub fn with_catch_errors(mut self, catch_errors: bool) -> Self {
        self.catch_errors = catch_errors;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> ConfigResult<Self> {
        if timeout.is_zero() {
            return Err(ConfigError::invalid_timeout(timeout));
        }
        self.timeout = Some(timeout);
        Ok(self)
    }

    /// Validate the configuration
    ///
    /// An effect never has more than one run in flight, so its limits are always a
    /// single slot.
    pub fn validate(&self) -> ConfigResult<ResolvedLimits> {
        if let Some(timeout) = self.timeout {
            if timeout.is_zero() {
                return Err(ConfigError::invalid_timeout(timeout));
            }
        }
        Ok(ResolvedLimits::single())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CallbackConfig::default();
        let resolved = config.validate().unwrap();
        assert_eq!(resolved.concurrency, None);
        assert_eq!(resolved.queue, QueueCapacity::Unbounded);
        assert!(!config.combine);
        assert!(!config.states);
    }

    #[test]
    fn test_derived_single_slot() {
        let resolved = CallbackConfig::new()
            .with_cancel_previous(true)
            .validate()
            .unwrap();
        assert_eq!(resolved.concurrency, Some(1));

        let resolved = CallbackConfig::new().with_states(true).validate().unwrap();
        assert_eq!(resolved.concurrency, Some(1));
    }

    #[test]
    fn test_cancel_previous_rejects_multithreading() {
        let result = CallbackConfig::new()
            .with_cancel_previous(true)
            .with_concurrency(2)
            .validate();
        assert_eq!(
            result,
            Err(ConfigError::CancelPreviousWithConcurrency { limit: 2 })
        );

        // An explicit single slot or no limit at all is fine
        assert!(CallbackConfig::new()
            .with_cancel_previous(true)
            .with_concurrency(1)
            .validate()
            .is_ok());
        assert!(CallbackConfig::new()
            .with_cancel_previous(true)
            .with_concurrency(0)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_states_require_single_slot() {
        let result = CallbackConfig::new()
            .with_states(true)
            .with_concurrency(3)
            .validate();
        assert_eq!(
            result,
            Err(ConfigError::StatusTrackingRequiresSingleSlot { limit: Some(3) })
        );

        let result = CallbackConfig::new()
            .with_states(true)
            .with_concurrency(0)
            .validate();
        assert_eq!(
            result,
            Err(ConfigError::StatusTrackingRequiresSingleSlot { limit: None })
        );
    }

    #[test]
    fn test_invalid_timeout() {
        assert!(CallbackConfig::new().with_timeout(Duration::ZERO).is_err());
        assert!(EffectConfig::new().with_timeout(Duration::ZERO).is_err());

        let config = CallbackConfig {
            timeout: Some(Duration::ZERO),
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidTimeout { duration: Duration::ZERO })
        );
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: CallbackConfig = serde_json::from_str(
            r#"{ "combine": true, "concurrency": { "max": 2 }, "queue_capacity": { "bounded": 4 } }"#,
        )
        .unwrap();

        assert!(config.combine);
        assert!(!config.cancel_previous);
        assert_eq!(config.concurrency, Limit::from(2));
        assert_eq!(config.queue_capacity, QueueCapacity::Bounded(4));
        assert_eq!(config.validate().unwrap().concurrency, Some(2));

        let config: EffectConfig = serde_json::from_str(r#"{ "skip_first": true }"#).unwrap();
        assert!(config.skip_first);
        assert!(!config.once);
    }
}
