use std::num::NonZero;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Defines how many tasks of one owner may run at the same time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Limit {
    /// There is no limit.
    None,

    /// There is an upper limit.
    Max(NonZero<usize>),

    /// Derive the limit from the other options: one slot when `cancel_previous`
    /// or status tracking is requested, unlimited otherwise.
    #[default]
    Default,
}

impl From<usize> for Limit {
    fn from(value: usize) -> Self {
        NonZero::new(value).map(Limit::Max).unwrap_or(Limit::None)
    }
}

impl TryFrom<i64> for Limit {
    type Error = ConfigError;

    fn try_from(value: i64) -> ConfigResult<Self> {
        usize::try_from(value)
            .map(Limit::from)
            .map_err(|_| ConfigError::invalid_concurrency(value))
    }
}

/// How many calls may wait for a running slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueCapacity {
    /// Any number of calls may wait.
    #[default]
    Unbounded,

    /// At most this many calls may wait; `0` rejects as soon as every slot is busy.
    Bounded(usize),
}

impl QueueCapacity {
    /// Whether a queue of `len` waiting calls can take one more.
    pub fn has_room(&self, len: usize) -> bool {
        match self {
            QueueCapacity::Unbounded => true,
            QueueCapacity::Bounded(capacity) => len < *capacity,
        }
    }
}

impl TryFrom<i64> for QueueCapacity {
    type Error = ConfigError;

    fn try_from(value: i64) -> ConfigResult<Self> {
        match value {
            -1 => Ok(QueueCapacity::Unbounded),
            value => usize::try_from(value)
                .map(QueueCapacity::Bounded)
                .map_err(|_| ConfigError::invalid_queue_capacity(value)),
        }
    }
}

/// Limits after the derived defaults have been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedLimits {
    /// The maximum number of tasks running at once, `None` for no limit.
    pub concurrency: Option<usize>,

    /// The maximum number of calls waiting for a slot.
    pub queue: QueueCapacity,
}

impl ResolvedLimits {
    /// Resolve `limit`, deriving a single slot when `single_slot_hint` is set.
    pub fn resolve(limit: Limit, queue: QueueCapacity, single_slot_hint: bool) -> Self {
        let concurrency = match limit {
            Limit::None => None,
            Limit::Max(max) => Some(max.get()),
            Limit::Default if single_slot_hint => Some(1),
            Limit::Default => None,
        };

        ResolvedLimits { concurrency, queue }
    }

    /// A single slot with an unbounded queue.
    pub fn single() -> Self {
        ResolvedLimits {
            concurrency: Some(1),
            queue: QueueCapacity::Unbounded,
        }
    }

    pub fn is_single_slot(&self) -> bool {
        self.concurrency == Some(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_from_numbers() {
        assert_eq!(Limit::from(0), Limit::None);
        assert_eq!(Limit::from(3), Limit::Max(NonZero::new(3).unwrap()));
        assert_eq!(Limit::try_from(2i64), Ok(Limit::from(2)));
        assert_eq!(
            Limit::try_from(-1i64),
            Err(ConfigError::InvalidConcurrency { value: -1 })
        );
    }

    #[test]
    fn test_queue_capacity_from_numbers() {
        assert_eq!(QueueCapacity::try_from(-1i64), Ok(QueueCapacity::Unbounded));
        assert_eq!(QueueCapacity::try_from(0i64), Ok(QueueCapacity::Bounded(0)));
        assert_eq!(QueueCapacity::try_from(5i64), Ok(QueueCapacity::Bounded(5)));
        assert_eq!(
            QueueCapacity::try_from(-2i64),
            Err(ConfigError::InvalidQueueCapacity { value: -2 })
        );
    }

    #[test]
    fn test_queue_room() {
        assert!(QueueCapacity::Unbounded.has_room(10_000));
        assert!(!QueueCapacity::Bounded(0).has_room(0));
        assert!(QueueCapacity::Bounded(2).has_room(1));
        assert!(!QueueCapacity::Bounded(2).has_room(2));
    }

    #[test]
    fn test_resolve_derived_default() {
        let resolved = ResolvedLimits::resolve(Limit::Default, QueueCapacity::Unbounded, true);
        assert_eq!(resolved.concurrency, Some(1));
        assert!(resolved.is_single_slot());

        let resolved = ResolvedLimits::resolve(Limit::Default, QueueCapacity::Unbounded, false);
        assert_eq!(resolved.concurrency, None);

        let resolved = ResolvedLimits::resolve(Limit::from(4), QueueCapacity::Bounded(1), true);
        assert_eq!(resolved.concurrency, Some(4));
        assert_eq!(resolved.queue, QueueCapacity::Bounded(1));
    }
}
