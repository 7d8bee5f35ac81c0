//! Observable status of a single-slot runner

use tokio::sync::watch;
use tracing::trace;

use crate::error::TaskError;
use crate::task::Settlement;

/// The most recent status of a runner.
///
/// While a task runs `pending` is set and everything else is cleared. Once it
/// settles `done` is set and exactly one of `result` or `error` holds the
/// outcome; a canceled task sets `canceled` and keeps the cancellation in `error`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot<T, E> {
    pub pending: bool,
    pub done: bool,
    pub result: Option<T>,
    pub error: Option<TaskError<E>>,
    pub canceled: bool,
    pub paused: bool,
}

impl<T, E> Default for StatusSnapshot<T, E> {
    fn default() -> Self {
        Self {
            pending: false,
            done: false,
            result: None,
            error: None,
            canceled: false,
            paused: false,
        }
    }
}

impl<T, E> StatusSnapshot<T, E> {
    /// Nothing has started yet
    pub fn is_idle(&self) -> bool {
        !self.pending && !self.done
    }

    fn started() -> Self {
        Self {
            pending: true,
            ..Self::default()
        }
    }
}

impl<T: Clone, E: Clone> StatusSnapshot<T, E> {
    fn settled(outcome: &Settlement<T, E>) -> Self {
        match outcome {
            Ok(value) => Self {
                done: true,
                result: Some(value.clone()),
                ..Self::default()
            },
            Err(err) => Self {
                done: true,
                canceled: err.is_canceled(),
                error: Some(err.clone()),
                ..Self::default()
            },
        }
    }
}

/// A lifecycle event of the tracked task
#[derive(Debug)]
pub(crate) enum Transition<'a, T, E> {
    Started,
    Paused,
    Resumed,
    Settled(&'a Settlement<T, E>),
}

/// Folds task transitions into the current [`StatusSnapshot`].
pub(crate) struct StatusProjector<T, E> {
    current: watch::Sender<StatusSnapshot<T, E>>,
    mounted: bool,
}

impl<T: Clone, E: Clone> StatusProjector<T, E> {
    pub fn new() -> Self {
        let (current, _) = watch::channel(StatusSnapshot::default());
        Self {
            current,
            mounted: true,
        }
    }

    /// Apply a transition. Returns the new snapshot if one was published.
    pub fn project(&mut self, transition: Transition<'_, T, E>) -> Option<StatusSnapshot<T, E>> {
        if !self.mounted {
            return None;
        }

        let next = match transition {
            Transition::Started => StatusSnapshot::started(),
            // Only a task holding the slot can be paused
            Transition::Paused => StatusSnapshot {
                paused: true,
                ..StatusSnapshot::started()
            },
            Transition::Resumed => StatusSnapshot::started(),
            Transition::Settled(Err(TaskError::Canceled(err))) if err.reason().is_teardown() => {
                trace!(reason = %err.reason(), "suppressing status for teardown cancellation");
                return None;
            }
            Transition::Settled(outcome) => StatusSnapshot::settled(outcome),
        };

        self.current.send_replace(next.clone());
        Some(next)
    }

    pub fn current(&self) -> StatusSnapshot<T, E> {
        self.current.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot<T, E>> {
        self.current.subscribe()
    }

    /// Stop publishing. The last snapshot stays readable.
    pub fn unmount(&mut self) {
        self.mounted = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CancelReason;

    type Projector = StatusProjector<u32, String>;

    #[test]
    fn test_started_clears_previous_outcome() {
        let mut projector = Projector::new();
        assert!(projector.current().is_idle());

        projector.project(Transition::Settled(&Ok(1)));
        let started = projector.project(Transition::Started).unwrap();
        assert!(started.pending);
        assert!(!started.done);
        assert_eq!(started.result, None);
    }

    #[test]
    fn test_settled_sets_exactly_one_outcome() {
        let mut projector = Projector::new();

        let ok = projector.project(Transition::Settled(&Ok(5))).unwrap();
        assert!(ok.done && !ok.pending && !ok.canceled);
        assert_eq!(ok.result, Some(5));
        assert!(ok.error.is_none());

        let failed = projector
            .project(Transition::Settled(&Err(TaskError::Failed("boom".to_string()))))
            .unwrap();
        assert!(failed.done && !failed.canceled);
        assert!(failed.result.is_none());
        assert_eq!(failed.error, Some(TaskError::Failed("boom".to_string())));

        let timeout = projector
            .project(Transition::Settled(&Err(TaskError::canceled(CancelReason::Timeout))))
            .unwrap();
        assert!(timeout.done && timeout.canceled);
        assert!(timeout.error.unwrap().is_timeout());
    }

    #[test]
    fn test_teardown_cancellations_are_suppressed() {
        let mut projector = Projector::new();
        projector.project(Transition::Started);

        for reason in [CancelReason::Unmounted, CancelReason::Restarted] {
            let outcome = Err(TaskError::canceled(reason));
            assert!(projector.project(Transition::Settled(&outcome)).is_none());
        }
        assert!(projector.current().pending);
    }

    #[test]
    fn test_pause_toggles_flag() {
        let mut projector = Projector::new();
        projector.project(Transition::Started);
        assert!(projector.project(Transition::Paused).unwrap().paused);

        let resumed = projector.project(Transition::Resumed).unwrap();
        assert!(!resumed.paused);
        assert!(resumed.pending);
    }

    #[test]
    fn test_pause_after_overflow_reports_pending() {
        let mut projector = Projector::new();
        projector.project(Transition::Started);
        projector.project(Transition::Settled(&Err(TaskError::canceled(CancelReason::Overflow))));

        let paused = projector.project(Transition::Paused).unwrap();
        assert!(paused.pending && paused.paused);
        assert!(!paused.done && !paused.canceled);
        assert!(paused.error.is_none());
    }

    #[test]
    fn test_unmounted_projector_is_silent() {
        let mut projector = Projector::new();
        let mut rx = projector.subscribe();
        projector.project(Transition::Started);
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        projector.unmount();
        assert!(projector.project(Transition::Settled(&Ok(3))).is_none());
        assert!(!rx.has_changed().unwrap());
        assert!(projector.current().pending);
    }
}
