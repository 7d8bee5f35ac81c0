//! The view a running routine has of its own task

use std::fmt;
use std::sync::Arc;

use crate::control::TaskControl;
use crate::error::CancelReason;
use crate::task::{Payload, TaskId, TaskState};

/// Handed to every routine run.
///
/// A scope lets the routine observe its own cancellation, read the data passed with
/// pause and resume signals, and register cleanup to run when the task is torn down.
#[derive(Clone)]
pub struct Scope {
    control: Arc<TaskControl>,
}

impl Scope {
    pub(crate) fn new(control: Arc<TaskControl>) -> Self {
        Self { control }
    }

    #[cfg(test)]
    pub(crate) fn detached(name: &str) -> Self {
        Self::new(TaskControl::detached(TaskId::new(), name.to_string(), None))
    }

    pub fn id(&self) -> TaskId {
        self.control.id()
    }

    pub fn name(&self) -> &str {
        self.control.name()
    }

    pub fn state(&self) -> TaskState {
        self.control.state()
    }

    pub fn is_canceled(&self) -> bool {
        self.control.is_canceled()
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    /// The reason the task was canceled with, if it was
    pub fn reason(&self) -> Option<CancelReason> {
        self.control.reason()
    }

    /// Wait until the task is canceled.
    ///
    /// Useful for racing work that is not itself a suspension point of the routine,
    /// such as a spawned blocking job.
    pub async fn canceled(&self) {
        self.control.token().cancelled().await
    }

    /// Data passed with the most recent pause signal
    pub fn pause_data(&self) -> Option<Payload> {
        self.control.pause_data()
    }

    /// Data passed with the most recent resume signal
    pub fn resume_data(&self) -> Option<Payload> {
        self.control.resume_data()
    }

    /// Cancel the task from within.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        self.control.cancel(reason)
    }

    /// Register cleanup for when the task is torn down.
    ///
    /// Callback tasks run their hooks once they settle. Effect runs keep them until
    /// the epoch changes or the runner is torn down.
    pub fn on_teardown<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.control.on_teardown(Box::new(hook));
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.control.id())
            .field("name", &self.control.name())
            .finish()
    }
}
