//! A callable that turns each call into a controlled task

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::CallbackConfig;
use crate::error::{CancelReason, ConfigResult};
use crate::owner::{Owner, OwnerPolicy};
use crate::reporter::StatusSink;
use crate::status::StatusSnapshot;
use crate::task::{Payload, Routine, TaskHandle};

/// Runs a [`Routine`] once per [`call`](AsyncCallback::call), with admission
/// control, optional call combining and optional status tracking.
///
/// Dropping the callback tears it down: every unsettled task is canceled with
/// [`CancelReason::Unmounted`].
///
/// ```
/// use async_effect::{routine_fn, AsyncCallback, CallbackConfig, Scope};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let fetch = AsyncCallback::new(
///     routine_fn(|_scope: Scope, id: u32| async move { Ok::<_, String>(format!("item {id}")) }),
///     CallbackConfig::new().with_concurrency(2),
/// )
/// .unwrap();
///
/// assert_eq!(fetch.call(7).await.unwrap(), "item 7");
/// # }
/// ```
pub struct AsyncCallback<R: Routine> {
    owner: Arc<Owner<R>>,
    config: CallbackConfig,
}

impl<R: Routine> AsyncCallback<R> {
    /// Create a new callback, validating `config`
    pub fn new(routine: R, config: CallbackConfig) -> ConfigResult<Self> {
        let limits = config.validate()?;
        let owner = Owner::new(routine, OwnerPolicy::from(&config), limits);
        Ok(Self { owner, config })
    }

    /// Forward published status snapshots to `sink`.
    pub fn with_sink<S>(self, sink: S) -> Self
    where
        S: StatusSink<R::Output, R::Error> + 'static,
    {
        self.owner.set_sink(Box::new(sink));
        self
    }

    /// Get the configuration
    pub fn config(&self) -> &CallbackConfig {
        &self.config
    }

    /// Invoke the routine with `args`.
    ///
    /// The returned handle is already settled if the call was rejected, and is
    /// shared with an earlier call when combined. Must be called from within a
    /// Tokio runtime.
    pub fn call(&self, args: R::Args) -> TaskHandle<R::Output, R::Error> {
        self.owner.call(args)
    }

    /// Cancel every unsettled task. Returns how many were canceled.
    pub fn cancel(&self, reason: CancelReason) -> usize {
        self.owner.cancel_all(reason)
    }

    /// Pause every running or queued task.
    pub fn pause(&self, data: Option<Payload>) -> usize {
        self.owner.pause_all(data)
    }

    /// Resume every paused task.
    pub fn resume(&self, data: Option<Payload>) -> usize {
        self.owner.resume_all(data)
    }

    /// The current snapshot, if status tracking is enabled
    pub fn status(&self) -> Option<StatusSnapshot<R::Output, R::Error>> {
        self.owner.status()
    }

    /// Watch status snapshots, if status tracking is enabled
    pub fn subscribe(&self) -> Option<watch::Receiver<StatusSnapshot<R::Output, R::Error>>> {
        self.owner.subscribe()
    }

    /// Number of unsettled tasks
    pub fn in_flight(&self) -> usize {
        self.owner.in_flight()
    }

    pub fn running(&self) -> usize {
        self.owner.running()
    }

    pub fn queued(&self) -> usize {
        self.owner.queued()
    }

    pub fn is_torn_down(&self) -> bool {
        !self.owner.is_mounted()
    }

    /// Cancel everything with [`CancelReason::Unmounted`]. Later calls are rejected.
    pub fn teardown(&self) -> usize {
        self.owner.teardown()
    }
}

impl<R: Routine> Drop for AsyncCallback<R> {
    fn drop(&mut self) {
        self.owner.teardown();
    }
}

impl<R: Routine> std::fmt::Debug for AsyncCallback<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncCallback")
            .field("routine", &self.owner.name())
            .field("config", &self.config)
            .finish()
    }
}
