//! A routine tied to a changing epoch

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::config::EffectConfig;
use crate::error::{CancelReason, ConfigResult};
use crate::owner::{Owner, OwnerPolicy};
use crate::reporter::StatusSink;
use crate::status::StatusSnapshot;
use crate::task::{Payload, Routine, TaskHandle};

struct EffectState<R: Routine> {
    epoch: Option<R::Args>,
    runs: usize,
    current: Option<TaskHandle<R::Output, R::Error>>,
}

/// Runs a [`Routine`] whenever its epoch (its arguments) changes.
///
/// Each change cancels the previous run with [`CancelReason::Restarted`] and
/// runs its teardown hooks before the routine is started again with the new
/// epoch. Dropping the effect cancels the current run with
/// [`CancelReason::Unmounted`].
pub struct AsyncEffect<R: Routine> {
    owner: Arc<Owner<R>>,
    config: EffectConfig,
    state: Mutex<EffectState<R>>,
}

impl<R: Routine> AsyncEffect<R> {
    pub fn new(routine: R, config: EffectConfig) -> ConfigResult<Self> {
        let limits = config.validate()?;
        let owner = Owner::new(routine, OwnerPolicy::from(&config), limits);
        Ok(Self {
            owner,
            config,
            state: Mutex::new(EffectState {
                epoch: None,
                runs: 0,
                current: None,
            }),
        })
    }

    /// Forward published status snapshots to `sink`.
    pub fn with_sink<S>(self, sink: S) -> Self
    where
        S: StatusSink<R::Output, R::Error> + 'static,
    {
        self.owner.set_sink(Box::new(sink));
        self
    }

    pub fn config(&self) -> &EffectConfig {
        &self.config
    }

    /// Move to `epoch`.
    ///
    /// Does nothing if the epoch is unchanged. Otherwise tears down the previous
    /// run and starts a new one, returning its handle, unless `skip_first` or
    /// `once` suppress it. Must be called from within a Tokio runtime.
    pub fn update(&self, epoch: R::Args) -> Option<TaskHandle<R::Output, R::Error>> {
        if !self.owner.is_mounted() {
            return None;
        }

        let (previous, run) = {
            let mut state = self.state.lock();
            if state.epoch.as_ref() == Some(&epoch) {
                return None;
            }
            let first = state.epoch.is_none();
            state.epoch = Some(epoch.clone());

            let run = !(first && self.config.skip_first) && !(self.config.once && state.runs > 0);
            if run {
                state.runs += 1;
            }
            (state.current.take(), run)
        };

        if let Some(previous) = previous {
            debug!(task = %previous.id(), ?epoch, "epoch changed, restarting");
            previous.cancel(CancelReason::Restarted);
            previous.control().run_teardown();
        }

        if !run {
            return None;
        }

        let handle = self.owner.call(epoch);
        self.state.lock().current = Some(handle.clone());
        Some(handle)
    }

    /// Cancel the current run. Returns `false` if there was nothing to cancel.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        self.current()
            .is_some_and(|current| current.cancel(reason))
    }

    pub fn pause(&self, data: Option<Payload>) -> bool {
        self.current().is_some_and(|current| current.pause(data))
    }

    pub fn resume(&self, data: Option<Payload>) -> bool {
        self.current().is_some_and(|current| current.resume(data))
    }

    /// The handle of the most recent run
    pub fn current(&self) -> Option<TaskHandle<R::Output, R::Error>> {
        self.state.lock().current.clone()
    }

    /// The current epoch
    pub fn epoch(&self) -> Option<R::Args> {
        self.state.lock().epoch.clone()
    }

    /// How many runs have been started
    pub fn runs(&self) -> usize {
        self.state.lock().runs
    }

    pub fn status(&self) -> Option<StatusSnapshot<R::Output, R::Error>> {
        self.owner.status()
    }

    pub fn subscribe(&self) -> Option<watch::Receiver<StatusSnapshot<R::Output, R::Error>>> {
        self.owner.subscribe()
    }

    /// Cancel the current run with [`CancelReason::Unmounted`] and run its
    /// teardown hooks. Later updates are ignored.
    pub fn teardown(&self) {
        let current = self.state.lock().current.take();
        self.owner.teardown();
        if let Some(current) = current {
            current.control().run_teardown();
        }
    }
}

impl<R: Routine> Drop for AsyncEffect<R> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<R: Routine> std::fmt::Debug for AsyncEffect<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("AsyncEffect")
            .field("routine", &self.owner.name())
            .field("epoch", &state.epoch)
            .field("runs", &state.runs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::context::Scope;
    use crate::task::routine_fn;

    fn ticker(
        cleaned: Arc<AtomicUsize>,
    ) -> impl Routine<Args = u32, Output = u32, Error = String> {
        routine_fn(move |scope: Scope, epoch: u32| {
            let cleaned = cleaned.clone();
            async move {
                scope.on_teardown(move || {
                    cleaned.fetch_add(1, Ordering::SeqCst);
                });
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(epoch)
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_epoch_does_not_rerun() {
        let effect = AsyncEffect::new(ticker(Arc::default()), EffectConfig::new()).unwrap();

        let first = effect.update(1).unwrap();
        assert!(effect.update(1).is_none());
        assert_eq!(first.await, Ok(1));
        assert_eq!(effect.runs(), 1);
        assert_eq!(effect.epoch(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_epoch_change_restarts_and_tears_down() {
        let cleaned = Arc::new(AtomicUsize::new(0));
        let effect = AsyncEffect::new(ticker(cleaned.clone()), EffectConfig::new()).unwrap();

        let first = effect.update(1).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = effect.update(2).unwrap();

        assert_eq!(
            first.await.unwrap_err().reason(),
            Some(&CancelReason::Restarted)
        );
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);
        assert_eq!(second.await, Ok(2));

        // Hooks of a completed run wait for the next teardown
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);
        drop(effect);
        assert_eq!(cleaned.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_first_and_once() {
        let effect = AsyncEffect::new(
            ticker(Arc::default()),
            EffectConfig::new().with_skip_first(true),
        )
        .unwrap();
        assert!(effect.update(1).is_none());
        assert!(effect.update(2).is_some());

        let effect = AsyncEffect::new(ticker(Arc::default()), EffectConfig::new().with_once(true))
            .unwrap();
        assert!(effect.update(1).is_some());
        assert!(effect.update(2).is_none());
        assert_eq!(effect.runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_cancel_only_once() {
        let effect = AsyncEffect::new(ticker(Arc::default()), EffectConfig::new()).unwrap();
        assert!(!effect.cancel(CancelReason::Canceled));

        let run = effect.update(1).unwrap();
        assert!(effect.cancel("stop".into()));
        assert!(!effect.cancel("stop".into()));
        assert_eq!(
            run.await.unwrap_err().reason(),
            Some(&CancelReason::from("stop"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_ignores_later_updates() {
        let effect = AsyncEffect::new(
            ticker(Arc::default()),
            EffectConfig::new().with_states(true),
        )
        .unwrap();
        let run = effect.update(1).unwrap();
        effect.teardown();

        assert_eq!(run.await.unwrap_err().reason(), Some(&CancelReason::Unmounted));
        assert!(effect.update(2).is_none());

        // Teardown cancellations are never published
        let status = effect.status().unwrap();
        assert!(status.pending);
        assert!(!status.canceled);
    }
}
