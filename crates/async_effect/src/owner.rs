//! The owner of a runner's tasks
//!
//! All bookkeeping (registry, admission slots, call combining, status) happens
//! synchronously under one lock. Status sinks and teardown hooks run only after
//! that lock is released so they can safely call back into the runner.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tracing::{debug, debug_span, trace, warn, Instrument};

use crate::admission::{Admission, AdmissionController};
use crate::config::{CallbackConfig, EffectConfig};
use crate::context::Scope;
use crate::control::{ControlHook, Controlled, TaskControl};
use crate::dedup::DedupIndex;
use crate::error::{CancelReason, TaskError};
use crate::limits::ResolvedLimits;
use crate::registry::{TaskEntry, TaskRegistry};
use crate::reporter::StatusSink;
use crate::status::{StatusProjector, StatusSnapshot, Transition};
use crate::task::{Payload, Routine, Settlement, TaskHandle, TaskId, TaskState};

type Handle<R> = TaskHandle<<R as Routine>::Output, <R as Routine>::Error>;
type Snapshot<R> = StatusSnapshot<<R as Routine>::Output, <R as Routine>::Error>;
type Outcome<R> = Settlement<<R as Routine>::Output, <R as Routine>::Error>;

/// Behavior switches shared by the callback and effect runners
#[derive(Debug, Clone)]
pub(crate) struct OwnerPolicy {
    pub combine: bool,
    pub cancel_previous: bool,
    pub states: bool,
    pub catch_errors: bool,
    pub timeout: Option<Duration>,
    /// Run a task's teardown hooks as soon as it settles
    pub teardown_on_settle: bool,
}

impl From<&CallbackConfig> for OwnerPolicy {
    fn from(config: &CallbackConfig) -> Self {
        Self {
            combine: config.combine,
            cancel_previous: config.cancel_previous,
            states: config.states,
            catch_errors: config.catch_errors,
            timeout: config.timeout,
            teardown_on_settle: true,
        }
    }
}

impl From<&EffectConfig> for OwnerPolicy {
    fn from(config: &EffectConfig) -> Self {
        Self {
            combine: false,
            cancel_previous: false,
            states: config.states,
            catch_errors: config.catch_errors,
            timeout: config.timeout,
            teardown_on_settle: false,
        }
    }
}

struct OwnerState<R: Routine> {
    registry: TaskRegistry<R::Output, R::Error>,
    dedup: DedupIndex<R::Args, R::Output, R::Error>,
    admission: AdmissionController,
    projector: Option<StatusProjector<R::Output, R::Error>>,
    mounted: bool,
}

/// Work collected under the state lock, performed after it is released
struct Deferred<R: Routine> {
    snapshots: Vec<Snapshot<R>>,
    teardown: Vec<Arc<TaskControl>>,
}

impl<R: Routine> Default for Deferred<R> {
    fn default() -> Self {
        Self {
            snapshots: Vec::new(),
            teardown: Vec::new(),
        }
    }
}

struct SinkSlot<R: Routine> {
    sink: Option<Box<dyn StatusSink<R::Output, R::Error>>>,
    backlog: VecDeque<Snapshot<R>>,
    busy: bool,
}

pub(crate) struct Owner<R: Routine> {
    routine: Arc<R>,
    name: String,
    policy: OwnerPolicy,
    state: Mutex<OwnerState<R>>,
    sink: Mutex<SinkSlot<R>>,
    me: Weak<Self>,
}

impl<R: Routine> Owner<R> {
    pub fn new(routine: R, policy: OwnerPolicy, limits: ResolvedLimits) -> Arc<Self> {
        let name = routine.name();
        debug!(routine = %name, ?limits, ?policy, "creating owner");

        Arc::new_cyclic(|me| Owner {
            routine: Arc::new(routine),
            name,
            state: Mutex::new(OwnerState {
                registry: TaskRegistry::new(),
                dedup: DedupIndex::new(),
                admission: AdmissionController::new(limits),
                projector: policy.states.then(StatusProjector::new),
                mounted: true,
            }),
            policy,
            sink: Mutex::new(SinkSlot {
                sink: None,
                backlog: VecDeque::new(),
                busy: false,
            }),
            me: me.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_sink(&self, sink: Box<dyn StatusSink<R::Output, R::Error>>) {
        self.sink.lock().sink = Some(sink);
    }

    /// Admit a call and, unless it is combined or rejected, spawn its driver.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn call(&self, args: R::Args) -> Handle<R> {
        let mut deferred = Deferred::default();
        let handle = {
            let mut state = self.state.lock();
            self.admit_locked(&mut state, args, &mut deferred)
        };
        self.flush(deferred);
        handle
    }

    pub fn cancel_all(&self, reason: CancelReason) -> usize {
        let mut deferred = Deferred::default();
        let canceled = {
            let mut state = self.state.lock();
            self.cancel_all_locked(&mut state, reason, &mut deferred)
        };
        self.flush(deferred);
        canceled
    }

    pub fn pause_all(&self, data: Option<Payload>) -> usize {
        let mut deferred = Deferred::default();
        let paused = {
            let mut state = self.state.lock();
            let ids = state.registry.pause_all(data);
            for id in &ids {
                trace!(task = %id, "paused");
                if Self::holds_slot(&state, *id) {
                    Self::project_locked(&mut state, Transition::Paused, &mut deferred);
                }
            }
            ids.len()
        };
        self.flush(deferred);
        paused
    }

    pub fn resume_all(&self, data: Option<Payload>) -> usize {
        let mut deferred = Deferred::default();
        let resumed = {
            let mut state = self.state.lock();
            let ids = state.registry.resume_all(data);
            for id in &ids {
                trace!(task = %id, "resumed");
                if Self::holds_slot(&state, *id) {
                    Self::project_locked(&mut state, Transition::Resumed, &mut deferred);
                }
            }
            ids.len()
        };
        self.flush(deferred);
        resumed
    }

    /// Cancel everything with [`CancelReason::Unmounted`] and stop publishing.
    /// Later calls are rejected.
    pub fn teardown(&self) -> usize {
        let mut deferred = Deferred::default();
        let canceled = {
            let mut state = self.state.lock();
            if !state.mounted {
                return 0;
            }
            let canceled = self.cancel_all_locked(&mut state, CancelReason::Unmounted, &mut deferred);
            state.mounted = false;
            if let Some(projector) = state.projector.as_mut() {
                projector.unmount();
            }
            canceled
        };
        self.flush(deferred);

        let sink = self.sink.lock().sink.take();
        if let Some(mut sink) = sink {
            sink.finish();
        }

        debug!(routine = %self.name, canceled, "owner torn down");
        canceled
    }

    pub fn is_mounted(&self) -> bool {
        self.state.lock().mounted
    }

    pub fn status(&self) -> Option<Snapshot<R>> {
        self.state.lock().projector.as_ref().map(StatusProjector::current)
    }

    pub fn subscribe(&self) -> Option<watch::Receiver<Snapshot<R>>> {
        self.state.lock().projector.as_ref().map(StatusProjector::subscribe)
    }

    /// Number of unsettled tasks, running or queued
    pub fn in_flight(&self) -> usize {
        self.state.lock().registry.len()
    }

    pub fn running(&self) -> usize {
        self.state.lock().admission.running()
    }

    pub fn queued(&self) -> usize {
        self.state.lock().admission.queued()
    }

    fn admit_locked(
        &self,
        state: &mut OwnerState<R>,
        args: R::Args,
        deferred: &mut Deferred<R>,
    ) -> Handle<R> {
        if !state.mounted {
            debug!(routine = %self.name, "rejecting call after teardown");
            return TaskHandle::rejected(self.name.clone(), CancelReason::Unmounted);
        }

        if self.policy.combine {
            if let Some(existing) = state.dedup.lookup(&args).cloned() {
                if !self.policy.cancel_previous {
                    debug!(task = %existing.id(), ?args, "combined with in-flight call");
                    return existing.combined();
                }
                self.cancel_locked(state, existing.id(), CancelReason::Restarted, deferred);
            }
        } else if self.policy.cancel_previous {
            self.cancel_all_locked(state, CancelReason::Restarted, deferred);
        }

        let id = TaskId::new();
        let Ok(admission) = state.admission.admit(id) else {
            debug!(routine = %self.name, ?args, "queue is full, rejecting call");
            let outcome = Err(TaskError::canceled(CancelReason::Overflow));
            Self::project_locked(state, Transition::Settled(&outcome), deferred);
            return TaskHandle::rejected(self.name.clone(), CancelReason::Overflow);
        };

        let initial = match admission {
            Admission::Immediate => TaskState::Running,
            _ => TaskState::Queued,
        };
        let hook: Weak<dyn ControlHook> = self.me.clone();
        let control = Arc::new(TaskControl::new(id, self.name.clone(), initial, Some(hook)));

        let (settle_tx, settle_rx) = oneshot::channel();
        let (gate_tx, gate_rx) = match admission {
            Admission::Queued => {
                let (tx, rx) = oneshot::channel();
                (Some(tx), Some(rx))
            }
            _ => (None, None),
        };

        let handle = TaskHandle::new(control.clone(), admission, settle_rx);
        state
            .registry
            .register(TaskEntry::new(control.clone(), settle_tx, gate_tx));
        if self.policy.combine {
            state.dedup.record(args.clone(), handle.clone());
        }

        debug!(task = %id, ?admission, ?args, "admitted call");
        if admission == Admission::Immediate {
            Self::project_locked(state, Transition::Started, deferred);
        }

        self.spawn(control, args, gate_rx);
        handle
    }

    fn spawn(&self, control: Arc<TaskControl>, args: R::Args, gate: Option<oneshot::Receiver<()>>) {
        let id = control.id();
        let routine = self.routine.clone();
        let scope = Scope::new(control.clone());
        let timeout = self.policy.timeout;
        let owner = self.me.clone();
        let span = debug_span!("task", id = %id, name = %control.name());

        tokio::spawn(
            async move {
                if let Some(gate) = gate {
                    // Dropped from the queue: the task already settled as canceled
                    if gate.await.is_err() {
                        return;
                    }
                }

                let body = async move { routine.run(scope, args).await }.boxed();
                let run = Controlled::new(control.clone(), body);
                let outcome = match timeout {
                    None => run.await,
                    Some(limit) => run_with_deadline(&control, run, limit).await,
                };
                if let Some(owner) = owner.upgrade() {
                    owner.finish(id, outcome);
                }
            }
            .instrument(span),
        );
    }

    /// Record the outcome reported by a task's driver.
    fn finish(&self, id: TaskId, outcome: Outcome<R>) {
        let mut deferred = Deferred::default();
        {
            let mut state = self.state.lock();
            // Already settled by a cancellation
            let Some(entry) = state.registry.unregister(id) else {
                return;
            };

            match &outcome {
                Ok(_) => {
                    entry.control.mark_settled(true);
                    debug!(task = %id, "completed");
                }
                Err(TaskError::Failed(err)) => {
                    entry.control.mark_settled(false);
                    if self.policy.catch_errors || self.policy.states {
                        debug!(task = %id, error = ?err, "routine failed");
                    } else {
                        warn!(task = %id, routine = %self.name, error = ?err, "routine failed");
                    }
                }
                Err(TaskError::Canceled(err)) => {
                    entry.control.mark_canceled(err.reason().clone());
                    debug!(task = %id, reason = %err.reason(), "canceled");
                }
            }

            self.release_locked(&mut state, id, &mut deferred);
            Self::project_locked(&mut state, Transition::Settled(&outcome), &mut deferred);
            if self.policy.teardown_on_settle {
                deferred.teardown.push(entry.control.clone());
            }
            entry.settle(outcome);
        }
        self.flush(deferred);
    }

    fn cancel_locked(
        &self,
        state: &mut OwnerState<R>,
        id: TaskId,
        reason: CancelReason,
        deferred: &mut Deferred<R>,
    ) -> bool {
        let Some(entry) = state.registry.unregister(id) else {
            return false;
        };
        if !entry.control.mark_canceled(reason.clone()) {
            return false;
        }
        debug!(task = %id, %reason, "canceled");

        self.release_locked(state, id, deferred);
        let outcome = Err(TaskError::canceled(reason));
        Self::project_locked(state, Transition::Settled(&outcome), deferred);
        if self.policy.teardown_on_settle {
            deferred.teardown.push(entry.control.clone());
        }
        entry.settle(outcome);
        true
    }

    fn cancel_all_locked(
        &self,
        state: &mut OwnerState<R>,
        reason: CancelReason,
        deferred: &mut Deferred<R>,
    ) -> usize {
        let entries = state.registry.cancel_all(&reason);
        if entries.is_empty() {
            return 0;
        }
        debug!(routine = %self.name, count = entries.len(), %reason, "canceling all tasks");

        // Withdraw every waiting task first so a freed slot is never granted to
        // a task that is being canceled in the same sweep.
        for entry in &entries {
            state.dedup.forget(entry.id());
            state.admission.withdraw(entry.id());
        }

        let canceled = entries.len();
        for entry in entries {
            if let Some(next) = state.admission.release(entry.id()) {
                self.start_locked(state, next, deferred);
            }
            let outcome = Err(TaskError::canceled(reason.clone()));
            Self::project_locked(state, Transition::Settled(&outcome), deferred);
            if self.policy.teardown_on_settle {
                deferred.teardown.push(entry.control.clone());
            }
            entry.settle(outcome);
        }
        canceled
    }

    /// Give up the slot or queue position held by `id`.
    fn release_locked(&self, state: &mut OwnerState<R>, id: TaskId, deferred: &mut Deferred<R>) {
        state.dedup.forget(id);
        if state.admission.withdraw(id) {
            return;
        }
        if let Some(next) = state.admission.release(id) {
            self.start_locked(state, next, deferred);
        }
    }

    fn start_locked(&self, state: &mut OwnerState<R>, id: TaskId, deferred: &mut Deferred<R>) {
        let Some(entry) = state.registry.get_mut(id) else {
            return;
        };
        entry.open_gate();
        if entry.control.mark_running() {
            debug!(task = %id, "granted running slot");
            let transition = if entry.control.is_paused() {
                Transition::Paused
            } else {
                Transition::Started
            };
            Self::project_locked(state, transition, deferred);
        }
    }

    /// Whether `id` is unsettled and holds a running slot
    fn holds_slot(state: &OwnerState<R>, id: TaskId) -> bool {
        state
            .registry
            .get(id)
            .is_some_and(|entry| entry.control.state().is_running())
    }

    fn project_locked(
        state: &mut OwnerState<R>,
        transition: Transition<'_, R::Output, R::Error>,
        deferred: &mut Deferred<R>,
    ) {
        let Some(projector) = state.projector.as_mut() else {
            return;
        };
        if let Some(snapshot) = projector.project(transition) {
            deferred.snapshots.push(snapshot);
        }
    }

    fn flush(&self, deferred: Deferred<R>) {
        self.publish(deferred.snapshots);
        for control in deferred.teardown {
            control.run_teardown();
        }
    }

    /// Deliver snapshots to the sink in order.
    ///
    /// A sink that re-enters the runner adds to the backlog; the outermost
    /// publisher drains it.
    fn publish(&self, snapshots: Vec<Snapshot<R>>) {
        if snapshots.is_empty() {
            return;
        }

        {
            let mut slot = self.sink.lock();
            if slot.sink.is_none() && !slot.busy {
                return;
            }
            slot.backlog.extend(snapshots);
            if slot.busy {
                return;
            }
            slot.busy = true;
        }

        loop {
            let (sink, batch) = {
                let mut slot = self.sink.lock();
                if slot.backlog.is_empty() {
                    slot.busy = false;
                    return;
                }
                (slot.sink.take(), std::mem::take(&mut slot.backlog))
            };

            let Some(mut sink) = sink else {
                self.sink.lock().busy = false;
                return;
            };
            for snapshot in &batch {
                sink.publish(snapshot);
            }

            let detached = {
                let mut slot = self.sink.lock();
                if self.is_mounted() {
                    slot.sink = Some(sink);
                    None
                } else {
                    Some(sink)
                }
            };
            // A sink detached by a re-entrant teardown stays detached
            if let Some(mut sink) = detached {
                sink.finish();
            }
        }
    }
}

/// Race a running task against its timeout.
///
/// The deadline keeps running while the task is paused.
async fn run_with_deadline<T, E>(
    control: &TaskControl,
    run: Controlled<T, E>,
    limit: Duration,
) -> Result<T, TaskError<E>> {
    tokio::pin!(run);
    tokio::select! {
        outcome = &mut run => outcome,
        _ = tokio::time::sleep(limit) => {
            debug!(task = %control.id(), ?limit, "timed out");
            control.cancel(CancelReason::Timeout);
            run.await
        }
    }
}

impl<R: Routine> ControlHook for Owner<R> {
    fn cancel_task(&self, id: TaskId, reason: CancelReason) -> bool {
        let mut deferred = Deferred::default();
        let canceled = {
            let mut state = self.state.lock();
            self.cancel_locked(&mut state, id, reason, &mut deferred)
        };
        self.flush(deferred);
        canceled
    }

    fn pause_task(&self, id: TaskId, data: Option<Payload>) -> bool {
        let mut deferred = Deferred::default();
        let paused = {
            let mut state = self.state.lock();
            let paused = state
                .registry
                .get(id)
                .is_some_and(|entry| entry.control.mark_paused(data));
            if paused {
                trace!(task = %id, "paused");
                if Self::holds_slot(&state, id) {
                    Self::project_locked(&mut state, Transition::Paused, &mut deferred);
                }
            }
            paused
        };
        self.flush(deferred);
        paused
    }

    fn resume_task(&self, id: TaskId, data: Option<Payload>) -> bool {
        let mut deferred = Deferred::default();
        let resumed = {
            let mut state = self.state.lock();
            let resumed = state
                .registry
                .get(id)
                .is_some_and(|entry| entry.control.mark_resumed(data));
            if resumed {
                trace!(task = %id, "resumed");
                if Self::holds_slot(&state, id) {
                    Self::project_locked(&mut state, Transition::Resumed, &mut deferred);
                }
            }
            resumed
        };
        self.flush(deferred);
        resumed
    }
}
