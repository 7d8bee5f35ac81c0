//! Cancellation and pause control shared by a task's driver, handles and scope

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::task::AtomicWaker;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{CancelReason, TaskError};
use crate::task::{Payload, TaskId, TaskState};

/// Routes control requests through the owner so that its bookkeeping
/// (registry, admission slots, status) stays consistent.
pub(crate) trait ControlHook: Send + Sync {
    fn cancel_task(&self, id: TaskId, reason: CancelReason) -> bool;
    fn pause_task(&self, id: TaskId, data: Option<Payload>) -> bool;
    fn resume_task(&self, id: TaskId, data: Option<Payload>) -> bool;
}

struct ControlState {
    state: TaskState,
    paused: bool,
    reason: Option<CancelReason>,
    pause_data: Option<Payload>,
    resume_data: Option<Payload>,
}

type TeardownHook = Box<dyn FnOnce() + Send>;

pub(crate) struct TaskControl {
    id: TaskId,
    name: String,
    inner: Mutex<ControlState>,
    waker: AtomicWaker,
    token: CancellationToken,
    teardown: Mutex<Vec<TeardownHook>>,
    hook: Option<Weak<dyn ControlHook>>,
}

impl TaskControl {
    pub fn new(
        id: TaskId,
        name: String,
        state: TaskState,
        hook: Option<Weak<dyn ControlHook>>,
    ) -> Self {
        Self {
            id,
            name,
            inner: Mutex::new(ControlState {
                state,
                paused: false,
                reason: None,
                pause_data: None,
                resume_data: None,
            }),
            waker: AtomicWaker::new(),
            token: CancellationToken::new(),
            teardown: Mutex::new(Vec::new()),
            hook,
        }
    }

    /// A control with no owner. With a reason it starts out canceled.
    pub fn detached(id: TaskId, name: String, canceled: Option<CancelReason>) -> Arc<Self> {
        let control = Self::new(id, name, TaskState::Running, None);
        if let Some(reason) = canceled {
            control.mark_canceled(reason);
        }
        Arc::new(control)
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TaskState {
        let inner = self.inner.lock();
        match inner.state {
            TaskState::Running if inner.paused => TaskState::Paused,
            state => state,
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.lock().state == TaskState::Canceled
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    pub fn reason(&self) -> Option<CancelReason> {
        self.inner.lock().reason.clone()
    }

    pub fn pause_data(&self) -> Option<Payload> {
        self.inner.lock().pause_data.clone()
    }

    pub fn resume_data(&self) -> Option<Payload> {
        self.inner.lock().resume_data.clone()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self, reason: CancelReason) -> bool {
        match self.hook.as_ref().and_then(Weak::upgrade) {
            Some(owner) => owner.cancel_task(self.id, reason),
            None => self.mark_canceled(reason),
        }
    }

    pub fn pause(&self, data: Option<Payload>) -> bool {
        match self.hook.as_ref().and_then(Weak::upgrade) {
            Some(owner) => owner.pause_task(self.id, data),
            None => self.mark_paused(data),
        }
    }

    pub fn resume(&self, data: Option<Payload>) -> bool {
        match self.hook.as_ref().and_then(Weak::upgrade) {
            Some(owner) => owner.resume_task(self.id, data),
            None => self.mark_resumed(data),
        }
    }

    /// Queued -> Running. Returns `false` if the task was not queued.
    pub fn mark_running(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != TaskState::Queued {
            return false;
        }
        inner.state = TaskState::Running;
        true
    }

    /// Record the reason and wake the driver. The first reason wins.
    pub fn mark_canceled(&self, reason: CancelReason) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.state.is_finished() {
                return false;
            }
            inner.state = TaskState::Canceled;
            inner.paused = false;
            inner.reason = Some(reason);
        }
        self.token.cancel();
        self.waker.wake();
        true
    }

    pub fn mark_settled(&self, succeeded: bool) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.is_finished() {
            return false;
        }
        inner.state = if succeeded {
            TaskState::Completed
        } else {
            TaskState::Failed
        };
        inner.paused = false;
        true
    }

    pub fn mark_paused(&self, data: Option<Payload>) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.is_finished() || inner.paused {
            return false;
        }
        inner.paused = true;
        inner.pause_data = data;
        true
    }

    pub fn mark_resumed(&self, data: Option<Payload>) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.state.is_finished() || !inner.paused {
                return false;
            }
            inner.paused = false;
            inner.resume_data = data;
        }
        self.waker.wake();
        true
    }

    pub fn on_teardown(&self, hook: TeardownHook) {
        self.teardown.lock().push(hook);
    }

    /// Run the registered teardown hooks once, most recent first.
    pub fn run_teardown(&self) {
        let hooks = std::mem::take(&mut *self.teardown.lock());
        for hook in hooks.into_iter().rev() {
            hook();
        }
    }
}

impl fmt::Debug for TaskControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskControl")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("reason", &self.reason())
            .finish()
    }
}

/// Drives a routine under its [`TaskControl`].
///
/// Cancellation drops the routine at its current suspension point and resolves
/// with the recorded reason. While paused the routine is not polled.
pub(crate) struct Controlled<T, E> {
    control: Arc<TaskControl>,
    inner: Option<BoxFuture<'static, Result<T, E>>>,
}

impl<T, E> Controlled<T, E> {
    pub fn new(control: Arc<TaskControl>, inner: BoxFuture<'static, Result<T, E>>) -> Self {
        Self {
            control,
            inner: Some(inner),
        }
    }
}

impl<T, E> Future for Controlled<T, E> {
    type Output = Result<T, TaskError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        this.control.waker.register(cx.waker());

        {
            let inner = this.control.inner.lock();
            if inner.state == TaskState::Canceled {
                let reason = inner.reason.clone().unwrap_or_default();
                drop(inner);
                this.inner = None;
                return Poll::Ready(Err(TaskError::canceled(reason)));
            }
            if inner.paused {
                return Poll::Pending;
            }
        }

        let Some(routine) = this.inner.as_mut() else {
            return Poll::Ready(Err(TaskError::canceled(CancelReason::Aborted)));
        };

        match routine.as_mut().poll(cx) {
            Poll::Ready(result) => {
                this.inner = None;
                Poll::Ready(result.map_err(TaskError::Failed))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::FutureExt;

    use super::*;

    fn control() -> Arc<TaskControl> {
        TaskControl::detached(TaskId::new(), "test".to_string(), None)
    }

    #[test]
    fn test_first_cancel_reason_wins() {
        let control = control();
        assert!(control.cancel(CancelReason::Timeout));
        assert!(!control.cancel(CancelReason::Overflow));
        assert_eq!(control.reason(), Some(CancelReason::Timeout));
        assert!(control.token().is_cancelled());
        assert_eq!(control.state(), TaskState::Canceled);
    }

    #[test]
    fn test_pause_resume_transitions() {
        let control = control();
        assert!(control.pause(Some(Payload::new("hold".to_string()))));
        assert!(!control.pause(None));
        assert_eq!(control.state(), TaskState::Paused);
        assert_eq!(
            control.pause_data().unwrap().downcast_ref::<String>().map(String::as_str),
            Some("hold")
        );

        assert!(control.resume(Some(Payload::new(7u8))));
        assert!(!control.resume(None));
        assert_eq!(control.state(), TaskState::Running);
        assert_eq!(control.resume_data().unwrap().downcast_ref::<u8>(), Some(&7));
    }

    #[test]
    fn test_settled_task_ignores_signals() {
        let control = control();
        assert!(control.mark_settled(true));
        assert!(!control.cancel(CancelReason::Canceled));
        assert!(!control.pause(None));
        assert_eq!(control.state(), TaskState::Completed);
    }

    #[test]
    fn test_teardown_hooks_run_once_in_reverse() {
        let control = control();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            control.on_teardown(Box::new(move || order.lock().push(i)));
        }

        control.run_teardown();
        control.run_teardown();
        assert_eq!(*order.lock(), vec![2, 1, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_routine() {
        struct DropCounter(Arc<AtomicUsize>);
        impl Drop for DropCounter {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let guard = DropCounter(drops.clone());
        let control = control();
        let controlled = Controlled::<(), String>::new(
            control.clone(),
            async move {
                let _guard = guard;
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
            .boxed(),
        );

        let driver = tokio::spawn(controlled);
        tokio::time::sleep(Duration::from_millis(10)).await;
        control.cancel("stop".into());

        let result = driver.await.unwrap();
        assert_eq!(result.unwrap_err().reason(), Some(&CancelReason::from("stop")));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_withholds_progress() {
        let steps = Arc::new(AtomicUsize::new(0));
        let control = control();
        let counter = steps.clone();
        let controlled = Controlled::<usize, String>::new(
            control.clone(),
            async move {
                for _ in 0..5 {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                Ok(counter.load(Ordering::SeqCst))
            }
            .boxed(),
        );

        let driver = tokio::spawn(controlled);
        tokio::time::sleep(Duration::from_millis(25)).await;
        control.pause(None);
        let paused_at = steps.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(steps.load(Ordering::SeqCst), paused_at);

        control.resume(None);
        assert_eq!(driver.await.unwrap(), Ok(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_paused_settles_canceled() {
        let steps = Arc::new(AtomicUsize::new(0));
        let control = control();
        let counter = steps.clone();
        let controlled = Controlled::<(), String>::new(
            control.clone(),
            async move {
                for _ in 0..100 {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            }
            .boxed(),
        );

        let driver = tokio::spawn(controlled);
        tokio::time::sleep(Duration::from_millis(15)).await;
        control.pause(None);
        let paused_at = steps.load(Ordering::SeqCst);

        assert!(control.cancel(CancelReason::Canceled));
        assert!(!control.is_paused());
        assert!(!control.resume(None));

        let result = driver.await.unwrap();
        assert_eq!(result.unwrap_err().reason(), Some(&CancelReason::Canceled));
        assert_eq!(control.state(), TaskState::Canceled);
        assert_eq!(steps.load(Ordering::SeqCst), paused_at);
    }
}
