//! Core task abstractions: routines, task identity and handles

use std::any::Any;
use std::fmt::{self, Debug, Display};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{self, BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::admission::Admission;
use crate::context::Scope;
use crate::control::TaskControl;
use crate::error::{CancelReason, CanceledError, TaskError};

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a new unique task ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Admitted, waiting for a running slot
    Queued,
    /// Holding a running slot
    Running,
    /// Holding a running slot, continuation withheld until resumed
    Paused,
    /// The routine returned a value
    Completed,
    /// The routine returned an error
    Failed,
    /// Canceled before it could settle
    Canceled,
}

impl TaskState {
    /// Check if the task is in a final state (completed, failed, or canceled)
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Canceled
        )
    }

    /// Check if the task holds a running slot
    pub fn is_running(&self) -> bool {
        matches!(self, TaskState::Running | TaskState::Paused)
    }
}

/// Opaque data passed along with pause and resume signals.
#[derive(Debug, Clone)]
pub struct Payload {
    inner: Arc<dyn Any + Send + Sync>,
}

impl Payload {
    pub fn new(inner: impl Any + Send + Sync) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref()
    }
}

/// An asynchronous routine that runs under cancellation and pause control.
///
/// Every `.await` inside [`run`](Routine::run) is a suspension point: cancellation
/// drops the routine there, and pause withholds its continuation there.
///
/// Arguments are compared with [`PartialEq`] when calls are combined, so two calls
/// are considered the same when their argument values are structurally equal.
#[async_trait::async_trait]
pub trait Routine: Send + Sync + 'static {
    /// The arguments of one call
    type Args: Clone + PartialEq + Debug + Send + Sync + 'static;

    /// The value produced by a successful run
    type Output: Clone + Send + Sync + 'static;

    /// The error a run can fail with
    type Error: Clone + Debug + Send + Sync + 'static;

    /// Run the routine once
    async fn run(&self, scope: Scope, args: Self::Args) -> Result<Self::Output, Self::Error>;

    /// Get a human-readable name for this routine (used for logging)
    fn name(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

/// A [`Routine`] backed by a closure, created with [`routine_fn`].
pub struct FnRoutine<F, A, T, E> {
    f: F,
    name: Option<String>,
    _marker: PhantomData<fn(A) -> (T, E)>,
}

impl<F, A, T, E> FnRoutine<F, A, T, E> {
    /// Give the routine a name for logging
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Turn a closure returning a future into a [`Routine`].
///
/// ```
/// use async_effect::{routine_fn, Scope};
///
/// let double = routine_fn(|_scope: Scope, n: u32| async move { Ok::<_, String>(n * 2) })
///     .named("double");
/// ```
pub fn routine_fn<F, Fut, A, T, E>(f: F) -> FnRoutine<F, A, T, E>
where
    F: Fn(Scope, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    FnRoutine {
        f,
        name: None,
        _marker: PhantomData,
    }
}

#[async_trait::async_trait]
impl<F, Fut, A, T, E> Routine for FnRoutine<F, A, T, E>
where
    F: Fn(Scope, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    A: Clone + PartialEq + Debug + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Debug + Send + Sync + 'static,
{
    type Args = A;
    type Output = T;
    type Error = E;

    async fn run(&self, scope: Scope, args: A) -> Result<T, E> {
        (self.f)(scope, args).await
    }

    fn name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| "routine".to_string())
    }
}

/// The final outcome of a task as observed through its handle
pub type Settlement<T, E> = Result<T, TaskError<E>>;

/// A handle to an admitted (or rejected) call.
///
/// Awaiting the handle yields the task's settlement. Handles are cheap to clone;
/// every clone, and every handle returned for a combined call, observes the same
/// settlement. Dropping a handle does not cancel the task.
pub struct TaskHandle<T, E> {
    control: Arc<TaskControl>,
    admission: Admission,
    settled: Shared<BoxFuture<'static, Settlement<T, E>>>,
}

impl<T, E> Clone for TaskHandle<T, E> {
    fn clone(&self) -> Self {
        Self {
            control: self.control.clone(),
            admission: self.admission,
            settled: self.settled.clone(),
        }
    }
}

impl<T, E> TaskHandle<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        control: Arc<TaskControl>,
        admission: Admission,
        settled: oneshot::Receiver<Settlement<T, E>>,
    ) -> Self {
        let settled = settled
            .map(|received| {
                received.unwrap_or_else(|_| Err(TaskError::canceled(CancelReason::Aborted)))
            })
            .boxed()
            .shared();

        Self {
            control,
            admission,
            settled,
        }
    }

    /// A handle for a call that was never started
    pub(crate) fn rejected(name: String, reason: CancelReason) -> Self {
        let control = TaskControl::detached(TaskId::new(), name, Some(reason.clone()));
        let settled = future::ready(Err(TaskError::canceled(reason)))
            .boxed()
            .shared();

        Self {
            control,
            admission: Admission::Rejected,
            settled,
        }
    }

    /// The same task, observed through a combined call
    pub(crate) fn combined(&self) -> Self {
        Self {
            admission: Admission::Combined,
            ..self.clone()
        }
    }
}

impl<T, E> TaskHandle<T, E> {
    pub fn id(&self) -> TaskId {
        self.control.id()
    }

    pub fn name(&self) -> &str {
        self.control.name()
    }

    pub fn state(&self) -> TaskState {
        self.control.state()
    }

    /// How the call that produced this handle was admitted
    pub fn admission(&self) -> Admission {
        self.admission
    }

    pub fn is_settled(&self) -> bool {
        self.control.state().is_finished()
    }

    /// Cancel the task. Returns `false` if it had already settled or been canceled.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        self.control.cancel(reason)
    }

    /// Withhold the task's continuation at its next suspension point.
    pub fn pause(&self, data: Option<Payload>) -> bool {
        self.control.pause(data)
    }

    /// Continue a paused task, handing `data` to its scope.
    pub fn resume(&self, data: Option<Payload>) -> bool {
        self.control.resume(data)
    }

    /// Resolve successfully even if the routine fails.
    ///
    /// The failure is still recorded in the runner's status. Cancellation is
    /// not caught.
    pub fn caught(self) -> Caught<T, E> {
        Caught { handle: self }
    }

    pub(crate) fn control(&self) -> &Arc<TaskControl> {
        &self.control
    }
}

impl<T: Clone, E: Clone> Future for TaskHandle<T, E> {
    type Output = Settlement<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.settled).poll(cx)
    }
}

/// A [`TaskHandle`] in catch mode, created with [`TaskHandle::caught`].
///
/// Resolves to `Ok(None)` when the routine fails.
#[derive(Debug, Clone)]
pub struct Caught<T, E> {
    handle: TaskHandle<T, E>,
}

impl<T: Clone, E: Clone> Future for Caught<T, E> {
    type Output = Result<Option<T>, CanceledError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Ready(Ok(value)) => Poll::Ready(Ok(Some(value))),
            Poll::Ready(Err(TaskError::Failed(_))) => Poll::Ready(Ok(None)),
            Poll::Ready(Err(TaskError::Canceled(err))) => Poll::Ready(Err(err)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T, E> Debug for TaskHandle<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.control.id())
            .field("name", &self.control.name())
            .field("state", &self.control.state())
            .field("admission", &self.admission)
            .finish()
    }
}
