//! Task handles, priorities, and outcomes returned by a [`super::TaskExecutor`].
use std::borrow::Cow;
use std::fmt;

use crate::stream::BoxFuture;

/// Scheduling hint a background executor may use to order ready tasks.
///
/// Plain advice, not a guarantee — nothing in this crate depends on strict
/// priority ordering, only on tasks eventually running.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TaskPriority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
    Idle,
}

/// How forcefully [`TaskHandle::cancel`] should treat a running task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TaskCancellationStrategy {
    /// The task is expected to observe its own cancellation token and stop
    /// on its own; this is the only strategy every task in this crate
    /// actually honors.
    #[default]
    Cooperative,
    /// The executor may drop the task's future without polling it again.
    Forceful,
}

/// Metadata attached to a task at spawn time, used for logging and
/// diagnostics rather than scheduling decisions.
#[derive(Clone, Debug, Default)]
pub struct TaskLaunchOptions {
    pub name: Option<Cow<'static, str>>,
    pub priority: TaskPriority,
    pub cancellation: TaskCancellationStrategy,
}

impl TaskLaunchOptions {
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        TaskLaunchOptions {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

/// Result of a task as observed through its [`TaskHandle`].
pub type TaskResult<T = ()> = Result<T, TaskError>;

/// Why a task did not run to a normal completion.
#[derive(Debug, Clone)]
pub enum TaskError {
    Cancelled,
    Panicked,
    ExecutorTerminated,
    Failed(Cow<'static, str>),
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Cancelled => write!(f, "task cancelled"),
            TaskError::Panicked => write!(f, "task panicked"),
            TaskError::ExecutorTerminated => write!(f, "executor terminated"),
            TaskError::Failed(reason) => write!(f, "task failed: {reason}"),
        }
    }
}

impl std::error::Error for TaskError {}

/// A live task's control surface. Returned by [`super::TaskExecutor::spawn_dyn`]
/// and the generic [`super::TaskExecutorExt::spawn`] built on top of it.
pub trait TaskHandle: Send + Sync {
    fn cancel(&self, strategy: TaskCancellationStrategy);
    fn is_finished(&self) -> bool;
    fn id(&self) -> Option<&str>;
    /// Releases this handle without affecting the task, which keeps running
    /// to completion in the background.
    fn detach(self: Box<Self>);
    /// Awaits the task's outcome. Consumes the handle.
    fn join(self: Box<Self>) -> BoxFuture<'static, TaskResult>;
}

/// A type-preserving wrapper around a `Box<dyn TaskHandle>` erased through
/// [`super::TaskExecutor::spawn_dyn`]. Produced only by
/// [`super::TaskExecutorExt::spawn`].
pub struct JoinHandle<T> {
    inner: Box<dyn ErasedHandle>,
    decode: fn(TaskResult<Box<dyn std::any::Any + Send>>) -> TaskResult<T>,
}

trait ErasedHandle: Send + Sync {
    fn cancel(&self, strategy: TaskCancellationStrategy);
    fn is_finished(&self) -> bool;
    fn detach_boxed(self: Box<Self>);
    fn join_boxed(
        self: Box<Self>,
    ) -> BoxFuture<'static, TaskResult<Box<dyn std::any::Any + Send>>>;
}

struct ErasedHandleImpl(Box<dyn TaskHandle>);

impl ErasedHandle for ErasedHandleImpl {
    fn cancel(&self, strategy: TaskCancellationStrategy) {
        self.0.cancel(strategy)
    }

    fn is_finished(&self) -> bool {
        self.0.is_finished()
    }

    fn detach_boxed(self: Box<Self>) {
        self.0.detach()
    }

    fn join_boxed(
        self: Box<Self>,
    ) -> BoxFuture<'static, TaskResult<Box<dyn std::any::Any + Send>>> {
        self.0.join()
    }
}

impl<T: Send + 'static> JoinHandle<T> {
    pub(super) fn from_dyn(
        handle: Box<dyn TaskHandle>,
        decode: fn(TaskResult<Box<dyn std::any::Any + Send>>) -> TaskResult<T>,
    ) -> Self {
        JoinHandle {
            inner: Box::new(ErasedHandleImpl(handle)),
            decode,
        }
    }

    pub fn cancel(&self, strategy: TaskCancellationStrategy) {
        self.inner.cancel(strategy)
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    pub fn detach(self) {
        self.inner.detach_boxed()
    }

    pub async fn join(self) -> TaskResult<T> {
        let decode = self.decode;
        decode(self.inner.join_boxed().await)
    }
}
