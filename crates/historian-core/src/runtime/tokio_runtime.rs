//! `tokio`-backed implementation of [`super::AsyncRuntime`].
//!
//! Gated behind the `tokio-runtime` feature (on by default) so a host that
//! injects its own executor can depend on this crate with
//! `default-features = false` and implement [`super::TaskExecutor`] /
//! [`super::TimeDriver`] itself.
use std::any::Any;
use std::time::Duration;

use tokio::task::JoinHandle as TokioJoinHandle;

use super::executor::TaskExecutor;
use super::task::{TaskCancellationStrategy, TaskError, TaskHandle, TaskResult};
use super::timer::{MonotonicTimePoint, TimeDriver};
use crate::stream::BoxFuture;

/// An [`super::AsyncRuntime`] that schedules onto the ambient `tokio`
/// runtime (via `tokio::spawn`/`tokio::time`) rather than owning one.
///
/// Construct inside a `#[tokio::main]` or `Runtime::block_on` context, the
/// same way `tokio::spawn` itself requires.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioRuntime {
    epoch: std::time::Instant,
}

impl TokioRuntime {
    pub fn new() -> Self {
        TokioRuntime {
            epoch: std::time::Instant::now(),
        }
    }
}

struct TokioTaskHandle {
    join: parking_lot::Mutex<Option<TokioJoinHandle<TaskResult<Box<dyn Any + Send>>>>>,
    abort: tokio::task::AbortHandle,
}

impl TaskHandle for TokioTaskHandle {
    fn cancel(&self, _strategy: TaskCancellationStrategy) {
        self.abort.abort();
    }

    fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }

    fn id(&self) -> Option<&str> {
        None
    }

    fn detach(self: Box<Self>) {
        // Dropping the JoinHandle leaves the spawned task running.
    }

    fn join(self: Box<Self>) -> BoxFuture<'static, TaskResult<Box<dyn Any + Send>>> {
        Box::pin(async move {
            let handle = self
                .join
                .lock()
                .take()
                .expect("join called more than once");
            match handle.await {
                Ok(result) => result,
                Err(join_err) if join_err.is_cancelled() => Err(TaskError::Cancelled),
                Err(_) => Err(TaskError::Panicked),
            }
        })
    }
}

impl TaskExecutor for TokioRuntime {
    fn spawn_dyn(
        &self,
        fut: BoxFuture<'static, TaskResult<Box<dyn Any + Send>>>,
    ) -> Box<dyn TaskHandle> {
        let join = tokio::spawn(fut);
        let abort = join.abort_handle();
        Box::new(TokioTaskHandle {
            join: parking_lot::Mutex::new(Some(join)),
            abort,
        })
    }
}

impl TimeDriver for TokioRuntime {
    fn now(&self) -> MonotonicTimePoint {
        MonotonicTimePoint::from_offset(self.epoch.elapsed())
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}
