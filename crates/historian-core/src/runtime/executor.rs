//! The background-execution seam every long-running component spawns onto.
use std::any::Any;
use std::future::Future;

use super::task::{JoinHandle, TaskError, TaskResult};
use crate::stream::BoxFuture;

/// Object-safe task submission.
///
/// # Why
/// A host (this crate, or an adapter built on it) needs to inject whatever
/// executor it already runs — `tokio`, a thread pool, a test harness's
/// single-threaded driver — without this crate committing to one concrete
/// runtime. `spawn_dyn` is the object-safe seam that makes `dyn TaskExecutor`
/// usable as an injected dependency; [`TaskExecutorExt::spawn`] is the
/// ergonomic, type-preserving entry point built on top of it.
pub trait TaskExecutor: Send + Sync + 'static {
    /// Spawns an already-boxed, type-erased future and returns a
    /// type-erased handle. Callers use [`TaskExecutorExt::spawn`] instead
    /// of calling this directly.
    fn spawn_dyn(
        &self,
        fut: BoxFuture<'static, TaskResult<Box<dyn Any + Send>>>,
    ) -> Box<dyn super::task::TaskHandle>;
}

/// Generic, type-preserving entry point over any [`TaskExecutor`].
pub trait TaskExecutorExt: TaskExecutor {
    fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let erased = async move {
            let value = fut.await;
            Ok::<Box<dyn Any + Send>, TaskError>(Box::new(value))
        };
        let handle = self.spawn_dyn(Box::pin(erased));
        JoinHandle::from_dyn(handle, |result| {
            result.and_then(|boxed| {
                boxed
                    .downcast::<F::Output>()
                    .map(|value| *value)
                    .map_err(|_| TaskError::Failed("join handle type mismatch".into()))
            })
        })
    }
}

impl<T> TaskExecutorExt for T where T: TaskExecutor + ?Sized {}
