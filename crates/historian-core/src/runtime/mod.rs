//! Runtime injection seam: task scheduling and monotonic time, decoupled
//! from any one concrete executor.
//!
//! # Why
//! Every long-running piece of this crate — a subscription's rate-limited
//! emitter, a topic manager's dispatch loop, an aggregation pipeline's
//! bucketizer — needs to spawn background work and sleep without hard-coding
//! a runtime. Components take `Arc<dyn AsyncRuntime>` so a test can inject a
//! single-threaded, virtual-time driver while a production host injects
//! [`TokioRuntime`].
//!
//! # How
//! [`TaskExecutor`] is the object-safe spawn seam (`spawn_dyn`); the blanket
//! [`TaskExecutorExt::spawn`] builds a type-preserving [`JoinHandle<T>`] on
//! top of it by round-tripping through `Box<dyn Any + Send>`. [`TimeDriver`]
//! is the clock/sleep seam. [`AsyncRuntime`] is just their intersection so a
//! component can take one object instead of two.
//!
//! # Trade-offs
//! `spawn_dyn` pays one allocation and one downcast per spawn to stay object
//! safe; nothing in this crate spawns often enough (subscription setup,
//! pipeline startup) for that to matter.

mod executor;
mod task;
mod timer;

#[cfg(feature = "tokio-runtime")]
mod tokio_runtime;

pub use executor::{TaskExecutor, TaskExecutorExt};
pub use task::{
    JoinHandle, TaskCancellationStrategy, TaskError, TaskHandle, TaskLaunchOptions, TaskPriority,
    TaskResult,
};
pub use timer::{MonotonicTimePoint, TimeDriver};

#[cfg(feature = "tokio-runtime")]
pub use tokio_runtime::TokioRuntime;

/// The intersection of [`TaskExecutor`] and [`TimeDriver`] that every
/// component in this crate is constructed with.
///
/// This trait adds no methods of its own — it exists purely so components
/// can take `Arc<dyn AsyncRuntime>` as one injected dependency instead of
/// two.
pub trait AsyncRuntime: TaskExecutor + TimeDriver {}

impl<T> AsyncRuntime for T where T: TaskExecutor + TimeDriver {}
