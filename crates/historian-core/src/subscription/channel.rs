//! Single-consumer value delivery with optional rate-limited emission.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::cancellation::Cancellation;
use crate::runtime::{AsyncRuntime, TaskExecutorExt};
use crate::stream::BoxStream;

/// How often a [`SubscriptionChannel`] checks its linked cancellation
/// signals for a trip it did not itself originate. Cooperative, not
/// instantaneous — matches the rate-limited emission loop's own polling
/// cadence rather than requiring an async-aware cancellation primitive.
const CANCELLATION_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Delivers a sequence of `T` to exactly one consumer.
///
/// # Why
/// Every subscriber in this crate — a topic subscription, a raw
/// aggregation input — needs the same three things: a way to push a value
/// without ever blocking the publisher, backpressure that drops the
/// newest value rather than stalling, and an optional "only the latest
/// value matters" throttle. This type is that primitive, built once and
/// reused everywhere a per-subscriber channel is needed.
pub struct SubscriptionChannel<T> {
    id: String,
    cancellation: Cancellation,
    publish_failures: Arc<AtomicU64>,
    sender: ChannelSender<T>,
    reader: Mutex<Option<mpsc::Receiver<T>>>,
}

enum ChannelSender<T> {
    /// `publishInterval == 0`: every published value is forwarded,
    /// subject to drop-on-full.
    Direct(mpsc::Sender<T>),
    /// `publishInterval > 0`: only the most recently published value is
    /// kept; a background task samples it on a fixed cadence.
    RateLimited(watch::Sender<Option<T>>),
}

impl<T> SubscriptionChannel<T>
where
    T: Clone + Send + 'static,
{
    /// Builds a channel and spawns its background bookkeeping tasks
    /// (rate-limited emission, linked-cancellation polling) onto
    /// `runtime`.
    ///
    /// `capacity`: `None` or `Some(0)` means unbounded. `publish_interval`:
    /// `None` or zero duration means unthrottled, forward-on-publish
    /// delivery.
    pub fn new(
        id: impl Into<String>,
        runtime: Arc<dyn AsyncRuntime>,
        capacity: Option<usize>,
        publish_interval: Option<Duration>,
        linked: Vec<Cancellation>,
        cleanup: impl FnOnce() + Send + 'static,
    ) -> Self {
        let id = id.into();
        let cancellation = Cancellation::any_of(linked);
        let publish_failures = Arc::new(AtomicU64::new(0));
        let out_capacity = capacity.filter(|c| *c > 0).unwrap_or(usize::MAX / 2);
        let (out_tx, out_rx) = mpsc::channel(out_capacity.min(1 << 20).max(1));

        let sender = match publish_interval.filter(|d| !d.is_zero()) {
            None => ChannelSender::Direct(out_tx),
            Some(interval) => {
                let (watch_tx, mut watch_rx) = watch::channel(None::<T>);
                let task_cancellation = cancellation.clone();
                let sleep_runtime = runtime.clone();
                runtime.spawn(async move {
                    loop {
                        sleep_runtime.sleep(interval).await;
                        if task_cancellation.is_cancelled() {
                            break;
                        }
                        if watch_rx.has_changed().unwrap_or(false) {
                            let value = watch_rx.borrow_and_update().clone();
                            if let Some(value) = value {
                                let _ = out_tx.try_send(value);
                            }
                        }
                    }
                });
                ChannelSender::RateLimited(watch_tx)
            }
        };

        // A single background task observes cancellation — whether
        // tripped by this channel's own `cancel()` or by a linked
        // external signal — and runs the cleanup hook exactly once, the
        // moment it's observed.
        let watcher_cancellation = cancellation.clone();
        let watcher_cleanup = Arc::new(Mutex::new(Some(cleanup)));
        let watcher_cleanup_for_task = watcher_cleanup.clone();
        let watcher_runtime = runtime.clone();
        runtime.spawn(async move {
            loop {
                if watcher_cancellation.is_cancelled() {
                    if let Some(hook) = watcher_cleanup_for_task.lock().take() {
                        hook();
                    }
                    break;
                }
                watcher_runtime.sleep(CANCELLATION_POLL_INTERVAL).await;
            }
        });

        SubscriptionChannel {
            id,
            cancellation,
            publish_failures,
            sender,
            reader: Mutex::new(Some(out_rx)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Attempts to enqueue `value`. Never blocks. Returns `false` (and
    /// increments the publish-failure counter) if the channel is
    /// cancelled, full, or the reader has been dropped.
    pub fn publish(&self, value: T) -> bool {
        if self.cancellation.is_cancelled() {
            self.publish_failures.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let ok = match &self.sender {
            ChannelSender::Direct(tx) => tx.try_send(value).is_ok(),
            ChannelSender::RateLimited(tx) => tx.send(Some(value)).is_ok(),
        };
        if !ok {
            self.publish_failures.fetch_add(1, Ordering::Relaxed);
        }
        ok
    }

    /// Number of `publish` calls that failed to enqueue.
    pub fn publish_failures(&self) -> u64 {
        self.publish_failures.load(Ordering::Relaxed)
    }

    /// Takes the reader side: a finite, non-restartable stream. Calling
    /// this more than once returns an already-closed stream.
    pub fn reader(&self) -> BoxStream<'static, T> {
        match self.reader.lock().take() {
            Some(mut rx) => Box::pin(futures::stream::poll_fn(move |cx| rx.poll_recv(cx))),
            None => Box::pin(futures::stream::empty()),
        }
    }

    /// Idempotent. Trips the cancellation signal and runs the cleanup
    /// hook the first time only.
    pub fn cancel(&self) -> bool {
        self.cancellation.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
