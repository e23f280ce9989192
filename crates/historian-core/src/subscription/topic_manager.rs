//! Reference-counted topic registry with serialized 0↔1 transitions.
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{Shared, FutureExt};
use futures::StreamExt;
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};

use crate::cancellation::Cancellation;
use crate::error::{CoreError, CoreResult};
use crate::observability::Logger;
use crate::runtime::{AsyncRuntime, TaskExecutorExt};
use crate::stream::{BoxFuture, BoxStream};

use super::channel::SubscriptionChannel;

/// How a value's topic(s) are matched against a subscription's topic set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchMode {
    /// Matches on topic membership — the ordinary, topic-aware mode.
    ByTopic,
    /// Matches every live subscription regardless of topic. Used for the
    /// event store's topic-less push manager, which every subscriber
    /// (topic-filtered or not) receives from.
    All,
}

/// Informational distinction between subscriptions carried through
/// unchanged by this manager; adapters use it to decide whether a
/// subscriber's presence should drive upstream pulling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionType {
    Active,
    Passive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopicAction {
    Subscribe,
    Unsubscribe,
}

/// One record on a subscription's topic-updates sequence.
#[derive(Clone, Debug)]
pub struct TopicUpdate<K> {
    pub action: TopicAction,
    pub topics: Vec<K>,
}

/// Initial topic set and informational type for a new subscription.
#[derive(Clone, Debug, Default)]
pub struct SubscribeRequest<K> {
    pub topics: Vec<K>,
    pub subscription_type: Option<SubscriptionType>,
    /// Opaque caller-supplied context, carried unexamined on the
    /// subscription and returned by [`TopicSubscriptionManager::subscription_context`].
    /// Adapters use it to stash request-scoped state (a trace span, an
    /// originating connection handle) without this manager knowing its type.
    pub context: Option<Arc<dyn Any + Send + Sync>>,
}

/// Owner-supplied hook invoked serially from the manager's single
/// topic-change task. Returning an error from the `added` hook fails the
/// `Subscribe` call that triggered the 0→1 transition and rolls it back;
/// an error from the `removed` hook is only logged.
pub type TopicHook<K> =
    Arc<dyn Fn(Vec<K>, Cancellation) -> crate::stream::BoxFuture<'static, CoreResult<()>> + Send + Sync>;

struct Subscription<K, V> {
    id: u64,
    topics: RwLock<HashSet<K>>,
    subscription_type: Option<SubscriptionType>,
    context: Option<Arc<dyn Any + Send + Sync>>,
    channel: Arc<SubscriptionChannel<V>>,
}

/// Per-topic tally of how many live subscribers declared themselves
/// [`SubscriptionType::Active`] vs. [`SubscriptionType::Passive`] at
/// subscribe time. A subscription with no declared type (`None`) is
/// counted in neither bucket — this manager doesn't invent a default
/// for an axis the caller chose not to use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ActiveSubscriberCounts {
    pub active: usize,
    pub passive: usize,
}

struct DispatchItem<K, V> {
    value: V,
    subscribers: Vec<Arc<Subscription<K, V>>>,
}

struct TopicChange<K> {
    topics: Vec<K>,
    added: bool,
    ack: Option<oneshot::Sender<CoreResult<()>>>,
}

struct ManagerState<K, V> {
    subscriptions: HashMap<u64, Arc<Subscription<K, V>>>,
    subscriber_count: HashMap<K, usize>,
    /// Topics with an in-flight (not yet acknowledged) 0→1 transition,
    /// keyed to the shared future a concurrent joiner on the same topic
    /// can await instead of returning before the hook has run.
    pending_topic_acks: HashMap<K, Shared<BoxFuture<'static, CoreResult<()>>>>,
}

struct Inner<K, V> {
    state: RwLock<ManagerState<K, V>>,
    next_id: AtomicU64,
    max_subscription_count: Option<usize>,
    disposed: Cancellation,
    match_mode: MatchMode,
    match_topic: Arc<dyn Fn(&K, &K) -> bool + Send + Sync>,
    topic_of: Arc<dyn Fn(&V) -> Option<K> + Send + Sync>,
    on_topics_added: TopicHook<K>,
    on_topics_removed: TopicHook<K>,
    runtime: Arc<dyn AsyncRuntime>,
    logger: Arc<dyn Logger>,
    master_tx: mpsc::Sender<DispatchItem<K, V>>,
    topic_changes_tx: mpsc::Sender<TopicChange<K>>,
}

/// Multiplexes a stream of values `V` to subscriptions selected by topic
/// set, reference-counting topics across subscriptions and serializing
/// 0↔1 / 1↔0 transitions through an owner-supplied pair of hooks.
pub struct TopicSubscriptionManager<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for TopicSubscriptionManager<K, V> {
    fn clone(&self) -> Self {
        TopicSubscriptionManager {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> TopicSubscriptionManager<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    /// `topic_of` extracts the routing topic from a value; returning
    /// `None` means the value matches no [`MatchMode::ByTopic`]
    /// subscription (it still reaches a sibling [`MatchMode::All`]
    /// manager). `on_topics_added` / `on_topics_removed` are invoked
    /// serially, once per batched transition, from this manager's single
    /// topic-change task.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runtime: Arc<dyn AsyncRuntime>,
        logger: Arc<dyn Logger>,
        match_mode: MatchMode,
        max_subscription_count: Option<usize>,
        topic_of: Arc<dyn Fn(&V) -> Option<K> + Send + Sync>,
        on_topics_added: TopicHook<K>,
        on_topics_removed: TopicHook<K>,
    ) -> Self {
        Self::with_matcher(
            runtime,
            logger,
            match_mode,
            max_subscription_count,
            topic_of,
            on_topics_added,
            on_topics_removed,
            Arc::new(|a: &K, b: &K| a == b),
        )
    }

    /// Like [`Self::new`] but with an overridden topic-match predicate
    /// (e.g. to support wildcard subscriptions) in place of default
    /// equality.
    #[allow(clippy::too_many_arguments)]
    pub fn with_matcher(
        runtime: Arc<dyn AsyncRuntime>,
        logger: Arc<dyn Logger>,
        match_mode: MatchMode,
        max_subscription_count: Option<usize>,
        topic_of: Arc<dyn Fn(&V) -> Option<K> + Send + Sync>,
        on_topics_added: TopicHook<K>,
        on_topics_removed: TopicHook<K>,
        match_topic: Arc<dyn Fn(&K, &K) -> bool + Send + Sync>,
    ) -> Self {
        let (master_tx, master_rx) = mpsc::channel(1024);
        let (topic_changes_tx, topic_changes_rx) = mpsc::channel(1024);

        let inner = Arc::new(Inner {
            state: RwLock::new(ManagerState {
                subscriptions: HashMap::new(),
                subscriber_count: HashMap::new(),
                pending_topic_acks: HashMap::new(),
            }),
            next_id: AtomicU64::new(1),
            max_subscription_count,
            disposed: Cancellation::new(),
            match_mode,
            match_topic,
            topic_of,
            on_topics_added,
            on_topics_removed,
            runtime: runtime.clone(),
            logger,
            master_tx,
            topic_changes_tx,
        });

        spawn_dispatch_loop(inner.clone(), master_rx);
        spawn_topic_change_loop(inner.clone(), topic_changes_rx);

        TopicSubscriptionManager { inner }
    }

    /// Creates a subscription with an initial topic set, spawning a task
    /// that applies `updates` as they arrive. Suspends until any 0→1
    /// transition caused by the initial topics has been acknowledged by
    /// `on_topics_added`.
    pub async fn subscribe(
        &self,
        request: SubscribeRequest<K>,
        updates: BoxStream<'static, TopicUpdate<K>>,
    ) -> CoreResult<(u64, BoxStream<'static, V>)> {
        if self.inner.disposed.is_cancelled() {
            return Err(CoreError::Disposed);
        }
        if let Some(limit) = self.inner.max_subscription_count {
            let current = self.inner.state.read_recursive().subscriptions.len();
            if current >= limit {
                return Err(CoreError::TooManySubscriptions { limit });
            }
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let manager = self.clone();
        let cleanup_manager = self.clone();
        let channel = Arc::new(SubscriptionChannel::new(
            format!("topic-subscription-{id}"),
            self.inner.runtime.clone(),
            None,
            None,
            vec![self.inner.disposed.clone()],
            move || cleanup_manager.finalize_cancellation(id),
        ));
        let subscription = Arc::new(Subscription {
            id,
            topics: RwLock::new(HashSet::new()),
            subscription_type: request.subscription_type,
            context: request.context,
            channel: channel.clone(),
        });

        self.inner
            .state
            .write()
            .subscriptions
            .insert(id, subscription.clone());

        if let Err(err) = self
            .apply_topic_change(&subscription, request.topics, true)
            .await
        {
            self.inner.state.write().subscriptions.remove(&id);
            return Err(err);
        }

        self.inner.runtime.clone().spawn(run_update_task(
            manager.clone(),
            subscription.clone(),
            updates,
        ));

        Ok((id, channel.reader()))
    }

    /// Adds topics to a live subscription, awaiting acknowledgement of
    /// any 0→1 transition it causes.
    pub async fn add_topics(&self, subscription_id: u64, topics: Vec<K>) -> CoreResult<()> {
        let subscription = self.subscription(subscription_id)?;
        self.apply_topic_change(&subscription, topics, true).await
    }

    /// Removes topics from a live subscription. Never suspends on the
    /// corresponding hook.
    pub async fn remove_topics(&self, subscription_id: u64, topics: Vec<K>) -> CoreResult<()> {
        let subscription = self.subscription(subscription_id)?;
        self.apply_topic_change(&subscription, topics, false).await
    }

    /// Selects every live subscription matching `value`'s topic (or
    /// every subscription, in [`MatchMode::All`]) and enqueues it into
    /// the internal dispatch queue. Returns `true` iff the value entered
    /// that queue.
    pub fn publish(&self, value: V) -> bool {
        if self.inner.disposed.is_cancelled() {
            return false;
        }
        let subscribers = self.matching_subscribers(&value);
        self.inner
            .master_tx
            .try_send(DispatchItem { value, subscribers })
            .is_ok()
    }

    /// Point-in-time snapshot of every topic with at least one
    /// subscriber.
    pub fn subscribed_topics(&self) -> HashSet<K> {
        self.inner
            .state
            .read_recursive()
            .subscriber_count
            .keys()
            .cloned()
            .collect()
    }

    /// Point-in-time tally of active vs. passive subscribers currently
    /// interested in `topic`, per [`SubscribeRequest::subscription_type`].
    pub fn active_subscriber_counts(&self, topic: &K) -> ActiveSubscriberCounts {
        let state = self.inner.state.read_recursive();
        let mut counts = ActiveSubscriberCounts::default();
        for subscription in state.subscriptions.values() {
            let interested = subscription
                .topics
                .read()
                .iter()
                .any(|t| (self.inner.match_topic)(t, topic));
            if !interested {
                continue;
            }
            match subscription.subscription_type {
                Some(SubscriptionType::Active) => counts.active += 1,
                Some(SubscriptionType::Passive) => counts.passive += 1,
                None => {}
            }
        }
        counts
    }

    /// Returns the opaque context supplied at subscribe time, if any.
    /// `Err(CoreError::Disposed)` if the subscription id is unknown or has
    /// already been cancelled.
    pub fn subscription_context(
        &self,
        subscription_id: u64,
    ) -> CoreResult<Option<Arc<dyn Any + Send + Sync>>> {
        Ok(self.subscription(subscription_id)?.context.clone())
    }

    /// Returns the [`SubscriptionType`] declared at subscribe time, if
    /// any. `Err(CoreError::Disposed)` if the subscription id is unknown
    /// or has already been cancelled. An adapter uses this to decide
    /// whether a forward-only cursor should advance when only passive
    /// listeners remain (spec.md §3, "Lifecycle").
    pub fn subscription_type(&self, subscription_id: u64) -> CoreResult<Option<SubscriptionType>> {
        Ok(self.subscription(subscription_id)?.subscription_type)
    }

    /// Cancels a subscription: removes it from the registry, decrements
    /// its topic counts (emitting 1→0 transitions where applicable),
    /// closes its channel, and runs its cleanup hook exactly once.
    pub fn cancel_subscription(&self, subscription_id: u64) -> CoreResult<()> {
        let subscription = self.subscription(subscription_id)?;
        subscription.channel.cancel();
        Ok(())
    }

    /// Idempotent. Completes both internal queues, trips the dispose
    /// signal, and cancels every live subscription. After this call,
    /// `subscribe` and `publish` fail with [`CoreError::Disposed`].
    pub fn shutdown(&self) {
        if !self.inner.disposed.cancel() {
            return;
        }
        let subscriptions: Vec<_> = self
            .inner
            .state
            .read_recursive()
            .subscriptions
            .values()
            .cloned()
            .collect();
        for subscription in subscriptions {
            subscription.channel.cancel();
        }
    }

    fn subscription(&self, id: u64) -> CoreResult<Arc<Subscription<K, V>>> {
        self.inner
            .state
            .read_recursive()
            .subscriptions
            .get(&id)
            .cloned()
            .ok_or(CoreError::Disposed)
    }

    fn matching_subscribers(&self, value: &V) -> Vec<Arc<Subscription<K, V>>> {
        let state = self.inner.state.read_recursive();
        match self.inner.match_mode {
            MatchMode::All => state.subscriptions.values().cloned().collect(),
            MatchMode::ByTopic => {
                let Some(message_topic) = (self.inner.topic_of)(value) else {
                    return Vec::new();
                };
                state
                    .subscriptions
                    .values()
                    .filter(|s| {
                        s.topics
                            .read()
                            .iter()
                            .any(|t| (self.inner.match_topic)(t, &message_topic))
                    })
                    .cloned()
                    .collect()
            }
        }
    }

    /// Runs the "topic add to an existing subscription" / "topic remove"
    /// algorithm from this manager's internal state map, then — for add
    /// only — awaits the 0→1 acknowledgement.
    async fn apply_topic_change(
        &self,
        subscription: &Arc<Subscription<K, V>>,
        topics: Vec<K>,
        added: bool,
    ) -> CoreResult<()> {
        if topics.is_empty() {
            return Ok(());
        }

        if !added {
            let transitioned = {
                let mut state = self.inner.state.write();
                let mut sub_topics = subscription.topics.write();
                let mut transitioned = Vec::new();
                for topic in &topics {
                    if sub_topics.remove(topic) {
                        if let Some(count) = state.subscriber_count.get_mut(topic) {
                            *count -= 1;
                            if *count == 0 {
                                state.subscriber_count.remove(topic);
                                transitioned.push(topic.clone());
                            }
                        }
                    }
                }
                transitioned
            };
            if !transitioned.is_empty() {
                let _ = self.inner.topic_changes_tx.try_send(TopicChange {
                    topics: transitioned,
                    added: false,
                    ack: None,
                });
            }
            return Ok(());
        }

        // Built before the lock is taken so that a topic's genuine 0→1
        // transition can be recorded in `pending_topic_acks` within the
        // very same critical section that discovers it. A concurrent
        // subscriber joining the same topic a moment later — finding the
        // count already above one — must still find this entry so it can
        // wait on the same acknowledgement rather than return early.
        let (ack_tx, ack_rx) = oneshot::channel::<CoreResult<()>>();
        let boxed: BoxFuture<'static, CoreResult<()>> = Box::pin(async move {
            match ack_rx.await {
                Ok(result) => result,
                Err(_) => Err(CoreError::Disposed),
            }
        });
        let shared: Shared<BoxFuture<'static, CoreResult<()>>> = boxed.shared();

        let (inserted, newly_transitioned, mut to_await) = {
            let mut state = self.inner.state.write();
            let mut sub_topics = subscription.topics.write();
            let mut inserted = Vec::new();
            let mut newly_transitioned = Vec::new();
            let mut to_await = Vec::new();
            for topic in &topics {
                if sub_topics.insert(topic.clone()) {
                    inserted.push(topic.clone());
                    let count = state.subscriber_count.entry(topic.clone()).or_insert(0);
                    *count += 1;
                    if *count == 1 {
                        newly_transitioned.push(topic.clone());
                        state.pending_topic_acks.insert(topic.clone(), shared.clone());
                    } else if let Some(pending) = state.pending_topic_acks.get(topic) {
                        to_await.push(pending.clone());
                    }
                }
            }
            (inserted, newly_transitioned, to_await)
        };

        if newly_transitioned.is_empty() && to_await.is_empty() {
            drop(ack_tx);
            return Ok(());
        }

        if !newly_transitioned.is_empty() {
            let sent = self
                .inner
                .topic_changes_tx
                .send(TopicChange {
                    topics: newly_transitioned.clone(),
                    added: true,
                    ack: Some(ack_tx),
                })
                .await;
            if sent.is_err() {
                let mut state = self.inner.state.write();
                for topic in &newly_transitioned {
                    state.pending_topic_acks.remove(topic);
                }
                drop(state);
                self.rollback_topics(subscription, &inserted);
                return Err(CoreError::Disposed);
            }
            to_await.push(shared);
        } else {
            drop(ack_tx);
        }

        let mut first_err = None;
        for pending in to_await {
            if let Err(err) = pending.await {
                first_err.get_or_insert(err);
            }
        }

        if let Some(err) = first_err {
            self.rollback_topics(subscription, &inserted);
            return Err(err);
        }

        Ok(())
    }

    fn rollback_topics(&self, subscription: &Arc<Subscription<K, V>>, topics: &[K]) {
        let mut state = self.inner.state.write();
        let mut sub_topics = subscription.topics.write();
        for topic in topics {
            sub_topics.remove(topic);
            if let Some(count) = state.subscriber_count.get_mut(topic) {
                *count -= 1;
                if *count == 0 {
                    state.subscriber_count.remove(topic);
                }
            }
        }
    }

    /// Invoked once, from the subscription channel's own cancellation
    /// watcher, when the subscription is cancelled by any means (caller
    /// cancellation, explicit dispose, or manager shutdown).
    fn finalize_cancellation(&self, subscription_id: u64) {
        let subscription = {
            let mut state = self.inner.state.write();
            state.subscriptions.remove(&subscription_id)
        };
        let Some(subscription) = subscription else {
            return;
        };
        let topics: Vec<K> = subscription.topics.read().iter().cloned().collect();
        if topics.is_empty() {
            return;
        }
        let mut state = self.inner.state.write();
        let mut removed = Vec::new();
        for topic in &topics {
            if let Some(count) = state.subscriber_count.get_mut(topic) {
                *count -= 1;
                if *count == 0 {
                    state.subscriber_count.remove(topic);
                    removed.push(topic.clone());
                }
            }
        }
        drop(state);
        if !removed.is_empty() {
            let _ = self.inner.topic_changes_tx.try_send(TopicChange {
                topics: removed,
                added: false,
                ack: None,
            });
        }
    }
}

async fn run_update_task<K, V>(
    manager: TopicSubscriptionManager<K, V>,
    subscription: Arc<Subscription<K, V>>,
    mut updates: BoxStream<'static, TopicUpdate<K>>,
) where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    while let Some(update) = updates.next().await {
        if subscription.channel.is_cancelled() {
            break;
        }
        if update.topics.is_empty() {
            continue;
        }
        let added = update.action == TopicAction::Subscribe;
        if let Err(err) = manager
            .apply_topic_change(&subscription, update.topics, added)
            .await
        {
            manager.inner.logger.warn(
                "topic update failed",
                &[("subscription_id", &subscription.id.to_string()), ("error", &err.to_string())],
            );
        }
    }
}

/// Single consumer of the master dispatch queue: for each entry,
/// enqueues into every matching subscriber's channel. A failure to
/// enqueue into one subscriber's channel is logged and counted; it never
/// fails the batch.
fn spawn_dispatch_loop<K, V>(inner: Arc<Inner<K, V>>, mut rx: mpsc::Receiver<DispatchItem<K, V>>)
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    let runtime = inner.runtime.clone();
    runtime.spawn(async move {
        while let Some(item) = rx.recv().await {
            for subscriber in &item.subscribers {
                if !subscriber.channel.publish(item.value.clone()) {
                    inner.logger.warn(
                        "dispatch to subscriber failed",
                        &[("subscription_id", &subscriber.id.to_string())],
                    );
                }
            }
        }
    });
}

/// Single consumer of the topic-change queue: serializes every
/// `on_topics_added` / `on_topics_removed` invocation for this manager,
/// so the owning adapter's upstream never sees overlapping attach/detach
/// for the same topic.
fn spawn_topic_change_loop<K, V>(
    inner: Arc<Inner<K, V>>,
    mut rx: mpsc::Receiver<TopicChange<K>>,
) where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    let runtime = inner.runtime.clone();
    runtime.spawn(async move {
        while let Some(change) = rx.recv().await {
            let hook = if change.added {
                &inner.on_topics_added
            } else {
                &inner.on_topics_removed
            };
            let result = hook(change.topics.clone(), inner.disposed.clone()).await;
            if change.added {
                let mut state = inner.state.write();
                for topic in &change.topics {
                    state.pending_topic_acks.remove(topic);
                }
            }
            if let Err(ref err) = result {
                inner.logger.error(
                    "topic hook failed",
                    &[("added", if change.added { "true" } else { "false" }), ("error", &err.to_string())],
                );
            }
            if let Some(ack) = change.ack {
                let _ = ack.send(result);
            }
        }
    });
}
