//! Capacity-bounded, cursor-ordered event store.
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::StreamExt;
use parking_lot::RwLock;

use crate::error::CoreResult;
use crate::observability::Logger;
use crate::runtime::AsyncRuntime;
use crate::stream::BoxStream;
use crate::subscription::topic_manager::{
    MatchMode, SubscribeRequest, TopicHook, TopicSubscriptionManager, TopicUpdate,
};

use super::cursor::CursorPosition;
use super::message::EventMessage;

/// Page direction for both read APIs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadDirection {
    Forwards,
    Backwards,
}

#[derive(Clone, Debug)]
pub struct TimeRangeReadRequest {
    pub utc_start_time: SystemTime,
    pub utc_end_time: SystemTime,
    pub direction: ReadDirection,
    pub page: usize,
    pub page_size: usize,
    pub topics: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default)]
pub struct CursorReadRequest {
    pub cursor_position: Option<String>,
    pub direction: ReadDirection,
    pub page_size: usize,
    pub topic: Option<String>,
}

impl Default for ReadDirection {
    fn default() -> Self {
        ReadDirection::Forwards
    }
}

/// One entry of a cursor-paged read: the message plus the cursor it can
/// be resumed from.
#[derive(Clone, Debug)]
pub struct CursorPage {
    pub message: EventMessage,
    pub cursor: String,
}

#[derive(Clone, Debug)]
pub struct WriteRequestItem {
    pub correlation_id: Option<String>,
    pub event_message: EventMessage,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteStatus {
    Success,
    Fail,
}

#[derive(Clone, Debug)]
pub struct WriteResultItem {
    pub correlation_id: Option<String>,
    pub status: WriteStatus,
    pub notes: Option<String>,
    /// Mirrors the spec's `[{ name: "Cursor Position", value: string }]`
    /// properties list; populated only on success.
    pub cursor_position: Option<String>,
}

fn ticks_of(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_nanos() as i64,
        Err(err) => -(err.duration().as_nanos() as i64),
    }
}

struct State {
    messages: BTreeMap<CursorPosition, EventMessage>,
    capacity: usize,
}

/// Accepts event writes, orders them by cursor, enforces capacity with
/// FIFO eviction, and serves both push subscribers and historical
/// readers.
///
/// # Why
/// A single write must reach a topic-less fan-out (every subscriber, no
/// matter what topics they hold) and a topic-aware one (only subscribers
/// whose topic set matches `message.topic`) without those two concerns
/// fighting over the same lock as the ordered map. Each push manager
/// owns its own subscriber bookkeeping; the store's `RwLock` only ever
/// guards the ordered map itself.
#[derive(Clone)]
pub struct InMemoryEventStore {
    state: Arc<RwLock<State>>,
    sequence: Arc<AtomicI64>,
    topic_less: TopicSubscriptionManager<String, EventMessage>,
    topic_aware: TopicSubscriptionManager<String, EventMessage>,
}

impl InMemoryEventStore {
    /// `capacity` of `0` means unbounded. The two embedded push managers
    /// share `runtime`/`logger` but otherwise act independently; the
    /// topic-aware manager calls `on_topics_added`/`on_topics_removed`
    /// when a topic's subscriber count transitions 0↔1.
    pub fn new(
        capacity: usize,
        runtime: Arc<dyn AsyncRuntime>,
        logger: Arc<dyn Logger>,
        on_topics_added: TopicHook<String>,
        on_topics_removed: TopicHook<String>,
    ) -> Self {
        let topic_less = TopicSubscriptionManager::new(
            runtime.clone(),
            logger.clone(),
            MatchMode::All,
            None,
            Arc::new(|m: &EventMessage| m.topic.clone()),
            no_op_hook(),
            no_op_hook(),
        );
        let topic_aware = TopicSubscriptionManager::new(
            runtime,
            logger,
            MatchMode::ByTopic,
            None,
            Arc::new(|m: &EventMessage| m.topic.clone()),
            on_topics_added,
            on_topics_removed,
        );
        InMemoryEventStore {
            state: Arc::new(RwLock::new(State {
                messages: BTreeMap::new(),
                capacity,
            })),
            sequence: Arc::new(AtomicI64::new(0)),
            topic_less,
            topic_aware,
        }
    }

    /// The topic-less push manager: every subscriber receives every
    /// write, matching on no topic filter.
    pub fn topic_less_subscriptions(&self) -> &TopicSubscriptionManager<String, EventMessage> {
        &self.topic_less
    }

    /// The topic-aware push manager: subscribers receive only writes
    /// whose `topic` matches one of their subscribed topics.
    pub fn topic_aware_subscriptions(&self) -> &TopicSubscriptionManager<String, EventMessage> {
        &self.topic_aware
    }

    pub async fn subscribe(
        &self,
        topics: Vec<String>,
        context: Option<Arc<dyn std::any::Any + Send + Sync>>,
        updates: BoxStream<'static, TopicUpdate<String>>,
    ) -> CoreResult<(u64, BoxStream<'static, EventMessage>)> {
        self.topic_aware
            .subscribe(
                SubscribeRequest {
                    topics,
                    subscription_type: None,
                    context,
                },
                updates,
            )
            .await
    }

    /// Writes each input in order, returning a matching one-to-one,
    /// order-preserving stream of results. Laziness is preserved: each
    /// write happens only as its corresponding output item is polled.
    pub fn write_event_messages<'a>(
        &'a self,
        inputs: BoxStream<'a, WriteRequestItem>,
    ) -> BoxStream<'a, WriteResultItem> {
        Box::pin(inputs.then(move |item| async move { self.write_one(item) }))
    }

    fn write_one(&self, item: WriteRequestItem) -> WriteResultItem {
        let WriteRequestItem {
            correlation_id,
            event_message,
        } = item;
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let cursor = CursorPosition::new(ticks_of(event_message.utc_event_time), sequence);

        {
            let mut state = self.state.write();
            state.messages.insert(cursor, event_message.clone());
            if state.capacity > 0 && state.messages.len() > state.capacity {
                if let Some(&smallest) = state.messages.keys().next() {
                    state.messages.remove(&smallest);
                }
            }
        }

        self.topic_less.publish(event_message.clone());
        self.topic_aware.publish(event_message);

        WriteResultItem {
            correlation_id,
            status: WriteStatus::Success,
            notes: None,
            cursor_position: Some(cursor.to_string()),
        }
    }

    /// Filters by `[utc_start_time, utc_end_time]`, optionally by
    /// case-insensitive topic membership, sorts by direction, then pages
    /// *after* sorting. Results are copies, not references into the
    /// store.
    pub fn read_event_messages_for_time_range(
        &self,
        request: TimeRangeReadRequest,
    ) -> Vec<EventMessage> {
        let state = self.state.read();
        let topics_lower: Option<Vec<String>> = request
            .topics
            .map(|topics| topics.into_iter().map(|t| t.to_lowercase()).collect());

        let mut matches: Vec<EventMessage> = state
            .messages
            .iter()
            .filter(|(_, message)| {
                message.utc_event_time >= request.utc_start_time
                    && message.utc_event_time <= request.utc_end_time
            })
            .filter(|(_, message)| match (&topics_lower, &message.topic) {
                (None, _) => true,
                (Some(_), None) => false,
                (Some(topics), Some(topic)) => topics.contains(&topic.to_lowercase()),
            })
            .map(|(_, message)| message.clone())
            .collect();

        if request.direction == ReadDirection::Backwards {
            matches.reverse();
        }

        let page = request.page.max(1);
        let skip = request.page_size.saturating_mul(page - 1);
        matches.into_iter().skip(skip).take(request.page_size).collect()
    }

    /// Parses `cursor_position`; a missing cursor starts from the
    /// beginning or end per `direction`. A syntactically invalid cursor,
    /// or one not present in the store, yields an empty page — never an
    /// error.
    pub fn read_event_messages_using_cursor(&self, request: CursorReadRequest) -> Vec<CursorPage> {
        let state = self.state.read();

        let start_cursor = match &request.cursor_position {
            None => None,
            Some(raw) => match raw.parse::<CursorPosition>() {
                Ok(cursor) if state.messages.contains_key(&cursor) => Some(cursor),
                _ => return Vec::new(),
            },
        };

        let topic_lower = request.topic.map(|t| t.to_lowercase());
        let page_size = request.page_size;

        let selected: Vec<(CursorPosition, EventMessage)> = match request.direction {
            ReadDirection::Forwards => {
                let iter = state.messages.iter();
                let filtered = iter.filter(|(cursor, _)| match start_cursor {
                    Some(start) => **cursor > start,
                    None => true,
                });
                filtered.map(|(c, m)| (*c, m.clone())).collect()
            }
            ReadDirection::Backwards => {
                let iter = state.messages.iter().rev();
                let filtered = iter.filter(|(cursor, _)| match start_cursor {
                    Some(start) => **cursor < start,
                    None => true,
                });
                filtered.map(|(c, m)| (*c, m.clone())).collect()
            }
        };

        selected
            .into_iter()
            .filter(|(_, message)| match (&topic_lower, &message.topic) {
                (None, _) => true,
                (Some(_), None) => false,
                (Some(t), Some(topic)) => topic.to_lowercase() == *t,
            })
            .take(page_size)
            .map(|(cursor, message)| CursorPage {
                message,
                cursor: cursor.to_string(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shutdown(&self) {
        self.topic_less.shutdown();
        self.topic_aware.shutdown();
    }
}

fn no_op_hook() -> TopicHook<String> {
    Arc::new(|_topics, _cancel| Box::pin(async { Ok(()) }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::TracingLogger;
    use crate::runtime::TokioRuntime;
    use std::time::Duration;

    fn store(capacity: usize) -> InMemoryEventStore {
        InMemoryEventStore::new(
            capacity,
            Arc::new(TokioRuntime::new()),
            Arc::new(TracingLogger),
            no_op_hook(),
            no_op_hook(),
        )
    }

    fn at(seconds: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(seconds)
    }

    async fn write_all(store: &InMemoryEventStore, times: &[u64]) {
        let items: Vec<_> = times
            .iter()
            .map(|t| WriteRequestItem {
                correlation_id: None,
                event_message: EventMessage::new(format!("m{t}"), at(*t)),
            })
            .collect();
        let mut results = store.write_event_messages(Box::pin(futures::stream::iter(items)));
        while results.next().await.is_some() {}
    }

    #[tokio::test]
    async fn evict_oldest_retains_the_last_min_len_capacity_messages() {
        let store = store(3);
        write_all(&store, &[10, 20, 30, 40]).await;
        assert_eq!(store.len(), 3);

        let retained = store.read_event_messages_for_time_range(TimeRangeReadRequest {
            utc_start_time: at(0),
            utc_end_time: at(1000),
            direction: ReadDirection::Forwards,
            page: 1,
            page_size: 10,
            topics: None,
        });
        let times: Vec<u64> = retained
            .iter()
            .map(|m| {
                m.utc_event_time
                    .duration_since(UNIX_EPOCH)
                    .unwrap()
                    .as_secs()
            })
            .collect();
        assert_eq!(times, vec![20, 30, 40]);
    }

    #[tokio::test]
    async fn cursor_tiebreak_preserves_write_order_for_identical_timestamps() {
        let store = store(0);
        write_all(&store, &[100, 100]).await;
        assert_eq!(store.len(), 2);

        let page = store.read_event_messages_using_cursor(CursorReadRequest {
            cursor_position: None,
            direction: ReadDirection::Forwards,
            page_size: 10,
            topic: None,
        });
        assert_eq!(page.len(), 2);
        assert_ne!(
            page[0].cursor.split('|').nth(1),
            page[1].cursor.split('|').nth(1)
        );
    }

    #[tokio::test]
    async fn unknown_cursor_returns_empty_not_error() {
        let store = store(0);
        write_all(&store, &[1]).await;
        let page = store.read_event_messages_using_cursor(CursorReadRequest {
            cursor_position: Some("999999|0".to_string()),
            direction: ReadDirection::Forwards,
            page_size: 10,
            topic: None,
        });
        assert!(page.is_empty());
    }
}
