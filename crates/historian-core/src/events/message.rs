//! The event store's sole payload type.
use std::collections::BTreeMap;
use std::time::SystemTime;

/// Informational urgency carried with an event, for adapters that
/// surface it to a downstream consumer. Has no effect on store or
/// dispatch ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum EventPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
    Unknown,
}

/// A single, immutable event. Constructed once by a writer and shared
/// thereafter by both the push and the historical-read paths.
#[derive(Clone, Debug, PartialEq)]
pub struct EventMessage {
    pub id: String,
    pub utc_event_time: SystemTime,
    pub priority: EventPriority,
    pub category: Option<String>,
    pub message: Option<String>,
    pub topic: Option<String>,
    pub properties: BTreeMap<String, String>,
}

impl EventMessage {
    pub fn new(id: impl Into<String>, utc_event_time: SystemTime) -> Self {
        EventMessage {
            id: id.into(),
            utc_event_time,
            priority: EventPriority::default(),
            category: None,
            message: None,
            topic: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}
