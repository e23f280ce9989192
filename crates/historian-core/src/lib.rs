//! historian-core: the real-time streaming substrate for a plant-historian
//! adapter framework.
//!
//! This crate does not talk to any historian, bus, or wire protocol itself.
//! It provides the four pieces that every such adapter needs and that are
//! genuinely hard to get right under concurrent load:
//!
//! - [`subscription::channel::SubscriptionChannel`] — single-consumer value
//!   delivery with optional rate limiting and drop-newest backpressure.
//! - [`subscription::topic_manager::TopicSubscriptionManager`] — a
//!   reference-counted topic registry that serializes 0↔1 subscriber
//!   transitions so an adapter can attach/detach an upstream source exactly
//!   once per transition.
//! - [`events::store::InMemoryEventStore`] — a capacity-bounded,
//!   cursor-ordered ring that is simultaneously a push source, an
//!   append-only writer, and a seekable reader.
//! - [`aggregation`] — a streaming time-bucketing engine over raw tag
//!   samples with a pluggable registry of aggregate calculators.
//!
//! # Versioning
//!
//! This crate follows SemVer 2.0. Breaking changes land only on major
//! bumps; anything deprecated is announced at least one minor version
//! before removal.

pub mod aggregation;
pub mod cancellation;
pub mod error;
pub mod events;
pub mod observability;
pub mod runtime;
pub mod stream;
pub mod subscription;

pub use cancellation::Cancellation;
pub use error::{CoreError, CoreResult};
