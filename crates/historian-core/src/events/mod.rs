//! Event identity, payload, and the in-memory store built from them.
pub mod cursor;
pub mod message;
pub mod store;

pub use cursor::{CursorParseError, CursorPosition};
pub use message::{EventMessage, EventPriority};
pub use store::{
    CursorPage, CursorReadRequest, InMemoryEventStore, ReadDirection, TimeRangeReadRequest,
    WriteRequestItem, WriteResultItem, WriteStatus,
};
