//! In-process change-log transport and its consumer.
//!
//! The transport contract the rest of the engine is written against:
//! at-least-once delivery, per-record-id FIFO, and no concurrent
//! delivery of two events for the same record id.

mod changelog;
mod consumer;

pub use changelog::{ChangeLog, ChangeLogEntry, EventPublisher};
pub use consumer::{Consumer, EventHandler};
