//! Record store seam.
//!
//! The engine never owns record data; it reads point-in-time record
//! state and field schema through the ports here. The in-memory
//! implementation backs tests and local wiring.

mod memory;
mod store;
mod vtagged;

pub use memory::InMemoryRecordStore;
pub use store::{FieldTypes, FilterStateProvider, RecordStore};
pub use vtagged::VTaggedRecord;
