//! Slot store backends.

pub mod file;
pub mod memory;

pub use file::{FileSlotStore, JsonFile};
pub use memory::{InMemorySlotStore, NoPersistence, Persistence, SlotTableStore};
