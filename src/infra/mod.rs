//! Infrastructure adapters for slot storage.

pub mod store;

pub use store::{FileSlotStore, InMemorySlotStore};
