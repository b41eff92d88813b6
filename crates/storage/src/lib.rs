//! Entity store abstraction and implementations for Lapse.
//!
//! This crate provides the narrow store contract the scheduler consumes,
//! an in-memory store, a JSON file store and an optional SQLite store.

#![warn(missing_docs)]

pub mod trait_;
pub mod memory;
#[cfg(feature = "json")]
pub mod json_storage;
#[cfg(feature = "sqlite")]
pub mod sqlite_storage;

pub use trait_::{close_offer, CandidateFilter, EntityStore, Result, StorageError};
pub use memory::MemoryStore;
#[cfg(feature = "json")]
pub use json_storage::JsonStorage;
#[cfg(feature = "sqlite")]
pub use sqlite_storage::SqliteStorage;
