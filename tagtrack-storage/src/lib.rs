//! tagtrack Storage - Store Contract, Tag Cache and Access Journal
//!
//! The durable store is an external collaborator reached through
//! [`TagStore`]. [`TagCache`] keeps the authoritative in-memory view of tag
//! records on top of it (read-through on miss, write-through on mutation),
//! and [`AccessJournal`] records tag resolutions into the bounded per-tag
//! logs, the fleet-wide log and the store's append-only access table.

pub mod cache;
pub mod journal;
pub mod store;

pub use cache::{CacheStats, TagCache, UpsertOutcome};
pub use journal::{AccessJournal, JournalConfig, JournalStats};
pub use store::{InMemoryTagStore, TagStore};
