//! tagtrack Core - Entity Types
//!
//! Pure data structures shared by every other crate: the tag record and its
//! bounded logs, the peer notification frame, the error taxonomy and the
//! runtime configuration. Nothing in here performs I/O.

pub mod config;
pub mod entities;
pub mod error;

pub use config::{TagtrackConfig, TlsPaths};
pub use entities::{
    tag_url, AccessEvent, AccessLogEntry, BoundedLog, HistoryItem, Notification, TagRecord,
};
pub use error::{ConfigError, TagError, TagResult, ValidationError};

use chrono::Utc;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Globally unique tag identifier, immutable once created.
pub type TagId = String;

/// Unix timestamp in whole seconds.
pub type UnixTimestamp = i64;

/// Maximum number of entries kept in a tag's history and access logs.
pub const MAX_LOG_ENTRIES: usize = 150;

/// Current wall-clock time as a unix timestamp.
pub fn unix_now() -> UnixTimestamp {
    Utc::now().timestamp()
}
