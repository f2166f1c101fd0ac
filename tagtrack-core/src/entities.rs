//! Core entity structures

use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use crate::{TagId, UnixTimestamp, MAX_LOG_ENTRIES};

// ============================================================================
// BOUNDED LOG
// ============================================================================

/// FIFO log capped at [`MAX_LOG_ENTRIES`].
///
/// Pushing onto a full log evicts the oldest entry first. Deserializing a
/// longer sequence keeps only the newest entries, so a record loaded from
/// the store can never violate the cap. A JSON `null` deserializes as empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedLog<T> {
    entries: VecDeque<T>,
}

impl<T> BoundedLog<T> {
    /// Maximum number of retained entries.
    pub const CAPACITY: usize = MAX_LOG_ENTRIES;

    /// Create an empty log.
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Append an entry, returning the evicted oldest entry if the log was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.entries.len() >= Self::CAPACITY {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(item);
        evicted
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.entries.iter()
    }

    /// Oldest retained entry.
    pub fn first(&self) -> Option<&T> {
        self.entries.front()
    }

    /// Most recently appended entry.
    pub fn last(&self) -> Option<&T> {
        self.entries.back()
    }
}

impl<T: Clone> BoundedLog<T> {
    /// Copy the entries out, oldest first.
    pub fn to_vec(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }
}

impl<T> Default for BoundedLog<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FromIterator<T> for BoundedLog<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut log = Self::new();
        for item in iter {
            log.push(item);
        }
        log
    }
}

impl<T> Extend<T> for BoundedLog<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.push(item);
        }
    }
}

impl<'a, T> IntoIterator for &'a BoundedLog<T> {
    type Item = &'a T;
    type IntoIter = std::collections::vec_deque::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl<T: Serialize> Serialize for BoundedLog<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.iter())
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for BoundedLog<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LogVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for LogVisitor<T> {
            type Value = BoundedLog<T>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a sequence of log entries or null")
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(BoundedLog::new())
            }

            fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(BoundedLog::new())
            }

            fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
                d.deserialize_seq(self)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut log = BoundedLog::new();
                while let Some(item) = seq.next_element()? {
                    log.push(item);
                }
                Ok(log)
            }
        }

        deserializer.deserialize_option(LogVisitor(PhantomData))
    }
}

// ============================================================================
// TAG ENTITIES
// ============================================================================

/// Snapshot of a tag's ownership and content at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub client_id: String,
    #[serde(rename = "hash")]
    pub content_hash: String,
    #[serde(rename = "created")]
    pub created_at: UnixTimestamp,
}

/// One resolution (scan) of a tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEvent {
    pub ip: String,
    pub user_agent: String,
    pub timestamp: UnixTimestamp,
}

impl AccessEvent {
    /// Attach the tag id, producing a fleet-wide log entry.
    pub fn for_tag(&self, tag_id: &str) -> AccessLogEntry {
        AccessLogEntry {
            ip: self.ip.clone(),
            user_agent: self.user_agent.clone(),
            timestamp: self.timestamp,
            tag_id: tag_id.to_string(),
        }
    }
}

/// Entry of the global access log, spanning all tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub ip: String,
    pub user_agent: String,
    pub timestamp: UnixTimestamp,
    pub tag_id: TagId,
}

/// A tracked tag.
///
/// `id` never changes after creation and `url` is assigned at most once.
/// Both logs are [`BoundedLog`]s, so the 150-entry cap holds for every
/// record regardless of how it was built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRecord {
    pub id: TagId,
    #[serde(default)]
    pub client_id: String,
    #[serde(rename = "hash", default)]
    pub content_hash: String,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "created", default)]
    pub created_at: UnixTimestamp,
    #[serde(default)]
    pub history: BoundedLog<HistoryItem>,
    #[serde(rename = "access", default)]
    pub access_log: BoundedLog<AccessEvent>,
}

impl TagRecord {
    /// Create a record with empty logs and no URL.
    pub fn new(
        id: impl Into<TagId>,
        client_id: impl Into<String>,
        content_hash: impl Into<String>,
        created_at: UnixTimestamp,
    ) -> Self {
        Self {
            id: id.into(),
            client_id: client_id.into(),
            content_hash: content_hash.into(),
            url: String::new(),
            created_at,
            history: BoundedLog::new(),
            access_log: BoundedLog::new(),
        }
    }

    /// Append a history snapshot, evicting the oldest past the cap.
    pub fn append_history(
        &mut self,
        client_id: impl Into<String>,
        content_hash: impl Into<String>,
        created_at: UnixTimestamp,
    ) {
        self.history.push(HistoryItem {
            client_id: client_id.into(),
            content_hash: content_hash.into(),
            created_at,
        });
    }

    /// Append an access event, evicting the oldest past the cap.
    pub fn append_access(
        &mut self,
        ip: impl Into<String>,
        user_agent: impl Into<String>,
        timestamp: UnixTimestamp,
    ) {
        self.access_log.push(AccessEvent {
            ip: ip.into(),
            user_agent: user_agent.into(),
            timestamp,
        });
    }

    /// Current ownership and content as a history item.
    pub fn snapshot(&self) -> HistoryItem {
        HistoryItem {
            client_id: self.client_id.clone(),
            content_hash: self.content_hash.clone(),
            created_at: self.created_at,
        }
    }

    /// Whether the URL has been assigned.
    pub fn has_url(&self) -> bool {
        !self.url.is_empty()
    }

    /// Assign `{base_url}/{id}` if no URL is set yet. Returns whether it assigned.
    pub fn assign_url(&mut self, base_url: &str) -> bool {
        if self.has_url() {
            return false;
        }
        self.url = tag_url(base_url, &self.id);
        true
    }
}

/// Resolution URL for a tag id under `base_url`.
pub fn tag_url(base_url: &str, id: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), id)
}

// ============================================================================
// NOTIFICATION FRAME
// ============================================================================

/// Structured frame sent by peers on the notification channel.
///
/// A non-empty `id` asserts the peer's client identity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub info: String,
    #[serde(default)]
    pub time: String,
}
