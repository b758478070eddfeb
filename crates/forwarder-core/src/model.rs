//! Stream and message models for the ingest forwarder

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Logical ingest stream a forwarder consumes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamCategory {
    /// Plain error events
    Events,
    /// Events carrying attachments
    Attachments,
    /// Transaction events
    Transactions,
}

impl StreamCategory {
    pub const ALL: [StreamCategory; 3] = [
        StreamCategory::Events,
        StreamCategory::Attachments,
        StreamCategory::Transactions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamCategory::Events => "events",
            StreamCategory::Attachments => "attachments",
            StreamCategory::Transactions => "transactions",
        }
    }
}

impl fmt::Display for StreamCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamCategory {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StreamCategory::ALL
            .into_iter()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| ConfigurationError::UnknownCategory(s.to_string()))
    }
}

/// Broker coordinates resolved for a stream category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Topic to subscribe to
    pub topic: String,

    /// Logical cluster the topic lives on
    pub cluster: String,

    /// Bootstrap servers of the cluster
    pub bootstrap_servers: Vec<String>,

    /// Extra client properties configured for the cluster
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

/// Error the broker attached to a delivered record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFault {
    pub reason: String,
}

impl DeliveryFault {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

impl fmt::Display for DeliveryFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Partition of a record not tied to any partition
pub const UNASSIGNED_PARTITION: i32 = -1;

/// Offset of a record without a position in the log
pub const INVALID_OFFSET: i64 = -1;

/// A record handed out by one poll of the broker client
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Option<Vec<u8>>,
    pub error: Option<DeliveryFault>,
}

impl RawMessage {
    /// A successfully delivered record
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            payload: Some(payload),
            error: None,
        }
    }

    /// An error the client raised outside of any record
    pub fn consumer_error(topic: impl Into<String>, fault: DeliveryFault) -> Self {
        Self::failed(topic, UNASSIGNED_PARTITION, INVALID_OFFSET, fault)
    }

    /// Whether this record has a real partition and offset
    pub fn has_position(&self) -> bool {
        self.partition != UNASSIGNED_PARTITION && self.offset != INVALID_OFFSET
    }

    /// A record the broker reported as failed
    pub fn failed(topic: impl Into<String>, partition: i32, offset: i64, fault: DeliveryFault) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            payload: None,
            error: Some(fault),
        }
    }
}

/// Staging address of an event payload in the cache.
///
/// Rendered as `e:{event_id}:{project_id}`. The project id is numeric and
/// never contains `:`, so the pair is recovered by splitting at the last
/// separator even when the event id contains one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(project_id: u64, event_id: &str) -> Self {
        CacheKey(format!("e:{}:{}", event_id, project_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split the key back into `(event_id, project_id)`
    pub fn parts(&self) -> Option<(&str, u64)> {
        let rest = self.0.strip_prefix("e:")?;
        let (event_id, project_id) = rest.rsplit_once(':')?;
        Some((event_id, project_id.parse().ok()?))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Deferred work item asking downstream processing to pick up a staged event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessTask {
    pub cache_key: CacheKey,
    pub event_id: String,
    pub start_time: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_category_round_trip() {
        for category in StreamCategory::ALL {
            let parsed: StreamCategory = category.as_str().parse().unwrap();
            assert_eq!(parsed, category);
        }
    }

    #[test]
    fn test_unknown_category() {
        let err = "profiles".parse::<StreamCategory>().unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownCategory(name) if name == "profiles"));
    }

    #[test]
    fn test_category_serde_is_lowercase() {
        let json = serde_json::to_string(&StreamCategory::Transactions).unwrap();
        assert_eq!(json, "\"transactions\"");
    }

    #[test]
    fn test_consumer_error_has_no_position() {
        let message = RawMessage::consumer_error("ingest-events", DeliveryFault::new("all brokers down"));
        assert!(!message.has_position());
        assert!(message.payload.is_none());

        let message = RawMessage::failed("ingest-events", 0, 12, DeliveryFault::new("offset out of range"));
        assert!(message.has_position());
    }

    #[test]
    fn test_cache_key_format() {
        let key = CacheKey::new(42, "a1");
        assert_eq!(key.as_str(), "e:a1:42");
        assert_eq!(key.parts(), Some(("a1", 42)));
    }

    #[test]
    fn test_cache_key_with_separator_in_event_id() {
        let key = CacheKey::new(7, "a:1");
        assert_eq!(key.parts(), Some(("a:1", 7)));
    }

    #[test]
    fn test_preprocess_task_json() {
        let task = PreprocessTask {
            cache_key: CacheKey::new(1, "abc"),
            event_id: "abc".to_string(),
            start_time: 1_600_000_000.5,
        };
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["cache_key"], "e:abc:1");
        assert_eq!(json["start_time"], 1_600_000_000.5);
    }

    proptest! {
        #[test]
        fn prop_cache_key_is_collision_free(
            a in (any::<u64>(), ".{0,12}"),
            b in (any::<u64>(), ".{0,12}"),
        ) {
            let key_a = CacheKey::new(a.0, &a.1);
            let key_b = CacheKey::new(b.0, &b.1);
            prop_assert_eq!(key_a == key_b, a == b);
        }

        #[test]
        fn prop_cache_key_parts_recover_pair(project_id in any::<u64>(), event_id in ".{0,16}") {
            let key = CacheKey::new(project_id, &event_id);
            prop_assert_eq!(key.parts(), Some((event_id.as_str(), project_id)));
        }
    }
}
