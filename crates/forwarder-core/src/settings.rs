//! # Forwarder Settings
//!
//! Settings table the stream registry resolves against, plus the cache,
//! queue and retry knobs of a forwarder process. Loaded from a JSON file;
//! every section falls back to the local development defaults.

use crate::error::{ConfigResult, ConfigurationError};
use crate::model::StreamCategory;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Top-level forwarder settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderSettings {
    /// Broker clusters and topic layout
    pub kafka: KafkaSettings,

    /// Staging cache and task queue
    pub redis: RedisSettings,

    /// Retry policy around cache and scheduler calls
    pub retry: RetryConfig,
}

/// Kafka cluster and topic layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaSettings {
    /// Cluster name -> connection settings
    pub clusters: HashMap<String, ClusterSettings>,

    /// Topic name -> placement
    pub topics: HashMap<String, TopicSettings>,

    /// Topic carrying plain events
    pub ingest_events: String,

    /// Topic carrying events with attachments
    pub ingest_attachments: String,

    /// Topic carrying transactions
    pub ingest_transactions: String,
}

/// Connection settings of a broker cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSettings {
    pub bootstrap_servers: Vec<String>,

    /// Additional client properties (e.g. security settings)
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

/// Placement of a topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicSettings {
    pub cluster: String,
}

/// Staging cache and task queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    /// Redis server URL
    pub url: String,

    /// List key preprocess tasks are pushed onto
    pub task_queue: String,

    /// Expiry of staged payloads
    pub cache_ttl_seconds: u64,
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts, including the first one
    pub max_attempts: u32,

    /// Initial backoff duration in milliseconds
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration in milliseconds
    pub max_backoff_ms: u64,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

pub const DEFAULT_CLUSTER: &str = "default";
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 3600;

impl Default for KafkaSettings {
    fn default() -> Self {
        let topics = ["ingest-events", "ingest-attachments", "ingest-transactions"];

        Self {
            clusters: HashMap::from([(
                DEFAULT_CLUSTER.to_string(),
                ClusterSettings {
                    bootstrap_servers: vec!["127.0.0.1:9092".to_string()],
                    properties: HashMap::new(),
                },
            )]),
            topics: topics
                .iter()
                .map(|topic| {
                    (
                        topic.to_string(),
                        TopicSettings {
                            cluster: DEFAULT_CLUSTER.to_string(),
                        },
                    )
                })
                .collect(),
            ingest_events: topics[0].to_string(),
            ingest_attachments: topics[1].to_string(),
            ingest_transactions: topics[2].to_string(),
        }
    }
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            task_queue: "preprocess-events".to_string(),
            cache_ttl_seconds: DEFAULT_CACHE_TTL_SECONDS,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 100,
            max_backoff_ms: 10000,
            backoff_multiplier: 2.0,
        }
    }
}

impl KafkaSettings {
    /// Topic name configured for a category
    pub fn topic_for(&self, category: StreamCategory) -> &str {
        match category {
            StreamCategory::Events => &self.ingest_events,
            StreamCategory::Attachments => &self.ingest_attachments,
            StreamCategory::Transactions => &self.ingest_transactions,
        }
    }
}

impl ForwarderSettings {
    /// Load settings from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let settings: ForwarderSettings = serde_json::from_str(&raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the forwarder cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.redis.cache_ttl_seconds == 0 {
            return Err(ConfigurationError::InvalidSetting {
                name: "redis.cache_ttl_seconds",
                reason: "must be positive".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigurationError::InvalidSetting {
                name: "retry.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigurationError::InvalidSetting {
                name: "retry.backoff_multiplier",
                reason: "must be at least 1.0".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = ForwarderSettings::default();

        assert_eq!(settings.kafka.topic_for(StreamCategory::Events), "ingest-events");
        assert_eq!(settings.kafka.topics.len(), 3);
        assert_eq!(
            settings.kafka.clusters[DEFAULT_CLUSTER].bootstrap_servers,
            vec!["127.0.0.1:9092".to_string()]
        );
        assert_eq!(settings.redis.cache_ttl_seconds, 3600);
        assert_eq!(settings.retry.max_attempts, 1);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "kafka": {{
                    "clusters": {{ "eu": {{ "bootstrap_servers": ["kafka-eu:9092"] }} }},
                    "topics": {{ "events-eu": {{ "cluster": "eu" }} }},
                    "ingest_events": "events-eu"
                }},
                "redis": {{ "url": "redis://cache:6379" }}
            }}"#
        )
        .unwrap();

        let settings = ForwarderSettings::from_file(file.path()).unwrap();

        assert_eq!(settings.kafka.topic_for(StreamCategory::Events), "events-eu");
        assert_eq!(
            settings.kafka.topic_for(StreamCategory::Attachments),
            "ingest-attachments"
        );
        assert_eq!(settings.redis.url, "redis://cache:6379");
        assert_eq!(settings.redis.task_queue, "preprocess-events");
        assert_eq!(settings.retry, RetryConfig::default());
    }

    #[test]
    fn test_missing_file() {
        let err = ForwarderSettings::from_file("/nonexistent/forwarder.json").unwrap_err();
        assert!(matches!(err, ConfigurationError::Io(_)));
    }

    #[test]
    fn test_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        let err = ForwarderSettings::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigurationError::Parse(_)));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut settings = ForwarderSettings::default();
        settings.retry.max_attempts = 0;

        let err = settings.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::InvalidSetting { name: "retry.max_attempts", .. }
        ));
    }
}
