//! Error taxonomy shared by the forwarder crates

/// Startup-time configuration failures. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Unknown stream category: {0}")]
    UnknownCategory(String),

    #[error("Topic {topic} is not registered in the topic table")]
    UnregisteredTopic { topic: String },

    #[error("Topic {topic} references unknown cluster {cluster}")]
    UnknownCluster { topic: String, cluster: String },

    #[error("Cluster {0} has no bootstrap servers")]
    NoBootstrapServers(String),

    #[error("Invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },

    #[error("Failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse settings file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failure to turn a message payload into an envelope.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Message has no payload")]
    Empty,

    #[error("Malformed envelope: {0}")]
    Malformed(#[from] rmp_serde::decode::Error),
}

/// Failure reported by the cache or the task scheduler.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("Cache write failed: {0}")]
    Cache(String),

    #[error("Task submission failed: {0}")]
    Scheduler(String),
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;
