//! Forwarder error types

use forwarder_core::{CollaboratorError, ConfigurationError, DecodeError};

/// Errors that terminate a forwarding run
#[derive(Debug, thiserror::Error)]
pub enum ForwarderError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Delivery error on {topic}[{partition}] at offset {offset}: {reason}")]
    Delivery {
        topic: String,
        partition: i32,
        offset: i64,
        reason: String,
    },

    #[error("Consumer error on {topic}: {reason}")]
    Consumer { topic: String, reason: String },

    #[error("Undecodable message on {topic}[{partition}] at offset {offset}: {source}")]
    Decode {
        topic: String,
        partition: i32,
        offset: i64,
        source: DecodeError,
    },

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Invalid option {name}: {reason}")]
    InvalidOption { name: &'static str, reason: String },

    #[error("Consumer closed")]
    ConsumerClosed,
}

pub type ForwarderResult<T> = Result<T, ForwarderError>;
