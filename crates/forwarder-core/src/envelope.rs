//! # Ingest Envelope
//!
//! MessagePack envelope written to the ingest topics by the relay tier.
//! A map with `payload`, `start_time`, `event_id` and `project_id`; any
//! other key is ignored.

use crate::error::DecodeError;
use crate::model::CacheKey;
use serde::{Deserialize, Serialize};

/// Decoded form of an ingest message payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedEnvelope {
    pub event_id: String,
    pub project_id: u64,
    /// Seconds since the epoch at which the relay received the event
    pub start_time: f64,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl DecodedEnvelope {
    /// Decode a raw message payload
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Encode as a MessagePack map, the form [`DecodedEnvelope::decode`] reads
    pub fn encode(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.project_id, &self.event_id)
    }
}
