//! # Forwarder Options
//!
//! Run parameters of a forwarding loop

use crate::error::{ForwarderError, ForwarderResult};
use forwarder_core::{ForwarderSettings, RetryConfig, DEFAULT_CACHE_TTL_SECONDS};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// What to do with a message whose payload cannot be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeFailurePolicy {
    /// Abort the run without committing the batch
    #[default]
    Fail,
    /// Log the message and move on; its offset is committed with the batch
    SkipAndLog,
}

impl FromStr for DecodeFailurePolicy {
    type Err = ForwarderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail" => Ok(DecodeFailurePolicy::Fail),
            "skip" | "skip_and_log" => Ok(DecodeFailurePolicy::SkipAndLog),
            other => Err(ForwarderError::InvalidOption {
                name: "decode_policy",
                reason: format!("unknown policy {}", other),
            }),
        }
    }
}

/// Forwarding loop configuration
#[derive(Debug, Clone)]
pub struct ForwarderOptions {
    /// Maximum messages per poll, and so per commit
    pub commit_batch_size: usize,

    /// Maximum time a poll blocks waiting for messages
    pub max_batch_time: Duration,

    /// Expiry of staged payloads
    pub cache_ttl: Duration,

    /// Handling of undecodable payloads
    pub decode_policy: DecodeFailurePolicy,

    /// Retry policy around cache and scheduler calls
    pub retry: RetryConfig,
}

impl Default for ForwarderOptions {
    fn default() -> Self {
        Self {
            commit_batch_size: 100,
            max_batch_time: Duration::from_secs(1),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECONDS),
            decode_policy: DecodeFailurePolicy::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl ForwarderOptions {
    /// Options carrying the cache expiry and retry policy of the settings file
    pub fn from_settings(settings: &ForwarderSettings) -> Self {
        Self {
            cache_ttl: Duration::from_secs(settings.redis.cache_ttl_seconds),
            retry: settings.retry.clone(),
            ..Self::default()
        }
    }

    pub fn with_commit_batch_size(mut self, commit_batch_size: usize) -> Self {
        self.commit_batch_size = commit_batch_size;
        self
    }

    pub fn with_max_batch_time(mut self, max_batch_time: Duration) -> Self {
        self.max_batch_time = max_batch_time;
        self
    }

    /// Set the poll bound from fractional seconds
    pub fn with_max_batch_time_secs(self, seconds: f64) -> ForwarderResult<Self> {
        let max_batch_time = Duration::try_from_secs_f64(seconds).map_err(|e| {
            ForwarderError::InvalidOption {
                name: "max_batch_time",
                reason: e.to_string(),
            }
        })?;
        Ok(self.with_max_batch_time(max_batch_time))
    }

    pub fn with_cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }

    pub fn with_decode_policy(mut self, decode_policy: DecodeFailurePolicy) -> Self {
        self.decode_policy = decode_policy;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> ForwarderResult<()> {
        if self.commit_batch_size == 0 {
            return Err(ForwarderError::InvalidOption {
                name: "commit_batch_size",
                reason: "must be positive".to_string(),
            });
        }
        if self.max_batch_time.is_zero() {
            return Err(ForwarderError::InvalidOption {
                name: "max_batch_time",
                reason: "must be positive".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ForwarderError::InvalidOption {
                name: "retry.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
