//! # Staging Cache
//!
//! Key/value store payloads are parked in until preprocessing picks them up

use async_trait::async_trait;
use forwarder_core::{CacheKey, CollaboratorError};
use std::time::Duration;

/// Staging store for raw event payloads.
///
/// Writes must be idempotent: setting the same key to the same value twice
/// leaves the store as a single write would.
#[async_trait]
pub trait StagingCache: Send + Sync {
    /// Store `value` verbatim under `key`, expiring after `ttl`
    async fn set(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> Result<(), CollaboratorError>;

    /// Get cache name
    fn name(&self) -> &'static str;
}

#[cfg(feature = "redis")]
pub use self::redis_cache::RedisCache;

#[cfg(feature = "redis")]
mod redis_cache {
    use super::StagingCache;
    use async_trait::async_trait;
    use forwarder_core::{CacheKey, CollaboratorError};
    use redis::aio::MultiplexedConnection;
    use std::time::Duration;

    /// Redis staging cache using `SET key value EX ttl`
    #[derive(Clone)]
    pub struct RedisCache {
        connection: MultiplexedConnection,
    }

    impl RedisCache {
        pub async fn connect(url: &str) -> Result<Self, CollaboratorError> {
            let client =
                redis::Client::open(url).map_err(|e| CollaboratorError::Cache(e.to_string()))?;
            let connection = client
                .get_multiplexed_tokio_connection()
                .await
                .map_err(|e| CollaboratorError::Cache(e.to_string()))?;
            Ok(Self::from_connection(connection))
        }

        pub fn from_connection(connection: MultiplexedConnection) -> Self {
            Self { connection }
        }
    }

    #[async_trait]
    impl StagingCache for RedisCache {
        async fn set(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> Result<(), CollaboratorError> {
            let mut connection = self.connection.clone();
            // EX rejects 0
            let ttl_seconds = ttl.as_secs().max(1);

            redis::cmd("SET")
                .arg(key.as_str())
                .arg(value)
                .arg("EX")
                .arg(ttl_seconds)
                .query_async::<_, ()>(&mut connection)
                .await
                .map_err(|e| CollaboratorError::Cache(e.to_string()))
        }

        fn name(&self) -> &'static str {
            "redis_cache"
        }
    }
}
