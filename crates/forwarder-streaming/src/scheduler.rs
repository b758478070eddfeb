//! # Task Scheduler
//!
//! Fire-and-forget submission of preprocessing work

use async_trait::async_trait;
use forwarder_core::{CollaboratorError, PreprocessTask};

/// Accepts deferred preprocessing work.
///
/// Submissions can repeat when a batch is redelivered, so whatever consumes
/// the tasks has to be idempotent per event id.
#[async_trait]
pub trait TaskScheduler: Send + Sync {
    /// Submit a task; returns once the scheduler has accepted it
    async fn schedule(&self, task: &PreprocessTask) -> Result<(), CollaboratorError>;

    /// Get scheduler name
    fn name(&self) -> &'static str;
}

#[cfg(feature = "redis")]
pub use self::redis_queue::RedisTaskQueue;

#[cfg(feature = "redis")]
mod redis_queue {
    use super::TaskScheduler;
    use async_trait::async_trait;
    use forwarder_core::{CollaboratorError, PreprocessTask};
    use redis::aio::MultiplexedConnection;

    /// Pushes JSON-encoded tasks onto a Redis list for the preprocessing workers
    #[derive(Clone)]
    pub struct RedisTaskQueue {
        connection: MultiplexedConnection,
        queue: String,
    }

    impl RedisTaskQueue {
        pub async fn connect(url: &str, queue: impl Into<String>) -> Result<Self, CollaboratorError> {
            let client =
                redis::Client::open(url).map_err(|e| CollaboratorError::Scheduler(e.to_string()))?;
            let connection = client
                .get_multiplexed_tokio_connection()
                .await
                .map_err(|e| CollaboratorError::Scheduler(e.to_string()))?;
            Ok(Self::from_connection(connection, queue))
        }

        pub fn from_connection(connection: MultiplexedConnection, queue: impl Into<String>) -> Self {
            Self {
                connection,
                queue: queue.into(),
            }
        }

        pub fn queue(&self) -> &str {
            &self.queue
        }
    }

    #[async_trait]
    impl TaskScheduler for RedisTaskQueue {
        async fn schedule(&self, task: &PreprocessTask) -> Result<(), CollaboratorError> {
            let body = serde_json::to_vec(task)
                .map_err(|e| CollaboratorError::Scheduler(e.to_string()))?;
            let mut connection = self.connection.clone();

            redis::cmd("RPUSH")
                .arg(&self.queue)
                .arg(body)
                .query_async::<_, ()>(&mut connection)
                .await
                .map_err(|e| CollaboratorError::Scheduler(e.to_string()))
        }

        fn name(&self) -> &'static str {
            "redis_task_queue"
        }
    }
}
