//! # Batch Consumer
//!
//! Broker client seam of the forwarding loop and the Kafka implementation
//! behind the `kafka` feature.

use crate::error::ForwarderResult;
use async_trait::async_trait;
use forwarder_core::{RawMessage, StreamConfig};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Broker client owned by exactly one forwarding loop
#[async_trait]
pub trait BatchConsumer: Send {
    /// Poll up to `max_messages` records, waiting at most `timeout`.
    ///
    /// An empty batch means the wait elapsed. A record carrying a delivery
    /// error is always the last one of its batch.
    async fn poll_batch(
        &mut self,
        max_messages: usize,
        timeout: Duration,
    ) -> ForwarderResult<Vec<RawMessage>>;

    /// Synchronously commit the offsets of everything polled so far
    async fn commit(&mut self) -> ForwarderResult<()>;

    /// Leave the consumer group and release the connection
    async fn close(&mut self) -> ForwarderResult<()>;

    /// Get consumer name
    fn name(&self) -> &'static str;
}

/// Client properties for a forwarding consumer.
///
/// Cluster properties are applied first; the commit and reset settings the
/// forwarder depends on always win.
pub fn consumer_properties(group_id: &str, config: &StreamConfig) -> BTreeMap<String, String> {
    let mut properties: BTreeMap<String, String> = config
        .properties
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let fixed = [
        ("bootstrap.servers", config.bootstrap_servers.join(",")),
        ("group.id", group_id.to_string()),
        // offsets are committed once per batch, after its side effects
        ("enable.auto.commit", "false".to_string()),
        ("enable.auto.offset.store", "true".to_string()),
        ("enable.partition.eof", "false".to_string()),
        ("auto.offset.reset", "earliest".to_string()),
    ];
    for (key, value) in fixed {
        properties.insert(key.to_string(), value);
    }

    properties
}

/// Collect up to `max_messages` records from `recv` until `timeout` elapses.
///
/// A record carrying a delivery error ends the batch. A timeout too large to
/// form a deadline waits for the batch to fill instead.
pub async fn collect_batch<F, Fut>(max_messages: usize, timeout: Duration, mut recv: F) -> Vec<RawMessage>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RawMessage>,
{
    let deadline = Instant::now().checked_add(timeout);
    let mut batch = Vec::new();

    while batch.len() < max_messages {
        let message = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, recv()).await {
                Ok(message) => message,
                Err(_elapsed) => break,
            },
            None => recv().await,
        };
        let failed = message.error.is_some();
        batch.push(message);
        if failed {
            break;
        }
    }

    batch
}

#[cfg(feature = "kafka")]
pub use kafka::{ConsumerFactory, KafkaBatchConsumer};

#[cfg(feature = "kafka")]
mod kafka {
    use super::{collect_batch, consumer_properties, BatchConsumer};
    use crate::error::{ForwarderError, ForwarderResult};
    use async_trait::async_trait;
    use forwarder_core::{DeliveryFault, KafkaSettings, RawMessage, StreamCategory, StreamRegistry};
    use rdkafka::config::ClientConfig;
    use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
    use rdkafka::message::Message;
    use std::time::Duration;
    use tracing::{debug, info};

    /// Builds Kafka consumers bound to a resolved ingest stream
    pub struct ConsumerFactory {
        registry: StreamRegistry,
    }

    impl ConsumerFactory {
        pub fn new(registry: StreamRegistry) -> Self {
            Self { registry }
        }

        pub fn from_settings(settings: &KafkaSettings) -> Self {
            Self::new(StreamRegistry::new(settings.clone()))
        }

        /// Create a consumer for `category` in `group_id`, subscribed to its topic
        pub fn create(
            &self,
            group_id: &str,
            category: StreamCategory,
        ) -> ForwarderResult<KafkaBatchConsumer> {
            let stream = self.registry.resolve(category)?;
            let properties = consumer_properties(group_id, &stream);

            let mut client_config = ClientConfig::new();
            for (key, value) in &properties {
                client_config.set(key, value);
            }

            let consumer: StreamConsumer = client_config
                .create()
                .map_err(|e| ForwarderError::Broker(e.to_string()))?;
            consumer
                .subscribe(&[stream.topic.as_str()])
                .map_err(|e| ForwarderError::Broker(e.to_string()))?;

            info!(
                topic = %stream.topic,
                cluster = %stream.cluster,
                group_id,
                "Subscribed consumer for {} stream",
                category
            );

            Ok(KafkaBatchConsumer {
                consumer,
                topic: stream.topic,
                group_id: group_id.to_string(),
            })
        }
    }

    /// rdkafka consumer with batch polls and synchronous commits
    pub struct KafkaBatchConsumer {
        consumer: StreamConsumer,
        topic: String,
        group_id: String,
    }

    impl KafkaBatchConsumer {
        pub fn topic(&self) -> &str {
            &self.topic
        }

        pub fn group_id(&self) -> &str {
            &self.group_id
        }
    }

    #[async_trait]
    impl BatchConsumer for KafkaBatchConsumer {
        async fn poll_batch(
            &mut self,
            max_messages: usize,
            timeout: Duration,
        ) -> ForwarderResult<Vec<RawMessage>> {
            let consumer = &self.consumer;
            let topic = self.topic.as_str();
            let batch = collect_batch(max_messages, timeout, || async move {
                match consumer.recv().await {
                    Ok(message) => RawMessage {
                        topic: message.topic().to_string(),
                        partition: message.partition(),
                        offset: message.offset(),
                        payload: message.payload().map(<[u8]>::to_vec),
                        error: None,
                    },
                    // the client reports errors not tied to a record
                    Err(e) => RawMessage::consumer_error(topic, DeliveryFault::new(e.to_string())),
                }
            })
            .await;

            debug!(group_id = %self.group_id, "Polled {} messages", batch.len());
            Ok(batch)
        }

        async fn commit(&mut self) -> ForwarderResult<()> {
            self.consumer
                .commit_consumer_state(CommitMode::Sync)
                .map_err(|e| ForwarderError::Broker(e.to_string()))
        }

        async fn close(&mut self) -> ForwarderResult<()> {
            info!(topic = %self.topic, group_id = %self.group_id, "Closing consumer");
            // the group is left when the client is dropped
            self.consumer.unsubscribe();
            Ok(())
        }

        fn name(&self) -> &'static str {
            "kafka_consumer"
        }
    }
}
