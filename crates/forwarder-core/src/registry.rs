//! Stream registry: category -> topic -> cluster lookup

use crate::error::{ConfigResult, ConfigurationError};
use crate::model::{StreamCategory, StreamConfig};
use crate::settings::KafkaSettings;

/// Resolves stream categories against a static settings table
#[derive(Debug, Clone)]
pub struct StreamRegistry {
    settings: KafkaSettings,
}

impl StreamRegistry {
    pub fn new(settings: KafkaSettings) -> Self {
        Self { settings }
    }

    /// Resolve the topic and cluster a category is consumed from
    pub fn resolve(&self, category: StreamCategory) -> ConfigResult<StreamConfig> {
        let topic = self.settings.topic_for(category);

        let placement = self
            .settings
            .topics
            .get(topic)
            .ok_or_else(|| ConfigurationError::UnregisteredTopic {
                topic: topic.to_string(),
            })?;

        let cluster = self
            .settings
            .clusters
            .get(&placement.cluster)
            .ok_or_else(|| ConfigurationError::UnknownCluster {
                topic: topic.to_string(),
                cluster: placement.cluster.clone(),
            })?;

        if cluster.bootstrap_servers.is_empty() {
            return Err(ConfigurationError::NoBootstrapServers(placement.cluster.clone()));
        }

        Ok(StreamConfig {
            topic: topic.to_string(),
            cluster: placement.cluster.clone(),
            bootstrap_servers: cluster.bootstrap_servers.clone(),
            properties: cluster.properties.clone(),
        })
    }

    /// Resolve a category given by name
    pub fn resolve_name(&self, category: &str) -> ConfigResult<StreamConfig> {
        self.resolve(category.parse()?)
    }

    pub fn settings(&self) -> &KafkaSettings {
        &self.settings
    }
}
