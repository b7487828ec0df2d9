//! Kafka producer and client bootstrap on `rskafka`.

use async_trait::async_trait;
use chrono::Utc;
use rskafka::client::partition::{Compression, PartitionClient, UnknownTopicHandling};
use rskafka::client::{Client, ClientBuilder};
use rskafka::record::Record;
use snafu::prelude::*;
use std::collections::BTreeMap;
use tracing::info;

use super::Publisher;
use crate::config::KafkaConfig;
use crate::error::{ConnectSnafu, KafkaSnafu, PublishError};

/// Bootstrap a client against `brokers`.
pub async fn connect(brokers: &[String]) -> Result<Client, PublishError> {
    let brokers: Vec<String> = brokers
        .iter()
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty())
        .collect();
    ClientBuilder::new(brokers.clone())
        .build()
        .await
        .context(ConnectSnafu {
            brokers: brokers.join(","),
        })
}

/// Produces one uncompressed record per payload to a single partition.
pub struct KafkaPublisher {
    client: PartitionClient,
    topic: String,
    partition: i32,
}

impl KafkaPublisher {
    pub async fn connect(config: &KafkaConfig) -> Result<Self, PublishError> {
        let client = connect(&config.brokers).await?;
        let partition_client = client
            .partition_client(config.topic.clone(), config.partition, UnknownTopicHandling::Error)
            .await
            .context(KafkaSnafu {
                topic: config.topic.as_str(),
                partition: config.partition,
            })?;

        info!(topic = %config.topic, partition = config.partition, "Connected to Kafka");
        Ok(Self {
            client: partition_client,
            topic: config.topic.clone(),
            partition: config.partition,
        })
    }
}

#[async_trait]
impl Publisher for KafkaPublisher {
    async fn publish(&self, payload: Vec<u8>) -> Result<(), PublishError> {
        let record = Record {
            key: None,
            value: Some(payload),
            headers: BTreeMap::new(),
            timestamp: Utc::now(),
        };
        self.client
            .produce(vec![record], Compression::NoCompression)
            .await
            .context(KafkaSnafu {
                topic: self.topic.as_str(),
                partition: self.partition,
            })?;
        Ok(())
    }

    fn destination(&self) -> String {
        format!("kafka://{}/{}", self.topic, self.partition)
    }
}
