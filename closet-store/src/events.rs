use async_trait::async_trait;
use closet_core::{CoreError, CoreResult, EventSink};
use closet_shared::DomainEvent;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{error, info};

use crate::app_config::KafkaConfig;

/// Publishes domain events to Kafka, one topic per event family.
#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
}

impl EventProducer {
    pub fn new(config: &KafkaConfig) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", &config.client_id)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self { producer })
    }

    pub async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                info!(
                    "Sent message to {}/{}: partition {} offset {}",
                    topic, key, delivery.partition, delivery.offset
                );
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send message to {}: {}", topic, e);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl EventSink for EventProducer {
    async fn deliver(&self, event: &DomainEvent) -> CoreResult<()> {
        let payload = serde_json::to_string(event).map_err(|e| CoreError::InternalError(e.to_string()))?;
        self.publish(event.topic(), &event.key(), &payload)
            .await
            .map_err(|e| CoreError::InternalError(e.to_string()))
    }
}
