//! Kafka producer for image tasks

use super::{QueueError, TaskPublisher};
use crate::models::ImageTask;
use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::ClientConfig;
use resilience::{with_retry, RetryConfig};
use std::time::Duration;
use tracing::{error, info};

/// Publishes [`ImageTask`]s keyed by image id
#[derive(Clone)]
pub struct KafkaTaskProducer {
    producer: FutureProducer,
    topic: String,
    delivery_timeout: Duration,
}

impl KafkaTaskProducer {
    pub fn new(brokers: &str, topic: &str) -> Result<Self, QueueError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set("message.timeout.ms", "5000")
            .create()?;

        info!(brokers = %brokers, topic = %topic, "Image task producer initialized");

        Ok(Self {
            producer,
            topic: topic.to_string(),
            delivery_timeout: Duration::from_secs(5),
        })
    }

    async fn send_once(&self, key: &str, payload: &[u8]) -> Result<(i32, i64), QueueError> {
        let record = FutureRecord::to(&self.topic).key(key).payload(payload);

        self.producer
            .send(record, self.delivery_timeout)
            .await
            .map_err(|(err, _)| QueueError::Kafka(err))
    }
}

#[async_trait]
impl TaskPublisher for KafkaTaskProducer {
    async fn publish_with_retry(
        &self,
        strategy: &RetryConfig,
        task: &ImageTask,
    ) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(task)?;
        let key = task.image_id.to_string();

        match with_retry(strategy, || self.send_once(&key, &payload)).await {
            Ok((partition, offset)) => {
                info!(
                    image_id = task.image_id,
                    mode = %task.type_processing,
                    partition = partition,
                    offset = offset,
                    "Published image task"
                );
                Ok(())
            }
            Err(err) => {
                let err = QueueError::from(err);
                error!(image_id = task.image_id, error = %err, "Failed to publish image task");
                Err(err)
            }
        }
    }

    async fn close(&self) -> Result<(), QueueError> {
        let producer = self.producer.clone();
        let timeout = self.delivery_timeout;

        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| QueueError::TaskFailed(e.to_string()))??;

        info!("Image task producer flushed");
        Ok(())
    }
}
