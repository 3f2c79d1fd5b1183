//! Kafka consumer for image tasks
//!
//! Auto-commit and automatic offset storage are disabled: an offset only moves
//! when the worker pipeline calls [`TaskConsumer::commit`] after the metadata
//! update succeeded. Uncommitted messages are redelivered by the consumer group
//! after a restart or rebalance.

use super::{QueueError, QueueMessage, TaskConsumer};
use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use resilience::{with_retry_until_shutdown, RetryConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Kafka consumer configuration
#[derive(Clone, Debug)]
pub struct TaskConsumerConfig {
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
}

impl Default for TaskConsumerConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            topic: "image-tasks".to_string(),
            group_id: "image-processor".to_string(),
        }
    }
}

pub struct KafkaTaskConsumer {
    consumer: Arc<StreamConsumer>,
    closed: AtomicBool,
}

impl KafkaTaskConsumer {
    pub fn new(config: &TaskConsumerConfig) -> Result<Self, QueueError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "45000")
            .set("max.poll.interval.ms", "300000")
            .set("enable.partition.eof", "false")
            .create()?;

        consumer.subscribe(&[&config.topic])?;

        info!(
            brokers = %config.brokers,
            topic = %config.topic,
            group_id = %config.group_id,
            "Image task consumer initialized"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        Ok(())
    }
}

fn to_queue_message(msg: &BorrowedMessage<'_>) -> QueueMessage {
    QueueMessage {
        topic: msg.topic().to_string(),
        partition: msg.partition(),
        offset: msg.offset(),
        key: msg
            .key()
            .map(|key| String::from_utf8_lossy(key).into_owned()),
        payload: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
    }
}

#[async_trait]
impl TaskConsumer for KafkaTaskConsumer {
    async fn fetch_with_retry(
        &self,
        strategy: &RetryConfig,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<QueueMessage, QueueError> {
        self.ensure_open()?;

        let consumer = self.consumer.as_ref();
        let message = with_retry_until_shutdown(strategy, shutdown, move || async move {
            let msg = consumer.recv().await?;
            Ok::<_, QueueError>(to_queue_message(&msg))
        })
        .await?;

        debug!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            "Fetched message"
        );

        Ok(message)
    }

    async fn commit(&self, message: &QueueMessage) -> Result<(), QueueError> {
        self.ensure_open()?;

        let mut offsets = TopicPartitionList::new();
        offsets.add_partition_offset(
            &message.topic,
            message.partition,
            Offset::Offset(message.offset + 1),
        )?;

        // Synchronous commit blocks on the broker round trip
        let consumer = Arc::clone(&self.consumer);
        tokio::task::spawn_blocking(move || consumer.commit(&offsets, CommitMode::Sync))
            .await
            .map_err(|e| QueueError::TaskFailed(e.to_string()))??;

        debug!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            "Committed offset"
        );

        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.consumer.unsubscribe();
        info!("Image task consumer closed");
        Ok(())
    }
}
