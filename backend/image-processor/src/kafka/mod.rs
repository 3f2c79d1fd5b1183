//! Kafka integration for image-processor
//!
//! - Consumer: fetches image tasks, commits offsets only after processing
//! - Producer: publishes image tasks from the submission path
//!
//! The worker pipeline and the submission path only see the [`TaskConsumer`]
//! and [`TaskPublisher`] traits.

pub mod consumer;
pub mod producer;

use crate::models::ImageTask;
use async_trait::async_trait;
use rdkafka::error::KafkaError;
use resilience::{RetryConfig, RetryError};
use tokio::sync::watch;

pub use consumer::{KafkaTaskConsumer, TaskConsumerConfig};
pub use producer::KafkaTaskProducer;

/// A fetched task message plus the delivery metadata needed to acknowledge it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

impl QueueMessage {
    /// Decode the payload as an [`ImageTask`]
    pub fn decode_task(&self) -> Result<ImageTask, QueueError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Queue client error types
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation cancelled by shutdown")]
    Cancelled,

    #[error("Gave up after {attempts} attempts: {last_error}")]
    Exhausted {
        attempts: u32,
        last_error: Box<QueueError>,
    },

    #[error("Queue client is closed")]
    Closed,

    #[error("Blocking queue task failed: {0}")]
    TaskFailed(String),
}

impl From<RetryError<QueueError>> for QueueError {
    fn from(err: RetryError<QueueError>) -> Self {
        match err {
            RetryError::MaxRetriesExceeded {
                attempts,
                last_error,
            } => QueueError::Exhausted {
                attempts,
                last_error: Box::new(last_error),
            },
            RetryError::Cancelled => QueueError::Cancelled,
        }
    }
}

/// Consumer side of the task queue
#[async_trait]
pub trait TaskConsumer: Send + Sync {
    /// Poll for the next message, retrying per `strategy`.
    ///
    /// Returns [`QueueError::Cancelled`] as soon as `shutdown` flips, whether
    /// the poll or a backoff sleep is in progress.
    async fn fetch_with_retry(
        &self,
        strategy: &RetryConfig,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<QueueMessage, QueueError>;

    /// Acknowledge `message` (commits `offset + 1` for its partition)
    async fn commit(&self, message: &QueueMessage) -> Result<(), QueueError>;

    async fn close(&self) -> Result<(), QueueError>;
}

/// Producer side of the task queue
#[async_trait]
pub trait TaskPublisher: Send + Sync {
    /// Publish `task` keyed by its image id, retrying per `strategy`
    async fn publish_with_retry(
        &self,
        strategy: &RetryConfig,
        task: &ImageTask,
    ) -> Result<(), QueueError>;

    /// Flush in-flight messages
    async fn close(&self) -> Result<(), QueueError>;
}
