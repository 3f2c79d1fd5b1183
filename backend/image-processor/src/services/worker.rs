//! Worker pipeline
//!
//! A fetch loop pulls task messages from the queue into a bounded buffer; a pool
//! of workers drains it. Each message is decoded, transformed, written to the
//! metadata store and only then committed. Any failure before the commit
//! leaves the offset where it was. With several workers, a commit older than
//! one already made on the same partition is skipped.
//!
//! Shutdown: the signal stops the fetch loop, which drops the buffer sender.
//! Workers finish whatever is already buffered and exit once it is empty.

use crate::db::ImageRepository;
use crate::kafka::{QueueError, QueueMessage, TaskConsumer};
use crate::services::transform::TransformEngine;
use resilience::{is_shutdown, presets, wait_for_shutdown, RetryConfig};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Worker pipeline configuration
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Messages held between the fetch loop and the workers
    pub buffer_capacity: usize,
    /// Concurrent processing workers
    pub workers: usize,
    /// Retry strategy of a single fetch
    pub fetch_strategy: RetryConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 100,
            workers: 1,
            fetch_strategy: presets::queue_fetch(),
        }
    }
}

/// Stage at which a message was dropped without commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardStage {
    Payload,
    Transform,
    Metadata,
}

/// What happened to one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Processed, persisted and acknowledged
    Committed,
    /// Processed and persisted, but the offset commit failed
    CommitFailed,
    /// Processed and persisted; a newer offset of its partition was already committed
    Superseded,
    /// Dropped without commit
    Discarded(DiscardStage),
}

pub struct WorkerPipeline {
    consumer: Arc<dyn TaskConsumer>,
    engine: Arc<TransformEngine>,
    repository: Arc<dyn ImageRepository>,
    config: WorkerConfig,
    /// Highest committed offset per (topic, partition)
    committed: Mutex<HashMap<(String, i32), i64>>,
}

impl WorkerPipeline {
    pub fn new(
        consumer: Arc<dyn TaskConsumer>,
        engine: Arc<TransformEngine>,
        repository: Arc<dyn ImageRepository>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            consumer,
            engine,
            repository,
            config,
            committed: Mutex::new(HashMap::new()),
        }
    }

    /// Run the fetch loop and the worker pool until `shutdown` flips and the
    /// buffer is drained.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let capacity = self.config.buffer_capacity.max(1);
        let workers = self.config.workers.max(1);
        let (tx, rx) = mpsc::channel::<QueueMessage>(capacity);
        let rx = Arc::new(Mutex::new(rx));

        info!(
            buffer_capacity = capacity,
            workers = workers,
            "Starting worker pipeline"
        );

        let mut tasks = JoinSet::new();

        let pipeline = Arc::clone(&self);
        tasks.spawn(async move { pipeline.fetch_loop(tx, shutdown).await });

        for worker_id in 0..workers {
            let pipeline = Arc::clone(&self);
            let rx = Arc::clone(&rx);
            tasks.spawn(async move { pipeline.worker_loop(worker_id, rx).await });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker pipeline task failed");
            }
        }

        info!("Worker pipeline stopped");
    }

    async fn fetch_loop(&self, tx: mpsc::Sender<QueueMessage>, mut shutdown: watch::Receiver<bool>) {
        let strategy = &self.config.fetch_strategy;

        loop {
            if is_shutdown(&shutdown) {
                break;
            }

            let message = match self.consumer.fetch_with_retry(strategy, &mut shutdown).await {
                Ok(message) => message,
                Err(QueueError::Cancelled) => break,
                Err(e) => {
                    error!(error = %e, "Failed to fetch message");
                    // Pause before polling again so an unreachable broker does not spin the loop
                    let stopped = tokio::select! {
                        _ = wait_for_shutdown(&mut shutdown) => true,
                        _ = tokio::time::sleep(strategy.initial_backoff) => false,
                    };
                    if stopped {
                        break;
                    }
                    continue;
                }
            };

            let (partition, offset) = (message.partition, message.offset);

            // Blocks while the buffer is full; a free slot wins over shutdown
            tokio::select! {
                biased;

                sent = tx.send(message) => {
                    if sent.is_err() {
                        warn!("Message buffer closed, stopping fetch loop");
                        break;
                    }
                }
                _ = wait_for_shutdown(&mut shutdown) => {
                    debug!(
                        partition = partition,
                        offset = offset,
                        "Shutdown while buffer full, message left uncommitted"
                    );
                    break;
                }
            }
        }

        info!("Fetch loop stopped");
    }

    async fn worker_loop(&self, worker_id: usize, rx: Arc<Mutex<mpsc::Receiver<QueueMessage>>>) {
        debug!(worker_id = worker_id, "Worker started");

        loop {
            let next = rx.lock().await.recv().await;
            let Some(message) = next else {
                break;
            };

            let outcome = self.process_message(&message).await;
            debug!(
                worker_id = worker_id,
                partition = message.partition,
                offset = message.offset,
                outcome = ?outcome,
                "Message handled"
            );
        }

        debug!(worker_id = worker_id, "Worker stopped");
    }

    /// Decode, transform, persist, then commit one message
    pub async fn process_message(&self, message: &QueueMessage) -> MessageOutcome {
        let task = match message.decode_task() {
            Ok(task) => task,
            Err(e) => {
                error!(
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "Failed to decode task payload"
                );
                return MessageOutcome::Discarded(DiscardStage::Payload);
            }
        };

        let processed = match self.engine.process(&task).await {
            Ok(processed) => processed,
            Err(e) => {
                error!(
                    image_id = task.image_id,
                    mode = %task.type_processing,
                    error = %e,
                    "Failed to process image"
                );
                return MessageOutcome::Discarded(DiscardStage::Transform);
            }
        };

        if let Err(e) = self.repository.mark_processed(&processed).await {
            error!(
                image_id = task.image_id,
                processed_path = %processed.processed_path,
                error = %e,
                "Failed to update image record"
            );
            return MessageOutcome::Discarded(DiscardStage::Metadata);
        }

        match self.commit_in_order(message).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(
                    image_id = task.image_id,
                    partition = message.partition,
                    offset = message.offset,
                    "Newer offset already committed, skipping commit"
                );
                return MessageOutcome::Superseded;
            }
            Err(e) => {
                error!(
                    image_id = task.image_id,
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "Failed to commit offset"
                );
                return MessageOutcome::CommitFailed;
            }
        }

        info!(
            image_id = task.image_id,
            processed_path = %processed.processed_path,
            "Image task completed"
        );
        MessageOutcome::Committed
    }

    /// Commit unless a later offset of the same partition is already committed.
    ///
    /// The lock is held across the commit so two workers cannot interleave
    /// their check and commit. Returns `false` when the commit was skipped.
    async fn commit_in_order(&self, message: &QueueMessage) -> Result<bool, QueueError> {
        let mut committed = self.committed.lock().await;
        let key = (message.topic.clone(), message.partition);

        if committed.get(&key).is_some_and(|&high| high >= message.offset) {
            return Ok(false);
        }

        self.consumer.commit(message).await?;
        committed.insert(key, message.offset);
        Ok(true)
    }
}
