//! Worker pipeline: ordering of transform, metadata update and offset commit

mod common;

use common::{
    png, raw_message, task_message, CloseLog, MemoryAssetStore, MemoryImageRepository,
    RecordingPublisher, ScriptedConsumer,
};
use image_processor::app::close_resources;
use image_processor::kafka::QueueMessage;
use image_processor::models::{ImageTask, ProcessingMode};
use image_processor::services::transform::{TransformConfig, TransformEngine};
use image_processor::services::worker::{DiscardStage, MessageOutcome, WorkerConfig};
use image_processor::services::WorkerPipeline;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

struct Harness {
    store: Arc<MemoryAssetStore>,
    repository: Arc<MemoryImageRepository>,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: MemoryAssetStore::new(),
            repository: MemoryImageRepository::new(),
        }
    }

    /// Pending record plus its uploaded source image
    fn seed(&self, path: &str) -> i64 {
        self.store.put(path, png(16, 16, [90, 90, 90, 255]));
        self.repository.insert_at(path, common::at(0)).id
    }

    fn pipeline(
        &self,
        messages: Vec<QueueMessage>,
        config: WorkerConfig,
    ) -> (Arc<ScriptedConsumer>, Arc<WorkerPipeline>) {
        let consumer = ScriptedConsumer::new(messages);
        let engine = Arc::new(TransformEngine::new(
            self.store.clone(),
            TransformConfig::default(),
        ));
        let pipeline = Arc::new(WorkerPipeline::new(
            consumer.clone(),
            engine,
            self.repository.clone(),
            config,
        ));
        (consumer, pipeline)
    }
}

#[tokio::test]
async fn test_successful_task_is_persisted_then_committed() {
    let h = Harness::new();
    let id = h.seed("uploads/a.png");
    let (consumer, pipeline) = h.pipeline(Vec::new(), WorkerConfig::default());

    let task = ImageTask::new(id, ProcessingMode::Thumbnail, "uploads/a.png");
    let outcome = pipeline.process_message(&task_message(7, &task)).await;

    assert_eq!(outcome, MessageOutcome::Committed);
    assert_eq!(consumer.commits(), vec![(0, 7)]);

    let record = h.repository.record(id).unwrap();
    assert!(record.processed);
    assert!(record.processed_path.starts_with("processed/thumbnails/"));
    assert!(h.store.contains(&record.processed_path));
}

#[tokio::test]
async fn test_metadata_failure_skips_commit() {
    let h = Harness::new();
    let id = h.seed("uploads/a.png");
    h.repository.fail_updates.store(true, Ordering::SeqCst);
    let (consumer, pipeline) = h.pipeline(Vec::new(), WorkerConfig::default());

    let task = ImageTask::new(id, ProcessingMode::Resize, "uploads/a.png").with_dimensions(8, 8);
    let outcome = pipeline.process_message(&task_message(3, &task)).await;

    assert_eq!(outcome, MessageOutcome::Discarded(DiscardStage::Metadata));
    assert!(consumer.commits().is_empty());
    assert!(!h.repository.record(id).unwrap().processed);
}

#[tokio::test]
async fn test_missing_record_skips_commit() {
    let h = Harness::new();
    h.store.put("uploads/orphan.png", png(4, 4, [0, 0, 0, 255]));
    let (consumer, pipeline) = h.pipeline(Vec::new(), WorkerConfig::default());

    let task = ImageTask::new(404, ProcessingMode::Thumbnail, "uploads/orphan.png");
    let outcome = pipeline.process_message(&task_message(1, &task)).await;

    assert_eq!(outcome, MessageOutcome::Discarded(DiscardStage::Metadata));
    assert!(consumer.commits().is_empty());
}

#[tokio::test]
async fn test_undecodable_payload_is_discarded() {
    let h = Harness::new();
    let (consumer, pipeline) = h.pipeline(Vec::new(), WorkerConfig::default());

    let outcome = pipeline.process_message(&raw_message(0, b"{not json")).await;

    assert_eq!(outcome, MessageOutcome::Discarded(DiscardStage::Payload));
    assert!(consumer.commits().is_empty());
}

#[tokio::test]
async fn test_unknown_mode_is_discarded_without_side_effects() {
    let h = Harness::new();
    let id = h.seed("uploads/a.png");
    let (consumer, pipeline) = h.pipeline(Vec::new(), WorkerConfig::default());

    let payload = format!(
        r#"{{"imageId":{id},"typeProcessing":"sepia","uploadsPath":"uploads/a.png","parameters":{{}}}}"#
    );
    let outcome = pipeline
        .process_message(&raw_message(2, payload.as_bytes()))
        .await;

    assert_eq!(outcome, MessageOutcome::Discarded(DiscardStage::Transform));
    assert!(consumer.commits().is_empty());
    assert!(h.store.keys_with_prefix("processed/").is_empty());
    assert!(!h.repository.record(id).unwrap().processed);
}

#[tokio::test]
async fn test_commit_failure_keeps_metadata() {
    let h = Harness::new();
    let id = h.seed("uploads/a.png");
    let (consumer, pipeline) = h.pipeline(Vec::new(), WorkerConfig::default());
    consumer.fail_commits.store(true, Ordering::SeqCst);

    let task = ImageTask::new(id, ProcessingMode::Thumbnail, "uploads/a.png");
    let outcome = pipeline.process_message(&task_message(9, &task)).await;

    assert_eq!(outcome, MessageOutcome::CommitFailed);
    assert!(h.repository.record(id).unwrap().processed);
}

/// One worker, buffer of two, every download held until the gate opens
fn gated_pipeline(
    h: &Harness,
    total: i64,
) -> (Arc<ScriptedConsumer>, Arc<WorkerPipeline>, watch::Sender<bool>) {
    let mut messages = Vec::new();
    for offset in 0..total {
        let path = format!("uploads/{offset}.png");
        let id = h.seed(&path);
        let task = ImageTask::new(id, ProcessingMode::Thumbnail, path);
        messages.push(task_message(offset, &task));
    }

    let gate = h.store.close_gate();
    let (consumer, pipeline) = h.pipeline(
        messages,
        WorkerConfig {
            buffer_capacity: 2,
            workers: 1,
            ..WorkerConfig::default()
        },
    );
    (consumer, pipeline, gate)
}

// In flight (1) + buffered (capacity 2) + blocked on a full buffer (1)
const FETCHES_WHEN_FULL: usize = 4;

#[tokio::test]
async fn test_fetch_loop_blocks_on_full_buffer() {
    let total: i64 = 8;
    let h = Harness::new();
    let (consumer, pipeline, gate) = gated_pipeline(&h, total);

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(pipeline.run(rx));

    let watched = consumer.clone();
    assert!(
        common::eventually(Duration::from_secs(5), || {
            watched.fetch_calls.load(Ordering::SeqCst) == FETCHES_WHEN_FULL
        })
        .await
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(consumer.fetch_calls.load(Ordering::SeqCst), FETCHES_WHEN_FULL);
    assert_eq!(h.store.downloads.load(Ordering::SeqCst), 1);
    assert!(consumer.commits().is_empty());

    gate.send(true).unwrap();

    let watched = consumer.clone();
    assert!(
        common::eventually(Duration::from_secs(10), || {
            watched.commits().len() == total as usize
        })
        .await
    );

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("pipeline did not stop")
        .unwrap();

    let committed: Vec<i64> = consumer.commits().into_iter().map(|(_, o)| o).collect();
    assert_eq!(committed, (0..total).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_run_drains_buffer_on_shutdown() {
    let total: i64 = 8;
    let h = Harness::new();
    let (consumer, pipeline, gate) = gated_pipeline(&h, total);

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(pipeline.run(rx));

    let watched = consumer.clone();
    assert!(
        common::eventually(Duration::from_secs(5), || {
            watched.fetch_calls.load(Ordering::SeqCst) == FETCHES_WHEN_FULL
        })
        .await
    );

    // Shutdown releases the blocked send while the worker is still held
    tx.send(true).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!handle.is_finished());
    assert!(consumer.commits().is_empty());

    gate.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("pipeline did not stop")
        .unwrap();

    // In-flight and buffered messages finish; the one fetched into a full buffer does not
    let committed: Vec<i64> = consumer.commits().into_iter().map(|(_, o)| o).collect();
    assert_eq!(committed, vec![0, 1, 2]);
    assert_eq!(consumer.fetch_calls.load(Ordering::SeqCst), FETCHES_WHEN_FULL);
    for id in 1..=3 {
        assert!(h.repository.record(id).unwrap().processed);
    }
    for id in 4..=total {
        assert!(!h.repository.record(id).unwrap().processed);
    }
}

#[tokio::test]
async fn test_run_stops_when_idle() {
    let h = Harness::new();
    let (consumer, pipeline) = h.pipeline(Vec::new(), WorkerConfig::default());

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(pipeline.run(rx));

    let watched = consumer.clone();
    assert!(
        common::eventually(Duration::from_secs(5), || {
            watched.fetch_calls.load(Ordering::SeqCst) >= 1
        })
        .await
    );

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("pipeline did not stop")
        .unwrap();

    assert!(consumer.commits().is_empty());
}

#[tokio::test]
async fn test_multiple_workers_process_every_message() {
    let h = Harness::new();
    let mut messages = Vec::new();
    for offset in 0..8 {
        let path = format!("uploads/{offset}.png");
        let id = h.seed(&path);
        let task = ImageTask::new(id, ProcessingMode::Resize, path).with_dimensions(4, 4);
        messages.push(task_message(offset, &task));
    }

    let (consumer, pipeline) = h.pipeline(
        messages,
        WorkerConfig {
            workers: 3,
            ..WorkerConfig::default()
        },
    );

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(pipeline.run(rx));

    // Offset 7 is the highest, so it is always committed
    let watched = consumer.clone();
    assert!(
        common::eventually(Duration::from_secs(10), || {
            watched.commits().last() == Some(&(0, 7))
        })
        .await
    );

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("pipeline did not stop")
        .unwrap();

    for id in 1..=8 {
        assert!(h.repository.record(id).unwrap().processed);
    }

    // Commits never move a partition backwards
    let committed: Vec<i64> = consumer.commits().into_iter().map(|(_, o)| o).collect();
    assert!(committed.windows(2).all(|pair| pair[0] < pair[1]), "{committed:?}");
}

#[tokio::test]
async fn test_stale_commit_is_skipped() {
    let h = Harness::new();
    let older = h.seed("uploads/old.png");
    let newer = h.seed("uploads/new.png");
    let other = h.seed("uploads/other.png");
    let (consumer, pipeline) = h.pipeline(Vec::new(), WorkerConfig::default());

    let task = ImageTask::new(newer, ProcessingMode::Thumbnail, "uploads/new.png");
    assert_eq!(
        pipeline.process_message(&task_message(5, &task)).await,
        MessageOutcome::Committed
    );

    let task = ImageTask::new(older, ProcessingMode::Thumbnail, "uploads/old.png");
    assert_eq!(
        pipeline.process_message(&task_message(3, &task)).await,
        MessageOutcome::Superseded
    );
    assert!(h.repository.record(older).unwrap().processed);

    // Partitions are tracked independently
    let task = ImageTask::new(other, ProcessingMode::Thumbnail, "uploads/other.png");
    let mut message = task_message(3, &task);
    message.partition = 1;
    assert_eq!(
        pipeline.process_message(&message).await,
        MessageOutcome::Committed
    );

    assert_eq!(consumer.commits(), vec![(0, 5), (1, 3)]);
}

#[tokio::test]
async fn test_close_resources_order() {
    let log: CloseLog = Arc::new(Mutex::new(Vec::new()));
    let repository = MemoryImageRepository::with_close_log(log.clone());
    let consumer = ScriptedConsumer::with_close_log(log.clone());
    let publisher = RecordingPublisher::with_close_log(log.clone());

    close_resources(repository.as_ref(), consumer.as_ref(), publisher.as_ref()).await;

    assert_eq!(
        *log.lock().unwrap(),
        vec!["repository", "consumer", "publisher"]
    );
}

#[tokio::test]
async fn test_close_resources_continues_after_failure() {
    let log: CloseLog = Arc::new(Mutex::new(Vec::new()));
    let repository = MemoryImageRepository::with_close_log(log.clone());
    let consumer = ScriptedConsumer::with_close_log(log.clone());
    consumer.fail_close.store(true, Ordering::SeqCst);
    let publisher = RecordingPublisher::with_close_log(log.clone());

    close_resources(repository.as_ref(), consumer.as_ref(), publisher.as_ref()).await;

    assert_eq!(
        *log.lock().unwrap(),
        vec!["repository", "consumer", "publisher"]
    );
}
