//! In-memory test doubles and image fixtures shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
use image_processor::db::{ImageRepository, RepositoryError};
use image_processor::kafka::{QueueError, QueueMessage, TaskConsumer, TaskPublisher};
use image_processor::models::{Direction, ImageRecord, ImageTask, PageCursor, ProcessedImage, PAGE_SIZE};
use image_processor::storage::{AssetStore, StorageError};
use resilience::{wait_for_shutdown, RetryConfig};
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Shared record of `close()` calls, in call order
pub type CloseLog = Arc<Mutex<Vec<&'static str>>>;

// ========================================
// Asset store
// ========================================

#[derive(Default)]
pub struct MemoryAssetStore {
    objects: Mutex<HashMap<String, Bytes>>,
    pub downloads: AtomicUsize,
    pub fail_presign_for: Mutex<Option<String>>,
    pub fail_deletes: AtomicBool,
    gate: Mutex<Option<watch::Receiver<bool>>>,
}

impl MemoryAssetStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, key: &str, data: impl Into<Bytes>) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data.into());
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Hold every `download` until the returned sender sends `true`
    pub fn close_gate(&self) -> watch::Sender<bool> {
        let (tx, rx) = watch::channel(false);
        *self.gate.lock().unwrap() = Some(rx);
        tx
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.keys()
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect()
    }
}

#[async_trait]
impl AssetStore for MemoryAssetStore {
    async fn upload(&self, key: &str, data: Bytes) -> Result<(), StorageError> {
        self.put(key, data);
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Bytes, StorageError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.lock().unwrap().clone();
        if let Some(mut gate) = gate {
            let _ = gate.wait_for(|open| *open).await;
        }

        self.get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("delete disabled".to_string()));
        }
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn presigned_url(&self, key: &str, expires_in: Duration) -> Result<String, StorageError> {
        if self.fail_presign_for.lock().unwrap().as_deref() == Some(key) {
            return Err(StorageError::Presign(key.to_string()));
        }
        Ok(format!(
            "https://assets.test/{key}?expires={}",
            expires_in.as_secs()
        ))
    }
}

// ========================================
// Image repository
// ========================================

pub struct MemoryImageRepository {
    records: Mutex<Vec<ImageRecord>>,
    next_id: AtomicUsize,
    pub fail_updates: AtomicBool,
    close_log: Option<CloseLog>,
}

impl Default for MemoryImageRepository {
    fn default() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
            fail_updates: AtomicBool::new(false),
            close_log: None,
        }
    }
}

impl MemoryImageRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_close_log(log: CloseLog) -> Arc<Self> {
        Arc::new(Self {
            close_log: Some(log),
            ..Self::default()
        })
    }

    /// Insert a pending record with an explicit creation time
    pub fn insert_at(&self, uploads_path: &str, created_at: DateTime<Utc>) -> ImageRecord {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as i64;
        let record = ImageRecord {
            id,
            uploads_path: uploads_path.to_string(),
            processed_path: String::new(),
            processed: false,
            created_at,
        };
        self.records.lock().unwrap().push(record.clone());
        record
    }

    pub fn record(&self, id: i64) -> Option<ImageRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }
}

#[async_trait]
impl ImageRepository for MemoryImageRepository {
    async fn create(&self, uploads_path: &str) -> Result<ImageRecord, RepositoryError> {
        Ok(self.insert_at(uploads_path, Utc::now()))
    }

    async fn get(&self, id: i64) -> Result<Option<ImageRecord>, RepositoryError> {
        Ok(self.record(id))
    }

    async fn mark_processed(&self, result: &ProcessedImage) -> Result<(), RepositoryError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database(sqlx::Error::PoolClosed));
        }

        let mut records = self.records.lock().unwrap();
        let record = records
            .iter_mut()
            .find(|r| r.id == result.id)
            .ok_or(RepositoryError::NotFound(result.id))?;

        record.uploads_path = result.uploads_path.clone();
        record.processed_path = result.processed_path.clone();
        record.processed = result.processed;
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<bool, RepositoryError> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() < before)
    }

    async fn list(&self, cursor: &PageCursor) -> Result<Vec<ImageRecord>, RepositoryError> {
        let key = (cursor.created_at, cursor.id);
        let mut records: Vec<ImageRecord> = self.records.lock().unwrap().clone();
        records.sort_by_key(|r| (r.created_at, r.id));

        let page: Vec<ImageRecord> = match cursor.direction {
            Direction::Next => records
                .into_iter()
                .filter(|r| (r.created_at, r.id) > key)
                .take(PAGE_SIZE as usize)
                .collect(),
            Direction::Prev => records
                .into_iter()
                .rev()
                .filter(|r| (r.created_at, r.id) < key)
                .take(PAGE_SIZE as usize)
                .collect(),
        };
        Ok(page)
    }

    async fn count(&self) -> Result<i64, RepositoryError> {
        Ok(self.records.lock().unwrap().len() as i64)
    }

    async fn close(&self) -> Result<(), RepositoryError> {
        if let Some(log) = &self.close_log {
            log.lock().unwrap().push("repository");
        }
        Ok(())
    }
}

// ========================================
// Queue doubles
// ========================================

/// Hands out a fixed list of messages, then blocks until shutdown
#[derive(Default)]
pub struct ScriptedConsumer {
    messages: Mutex<VecDeque<QueueMessage>>,
    commits: Mutex<Vec<(i32, i64)>>,
    pub fetch_calls: AtomicUsize,
    pub fail_commits: AtomicBool,
    pub fail_close: AtomicBool,
    close_log: Option<CloseLog>,
}

impl ScriptedConsumer {
    pub fn new(messages: Vec<QueueMessage>) -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(messages.into()),
            ..Self::default()
        })
    }

    pub fn with_close_log(log: CloseLog) -> Arc<Self> {
        Arc::new(Self {
            close_log: Some(log),
            ..Self::default()
        })
    }

    /// Committed `(partition, offset)` pairs, in commit order
    pub fn commits(&self) -> Vec<(i32, i64)> {
        self.commits.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskConsumer for ScriptedConsumer {
    async fn fetch_with_retry(
        &self,
        _strategy: &RetryConfig,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<QueueMessage, QueueError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        let next = self.messages.lock().unwrap().pop_front();
        match next {
            Some(message) => Ok(message),
            None => {
                wait_for_shutdown(shutdown).await;
                Err(QueueError::Cancelled)
            }
        }
    }

    async fn commit(&self, message: &QueueMessage) -> Result<(), QueueError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        self.commits
            .lock()
            .unwrap()
            .push((message.partition, message.offset));
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        if let Some(log) = &self.close_log {
            log.lock().unwrap().push("consumer");
        }
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<ImageTask>>,
    pub fail_publish: AtomicBool,
    close_log: Option<CloseLog>,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_close_log(log: CloseLog) -> Arc<Self> {
        Arc::new(Self {
            close_log: Some(log),
            ..Self::default()
        })
    }

    pub fn published(&self) -> Vec<ImageTask> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskPublisher for RecordingPublisher {
    async fn publish_with_retry(
        &self,
        _strategy: &RetryConfig,
        task: &ImageTask,
    ) -> Result<(), QueueError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        self.published.lock().unwrap().push(task.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        if let Some(log) = &self.close_log {
            log.lock().unwrap().push("publisher");
        }
        Ok(())
    }
}

// ========================================
// Fixtures
// ========================================

pub fn task_message(offset: i64, task: &ImageTask) -> QueueMessage {
    QueueMessage {
        topic: "image-tasks".to_string(),
        partition: 0,
        offset,
        key: Some(task.image_id.to_string()),
        payload: serde_json::to_vec(task).unwrap(),
    }
}

pub fn raw_message(offset: i64, payload: &[u8]) -> QueueMessage {
    QueueMessage {
        topic: "image-tasks".to_string(),
        partition: 0,
        offset,
        key: None,
        payload: payload.to_vec(),
    }
}

pub fn solid_rgba(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba(color))
}

pub fn encode(image: RgbaImage, format: ImageOutputFormat) -> Bytes {
    let image = match format {
        ImageOutputFormat::Jpeg(_) => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(image).to_rgb8()),
        _ => DynamicImage::ImageRgba8(image),
    };
    let mut cursor = Cursor::new(Vec::new());
    image.write_to(&mut cursor, format).unwrap();
    Bytes::from(cursor.into_inner())
}

pub fn png(width: u32, height: u32, color: [u8; 4]) -> Bytes {
    encode(solid_rgba(width, height, color), ImageOutputFormat::Png)
}

pub fn jpeg(width: u32, height: u32, color: [u8; 4]) -> Bytes {
    encode(solid_rgba(width, height, color), ImageOutputFormat::Jpeg(90))
}

/// Timestamp `seconds` after a fixed epoch
pub fn at(seconds: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + ChronoDuration::seconds(seconds)
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
