/// Configuration management for image-processor
///
/// Loads configuration from environment variables with sensible defaults.
use crate::kafka::TaskConsumerConfig;
use crate::services::transform::{TransformConfig, DEFAULT_MAX_DIMENSION};
use crate::services::worker::WorkerConfig;
use serde::Deserialize;
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub kafka: KafkaConfig,
    pub s3: S3Config,
    pub worker: WorkerSettings,
    pub processing: ProcessingConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub env: String,
    /// Largest accepted multipart field, in bytes
    pub max_upload_bytes: usize,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct KafkaConfig {
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint: Option<String>,
    /// Path-style addressing, needed by MinIO
    pub force_path_style: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct WorkerSettings {
    pub buffer_capacity: usize,
    pub workers: usize,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ProcessingConfig {
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
    pub jpeg_quality: u8,
    /// Largest accepted `resize` width or height
    pub max_dimension: u32,
    pub presign_expiry_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = Config {
            app: AppConfig {
                host: std::env::var("IMAGE_PROCESSOR_HOST")
                    .unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("IMAGE_PROCESSOR_PORT", 8080),
                env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
                max_upload_bytes: env_or("MAX_UPLOAD_BYTES", 20 * 1024 * 1024),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "postgresql://localhost/images".to_string()),
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10),
            },
            kafka: KafkaConfig {
                brokers: std::env::var("KAFKA_BROKERS")
                    .unwrap_or_else(|_| "localhost:9092".to_string()),
                topic: std::env::var("KAFKA_TOPIC").unwrap_or_else(|_| "image-tasks".to_string()),
                group_id: std::env::var("KAFKA_GROUP_ID")
                    .unwrap_or_else(|_| "image-processor".to_string()),
            },
            s3: S3Config {
                bucket: std::env::var("S3_BUCKET").unwrap_or_else(|_| "images".to_string()),
                region: std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
                access_key_id: std::env::var("AWS_ACCESS_KEY_ID").ok(),
                secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").ok(),
                endpoint: std::env::var("S3_ENDPOINT").ok(),
                force_path_style: env_or("S3_FORCE_PATH_STYLE", false),
            },
            worker: WorkerSettings {
                buffer_capacity: env_or("WORKER_BUFFER_CAPACITY", 100),
                workers: env_or("WORKER_COUNT", 1),
            },
            processing: ProcessingConfig {
                thumbnail_width: env_or("THUMBNAIL_WIDTH", 150),
                thumbnail_height: env_or("THUMBNAIL_HEIGHT", 150),
                jpeg_quality: env_or("JPEG_QUALITY", 90),
                max_dimension: env_or("MAX_IMAGE_DIMENSION", DEFAULT_MAX_DIMENSION),
                presign_expiry_secs: env_or("PRESIGN_EXPIRY_SECS", 7 * 60 * 60),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.worker.buffer_capacity == 0 {
            return Err("WORKER_BUFFER_CAPACITY must be at least 1".to_string());
        }
        if self.worker.workers == 0 {
            return Err("WORKER_COUNT must be at least 1".to_string());
        }
        if self.processing.thumbnail_width == 0 || self.processing.thumbnail_height == 0 {
            return Err("thumbnail dimensions must be positive".to_string());
        }
        if self.processing.max_dimension == 0 {
            return Err("MAX_IMAGE_DIMENSION must be positive".to_string());
        }
        if self.processing.thumbnail_width > self.processing.max_dimension
            || self.processing.thumbnail_height > self.processing.max_dimension
        {
            return Err("thumbnail dimensions exceed MAX_IMAGE_DIMENSION".to_string());
        }
        if !(1..=100).contains(&self.processing.jpeg_quality) {
            return Err("JPEG_QUALITY must be between 1 and 100".to_string());
        }
        if self.processing.presign_expiry_secs == 0 {
            return Err("PRESIGN_EXPIRY_SECS must be positive".to_string());
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.app.host, self.app.port)
    }

    pub fn presign_expiry(&self) -> Duration {
        Duration::from_secs(self.processing.presign_expiry_secs)
    }

    pub fn transform_config(&self) -> TransformConfig {
        TransformConfig {
            thumbnail_width: self.processing.thumbnail_width,
            thumbnail_height: self.processing.thumbnail_height,
            jpeg_quality: self.processing.jpeg_quality,
            max_dimension: self.processing.max_dimension,
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            buffer_capacity: self.worker.buffer_capacity,
            workers: self.worker.workers,
            ..WorkerConfig::default()
        }
    }

    pub fn consumer_config(&self) -> TaskConsumerConfig {
        TaskConsumerConfig {
            brokers: self.kafka.brokers.clone(),
            topic: self.kafka.topic.clone(),
            group_id: self.kafka.group_id.clone(),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
