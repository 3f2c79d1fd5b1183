//! Image Processor
//!
//! Accepts image uploads, queues transformation tasks on Kafka and processes
//! them asynchronously (resize, thumbnail, watermark), persisting results in
//! PostgreSQL and S3-compatible storage.

pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod kafka;
pub mod models;
pub mod services;
pub mod storage;

// Public re-exports
pub use config::Config;
pub use error::{AppError, Result};
