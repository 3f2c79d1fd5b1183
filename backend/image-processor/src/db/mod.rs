/// Database access layer
///
/// This module provides:
/// - Connection pooling and embedded migrations
/// - The `ImageRepository` seam used by the worker pipeline and handlers
/// - `PgImageRepository`, its PostgreSQL implementation
pub mod image_repo;

use crate::models::{ImageRecord, PageCursor, ProcessedImage};
use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::info;

pub use image_repo::PgImageRepository;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Repository error types
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Image not found: {0}")]
    NotFound(i64),
}

/// Persistence of image records
#[async_trait]
pub trait ImageRepository: Send + Sync {
    /// Insert a pending record for a freshly uploaded asset
    async fn create(&self, uploads_path: &str) -> Result<ImageRecord, RepositoryError>;

    async fn get(&self, id: i64) -> Result<Option<ImageRecord>, RepositoryError>;

    /// Apply a successful transformation. `NotFound` if the record is gone.
    async fn mark_processed(&self, result: &ProcessedImage) -> Result<(), RepositoryError>;

    /// Returns `false` when no record matched
    async fn delete(&self, id: i64) -> Result<bool, RepositoryError>;

    /// One page of records strictly past `cursor`, in the cursor's direction
    async fn list(&self, cursor: &PageCursor) -> Result<Vec<ImageRecord>, RepositoryError>;

    async fn count(&self) -> Result<i64, RepositoryError>;

    async fn close(&self) -> Result<(), RepositoryError>;
}

/// Create the PostgreSQL pool
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!(max_connections = max_connections, "Database pool created");
    Ok(pool)
}

/// Run embedded migrations
pub async fn migrate(pool: &PgPool) -> Result<(), RepositoryError> {
    MIGRATOR.run(pool).await?;
    info!("Database migrations completed successfully");
    Ok(())
}
