/// Image repository - PostgreSQL operations on `image_path`
use super::{ImageRepository, RepositoryError};
use crate::models::{Direction, ImageRecord, PageCursor, ProcessedImage, PAGE_SIZE};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, info};

#[derive(Clone)]
pub struct PgImageRepository {
    pool: PgPool,
}

impl PgImageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ImageRepository for PgImageRepository {
    async fn create(&self, uploads_path: &str) -> Result<ImageRecord, RepositoryError> {
        let record = sqlx::query_as::<_, ImageRecord>(
            r#"
            INSERT INTO image_path (uploads_path)
            VALUES ($1)
            RETURNING id, uploads_path, processed_path, processed, created_at
            "#,
        )
        .bind(uploads_path)
        .fetch_one(&self.pool)
        .await?;

        debug!(image_id = record.id, uploads_path = %uploads_path, "Created image record");
        Ok(record)
    }

    async fn get(&self, id: i64) -> Result<Option<ImageRecord>, RepositoryError> {
        let record = sqlx::query_as::<_, ImageRecord>(
            r#"
            SELECT id, uploads_path, processed_path, processed, created_at
            FROM image_path
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn mark_processed(&self, result: &ProcessedImage) -> Result<(), RepositoryError> {
        let updated = sqlx::query(
            r#"
            UPDATE image_path
            SET uploads_path = $2, processed_path = $3, processed = $4
            WHERE id = $1
            "#,
        )
        .bind(result.id)
        .bind(&result.uploads_path)
        .bind(&result.processed_path)
        .bind(result.processed)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(RepositoryError::NotFound(result.id));
        }

        debug!(
            image_id = result.id,
            processed_path = %result.processed_path,
            "Marked image processed"
        );
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<bool, RepositoryError> {
        let deleted = sqlx::query("DELETE FROM image_path WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(deleted > 0)
    }

    async fn list(&self, cursor: &PageCursor) -> Result<Vec<ImageRecord>, RepositoryError> {
        // Row-value comparison keeps ties on created_at ordered by id
        let sql = match cursor.direction {
            Direction::Next => {
                r#"
                SELECT id, uploads_path, processed_path, processed, created_at
                FROM image_path
                WHERE (created_at, id) > ($1, $2)
                ORDER BY created_at ASC, id ASC
                LIMIT $3
                "#
            }
            Direction::Prev => {
                r#"
                SELECT id, uploads_path, processed_path, processed, created_at
                FROM image_path
                WHERE (created_at, id) < ($1, $2)
                ORDER BY created_at DESC, id DESC
                LIMIT $3
                "#
            }
        };

        let records = sqlx::query_as::<_, ImageRecord>(sql)
            .bind(cursor.created_at)
            .bind(cursor.id)
            .bind(PAGE_SIZE)
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }

    async fn count(&self) -> Result<i64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM image_path")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    async fn close(&self) -> Result<(), RepositoryError> {
        self.pool.close().await;
        info!("Database pool closed");
        Ok(())
    }
}
