/// S3-compatible asset store
///
/// Works against AWS S3 and MinIO (set `S3_ENDPOINT` and path-style addressing).
/// Every call goes through the object-storage retry preset; a missing object is
/// reported as `StorageError::NotFound` without being retried.
use crate::config::S3Config;
use crate::storage::{content_type_for, AssetStore, StorageError};
use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client;
use bytes::Bytes;
use resilience::{presets, with_retry, RetryConfig, RetryError};
use std::time::Duration;
use tracing::{debug, info};

pub struct S3AssetStore {
    client: Client,
    bucket: String,
    region: String,
    retry: RetryConfig,
}

impl S3AssetStore {
    pub fn new(client: Client, bucket: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            region: region.into(),
            retry: presets::object_storage(),
        }
    }

    /// Build the client from configuration and make sure the bucket exists
    pub async fn connect(config: &S3Config) -> Result<Self, StorageError> {
        let client = get_s3_client(config).await;
        let store = Self::new(client, config.bucket.clone(), config.region.clone());
        store.ensure_bucket().await?;
        Ok(store)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Create the bucket if it does not exist yet
    pub async fn ensure_bucket(&self) -> Result<(), StorageError> {
        if self
            .client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .is_ok()
        {
            debug!(bucket = %self.bucket, "Bucket exists");
            return Ok(());
        }

        let mut request = self.client.create_bucket().bucket(&self.bucket);
        if self.region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        request.send().await.map_err(|e| {
            StorageError::Backend(format!(
                "Failed to create bucket {}: {}",
                self.bucket,
                DisplayErrorContext(&e)
            ))
        })?;

        info!(bucket = %self.bucket, "Created bucket");
        Ok(())
    }
}

#[async_trait]
impl AssetStore for S3AssetStore {
    async fn upload(&self, key: &str, data: Bytes) -> Result<(), StorageError> {
        let content_type = content_type_for(key);
        let size = data.len();

        with_retry(&self.retry, || {
            let body = ByteStream::from(data.clone());
            async move {
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .body(body)
                    .content_type(content_type)
                    .send()
                    .await
                    .map_err(|e| {
                        StorageError::Backend(format!(
                            "Failed to upload {key} to {}: {}",
                            self.bucket,
                            DisplayErrorContext(&e)
                        ))
                    })
            }
        })
        .await
        .map_err(flatten_retry_error)?;

        debug!(key = %key, size = size, content_type = content_type, "Uploaded object");
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Bytes, StorageError> {
        let found = with_retry(&self.retry, || async move {
            let response = match self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    let service_error = e.into_service_error();
                    if service_error.is_no_such_key() {
                        return Ok(None);
                    }
                    return Err(StorageError::Backend(format!(
                        "Failed to download {key}: {}",
                        DisplayErrorContext(&service_error)
                    )));
                }
            };

            let bytes = response
                .body
                .collect()
                .await
                .map_err(|e| StorageError::Backend(format!("Failed to read S3 object body: {e}")))?
                .into_bytes();

            Ok(Some(bytes))
        })
        .await
        .map_err(flatten_retry_error)?;

        found.ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        with_retry(&self.retry, || async move {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| {
                    StorageError::Backend(format!(
                        "Failed to delete {key}: {}",
                        DisplayErrorContext(&e)
                    ))
                })
        })
        .await
        .map_err(flatten_retry_error)?;

        debug!(key = %key, "Deleted object");
        Ok(())
    }

    async fn presigned_url(&self, key: &str, expires_in: Duration) -> Result<String, StorageError> {
        let presigning_config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::Presign(format!("Invalid presigning config: {e}")))?;

        let presigned_request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(|e| StorageError::Presign(format!("Failed to presign {key}: {e}")))?;

        Ok(presigned_request.uri().to_string())
    }
}

fn flatten_retry_error(err: RetryError<StorageError>) -> StorageError {
    match err {
        RetryError::MaxRetriesExceeded { last_error, .. } => last_error,
        RetryError::Cancelled => StorageError::Backend("operation cancelled".to_string()),
    }
}

/// Initialize AWS S3 client with credentials from config
///
/// Falls back to the default credential chain when no static keys are set.
/// A custom endpoint (MinIO) normally needs path-style addressing.
pub async fn get_s3_client(config: &S3Config) -> Client {
    use aws_sdk_s3::config::Region;

    let mut aws_config_builder = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new(config.region.clone()));

    if let (Some(access_key_id), Some(secret_access_key)) =
        (&config.access_key_id, &config.secret_access_key)
    {
        use aws_sdk_s3::config::Credentials;

        let credentials = Credentials::new(
            access_key_id,
            secret_access_key,
            None, // No session token
            None, // No expiration
            "image_processor_s3",
        );

        aws_config_builder = aws_config_builder.credentials_provider(credentials);
    }

    if let Some(endpoint) = &config.endpoint {
        aws_config_builder = aws_config_builder.endpoint_url(endpoint);
    }

    let aws_config = aws_config_builder.load().await;

    let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
        .force_path_style(config.force_path_style)
        .build();

    Client::from_conf(s3_config)
}
