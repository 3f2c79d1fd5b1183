/// Resilience patterns for the image pipeline
///
/// This library provides:
/// - **Retry**: Exponential backoff with optional jitter for transient failures
/// - **Shutdown**: Cooperative cancellation over a `watch` channel, honoured by retries
/// - **Preset Configurations**: Pre-tuned strategies for Kafka and object storage
///
/// # Example: Publish with retry, abort on shutdown
///
/// ```rust,no_run
/// use resilience::{presets, with_retry_until_shutdown};
/// use tokio::sync::watch;
///
/// #[tokio::main]
/// async fn main() {
///     let (_tx, mut shutdown) = watch::channel(false);
///     let config = presets::queue_publish();
///
///     let _result = with_retry_until_shutdown(&config, &mut shutdown, || async {
///         // Your Kafka send here
///         Ok::<_, String>(())
///     })
///     .await;
/// }
/// ```

pub mod presets;
pub mod retry;
pub mod shutdown;

// Re-export main types for convenience
pub use retry::{with_retry, with_retry_until_shutdown, RetryConfig, RetryError};
pub use shutdown::{is_shutdown, wait_for_shutdown};
