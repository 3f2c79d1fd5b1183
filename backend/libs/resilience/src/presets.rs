/// Preset retry strategies for the external dependencies of the image pipeline
use crate::retry::RetryConfig;
use std::time::Duration;

/// Kafka consumer polls
///
/// - 1 attempt, 1s base delay, factor 2: the fetch loop itself is the retry
pub fn queue_fetch() -> RetryConfig {
    RetryConfig::strategy(1, Duration::from_secs(1), 2.0)
}

/// Kafka producer sends
///
/// - 3 attempts, 1s base delay, factor 2 (1s + 2s of backoff at most)
pub fn queue_publish() -> RetryConfig {
    RetryConfig::strategy(3, Duration::from_secs(1), 2.0)
}

/// S3/Object storage operations
///
/// - 3 attempts with jittered exponential backoff starting at 200ms
pub fn object_storage() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(200),
        max_backoff: Duration::from_secs(5),
        backoff_multiplier: 2.0,
        jitter: true,
    }
}
