//! Bulk presigned URL generation
//!
//! One task per key. The first failure aborts every outstanding task and fails
//! the whole batch; on success URLs come back in input order.

use super::{AssetStore, StorageError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

pub async fn presign_all(
    store: Arc<dyn AssetStore>,
    keys: Vec<String>,
    expires_in: Duration,
) -> Result<Vec<String>, StorageError> {
    let total = keys.len();
    let mut tasks = JoinSet::new();

    for (index, key) in keys.into_iter().enumerate() {
        let store = Arc::clone(&store);
        tasks.spawn(async move {
            let url = store.presigned_url(&key, expires_in).await?;
            Ok::<_, StorageError>((index, url))
        });
    }

    let mut urls: Vec<Option<String>> = vec![None; total];

    while let Some(joined) = tasks.join_next().await {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                tasks.abort_all();
                return Err(StorageError::TaskFailed(e.to_string()));
            }
        };

        match outcome {
            Ok((index, url)) => urls[index] = Some(url),
            Err(e) => {
                tasks.abort_all();
                return Err(e);
            }
        }
    }

    urls.into_iter()
        .enumerate()
        .map(|(index, url)| {
            url.ok_or_else(|| StorageError::TaskFailed(format!("no URL produced for item {index}")))
        })
        .collect()
}
