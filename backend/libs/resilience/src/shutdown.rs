/// Cooperative shutdown signalling over a `watch::Receiver<bool>`
use tokio::sync::watch;

/// Returns `true` once shutdown has been requested.
pub fn is_shutdown(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow()
}

/// Resolves when the shutdown flag becomes `true`.
///
/// A dropped sender counts as shutdown: nobody is left to keep the process
/// running, so waiting forever would only leak the task.
pub async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
