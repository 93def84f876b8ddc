pub mod fetch;
pub mod ingest;
pub mod run;
pub mod validate;

use tokio::sync::watch;

/// Resolves once the run-level cancellation flag flips to true. If the
/// sender side is gone without cancelling, stays pending forever.
pub(crate) async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
