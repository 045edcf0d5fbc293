//! Shutdown flag helpers

use tokio::sync::watch;

/// Resolve once the shutdown flag is raised
///
/// Never resolves if every sender is gone without raising the flag, since
/// nobody is left to request a shutdown.
pub async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
