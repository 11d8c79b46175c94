//! Cancellable waits shared by the polling loops

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sleep for `duration` unless `token` is cancelled first
///
/// Returns `true` when the wait was interrupted.
pub async fn pause(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
