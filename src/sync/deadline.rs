// Deadlines are cancellation tokens that fire themselves

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Derive a child of `parent` that is cancelled after `timeout`
///
/// Cancelling the returned token early stops its timer.
pub fn deadline_token(parent: &CancellationToken, timeout: Duration) -> CancellationToken {
    let token = parent.child_token();
    let timer = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = timer.cancelled() => {}
            _ = tokio::time::sleep(timeout) => timer.cancel(),
        }
    });
    token
}
