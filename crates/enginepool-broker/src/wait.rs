//! Advisory wait for connection files.

use std::path::Path;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Poll until every path exists or `timeout` elapses.
///
/// Returns whether all files were present at the last check. Expiry is not
/// an error here; callers decide whether a missing file is fatal.
pub async fn wait_for_files(paths: &[&Path], timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;

    loop {
        let mut missing = None;
        for path in paths {
            if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                missing = Some(*path);
                break;
            }
        }

        let Some(path) = missing else {
            return true;
        };

        let now = Instant::now();
        if now >= deadline {
            debug!(path = %path.display(), "gave up waiting for file");
            return false;
        }
        debug!(path = %path.display(), "waiting for file");
        tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
    }
}
