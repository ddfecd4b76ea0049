//! Waiting on background work.

use std::fmt::Display;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// Why [`wait_timeout_or_error`] returned early.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum WaitError<E: Display> {
    /// The deadline passed before every handle finished.
    #[error("timed out waiting for tasks to complete")]
    Timeout,

    /// A background task reported an error.
    #[error("{0}")]
    Failed(E),
}

/// Waits until every handle finishes, the timeout elapses, or an error
/// arrives on `errors`, whichever comes first.
///
/// Handles still running on timeout or error are detached, not aborted.
pub async fn wait_timeout_or_error<E: Display>(
    handles: Vec<JoinHandle<()>>,
    timeout: Duration,
    errors: &mut mpsc::Receiver<E>,
) -> Result<(), WaitError<E>> {
    let all_done = async move {
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "Background task did not complete cleanly");
            }
        }
    };

    tokio::select! {
        () = all_done => Ok(()),
        () = tokio::time::sleep(timeout) => Err(WaitError::Timeout),
        Some(err) = errors.recv() => Err(WaitError::Failed(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_all_handles_finish() {
        let (_tx, mut rx) = mpsc::channel::<String>(1);
        let handles = (0..3)
            .map(|i| {
                tokio::spawn(async move { tokio::time::sleep(Duration::from_millis(5 * i)).await })
            })
            .collect();
        let result = wait_timeout_or_error(handles, Duration::from_secs(5), &mut rx).await;
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn test_timeout_does_not_cancel() {
        let (_tx, mut rx) = mpsc::channel::<String>(1);
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            flag.store(true, Ordering::SeqCst);
        });

        let result = wait_timeout_or_error(vec![handle], Duration::from_millis(10), &mut rx).await;
        let err = result.unwrap_err();
        assert_eq!(err, WaitError::Timeout);
        assert_eq!(err.to_string(), "timed out waiting for tasks to complete");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_first_error_wins() {
        let (tx, mut rx) = mpsc::channel::<String>(2);
        let handle = tokio::spawn(async move {
            let _ = tx.send("readiness check failed".to_string()).await;
            tokio::time::sleep(Duration::from_secs(10)).await;
        });
        let result = wait_timeout_or_error(vec![handle], Duration::from_secs(5), &mut rx).await;
        assert_eq!(result, Err(WaitError::Failed("readiness check failed".to_string())));
    }

    #[tokio::test]
    async fn test_closed_channel_is_ignored() {
        let (tx, mut rx) = mpsc::channel::<String>(1);
        drop(tx);
        let handle = tokio::spawn(async { tokio::time::sleep(Duration::from_millis(10)).await });
        let result = wait_timeout_or_error(vec![handle], Duration::from_secs(5), &mut rx).await;
        assert_eq!(result, Ok(()));
    }
}
