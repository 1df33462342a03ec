//! Retry policies for consistent backoff behavior, built on `backon`.
//!
//! # Available Policies
//!
//! | Policy | Min Delay | Max Delay | Retries | Use Case |
//! |--------|-----------|-----------|---------|----------|
//! | `remediation_policy` | 250ms | 10s | unbounded | Peer eviction steps |
//! | `storage_policy` | 10ms | 500ms | 3 | Snapshot writes to the object store |
//!
//! The remediation policy is not driven by `backon::Retryable`: the
//! reconciler must keep consuming observations between attempts, so the
//! failure detector pulls delays from the built iterator and the reconciler
//! wakes up when they expire.
//!
//! # Example
//!
//! ```rust,no_run
//! use jetlog::cluster::retry;
//! use backon::Retryable;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     (|| async { Ok::<_, std::io::Error>(()) })
//!         .retry(retry::storage_policy())
//!         .when(|e| e.kind() == std::io::ErrorKind::TimedOut)
//!         .await?;
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};

use crate::constants::{REMEDIATION_RETRY_MAX_DELAY_MS, REMEDIATION_RETRY_MIN_DELAY_MS};
use crate::error::{JetError, JetResult};

/// Policy for failed peer-eviction steps.
///
/// No jitter, and the sequence never runs out.
pub fn remediation_policy() -> ExponentialBuilder {
    remediation_policy_with(
        Duration::from_millis(REMEDIATION_RETRY_MIN_DELAY_MS),
        Duration::from_millis(REMEDIATION_RETRY_MAX_DELAY_MS),
    )
}

/// Remediation policy with custom bounds.
pub fn remediation_policy_with(min_delay: Duration, max_delay: Duration) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(min_delay)
        .with_max_delay(max_delay)
        .without_max_times()
}

/// Policy for object store writes (snapshots, storage markers).
///
/// Short delays and few retries: a persistent storage failure should surface
/// quickly instead of stalling the caller.
pub fn storage_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(10))
        .with_max_delay(Duration::from_millis(500))
        .with_max_times(3)
        .with_jitter()
}

/// Execute an async operation with the storage retry policy, retrying only
/// retriable errors.
pub async fn with_storage_policy<F, Fut, T>(operation: F) -> JetResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = JetResult<T>>,
{
    operation
        .retry(storage_policy())
        .when(JetError::is_retriable)
        .notify(|e, delay| {
            tracing::debug!(error = %e, delay_ms = delay.as_millis(), "Retrying storage operation");
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use backon::BackoffBuilder;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_remediation_policy_never_exhausts() {
        let delays: Vec<Duration> = remediation_policy().build().take(50).collect();
        assert_eq!(delays.len(), 50);
        assert_eq!(delays[0], Duration::from_millis(250));
        assert_eq!(delays[1], Duration::from_millis(500));
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(10)));
        assert_eq!(delays[49], Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_storage_policy_retries_retriable_errors() {
        let attempts = AtomicU32::new(0);

        let result = with_storage_policy(|| async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(JetError::Unavailable("object store throttled".to_string()))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_storage_policy_does_not_retry_rejections() {
        let attempts = AtomicU32::new(0);

        let result: JetResult<()> = with_storage_policy(|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(JetError::InvalidRequest("bad".to_string()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_storage_policy_exhausts() {
        let attempts = AtomicU32::new(0);

        let result: JetResult<()> = with_storage_policy(|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(JetError::Timeout(Duration::from_millis(1)))
        })
        .await;

        assert!(result.is_err());
        // Initial attempt + 3 retries
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }
}
