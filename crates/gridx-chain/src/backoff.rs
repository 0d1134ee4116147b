use std::future::Future;
use std::time::Duration;

use tracing::warn;

use gridx_core::constants::{BACKOFF_BASE_SECS, BACKOFF_CAP_SECS};
use gridx_core::error::{ErrorKind, GridxError};

/// Delay before retry attempt `attempt` (0-based): base doubling, capped.
pub fn backoff_delay(attempt: u32) -> Duration {
    let secs = BACKOFF_BASE_SECS
        .saturating_mul(1u64 << attempt.min(63))
        .min(BACKOFF_CAP_SECS);
    Duration::from_secs(secs)
}

/// Retry `op` on network failures with exponential backoff.
///
/// Only `Network`-kind errors are retried; anything else surfaces
/// immediately. After `max_retries` additional attempts the last error is
/// returned.
pub async fn retry_with_backoff<T, F, Fut>(
    label: &str,
    max_retries: u32,
    op: F,
) -> Result<T, GridxError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, GridxError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.kind() == ErrorKind::Network && attempt < max_retries => {
                let delay = backoff_delay(attempt);
                warn!(
                    op = label,
                    attempt = attempt + 1,
                    delay_s = delay.as_secs(),
                    error = %e,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delays_double_and_cap() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
        assert_eq!(backoff_delay(8), Duration::from_secs(256));
        assert_eq!(backoff_delay(9), Duration::from_secs(300));
        assert_eq!(backoff_delay(40), Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_network_errors_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff("test", 5, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(GridxError::ChainRpc("connection refused".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn validation_errors_do_not_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff("test", 5, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GridxError::ZeroAmount) }
        })
        .await;
        assert!(matches!(result, Err(GridxError::ZeroAmount)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff("test", 2, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GridxError::Network("down".into())) }
        })
        .await;
        assert!(matches!(result, Err(GridxError::Network(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3); // initial + 2 retries
    }
}
