//! Exponential backoff retry helper shared by provider wrappers.

use std::future::Future;
use std::time::Duration;

use crate::cancel::Cancel;
use crate::error::ProviderError;

pub const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY: Duration = Duration::from_secs(1);
const CAP_DELAY: Duration = Duration::from_secs(30);

fn backoff_delay(attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    (BASE_DELAY * factor).min(CAP_DELAY)
}

/// Runs `op` up to [`MAX_ATTEMPTS`] times, sleeping with exponential
/// backoff between retryable failures. Non-retryable failures and
/// cancellation abort immediately.
pub async fn retry_with_backoff<T, F, Fut>(
    cancel: &Cancel,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;
    loop {
        cancel.check()?;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.kind.is_retryable() && attempt + 1 < MAX_ATTEMPTS => {
                attempt += 1;
                tracing::warn!(
                    attempt,
                    kind = ?err.kind,
                    message = %err.message,
                    "retrying after transient provider failure"
                );
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn retries_retryable_failures_up_to_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = Cancel::new();
        let calls_clone = calls.clone();
        let result: Result<(), ProviderError> = retry_with_backoff(&cancel, move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::with_kind(ErrorKind::Network, "boom"))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn non_retryable_failure_aborts_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = Cancel::new();
        let calls_clone = calls.clone();
        let result: Result<(), ProviderError> = retry_with_backoff(&cancel, move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::with_kind(ErrorKind::Safety, "blocked"))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
