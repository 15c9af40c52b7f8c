//! Retry logic.
//!
//! # Responsibilities
//! - Re-run a fallible async operation a bounded number of times
//! - Sleep on the policy's jittered schedule between attempts
//!
//! # Design Decisions
//! - The last error is returned unchanged so callers keep their error type
//! - Every failed attempt is logged at warn with its attempt number

use std::future::Future;

use super::backoff::RetryPolicy;

/// Run `op` until it succeeds or `policy.attempts` attempts have failed.
pub async fn retry_with_backoff<T, E, F, Fut>(
    label: &str,
    policy: RetryPolicy,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                let delay = policy.delay(attempt);
                tracing::warn!(
                    target_name = label,
                    attempt,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const FAST: RetryPolicy = RetryPolicy {
        attempts: 3,
        base_delay_ms: 1,
        max_delay_ms: 2,
    };

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry_with_backoff("test", FAST, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(format!("fail {n}"))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn returns_last_error_when_exhausted() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry_with_backoff("test", FAST, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(format!("fail {n}"))
        })
        .await;
        assert_eq!(result, Err("fail 3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
