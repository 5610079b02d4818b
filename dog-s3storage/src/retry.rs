use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::{RetrySettings, StorageResult};

/// Bounded exponential backoff around remote calls.
///
/// Only errors classified as transient are retried. Anything else, and the
/// last transient error once attempts run out, is returned unchanged.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(settings.max_attempts, settings.base_delay())
    }

    /// A policy that makes exactly one attempt
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay slept after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exp)
    }

    /// Run `operation`, re-invoking it while it fails with a retryable error
    pub async fn run<T, F, Fut>(&self, name: &str, mut operation: F) -> StorageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.kind().is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation = name,
                        attempt,
                        max_attempts = self.max_attempts,
                        ?delay,
                        "Retrying after transient error: {}",
                        err
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    #[test]
    fn delay_doubles_each_attempt() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn retryable_error_is_attempted_exactly_max_times() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: StorageResult<()> = fast()
            .run("upload_part", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StorageError::service("SlowDown", Some(503), "reduce your request rate"))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(StorageError::Service { code, status, .. }) => {
                assert_eq!(code, "SlowDown");
                assert_eq!(status, Some(503));
            }
            other => panic!("expected the same service error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn fatal_error_is_attempted_once() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: StorageResult<()> = fast()
            .run("complete_multipart_upload", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StorageError::service("AccessDenied", Some(403), "denied"))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn recovers_when_a_later_attempt_succeeds() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = fast()
            .run("create_multipart_upload", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
                    Err(StorageError::transport(io))
                } else {
                    Ok("upload-1")
                }
            })
            .await;

        let upload_id = tokio_test::assert_ok!(result);
        assert_eq!(upload_id, "upload-1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn each_retry_is_logged() {
        let _ = fast()
            .run("abort_multipart_upload", || async {
                Err::<(), _>(StorageError::service("InternalError", Some(500), "boom"))
            })
            .await;

        assert!(logs_contain("Retrying after transient error"));
    }
}
