//! Deadline and retry policy for outbound provider calls

use std::future::Future;
use std::time::Duration;

use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;

use crate::error::{BillingError, BillingResult};

/// Bounds applied to every call made to a payment provider
#[derive(Debug, Clone, Copy)]
pub struct UpstreamPolicy {
    pub timeout: Duration,
    /// Extra attempts allowed for idempotent reads
    pub read_retries: usize,
    pub retry_delay: Duration,
}

impl Default for UpstreamPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            read_retries: 1,
            retry_delay: Duration::from_millis(250),
        }
    }
}

impl UpstreamPolicy {
    /// Run a non-idempotent call once under the deadline
    pub async fn call<T, F>(&self, label: &'static str, fut: F) -> BillingResult<T>
    where
        F: Future<Output = BillingResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    call = label,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Provider call timed out"
                );
                Err(BillingError::Upstream(format!("{label} timed out")))
            }
        }
    }

    /// Run an idempotent read, retrying transport failures a bounded number of times
    pub async fn read<T, F, Fut>(&self, label: &'static str, mut op: F) -> BillingResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BillingResult<T>>,
    {
        let strategy = FixedInterval::new(self.retry_delay).take(self.read_retries);
        RetryIf::spawn(
            strategy,
            || self.call(label, op()),
            |e: &BillingError| {
                let retry = e.is_retryable();
                if retry {
                    tracing::debug!(call = label, error = %e, "Retrying provider read");
                }
                retry
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast() -> UpstreamPolicy {
        UpstreamPolicy {
            timeout: Duration::from_millis(50),
            read_retries: 1,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_call_times_out() {
        let result: BillingResult<()> = fast()
            .call("slow", async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(BillingError::Upstream(_))));
    }

    #[tokio::test]
    async fn test_read_retries_once_on_transport_failure() {
        let attempts = AtomicUsize::new(0);
        let result = fast()
            .read("flaky", || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(BillingError::Upstream("reset".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_read_gives_up_after_bound() {
        let attempts = AtomicUsize::new(0);
        let result: BillingResult<()> = fast()
            .read("down", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(BillingError::Upstream("down".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_read_does_not_retry_rejections() {
        let attempts = AtomicUsize::new(0);
        let result: BillingResult<()> = fast()
            .read("rejected", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(BillingError::UpstreamRejected("404".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
