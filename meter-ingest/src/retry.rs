use std::{future::Future, time::Duration};

use energy_client::{StoreContext, StoreError};

/// How store calls are bounded and retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
    pub call_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(500),
            call_timeout: Some(Duration::from_secs(10)),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::ZERO,
            call_timeout: None,
        }
    }

    /// Fresh context for one attempt.
    pub fn context(&self) -> StoreContext {
        match self.call_timeout {
            Some(t) => StoreContext::with_timeout(t),
            None => StoreContext::background(),
        }
    }

    /// Run `f`, retrying transient failures with linear backoff.
    pub async fn call<T, F, Fut>(&self, op: &'static str, mut f: F) -> Result<T, StoreError>
    where
        F: FnMut(StoreContext) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match f(self.context()).await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let sleep_for = self.backoff * attempt;
                    tracing::warn!(error = %e, attempt, op, "store call failed, retrying with backoff");
                    metrics::counter!("store_retries_total").increment(1);
                    tokio::time::sleep(sleep_for).await;
                }
                Err(e) => {
                    if e.is_transient() {
                        tracing::error!(error = %e, op, "store call failed, giving up");
                        metrics::counter!("store_errors_total").increment(1);
                    }
                    return Err(e);
                }
            }
        }
    }
}
