use std::{future::Future, time::Duration};

use time::OffsetDateTime;
use tokio::time::Instant;

use crate::domain::{Reading, Source};

mod memory;

pub use memory::InMemoryStore;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store call exceeded its deadline")]
    Timeout,
    #[error("malformed record in store: {0}")]
    Malformed(String),
}

impl StoreError {
    /// Errors worth retrying: the call may succeed if repeated later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout)
    }
}

/// Per-call context passed to every store operation.
///
/// Carries an optional deadline; an expired deadline surfaces as
/// [`StoreError::Timeout`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreContext {
    deadline: Option<Instant>,
}

impl StoreContext {
    /// No deadline.
    pub fn background() -> Self {
        Self { deadline: None }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Drive `fut` to completion, bounded by this context's deadline.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .await
                .map_err(|_| StoreError::Timeout)?,
            None => fut.await,
        }
    }
}

/// Remote repository of per-source readings and metadata.
///
/// Readings are identified by (source, mtu, timestamp). `get_readings`
/// bounds are inclusive on both ends and results are ascending by timestamp.
#[async_trait::async_trait]
pub trait EnergyStore: Send + Sync {
    async fn get_source(&self, ctx: &StoreContext, name: &str) -> Result<Source, StoreError>;

    async fn get_sources(&self, ctx: &StoreContext) -> Result<Vec<Source>, StoreError>;

    /// Fails with `AlreadyExists` when `overwrite` is false and the source is known.
    async fn store_source(
        &self,
        ctx: &StoreContext,
        source: &Source,
        overwrite: bool,
    ) -> Result<(), StoreError>;

    async fn get_readings(
        &self,
        ctx: &StoreContext,
        source_name: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<Reading>, StoreError>;

    async fn store_reading(&self, ctx: &StoreContext, reading: &Reading) -> Result<(), StoreError>;

    /// Removes every reading of `source_name` stamped exactly `ts`.
    async fn delete_reading(
        &self,
        ctx: &StoreContext,
        source_name: &str,
        ts: OffsetDateTime,
    ) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn expired_deadline_maps_to_timeout() {
        let ctx = StoreContext::with_timeout(Duration::from_millis(10));
        let res: Result<(), StoreError> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            })
            .await;
        assert_eq!(res, Err(StoreError::Timeout));
    }

    #[tokio::test]
    async fn background_context_has_no_deadline() {
        let ctx = StoreContext::background();
        assert!(ctx.deadline().is_none());
        assert_eq!(ctx.run(async { Ok::<_, StoreError>(7) }).await, Ok(7));
    }
}
