use std::collections::BTreeMap;

use time::OffsetDateTime;
use tokio::sync::Mutex;

use super::{EnergyStore, StoreContext, StoreError};
use crate::domain::{Reading, Source};

type ReadingKey = (OffsetDateTime, String);

#[derive(Default)]
struct Inner {
    offline: bool,
    sources: BTreeMap<String, Source>,
    readings: BTreeMap<String, BTreeMap<ReadingKey, Reading>>,
}

impl Inner {
    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline {
            Err(StoreError::Unavailable("in-memory store is offline".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Process-local `EnergyStore` used for dry runs and tests.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with `StoreError::Unavailable`.
    pub async fn set_offline(&self, offline: bool) {
        self.inner.lock().await.offline = offline;
    }

    pub async fn reading_count(&self, source_name: &str) -> usize {
        self.inner
            .lock()
            .await
            .readings
            .get(source_name)
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait::async_trait]
impl EnergyStore for InMemoryStore {
    async fn get_source(&self, ctx: &StoreContext, name: &str) -> Result<Source, StoreError> {
        ctx.run(async {
            let inner = self.inner.lock().await;
            inner.check_online()?;
            inner
                .sources
                .get(name)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("source '{name}'")))
        })
        .await
    }

    async fn get_sources(&self, ctx: &StoreContext) -> Result<Vec<Source>, StoreError> {
        ctx.run(async {
            let inner = self.inner.lock().await;
            inner.check_online()?;
            Ok(inner.sources.values().cloned().collect())
        })
        .await
    }

    async fn store_source(
        &self,
        ctx: &StoreContext,
        source: &Source,
        overwrite: bool,
    ) -> Result<(), StoreError> {
        ctx.run(async {
            let mut inner = self.inner.lock().await;
            inner.check_online()?;
            if !overwrite && inner.sources.contains_key(&source.name) {
                return Err(StoreError::AlreadyExists(format!("source '{}'", source.name)));
            }
            inner.sources.insert(source.name.clone(), source.clone());
            Ok(())
        })
        .await
    }

    async fn get_readings(
        &self,
        ctx: &StoreContext,
        source_name: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<Reading>, StoreError> {
        ctx.run(async {
            let inner = self.inner.lock().await;
            inner.check_online()?;
            let Some(readings) = inner.readings.get(source_name) else {
                return Ok(Vec::new());
            };
            if start > end {
                return Ok(Vec::new());
            }
            Ok(readings
                .range((start, String::new())..)
                .take_while(|((ts, _), _)| *ts <= end)
                .map(|(_, r)| r.clone())
                .collect())
        })
        .await
    }

    async fn store_reading(&self, ctx: &StoreContext, reading: &Reading) -> Result<(), StoreError> {
        ctx.run(async {
            let mut inner = self.inner.lock().await;
            inner.check_online()?;
            let stream = inner.readings.entry(reading.source_name.clone()).or_default();
            let key = (reading.ts, reading.mtu_id.clone());
            if stream.contains_key(&key) {
                return Err(StoreError::AlreadyExists(format!(
                    "reading {}/{} at {}",
                    reading.source_name, reading.mtu_id, reading.ts
                )));
            }
            stream.insert(key, reading.clone());
            Ok(())
        })
        .await
    }

    async fn delete_reading(
        &self,
        ctx: &StoreContext,
        source_name: &str,
        ts: OffsetDateTime,
    ) -> Result<(), StoreError> {
        ctx.run(async {
            let mut inner = self.inner.lock().await;
            inner.check_online()?;
            let stream = inner
                .readings
                .get_mut(source_name)
                .ok_or_else(|| StoreError::NotFound(format!("source '{source_name}'")))?;
            let before = stream.len();
            stream.retain(|(reading_ts, _), _| *reading_ts != ts);
            if stream.len() == before {
                return Err(StoreError::NotFound(format!("reading {source_name} at {ts}")));
            }
            Ok(())
        })
        .await
    }
}
