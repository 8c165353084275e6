use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
    time::SystemTime,
};

use energy_client::{
    domain::{keys, Reading, Source},
    EnergyStore, StoreError,
};
use futures::StreamExt;
use time::OffsetDateTime;

use crate::pipeline::{Envelope, PipelineError, Sink};
use crate::retry::RetryPolicy;
use crate::stats::RunStats;

/// First and last timestamp of the readings written for one source.
pub type TouchedRange = (OffsetDateTime, OffsetDateTime);

#[derive(Debug, Default)]
pub struct ImportSummary {
    pub stats: RunStats,
    /// Sources that received new readings in this run.
    pub touched: BTreeMap<String, TouchedRange>,
}

impl ImportSummary {
    pub fn merge(&mut self, other: ImportSummary) {
        self.stats.merge(&other.stats);
        for (name, (first, last)) in other.touched {
            widen(&mut self.touched, name, first, last);
        }
    }
}

fn widen(
    touched: &mut BTreeMap<String, TouchedRange>,
    name: String,
    first: OffsetDateTime,
    last: OffsetDateTime,
) {
    touched
        .entry(name)
        .and_modify(|(lo, hi)| {
            *lo = (*lo).min(first);
            *hi = (*hi).max(last);
        })
        .or_insert((first, last));
}

/// Persists readings one at a time, registering unknown sources on first
/// sight. Failed items are counted by category and never stop the run.
pub struct ReadingStoreSink {
    store: Arc<dyn EnergyStore>,
    retry: RetryPolicy,
}

impl ReadingStoreSink {
    pub fn new(store: Arc<dyn EnergyStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    async fn ensure_source(&self, reading: &Reading) -> Result<bool, StoreError> {
        let mut source = Source::new(reading.source_name.clone());
        for key in [keys::INSTALL_DATE, keys::METER_TYPE] {
            if let Some(v) = reading.raw(key) {
                source.set_property(key, v);
            }
        }

        let store = &self.store;
        let source = &source;
        match self
            .retry
            .call("store_source", |ctx| async move { store.store_source(&ctx, source, false).await })
            .await
        {
            Ok(()) => Ok(true),
            Err(StoreError::AlreadyExists(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn persist(&self, reading: &Reading) -> Result<(), StoreError> {
        let store = &self.store;
        self.retry
            .call("store_reading", |ctx| async move { store.store_reading(&ctx, reading).await })
            .await
    }
}

#[async_trait::async_trait]
impl Sink<Reading> for ReadingStoreSink {
    type Summary = ImportSummary;

    async fn run<S>(&self, mut input: S) -> Result<ImportSummary, PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<Reading>, PipelineError>> + Send + Unpin + 'static,
    {
        let mut summary = ImportSummary::default();
        let mut known_sources: HashSet<String> = HashSet::new();

        while let Some(item) = input.next().await {
            if !matches!(item, Err(PipelineError::Open(_))) {
                summary.stats.rows_read += 1;
            }

            let env = match item {
                Ok(env) => env,
                Err(e) => {
                    match &e {
                        PipelineError::Store { .. } => {
                            tracing::warn!(error = %e, "reading skipped, store unavailable")
                        }
                        PipelineError::Open(_) => tracing::error!(error = %e, "input not imported"),
                        _ => tracing::debug!(error = %e, "row rejected"),
                    }
                    summary.stats.record_pipeline_error(&e);
                    continue;
                }
            };
            summary.stats.readings_parsed += 1;
            let reading = &env.payload;

            if !known_sources.contains(&reading.source_name) {
                match self.ensure_source(reading).await {
                    Ok(created) => {
                        if created {
                            summary.stats.new_sources += 1;
                            tracing::info!(source = %reading.source_name, "registered new source");
                        }
                        known_sources.insert(reading.source_name.clone());
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            source = %reading.source_name,
                            line = env.line,
                            "could not register source, reading skipped"
                        );
                        summary.stats.store_failures += 1;
                        continue;
                    }
                }
            }

            match self.persist(reading).await {
                Ok(()) => {
                    summary.stats.new_readings += 1;
                    metrics::counter!("readings_stored_total").increment(1);
                    widen(&mut summary.touched, reading.source_name.clone(), reading.ts, reading.ts);

                    if let Ok(dur) = SystemTime::now().duration_since(env.received_at) {
                        metrics::histogram!("ingest_end_to_end_latency_seconds").record(dur.as_secs_f64());
                    }
                }
                Err(StoreError::AlreadyExists(_)) => {
                    summary.stats.existing_readings += 1;
                    metrics::counter!("readings_existing_total").increment(1);
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        source = %reading.source_name,
                        line = env.line,
                        "reading skipped, store write failed"
                    );
                    summary.stats.store_failures += 1;
                }
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use energy_client::{InMemoryStore, StoreContext};
    use time::macros::datetime;

    fn reading(ts: OffsetDateTime, energy_wh: i64) -> Reading {
        let mut raw_fields = BTreeMap::new();
        raw_fields.insert(keys::METER_TYPE.to_string(), "electric".to_string());
        Reading {
            source_name: "m-1".to_string(),
            mtu_id: "9".to_string(),
            ts,
            energy_wh,
            raw_fields,
        }
    }

    fn items(readings: Vec<Reading>) -> impl futures::Stream<Item = Result<Envelope<Reading>, PipelineError>> + Send + Unpin {
        let items: Vec<_> = readings
            .into_iter()
            .enumerate()
            .map(|(i, r)| Ok(Envelope::new(r, i as u64 + 1)))
            .collect();
        futures::stream::iter(items)
    }

    #[tokio::test]
    async fn same_reading_twice_is_stored_once() {
        let store = Arc::new(InMemoryStore::new());
        let sink = ReadingStoreSink::new(store.clone(), RetryPolicy::none());
        let r = reading(datetime!(2024-01-01 00:00:00 UTC), 10);

        let summary = sink.run(items(vec![r.clone(), r])).await.unwrap();

        assert_eq!(summary.stats.new_readings, 1);
        assert_eq!(summary.stats.existing_readings, 1);
        assert_eq!(store.reading_count("m-1").await, 1);
    }

    #[tokio::test]
    async fn first_sight_registers_source_with_metadata() {
        let store = Arc::new(InMemoryStore::new());
        let sink = ReadingStoreSink::new(store.clone(), RetryPolicy::none());

        let summary = sink
            .run(items(vec![
                reading(datetime!(2024-01-01 00:00:00 UTC), 10),
                reading(datetime!(2024-01-02 00:00:00 UTC), 20),
            ]))
            .await
            .unwrap();

        assert_eq!(summary.stats.new_sources, 1);
        assert_eq!(
            summary.touched.get("m-1"),
            Some(&(datetime!(2024-01-01 00:00:00 UTC), datetime!(2024-01-02 00:00:00 UTC)))
        );
        let source = store.get_source(&StoreContext::background(), "m-1").await.unwrap();
        assert_eq!(source.property(keys::METER_TYPE), Some("electric"));
    }

    #[tokio::test]
    async fn store_outage_skips_items_but_finishes() {
        let store = Arc::new(InMemoryStore::new());
        store.set_offline(true).await;
        let sink = ReadingStoreSink::new(store, RetryPolicy::none());

        let summary = sink
            .run(items(vec![reading(datetime!(2024-01-01 00:00:00 UTC), 10)]))
            .await
            .unwrap();

        assert_eq!(summary.stats.rows_read, 1);
        assert_eq!(summary.stats.store_failures, 1);
        assert_eq!(summary.stats.new_readings, 0);
    }

    #[tokio::test]
    async fn upstream_errors_are_counted() {
        let store = Arc::new(InMemoryStore::new());
        let sink = ReadingStoreSink::new(store, RetryPolicy::none());
        let input = futures::stream::iter(vec![Err(PipelineError::Parse {
            line: 3,
            error: crate::parse::ParseError::NoReading { column: 5 },
        })]);

        let summary = sink.run(input).await.unwrap();

        assert_eq!(summary.stats.rows_read, 1);
        assert_eq!(summary.stats.rejected.no_reading, 1);
    }
}
