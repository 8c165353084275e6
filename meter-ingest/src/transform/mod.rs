use std::{collections::HashMap, sync::Arc};

use csv::StringRecord;
use energy_client::{
    domain::{Reading, SamplingInterval},
    EnergyStore, StoreError,
};
use time::Duration;
use tokio::sync::Mutex;

use crate::classify::monotonic::span_before;
use crate::parse::RowParser;
use crate::pipeline::{Envelope, PipelineError, Transform};
use crate::retry::RetryPolicy;

pub mod validators;

use validators::{FieldValidator, RangeCeiling};

/// Parse raw rows into readings.
pub struct ParseRows {
    parser: RowParser,
}

impl ParseRows {
    pub fn new(parser: RowParser) -> Self {
        Self { parser }
    }
}

#[async_trait::async_trait]
impl Transform<StringRecord, Reading> for ParseRows {
    async fn apply(&self, input: Envelope<StringRecord>) -> Result<Envelope<Reading>, PipelineError> {
        let fields: Vec<&str> = input.payload.iter().collect();
        match self.parser.parse(&fields) {
            Ok(reading) => {
                metrics::counter!("readings_parsed_total").increment(1);
                Ok(input.map(reading))
            }
            Err(error) => {
                metrics::counter!("readings_rejected_total").increment(1);
                Err(PipelineError::Parse {
                    line: input.line,
                    error,
                })
            }
        }
    }
}

/// Rejects readings that imply more consumption since the previous reading
/// of the same stream than the source's sampling class allows.
pub struct RateCeilingCheck {
    store: Arc<dyn EnergyStore>,
    ceiling: RangeCeiling,
    lookback: Duration,
    retry: RetryPolicy,
    sampling: Mutex<HashMap<String, SamplingInterval>>,
}

impl RateCeilingCheck {
    pub fn new(
        store: Arc<dyn EnergyStore>,
        ceiling: RangeCeiling,
        lookback: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            ceiling,
            lookback,
            retry,
            sampling: Mutex::new(HashMap::new()),
        }
    }

    async fn sampling_of(&self, source_name: &str) -> Result<SamplingInterval, StoreError> {
        if let Some(s) = self.sampling.lock().await.get(source_name) {
            return Ok(*s);
        }

        let store = &self.store;
        let sampling = match self
            .retry
            .call("get_source", |ctx| async move { store.get_source(&ctx, source_name).await })
            .await
        {
            Ok(source) => source.sampling_interval(),
            Err(StoreError::NotFound(_)) => SamplingInterval::NotAvailable,
            Err(e) => return Err(e),
        };

        self.sampling
            .lock()
            .await
            .insert(source_name.to_string(), sampling);
        Ok(sampling)
    }

    async fn previous_of(&self, reading: &Reading) -> Result<Option<Reading>, StoreError> {
        let store = &self.store;
        let from = span_before(reading.ts, self.lookback);
        let history = self
            .retry
            .call("get_readings", |ctx| async move {
                store
                    .get_readings(&ctx, &reading.source_name, from, reading.ts)
                    .await
            })
            .await?;

        Ok(history
            .into_iter()
            .filter(|r| r.mtu_id == reading.mtu_id && r.ts < reading.ts)
            .last())
    }
}

#[async_trait::async_trait]
impl Transform<Reading, Reading> for RateCeilingCheck {
    async fn apply(&self, input: Envelope<Reading>) -> Result<Envelope<Reading>, PipelineError> {
        let line = input.line;
        let reading = &input.payload;

        let store_err = |error| PipelineError::Store { line, error };
        let sampling = self.sampling_of(&reading.source_name).await.map_err(store_err)?;
        let previous = self.previous_of(reading).await.map_err(store_err)?;

        let bound = self.ceiling.bind(previous.as_ref(), reading.ts, sampling);
        if bound.validate(&reading.energy_wh.to_string()) {
            return Ok(input);
        }

        metrics::counter!("readings_rejected_total").increment(1);
        let consumed_wh = previous.map_or(0, |p| reading.energy_wh - p.energy_wh);
        tracing::debug!(
            source = %reading.source_name,
            line,
            consumed_wh,
            reason = bound.reason(),
            "reading rejected"
        );
        Err(PipelineError::RateCeiling {
            line,
            source_name: reading.source_name.clone(),
            consumed_wh,
            allowed_wh: bound.allowed_wh().unwrap_or(0.0),
        })
    }
}
