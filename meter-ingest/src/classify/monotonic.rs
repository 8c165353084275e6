//! Detection of decreasing cumulative registers.

use std::{collections::BTreeMap, fmt, sync::Arc};

use energy_client::{
    domain::{Entry, Reading},
    EnergyStore, StoreError,
};
use time::{Duration, OffsetDateTime};

use crate::retry::RetryPolicy;

/// `ts - span`, clamped to `ts` when the result leaves the calendar range.
pub fn span_before(ts: OffsetDateTime, span: Duration) -> OffsetDateTime {
    ts.checked_sub(span).unwrap_or(ts)
}

/// `ts + span`, clamped to `ts` when the result leaves the calendar range.
pub fn span_after(ts: OffsetDateTime, span: Duration) -> OffsetDateTime {
    ts.checked_add(span).unwrap_or(ts)
}

/// A register that went down between two readings of one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub source_name: String,
    pub mtu_id: String,
    pub previous_ts: OffsetDateTime,
    pub previous_reading: String,
    pub ts: OffsetDateTime,
    pub reading: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source_name)?;
        if !self.mtu_id.is_empty() {
            write!(f, "/{}", self.mtu_id)?;
        }
        write!(
            f,
            ": {} at {} -> {} at {}",
            self.previous_reading, self.previous_ts, self.reading, self.ts
        )
    }
}

/// Flag every entry of one time-ordered (source, mtu) stream whose register
/// is below that of the nearest preceding entry.
///
/// A predecessor further back than `lookback` does not count: the entry then
/// starts a new series (meter swap, long outage). Equal registers are fine.
pub fn check_stream(entries: &mut [Entry], lookback: Duration) -> Vec<Violation> {
    let mut violations = Vec::new();

    for i in 1..entries.len() {
        let (before, rest) = entries.split_at_mut(i);
        let prev = &before[i - 1];
        let cur = &mut rest[0];

        if cur.ts - prev.ts > lookback {
            continue;
        }
        let (Some(prev_wh), Some(cur_wh)) = (prev.reading_wh(), cur.reading_wh()) else {
            continue;
        };
        if cur_wh < prev_wh {
            cur.is_monotonically_increasing = false;
            violations.push(Violation {
                source_name: cur.source_name.clone(),
                mtu_id: cur.mtu_id.clone(),
                previous_ts: prev.ts,
                previous_reading: prev.reading.clone(),
                ts: cur.ts,
                reading: cur.reading.clone(),
            });
        }
    }

    violations
}

/// Split readings of one source into per-mtu streams, order each by time and
/// check them. Returns the entries (flags applied) and the violations.
pub fn check_readings(readings: &[Reading], lookback: Duration) -> (Vec<Entry>, Vec<Violation>) {
    let mut streams: BTreeMap<&str, Vec<Entry>> = BTreeMap::new();
    for r in readings {
        streams.entry(r.mtu_id.as_str()).or_default().push(Entry::from(r));
    }

    let mut entries = Vec::with_capacity(readings.len());
    let mut violations = Vec::new();
    for (_, mut stream) in streams {
        stream.sort_by_key(|e| e.ts);
        violations.extend(check_stream(&mut stream, lookback));
        entries.extend(stream);
    }

    violations.sort_by(|a, b| a.ts.cmp(&b.ts).then_with(|| a.mtu_id.cmp(&b.mtu_id)));
    (entries, violations)
}

/// Monotonicity check against persisted history.
///
/// Readings may arrive in any order, so the check always runs over what the
/// store holds, starting one lookback window before the range of interest.
pub struct MonotonicityChecker {
    store: Arc<dyn EnergyStore>,
    lookback: Duration,
    retry: RetryPolicy,
}

impl MonotonicityChecker {
    pub fn new(store: Arc<dyn EnergyStore>, lookback: Duration, retry: RetryPolicy) -> Self {
        Self {
            store,
            lookback,
            retry,
        }
    }

    pub fn lookback(&self) -> Duration {
        self.lookback
    }

    /// Violations whose later reading falls in `[from, to]`.
    pub async fn check_source(
        &self,
        source_name: &str,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<Vec<Violation>, StoreError> {
        let store = &self.store;
        let history_start = span_before(from, self.lookback);
        let readings = self
            .retry
            .call("get_readings", |ctx| async move {
                store.get_readings(&ctx, source_name, history_start, to).await
            })
            .await?;

        let (_, violations) = check_readings(&readings, self.lookback);
        Ok(violations.into_iter().filter(|v| v.ts >= from).collect())
    }
}
