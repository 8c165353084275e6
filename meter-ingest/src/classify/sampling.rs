use std::collections::HashMap;

use energy_client::{
    domain::{Reading, SamplingInterval},
    EnergyStore, StoreError,
};
use time::{macros::time, Date, OffsetDateTime, UtcOffset};

use crate::retry::RetryPolicy;

/// Local-day bounds: midnight through 23:59:59, inclusive.
pub fn day_bounds(day: Date, offset: UtcOffset) -> (OffsetDateTime, OffsetDateTime) {
    (
        day.midnight().assume_offset(offset),
        day.with_time(time!(23:59:59)).assume_offset(offset),
    )
}

pub fn classify_count(readings_on_day: usize) -> SamplingInterval {
    match readings_on_day {
        0 => SamplingInterval::NotAvailable,
        1 => SamplingInterval::Daily,
        _ => SamplingInterval::Hourly,
    }
}

/// Reading count per mtu stream of one source.
pub fn stream_counts(readings: &[Reading]) -> HashMap<&str, usize> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for r in readings {
        *counts.entry(r.mtu_id.as_str()).or_default() += 1;
    }
    counts
}

/// Sampling class of a source judged from its busiest mtu stream on one
/// calendar day.
pub async fn classify_day(
    store: &dyn EnergyStore,
    retry: &RetryPolicy,
    source_name: &str,
    day: Date,
    offset: UtcOffset,
) -> Result<SamplingInterval, StoreError> {
    let (start, end) = day_bounds(day, offset);
    let readings = retry
        .call("get_readings", |ctx| async move {
            store.get_readings(&ctx, source_name, start, end).await
        })
        .await?;
    let busiest = stream_counts(&readings).into_values().max().unwrap_or(0);
    Ok(classify_count(busiest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use energy_client::{InMemoryStore, StoreContext};
    use time::macros::{date, datetime};

    #[test]
    fn counts_map_to_classes() {
        assert_eq!(classify_count(0), SamplingInterval::NotAvailable);
        assert_eq!(classify_count(1), SamplingInterval::Daily);
        assert_eq!(classify_count(24), SamplingInterval::Hourly);
    }

    #[tokio::test]
    async fn only_readings_inside_the_day_count() {
        let store = InMemoryStore::new();
        let ctx = StoreContext::background();
        for ts in [
            datetime!(2024-05-01 23:59:59 UTC),
            datetime!(2024-05-02 00:00:00 UTC),
            datetime!(2024-05-03 00:00:00 UTC),
        ] {
            let r = Reading {
                source_name: "m-1".to_string(),
                mtu_id: String::new(),
                ts,
                energy_wh: 1,
                raw_fields: Default::default(),
            };
            store.store_reading(&ctx, &r).await.unwrap();
        }

        let retry = RetryPolicy::none();
        let on_day = classify_day(&store, &retry, "m-1", date!(2024-05-02), UtcOffset::UTC)
            .await
            .unwrap();
        let empty_day = classify_day(&store, &retry, "m-1", date!(2024-05-10), UtcOffset::UTC)
            .await
            .unwrap();

        assert_eq!(on_day, SamplingInterval::Daily);
        assert_eq!(empty_day, SamplingInterval::NotAvailable);
    }

    #[tokio::test]
    async fn daily_meter_with_several_mtus_stays_daily() {
        let store = InMemoryStore::new();
        let ctx = StoreContext::background();
        for mtu in ["mtu-1", "mtu-2"] {
            let r = Reading {
                source_name: "m-2".to_string(),
                mtu_id: mtu.to_string(),
                ts: datetime!(2024-05-02 00:00:00 UTC),
                energy_wh: 1,
                raw_fields: Default::default(),
            };
            store.store_reading(&ctx, &r).await.unwrap();
        }

        let sampling = classify_day(&store, &RetryPolicy::none(), "m-2", date!(2024-05-02), UtcOffset::UTC)
            .await
            .unwrap();

        assert_eq!(sampling, SamplingInterval::Daily);
    }
}
