use anyhow::{bail, Context, Result};
use energy_client::{EnergyStore, StoreError};
use meter_ingest::{config::AppConfig, observability};
use std::env;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Delete every reading of one source stamped within `[from, to]`.
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 4 {
        bail!("usage: purge_readings <source_name> <from RFC3339> <to RFC3339>");
    }
    let source_name = &args[1];
    let from = OffsetDateTime::parse(&args[2], &Rfc3339).with_context(|| format!("bad from {:?}", args[2]))?;
    let to = OffsetDateTime::parse(&args[3], &Rfc3339).with_context(|| format!("bad to {:?}", args[3]))?;
    if to < from {
        bail!("to ({to}) is before from ({from})");
    }

    let cfg = AppConfig::load()?;
    let store = cfg.connect_store().await?;
    let retry = cfg.retry_policy();

    let readings = {
        let store = &store;
        retry
            .call("get_readings", |ctx| async move {
                store.get_readings(&ctx, source_name, from, to).await
            })
            .await?
    };

    let mut timestamps: Vec<OffsetDateTime> = readings.iter().map(|r| r.ts).collect();
    timestamps.dedup();

    let mut deleted = 0usize;
    let mut failed = 0usize;
    for ts in timestamps {
        let store = &store;
        match retry
            .call("delete_reading", |ctx| async move { store.delete_reading(&ctx, source_name, ts).await })
            .await
        {
            Ok(()) => deleted += 1,
            // Already gone, e.g. a concurrent purge.
            Err(StoreError::NotFound(_)) => {}
            Err(e) => {
                tracing::warn!(source = %source_name, %ts, error = %e, "delete failed");
                failed += 1;
            }
        }
    }

    tracing::info!(source = %source_name, deleted, failed, "purge finished");
    if failed > 0 {
        bail!("{failed} timestamps could not be deleted");
    }
    Ok(())
}
