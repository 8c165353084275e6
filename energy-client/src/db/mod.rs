//! `EnergyStore` over the Postgres wire protocol.
//!
//! Schema is expected to be applied out-of-band via `sql/schema.sql`.

use sqlx::PgPool;
use time::OffsetDateTime;

use crate::domain::{Reading, Source};
use crate::store::{EnergyStore, StoreContext, StoreError};

pub mod reading_queries;
pub mod source_queries;

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound("row".to_string()),
            sqlx::Error::PoolTimedOut => StoreError::Timeout,
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct PgEnergyStore {
    pool: PgPool,
}

impl PgEnergyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl EnergyStore for PgEnergyStore {
    async fn get_source(&self, ctx: &StoreContext, name: &str) -> Result<Source, StoreError> {
        ctx.run(async {
            source_queries::find_source(&self.pool, name)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("source '{name}'")))
        })
        .await
    }

    async fn get_sources(&self, ctx: &StoreContext) -> Result<Vec<Source>, StoreError> {
        ctx.run(source_queries::list_sources(&self.pool)).await
    }

    async fn store_source(
        &self,
        ctx: &StoreContext,
        source: &Source,
        overwrite: bool,
    ) -> Result<(), StoreError> {
        let written = ctx
            .run(source_queries::upsert_source(&self.pool, source, overwrite))
            .await?;
        if written {
            Ok(())
        } else {
            Err(StoreError::AlreadyExists(format!("source '{}'", source.name)))
        }
    }

    async fn get_readings(
        &self,
        ctx: &StoreContext,
        source_name: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<Reading>, StoreError> {
        ctx.run(reading_queries::load_readings(&self.pool, source_name, start, end))
            .await
    }

    async fn store_reading(&self, ctx: &StoreContext, reading: &Reading) -> Result<(), StoreError> {
        let inserted = ctx
            .run(reading_queries::insert_reading(&self.pool, reading))
            .await?;
        if inserted {
            Ok(())
        } else {
            Err(StoreError::AlreadyExists(format!(
                "reading {}/{} at {}",
                reading.source_name, reading.mtu_id, reading.ts
            )))
        }
    }

    async fn delete_reading(
        &self,
        ctx: &StoreContext,
        source_name: &str,
        ts: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let removed = ctx
            .run(reading_queries::delete_readings_at(&self.pool, source_name, ts))
            .await?;
        if removed == 0 {
            return Err(StoreError::NotFound(format!("reading {source_name} at {ts}")));
        }
        Ok(())
    }
}
