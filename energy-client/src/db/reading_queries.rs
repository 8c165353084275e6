use std::collections::BTreeMap;

use sqlx::PgPool;
use time::OffsetDateTime;

use crate::domain::Reading;
use crate::store::StoreError;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReadingRow {
    pub ts: OffsetDateTime,
    pub source_name: String,
    pub mtu_id: String,
    pub energy_wh: i64,
    pub raw_fields: String,
}

impl TryFrom<ReadingRow> for Reading {
    type Error = StoreError;

    fn try_from(row: ReadingRow) -> Result<Self, Self::Error> {
        let raw_fields: BTreeMap<String, String> = serde_json::from_str(&row.raw_fields)
            .map_err(|e| StoreError::Malformed(format!("raw_fields for {}: {e}", row.source_name)))?;

        Ok(Reading {
            source_name: row.source_name,
            mtu_id: row.mtu_id,
            ts: row.ts,
            energy_wh: row.energy_wh,
            raw_fields,
        })
    }
}

/// Time-ordered readings of one source, both bounds inclusive.
pub async fn load_readings(
    pool: &PgPool,
    source_name: &str,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<Vec<Reading>, StoreError> {
    let rows = sqlx::query_as::<_, ReadingRow>(
        r#"
        SELECT
            ts,
            source_name,
            mtu_id,
            energy_wh,
            raw_fields
        FROM energy_readings
        WHERE source_name = $1
          AND ts >= $2
          AND ts <= $3
        ORDER BY ts, mtu_id
        "#,
    )
    .bind(source_name)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Reading::try_from).collect()
}

/// Insert one reading keyed by its event id; `false` when it was already present.
pub async fn insert_reading(pool: &PgPool, reading: &Reading) -> Result<bool, StoreError> {
    let raw_fields = serde_json::to_string(&reading.raw_fields)
        .map_err(|e| StoreError::Malformed(format!("raw_fields: {e}")))?;

    let result = sqlx::query(
        r#"
        INSERT INTO energy_readings (event_id, ts, source_name, mtu_id, energy_wh, raw_fields)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (event_id) DO NOTHING
        "#,
    )
    .bind(reading.event_id())
    .bind(reading.ts)
    .bind(&reading.source_name)
    .bind(&reading.mtu_id)
    .bind(reading.energy_wh)
    .bind(raw_fields)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Delete every reading of a source stamped `ts`; returns the number removed.
pub async fn delete_readings_at(
    pool: &PgPool,
    source_name: &str,
    ts: OffsetDateTime,
) -> Result<u64, StoreError> {
    let result = sqlx::query("DELETE FROM energy_readings WHERE source_name = $1 AND ts = $2")
        .bind(source_name)
        .bind(ts)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
