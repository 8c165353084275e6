use std::collections::BTreeMap;

use sqlx::PgPool;

use crate::domain::Source;
use crate::store::StoreError;

#[derive(Debug, Clone, sqlx::FromRow)]
struct SourceRow {
    name: String,
    properties: String,
}

impl TryFrom<SourceRow> for Source {
    type Error = StoreError;

    fn try_from(row: SourceRow) -> Result<Self, Self::Error> {
        let properties: BTreeMap<String, String> = serde_json::from_str(&row.properties)
            .map_err(|e| StoreError::Malformed(format!("properties for {}: {e}", row.name)))?;
        Ok(Source {
            name: row.name,
            properties,
        })
    }
}

pub async fn find_source(pool: &PgPool, name: &str) -> Result<Option<Source>, StoreError> {
    let row = sqlx::query_as::<_, SourceRow>(
        "SELECT name, properties FROM energy_sources WHERE name = $1",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    row.map(Source::try_from).transpose()
}

pub async fn list_sources(pool: &PgPool) -> Result<Vec<Source>, StoreError> {
    let rows = sqlx::query_as::<_, SourceRow>(
        "SELECT name, properties FROM energy_sources ORDER BY name",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Source::try_from).collect()
}

/// Insert or (when `overwrite`) replace the full source record.
///
/// Returns `false` when the row existed and `overwrite` was not set.
pub async fn upsert_source(pool: &PgPool, source: &Source, overwrite: bool) -> Result<bool, StoreError> {
    let properties = serde_json::to_string(&source.properties)
        .map_err(|e| StoreError::Malformed(format!("properties: {e}")))?;

    let sql = if overwrite {
        r#"
        INSERT INTO energy_sources (name, properties) VALUES ($1, $2)
        ON CONFLICT (name) DO UPDATE SET properties = EXCLUDED.properties
        "#
    } else {
        r#"
        INSERT INTO energy_sources (name, properties) VALUES ($1, $2)
        ON CONFLICT (name) DO NOTHING
        "#
    };

    let result = sqlx::query(sql)
        .bind(&source.name)
        .bind(properties)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
