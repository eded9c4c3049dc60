use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::db::series;
use crate::models::AssetType;

/// `(min(time), max(time))` for an asset in its time-series table, or None
/// when the asset has no rows yet. The table name comes from the static
/// whitelist; the asset id is bound.
pub async fn fetch_existing_range(
    pool: &PgPool,
    asset_id: i32,
    asset_type: AssetType,
) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, sqlx::Error> {
    let table = series::table_for(asset_type);

    let row = sqlx::query(&format!(
        "SELECT MIN(time) AS min_time, MAX(time) AS max_time FROM {} WHERE asset_id = $1",
        table.table
    ))
    .bind(asset_id)
    .fetch_one(pool)
    .await?;

    let min_time: Option<DateTime<Utc>> = row.try_get("min_time")?;
    let max_time: Option<DateTime<Utc>> = row.try_get("max_time")?;

    Ok(match (min_time, max_time) {
        (Some(min), Some(max)) => Some((min, max)),
        _ => None,
    })
}

/// Stored extent and row count for an asset.
#[derive(Debug, Clone, Copy)]
pub struct DataCoverage {
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
    pub record_count: i64,
}

pub async fn fetch_coverage(
    pool: &PgPool,
    asset_id: i32,
    asset_type: AssetType,
) -> Result<DataCoverage, sqlx::Error> {
    let table = series::table_for(asset_type);

    let row = sqlx::query(&format!(
        "SELECT MIN(time) AS earliest, MAX(time) AS latest, COUNT(*) AS record_count \
         FROM {} WHERE asset_id = $1",
        table.table
    ))
    .bind(asset_id)
    .fetch_one(pool)
    .await?;

    Ok(DataCoverage {
        earliest: row.try_get("earliest")?,
        latest: row.try_get("latest")?,
        record_count: row.try_get("record_count")?,
    })
}
