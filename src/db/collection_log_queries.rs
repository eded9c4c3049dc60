use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::models::{CollectionLog, CollectionStatus};

#[allow(clippy::too_many_arguments)]
pub async fn insert_log(
    pool: &PgPool,
    asset_id: i32,
    collector_type: &str,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    records_collected: i32,
    status: CollectionStatus,
    error_message: Option<&str>,
    execution_time_ms: i64,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO data_collection_log (
            asset_id, collector_type, start_date, end_date,
            records_collected, status, error_message, execution_time_ms
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING log_id
        "#,
    )
    .bind(asset_id)
    .bind(collector_type)
    .bind(start_date)
    .bind(end_date)
    .bind(records_collected)
    .bind(status.as_str())
    .bind(error_message)
    .bind(execution_time_ms)
    .fetch_one(pool)
    .await
}

/// Collection history with optional filters, newest first.
pub async fn list_logs(
    pool: &PgPool,
    asset_id: Option<i32>,
    status: Option<&str>,
    created_after: Option<DateTime<Utc>>,
    created_before: Option<DateTime<Utc>>,
    limit: i64,
    offset: i64,
) -> Result<Vec<CollectionLog>, sqlx::Error> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT log_id, asset_id, collector_type, start_date, end_date, \
         records_collected, status, error_message, execution_time_ms, created_at \
         FROM data_collection_log WHERE 1=1",
    );

    if let Some(asset_id) = asset_id {
        qb.push(" AND asset_id = ").push_bind(asset_id);
    }
    if let Some(status) = status {
        qb.push(" AND status = ").push_bind(status.to_string());
    }
    if let Some(created_after) = created_after {
        qb.push(" AND created_at >= ").push_bind(created_after);
    }
    if let Some(created_before) = created_before {
        qb.push(" AND created_at <= ").push_bind(created_before);
    }

    qb.push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    qb.build_query_as::<CollectionLog>().fetch_all(pool).await
}
