use sqlx::PgPool;

use crate::models::CollectionJob;

const JOB_COLUMNS: &str = "job_id, symbol, asset_type, status, request_data, result_data, \
     error_message, started_at, completed_at";

pub async fn insert_running(
    pool: &PgPool,
    job_id: &str,
    symbol: &str,
    asset_type: &str,
    request_data: &serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO active_collection_jobs (job_id, symbol, asset_type, status, request_data)
        VALUES ($1, $2, $3, 'running', $4)
        "#,
    )
    .bind(job_id)
    .bind(symbol)
    .bind(asset_type)
    .bind(request_data)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn mark_completed(
    pool: &PgPool,
    job_id: &str,
    result_data: &serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE active_collection_jobs
        SET status = 'completed', result_data = $2, completed_at = NOW()
        WHERE job_id = $1
        "#,
    )
    .bind(job_id)
    .bind(result_data)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn mark_failed(
    pool: &PgPool,
    job_id: &str,
    error_message: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE active_collection_jobs
        SET status = 'failed', error_message = $2, completed_at = NOW()
        WHERE job_id = $1
        "#,
    )
    .bind(job_id)
    .bind(error_message)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn fetch(pool: &PgPool, job_id: &str) -> Result<Option<CollectionJob>, sqlx::Error> {
    sqlx::query_as::<_, CollectionJob>(&format!(
        "SELECT {} FROM active_collection_jobs WHERE job_id = $1",
        JOB_COLUMNS
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await
}
