use chrono::{Duration, Utc};
use sqlx::PgPool;

use crate::models::{ExecutionStatus, JobExecution, NewExecution};

const EXECUTION_COLUMNS: &str = "execution_id, job_id, log_id, execution_status, started_at, \
     completed_at, error_message, error_category, recovery_suggestion, \
     execution_time_ms, retry_attempt, created_at";

/// Record one execution and bump the job's `last_run_at` in the same
/// transaction.
pub async fn record_execution(
    pool: &PgPool,
    job_id: &str,
    status: ExecutionStatus,
    details: &NewExecution,
) -> Result<i64, sqlx::Error> {
    let completed_at = Utc::now();
    let started_at = completed_at
        - Duration::milliseconds(details.execution_time_ms.unwrap_or(0).max(0));

    let mut tx = pool.begin().await?;

    let execution_id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO scheduler_job_executions (
            job_id, log_id, execution_status, started_at, completed_at,
            error_message, error_category, recovery_suggestion,
            execution_time_ms, retry_attempt
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING execution_id
        "#,
    )
    .bind(job_id)
    .bind(details.log_id)
    .bind(status.as_str())
    .bind(started_at)
    .bind(completed_at)
    .bind(&details.error_message)
    .bind(details.error_category.map(|c| c.as_str()))
    .bind(&details.recovery_suggestion)
    .bind(details.execution_time_ms)
    .bind(details.retry_attempt)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("UPDATE scheduler_jobs SET last_run_at = NOW() WHERE job_id = $1")
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(execution_id)
}

pub async fn fetch_last_execution(
    pool: &PgPool,
    job_id: &str,
) -> Result<Option<JobExecution>, sqlx::Error> {
    sqlx::query_as::<_, JobExecution>(&format!(
        r#"
        SELECT {}
        FROM scheduler_job_executions
        WHERE job_id = $1
        ORDER BY started_at DESC
        LIMIT 1
        "#,
        EXECUTION_COLUMNS
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await
}

pub async fn list_executions(
    pool: &PgPool,
    job_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<JobExecution>, sqlx::Error> {
    sqlx::query_as::<_, JobExecution>(&format!(
        r#"
        SELECT {}
        FROM scheduler_job_executions
        WHERE job_id = $1
        ORDER BY started_at DESC
        LIMIT $2 OFFSET $3
        "#,
        EXECUTION_COLUMNS
    ))
    .bind(job_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}
