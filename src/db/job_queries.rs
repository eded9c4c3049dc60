use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use tracing::info;

use crate::db::dependency_queries;
use crate::errors::AppError;
use crate::models::{
    DependencyCondition, DependencyInput, Job, JobCreate, JobDependency, JobResponse, JobStatus,
    JobUpdate, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BACKOFF_MULTIPLIER,
    DEFAULT_RETRY_DELAY_SECONDS,
};

/// Columns that `update_job` may touch. Anything else is rejected before any
/// SQL is built; column names only ever come from this list.
pub const ALLOWED_UPDATE_FIELDS: [&str; 12] = [
    "symbol",
    "asset_type",
    "trigger_type",
    "trigger_config",
    "start_date",
    "end_date",
    "collector_kwargs",
    "asset_metadata",
    "status",
    "max_retries",
    "retry_delay_seconds",
    "retry_backoff_multiplier",
];

const JOB_COLUMNS: &str = "job_id, symbol, asset_type, trigger_type, trigger_config, \
     start_date, end_date, collector_kwargs, asset_metadata, status, \
     max_retries, retry_delay_seconds, retry_backoff_multiplier, \
     last_run_at, next_run_at, created_at, updated_at";

fn select_job() -> String {
    format!("SELECT {} FROM scheduler_jobs", JOB_COLUMNS)
}

/// Every SET column passes through here; a column outside the whitelist is
/// a programming error, not a runtime condition.
fn allowed(column: &'static str) -> &'static str {
    assert!(
        ALLOWED_UPDATE_FIELDS.contains(&column),
        "column '{}' is not in the update whitelist",
        column
    );
    column
}

/// Insert a job together with its dependency edges in one transaction.
/// Edges are cycle-checked against the stored graph before insertion.
pub async fn create_job(pool: &PgPool, job_id: &str, data: &JobCreate) -> Result<Job, AppError> {
    let mut tx = pool.begin().await?;

    let job = sqlx::query_as::<_, Job>(&format!(
        r#"
        INSERT INTO scheduler_jobs (
            job_id, symbol, asset_type, trigger_type, trigger_config,
            start_date, end_date, collector_kwargs, asset_metadata, status,
            max_retries, retry_delay_seconds, retry_backoff_multiplier
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        RETURNING {}
        "#,
        JOB_COLUMNS
    ))
    .bind(job_id)
    .bind(&data.symbol)
    .bind(&data.asset_type)
    .bind(&data.trigger_type)
    .bind(&data.trigger_config)
    .bind(data.start_date)
    .bind(data.end_date)
    .bind(&data.collector_kwargs)
    .bind(&data.asset_metadata)
    .bind(JobStatus::Pending.as_str())
    .bind(data.max_retries.unwrap_or(DEFAULT_MAX_RETRIES))
    .bind(
        data.retry_delay_seconds
            .unwrap_or(DEFAULT_RETRY_DELAY_SECONDS),
    )
    .bind(
        data.retry_backoff_multiplier
            .unwrap_or(DEFAULT_RETRY_BACKOFF_MULTIPLIER),
    )
    .fetch_one(&mut *tx)
    .await?;

    if let Some(deps) = &data.dependencies {
        insert_dependency_set(&mut tx, job_id, deps).await?;
    }

    tx.commit().await?;

    info!("Created job {} ({} {})", job_id, data.asset_type, data.symbol);
    Ok(job)
}

async fn insert_dependency_set(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    job_id: &str,
    deps: &[DependencyInput],
) -> Result<(), AppError> {
    let edges = dependency_queries::fetch_all_edges(&mut **tx).await?;
    let mut adj = dependency_queries::adjacency(&edges);
    // The child's existing edges are being replaced, not extended
    adj.remove(job_id);

    for dep in deps {
        if dep.depends_on_job_id == job_id {
            return Err(AppError::Validation(format!(
                "Job {} cannot depend on itself",
                job_id
            )));
        }

        let condition: DependencyCondition = dep
            .condition
            .as_deref()
            .unwrap_or("success")
            .parse()
            .map_err(AppError::Validation)?;

        if dependency_queries::would_create_cycle(&adj, job_id, &dep.depends_on_job_id) {
            return Err(AppError::Validation(format!(
                "Dependency {} -> {} would create a cycle",
                job_id, dep.depends_on_job_id
            )));
        }

        dependency_queries::insert_edge(
            &mut **tx,
            job_id,
            &dep.depends_on_job_id,
            condition.as_str(),
        )
        .await?;

        adj.entry(job_id.to_string())
            .or_default()
            .push(dep.depends_on_job_id.clone());
    }

    Ok(())
}

pub async fn fetch_job(pool: &PgPool, job_id: &str) -> Result<Option<Job>, sqlx::Error> {
    sqlx::query_as::<_, Job>(&format!("{} WHERE job_id = $1", select_job()))
        .bind(job_id)
        .fetch_optional(pool)
        .await
}

pub async fn fetch_job_response(
    pool: &PgPool,
    job_id: &str,
) -> Result<Option<JobResponse>, sqlx::Error> {
    let Some(job) = fetch_job(pool, job_id).await? else {
        return Ok(None);
    };
    let dependencies = dependency_queries::fetch_for_job(pool, job_id).await?;
    Ok(Some(JobResponse { job, dependencies }))
}

/// List jobs with optional filters. Dependencies for the whole page are
/// loaded with one batch query.
pub async fn list_jobs(
    pool: &PgPool,
    status: Option<&str>,
    asset_type: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<Vec<JobResponse>, sqlx::Error> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(select_job());
    qb.push(" WHERE 1=1");

    if let Some(status) = status {
        qb.push(" AND status = ").push_bind(status.to_string());
    }
    if let Some(asset_type) = asset_type {
        qb.push(" AND asset_type = ")
            .push_bind(asset_type.to_string());
    }

    qb.push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    let jobs: Vec<Job> = qb.build_query_as::<Job>().fetch_all(pool).await?;

    if jobs.is_empty() {
        return Ok(Vec::new());
    }

    let job_ids: Vec<String> = jobs.iter().map(|j| j.job_id.clone()).collect();
    let edges = dependency_queries::fetch_for_jobs(pool, &job_ids).await?;

    let mut deps_by_job: HashMap<String, Vec<JobDependency>> = HashMap::new();
    for edge in edges {
        deps_by_job
            .entry(edge.job_id)
            .or_default()
            .push(JobDependency {
                depends_on_job_id: edge.depends_on_job_id,
                condition: edge.condition,
            });
    }

    Ok(jobs
        .into_iter()
        .map(|job| {
            let dependencies = deps_by_job.remove(&job.job_id).unwrap_or_default();
            JobResponse { job, dependencies }
        })
        .collect())
}

/// Partial update restricted to `ALLOWED_UPDATE_FIELDS`. A supplied
/// dependency list replaces the job's edges in the same transaction.
pub async fn update_job(
    pool: &PgPool,
    job_id: &str,
    data: &JobUpdate,
) -> Result<Option<Job>, AppError> {
    if let Some(status) = &data.status {
        status
            .parse::<JobStatus>()
            .map_err(AppError::Validation)?;
    }

    let mut tx = pool.begin().await?;

    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE scheduler_jobs SET ");
    {
        let mut sep = qb.separated(", ");

        if let Some(v) = &data.symbol {
            sep.push(format!("{} = ", allowed("symbol")))
                .push_bind_unseparated(v.clone());
        }
        if let Some(v) = &data.asset_type {
            sep.push(format!("{} = ", allowed("asset_type")))
                .push_bind_unseparated(v.clone());
        }
        if let Some(v) = &data.trigger_type {
            sep.push(format!("{} = ", allowed("trigger_type")))
                .push_bind_unseparated(v.clone());
        }
        if let Some(v) = &data.trigger_config {
            sep.push(format!("{} = ", allowed("trigger_config")))
                .push_bind_unseparated(v.clone());
        }
        if let Some(v) = data.start_date {
            sep.push(format!("{} = ", allowed("start_date")))
                .push_bind_unseparated(v);
        }
        if let Some(v) = data.end_date {
            sep.push(format!("{} = ", allowed("end_date")))
                .push_bind_unseparated(v);
        }
        if let Some(v) = &data.collector_kwargs {
            sep.push(format!("{} = ", allowed("collector_kwargs")))
                .push_bind_unseparated(v.clone());
        }
        if let Some(v) = &data.asset_metadata {
            sep.push(format!("{} = ", allowed("asset_metadata")))
                .push_bind_unseparated(v.clone());
        }
        if let Some(v) = &data.status {
            sep.push(format!("{} = ", allowed("status")))
                .push_bind_unseparated(v.clone());
        }
        if let Some(v) = data.max_retries {
            sep.push(format!("{} = ", allowed("max_retries")))
                .push_bind_unseparated(v);
        }
        if let Some(v) = data.retry_delay_seconds {
            sep.push(format!("{} = ", allowed("retry_delay_seconds")))
                .push_bind_unseparated(v);
        }
        if let Some(v) = data.retry_backoff_multiplier {
            sep.push(format!("{} = ", allowed("retry_backoff_multiplier")))
                .push_bind_unseparated(v);
        }

        sep.push("updated_at = NOW()");
    }
    qb.push(" WHERE job_id = ").push_bind(job_id.to_string());
    qb.push(format!(" RETURNING {}", JOB_COLUMNS));

    let job: Option<Job> = qb
        .build_query_as::<Job>()
        .fetch_optional(&mut *tx)
        .await?;

    let Some(job) = job else {
        tx.rollback().await?;
        return Ok(None);
    };

    if let Some(deps) = &data.dependencies {
        dependency_queries::delete_edges_for_job(&mut *tx, job_id).await?;
        insert_dependency_set(&mut tx, job_id, deps).await?;
    }

    tx.commit().await?;
    Ok(Some(job))
}

pub async fn delete_job(pool: &PgPool, job_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM scheduler_jobs WHERE job_id = $1")
        .bind(job_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Sync a scheduler-driven status change. `next_run_at` is only written when
/// provided; `updated_at` is always bumped.
pub async fn set_status(
    pool: &PgPool,
    job_id: &str,
    status: JobStatus,
    next_run_at: Option<chrono::DateTime<chrono::Utc>>,
) -> Result<(), sqlx::Error> {
    match next_run_at {
        Some(next_run_at) => {
            sqlx::query(
                r#"
                UPDATE scheduler_jobs
                SET status = $2, next_run_at = $3, updated_at = NOW()
                WHERE job_id = $1
                "#,
            )
            .bind(job_id)
            .bind(status.as_str())
            .bind(next_run_at)
            .execute(pool)
            .await?;
        }
        None => {
            sqlx::query(
                r#"
                UPDATE scheduler_jobs
                SET status = $2, updated_at = NOW()
                WHERE job_id = $1
                "#,
            )
            .bind(job_id)
            .bind(status.as_str())
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}

pub async fn set_next_run_at(
    pool: &PgPool,
    job_id: &str,
    next_run_at: Option<chrono::DateTime<chrono::Utc>>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE scheduler_jobs
        SET next_run_at = $2, updated_at = NOW()
        WHERE job_id = $1
        "#,
    )
    .bind(job_id)
    .bind(next_run_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Jobs the scheduler should consider at startup.
pub async fn load_active_jobs(pool: &PgPool) -> Result<Vec<Job>, sqlx::Error> {
    sqlx::query_as::<_, Job>(&format!(
        "{} WHERE status IN ('active', 'pending') ORDER BY created_at",
        select_job()
    ))
    .fetch_all(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_whitelist_covers_job_update_fields() {
        // The JobUpdate struct is the only way callers reach update_job;
        // its deserializer rejects unknown fields, and every column it can
        // set must be whitelisted here.
        for field in [
            "symbol",
            "asset_type",
            "trigger_type",
            "trigger_config",
            "start_date",
            "end_date",
            "collector_kwargs",
            "asset_metadata",
            "status",
            "max_retries",
            "retry_delay_seconds",
            "retry_backoff_multiplier",
        ] {
            assert!(ALLOWED_UPDATE_FIELDS.contains(&field), "missing {}", field);
        }
    }

    #[test]
    fn test_job_update_rejects_unknown_fields() {
        let result = serde_json::from_value::<JobUpdate>(serde_json::json!({
            "symbol": "AAPL",
            "not_a_column": 1
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_job_update_accepts_whitelisted_fields() {
        let update: JobUpdate = serde_json::from_value(serde_json::json!({
            "symbol": "AAPL",
            "max_retries": 5,
            "dependencies": [{"depends_on_job_id": "other"}]
        }))
        .unwrap();
        assert_eq!(update.symbol.as_deref(), Some("AAPL"));
        assert_eq!(update.max_retries, Some(5));
        assert_eq!(update.dependencies.unwrap().len(), 1);
    }
}
