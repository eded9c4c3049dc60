use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{http::StatusCode, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::{execution_queries, job_queries};
use crate::errors::AppError;
use crate::models::{
    generate_job_id, AssetType, JobCreate, JobExecution, JobResponse, JobStatus, JobUpdate,
    Trigger,
};
use crate::services::persistent_scheduler::PersistentScheduler;
use crate::state::AppState;

const DEFAULT_PAGE_LIMIT: i64 = 100;
const MAX_PAGE_LIMIT: i64 = 1000;
const DEFAULT_EXECUTION_LIMIT: i64 = 50;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", get(list_jobs).post(create_job))
        .route(
            "/jobs/:job_id",
            get(get_job).put(update_job).delete(delete_job),
        )
        .route("/jobs/:job_id/pause", post(pause_job))
        .route("/jobs/:job_id/resume", post(resume_job))
        .route("/jobs/:job_id/trigger", post(trigger_job))
        .route("/jobs/:job_id/executions", get(list_executions))
}

fn scheduler(state: &AppState) -> Result<&Arc<PersistentScheduler>, AppError> {
    state
        .scheduler
        .as_ref()
        .ok_or(AppError::SchedulerUnavailable)
}

/// Deserialize a body into a typed payload with a 400 (not 422) on shape
/// errors, per the API contract.
fn parse_body<T: serde::de::DeserializeOwned>(body: serde_json::Value) -> Result<T, AppError> {
    serde_json::from_value(body).map_err(|e| AppError::Validation(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct ListJobsQuery {
    status: Option<String>,
    asset_type: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Debug, Serialize)]
struct TriggerResponse {
    message: String,
}

/// POST /api/scheduler/jobs - create a job and hand it to the scheduler
async fn create_job(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<JobResponse>), AppError> {
    let sched = scheduler(&state)?.clone();
    let data: JobCreate = parse_body(body)?;

    data.asset_type
        .parse::<AssetType>()
        .map_err(AppError::Validation)?;
    let trigger = Trigger::parse(&data.trigger_type, &data.trigger_config)?;

    if let (Some(start), Some(end)) = (data.start_date, data.end_date) {
        if end < start {
            return Err(AppError::Validation(format!(
                "end_date {} is before start_date {}",
                end, start
            )));
        }
    }

    let job_id = data
        .job_id
        .clone()
        .unwrap_or_else(|| generate_job_id(&data.symbol, &data.asset_type));

    info!("POST /scheduler/jobs - creating job {}", job_id);
    job_queries::create_job(&state.pool, &job_id, &data).await?;
    state
        .metrics
        .record_job_created(&data.asset_type, JobStatus::Pending.as_str());

    // Execute-now jobs are acknowledged without a timer; everything else
    // gets installed (pending → active inside the scheduler)
    match trigger {
        Trigger::ExecuteNow => {
            sched.add_from_store(&job_id).await?;
        }
        _ => {
            if let Err(e) = sched.add_from_store(&job_id).await {
                warn!("Job {} created but not installed: {}", job_id, e);
            }
        }
    }

    let response = job_queries::fetch_job_response(&state.pool, &job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/scheduler/jobs - list with optional status/asset_type filters
async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<JobResponse>>, AppError> {
    if let Some(status) = &query.status {
        status.parse::<JobStatus>().map_err(AppError::Validation)?;
    }
    if let Some(asset_type) = &query.asset_type {
        asset_type
            .parse::<AssetType>()
            .map_err(AppError::Validation)?;
    }

    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_LIMIT)
        .clamp(1, MAX_PAGE_LIMIT);
    let offset = query.offset.unwrap_or(0).max(0);

    let jobs = job_queries::list_jobs(
        &state.pool,
        query.status.as_deref(),
        query.asset_type.as_deref(),
        limit,
        offset,
    )
    .await?;

    Ok(Json(jobs))
}

/// GET /api/scheduler/jobs/:job_id
async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobResponse>, AppError> {
    let response = job_queries::fetch_job_response(&state.pool, &job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))?;

    Ok(Json(response))
}

/// PUT /api/scheduler/jobs/:job_id - partial update, then replace the timer
async fn update_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<JobResponse>, AppError> {
    let sched = scheduler(&state)?.clone();
    let data: JobUpdate = parse_body(body)?;

    if let Some(asset_type) = &data.asset_type {
        asset_type
            .parse::<AssetType>()
            .map_err(AppError::Validation)?;
    }
    if let Some(status) = &data.status {
        status.parse::<JobStatus>().map_err(AppError::Validation)?;
    }
    if let (Some(trigger_type), Some(trigger_config)) = (&data.trigger_type, &data.trigger_config)
    {
        Trigger::parse(trigger_type, trigger_config)?;
    }

    let updated = job_queries::update_job(&state.pool, &job_id, &data)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))?;

    info!("PUT /scheduler/jobs/{} - updated", job_id);

    if let Err(e) = sched.update_in_scheduler(&job_id).await {
        warn!("Job {} updated but scheduler replace failed: {}", job_id, e);
    }

    let dependencies = crate::db::dependency_queries::fetch_for_job(&state.pool, &job_id).await?;
    Ok(Json(JobResponse {
        job: updated,
        dependencies,
    }))
}

/// DELETE /api/scheduler/jobs/:job_id
async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let sched = scheduler(&state)?.clone();

    sched.remove(&job_id).await;
    let deleted = job_queries::delete_job(&state.pool, &job_id).await?;
    if !deleted {
        return Err(AppError::NotFound(format!("Job {} not found", job_id)));
    }

    info!("DELETE /scheduler/jobs/{} - deleted", job_id);
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/scheduler/jobs/:job_id/pause
async fn pause_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobResponse>, AppError> {
    let sched = scheduler(&state)?.clone();

    let job = job_queries::fetch_job(&state.pool, &job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))?;

    if !job.job_status().is_runnable() {
        return Err(AppError::Validation(format!(
            "Job {} has status {}, cannot pause",
            job_id, job.status
        )));
    }

    sched.pause(&job_id).await;
    job_queries::set_status(&state.pool, &job_id, JobStatus::Paused, None).await?;

    let response = job_queries::fetch_job_response(&state.pool, &job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))?;

    Ok(Json(response))
}

/// POST /api/scheduler/jobs/:job_id/resume
async fn resume_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobResponse>, AppError> {
    let sched = scheduler(&state)?.clone();

    let job = job_queries::fetch_job(&state.pool, &job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))?;

    if job.job_status() != JobStatus::Paused {
        return Err(AppError::Validation(format!(
            "Job {} has status {}, only paused jobs can be resumed",
            job_id, job.status
        )));
    }

    job_queries::set_status(&state.pool, &job_id, JobStatus::Active, None).await?;
    sched.resume(&job_id).await?;

    let response = job_queries::fetch_job_response(&state.pool, &job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))?;

    Ok(Json(response))
}

/// POST /api/scheduler/jobs/:job_id/trigger - fire-and-forget manual run
async fn trigger_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<TriggerResponse>, AppError> {
    let sched = scheduler(&state)?.clone();

    sched.trigger_now(&job_id).await?;

    Ok(Json(TriggerResponse {
        message: format!("Job {} triggered; execution proceeds asynchronously", job_id),
    }))
}

/// GET /api/scheduler/jobs/:job_id/executions
async fn list_executions(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<JobExecution>>, AppError> {
    job_queries::fetch_job(&state.pool, &job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))?;

    let limit = query
        .limit
        .unwrap_or(DEFAULT_EXECUTION_LIMIT)
        .clamp(1, MAX_PAGE_LIMIT);
    let offset = query.offset.unwrap_or(0).max(0);

    let executions =
        execution_queries::list_executions(&state.pool, &job_id, limit, offset).await?;

    Ok(Json(executions))
}
