use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};

use crate::db::{collection_job_queries, collection_log_queries};
use crate::errors::AppError;
use crate::models::{AssetType, CollectionJob, CollectionLog, CollectionStatus};
use crate::services::data_loader::ConflictPolicy;
use crate::services::ingestion_engine::{IngestParams, IngestStatus, IngestionEngine};
use crate::services::persistent_scheduler::effective_window;
use crate::state::AppState;

const DEFAULT_PAGE_LIMIT: i64 = 100;
const MAX_PAGE_LIMIT: i64 = 1000;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/collect", post(collect_data))
        .route("/status/:job_id", get(get_collection_status))
        .route("/logs", get(get_collection_logs))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CollectRequest {
    symbol: String,
    asset_type: String,
    #[serde(default)]
    start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    end_date: Option<DateTime<Utc>>,
    #[serde(default = "default_incremental")]
    incremental: bool,
    #[serde(default)]
    collector_kwargs: Option<Value>,
    #[serde(default)]
    asset_metadata: Option<Value>,
}

fn default_incremental() -> bool {
    true
}

#[derive(Debug, Serialize)]
struct CollectResponse {
    job_id: String,
    status: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    asset_id: Option<i32>,
    status: Option<String>,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    limit: Option<i64>,
    offset: Option<i64>,
}

/// POST /api/ingestion/collect - run one collection immediately.
///
/// The job record lives in the store, so status survives restarts; the
/// pipeline itself runs in the background.
async fn collect_data(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<CollectResponse>, AppError> {
    let request: CollectRequest =
        serde_json::from_value(body).map_err(|e| AppError::Validation(e.to_string()))?;

    request
        .asset_type
        .parse::<AssetType>()
        .map_err(AppError::Validation)?;

    let job_id = format!("collect_{:08x}", rand::random::<u32>());
    let request_data = serde_json::to_value(&request)
        .map_err(|e| AppError::Validation(e.to_string()))?;

    collection_job_queries::insert_running(
        &state.pool,
        &job_id,
        &request.symbol,
        &request.asset_type,
        &request_data,
    )
    .await?;

    info!("Collection {} started for {}", job_id, request.symbol);

    let pool = state.pool.clone();
    let registry = state.registry.clone();
    let coordinator = state.coordinator.clone();
    let task_job_id = job_id.clone();
    let response_message = format!("Collection started for {}", request.symbol);
    tokio::spawn(async move {
        // Engine built per request so the incremental flag can differ from
        // the scheduler's default
        let engine = IngestionEngine::new(pool.clone(), registry, coordinator).with_policy(
            request.incremental,
            ConflictPolicy::DoNothing,
            true,
        );

        let (start, end) = effective_window(request.start_date, request.end_date, Utc::now());

        let outcome = engine
            .ingest(IngestParams {
                symbol: request.symbol.clone(),
                asset_type: request.asset_type.clone(),
                start,
                end,
                collector_kwargs: request.collector_kwargs.clone(),
                asset_metadata: request.asset_metadata.clone(),
            })
            .await;

        let update = if outcome.status == IngestStatus::Success {
            let result_data = serde_json::to_value(&outcome).unwrap_or(Value::Null);
            collection_job_queries::mark_completed(&pool, &task_job_id, &result_data).await
        } else {
            let message = outcome
                .error_message
                .clone()
                .unwrap_or_else(|| "Collection failed for unknown reason".to_string());
            collection_job_queries::mark_failed(&pool, &task_job_id, &message).await
        };

        if let Err(e) = update {
            error!("Failed to record collection outcome for {}: {}", task_job_id, e);
        } else {
            info!("Collection {} finished", task_job_id);
        }
    });

    Ok(Json(CollectResponse {
        job_id: job_id.clone(),
        status: "running".to_string(),
        message: response_message,
    }))
}

/// GET /api/ingestion/status/:job_id
async fn get_collection_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<CollectionJob>, AppError> {
    let job = collection_job_queries::fetch(&state.pool, &job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))?;

    Ok(Json(job))
}

/// GET /api/ingestion/logs - collection history with filters
async fn get_collection_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<CollectionLog>>, AppError> {
    if let Some(status) = &query.status {
        let valid = [
            CollectionStatus::Success.as_str(),
            CollectionStatus::Failed.as_str(),
            CollectionStatus::Partial.as_str(),
        ];
        if !valid.contains(&status.as_str()) {
            return Err(AppError::Validation(format!(
                "Unknown collection status: {}",
                status
            )));
        }
    }

    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_LIMIT)
        .clamp(1, MAX_PAGE_LIMIT);
    let offset = query.offset.unwrap_or(0).max(0);

    let logs = collection_log_queries::list_logs(
        &state.pool,
        query.asset_id,
        query.status.as_deref(),
        query.start_date,
        query.end_date,
        limit,
        offset,
    )
    .await?;

    Ok(Json(logs))
}
