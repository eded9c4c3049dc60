use axum::extract::{Path, Query, State};
use axum::{routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{asset_queries, series_queries};
use crate::errors::AppError;
use crate::models::{Asset, AssetType};
use crate::state::AppState;

const DEFAULT_PAGE_LIMIT: i64 = 100;
const MAX_PAGE_LIMIT: i64 = 1000;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_assets))
        .route("/:asset_id", get(get_asset))
        .route("/:asset_id/data-coverage", get(get_data_coverage))
}

#[derive(Debug, Deserialize)]
struct ListAssetsQuery {
    asset_type: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Debug, Serialize)]
struct DataCoverageResponse {
    asset_id: i32,
    asset_type: String,
    has_data: bool,
    earliest_date: Option<DateTime<Utc>>,
    latest_date: Option<DateTime<Utc>>,
    record_count: i64,
}

/// GET /api/assets - active assets, newest first
async fn list_assets(
    State(state): State<AppState>,
    Query(query): Query<ListAssetsQuery>,
) -> Result<Json<Vec<Asset>>, AppError> {
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

    let assets =
        asset_queries::list_active(&state.pool, query.asset_type.as_deref(), limit, offset)
            .await?;

    Ok(Json(assets))
}

/// GET /api/assets/:asset_id
async fn get_asset(
    State(state): State<AppState>,
    Path(asset_id): Path<i32>,
) -> Result<Json<Asset>, AppError> {
    let asset = asset_queries::fetch_active_by_id(&state.pool, asset_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Asset {} not found", asset_id)))?;

    Ok(Json(asset))
}

/// GET /api/assets/:asset_id/data-coverage - stored date range and count
async fn get_data_coverage(
    State(state): State<AppState>,
    Path(asset_id): Path<i32>,
) -> Result<Json<DataCoverageResponse>, AppError> {
    let asset = asset_queries::fetch_active_by_id(&state.pool, asset_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Asset {} not found", asset_id)))?;

    let Ok(asset_type) = asset.asset_type.parse::<AssetType>() else {
        return Ok(Json(DataCoverageResponse {
            asset_id,
            asset_type: asset.asset_type,
            has_data: false,
            earliest_date: None,
            latest_date: None,
            record_count: 0,
        }));
    };

    let coverage = series_queries::fetch_coverage(&state.pool, asset_id, asset_type).await?;

    Ok(Json(DataCoverageResponse {
        asset_id,
        asset_type: asset.asset_type,
        has_data: coverage.record_count > 0,
        earliest_date: coverage.earliest,
        latest_date: coverage.latest,
        record_count: coverage.record_count,
    }))
}
