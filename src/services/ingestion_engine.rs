use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::db::collection_log_queries;
use crate::errors::AppError;
use crate::external::provider::{AssetInfo, ProviderError, ProviderKwargs};
use crate::external::registry::ProviderRegistry;
use crate::models::{AssetType, CollectionStatus, ErrorCategory};
use crate::services::asset_manager;
use crate::services::data_loader::{ConflictPolicy, DataLoader};
use crate::services::error_classifier::classify_message;
use crate::services::incremental;
use crate::services::request_coordinator::{FetchRequest, RequestCoordinator};
use crate::services::schema_mapper;

/// Ceiling on one coordinated fetch, window wait included.
const FETCH_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct IngestParams {
    pub symbol: String,
    pub asset_type: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub collector_kwargs: Option<serde_json::Value>,
    pub asset_metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Success,
    Failed,
}

/// Result contract of one pipeline run. The engine never panics or throws;
/// every failure folds into this shape.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IngestOutcome {
    pub asset_id: Option<i32>,
    pub records_collected: i64,
    pub records_loaded: i64,
    pub status: IngestStatus,
    pub error_message: Option<String>,
    pub error_category: Option<ErrorCategory>,
    pub recovery_suggestion: Option<String>,
    pub execution_time_ms: i64,
    pub log_id: Option<i64>,
}

enum IngestError {
    Provider(ProviderError),
    App(AppError),
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::Provider(e) => e.fmt(f),
            IngestError::App(e) => e.fmt(f),
        }
    }
}

impl From<ProviderError> for IngestError {
    fn from(e: ProviderError) -> Self {
        IngestError::Provider(e)
    }
}

impl From<AppError> for IngestError {
    fn from(e: AppError) -> Self {
        IngestError::App(e)
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(e: sqlx::Error) -> Self {
        IngestError::App(AppError::Db(e))
    }
}

/// Orchestrates fetch → map → load for one `(symbol, range)`.
pub struct IngestionEngine {
    pool: PgPool,
    registry: Arc<ProviderRegistry>,
    coordinator: Arc<RequestCoordinator>,
    loader: DataLoader,
    incremental: bool,
    on_conflict: ConflictPolicy,
}

impl IngestionEngine {
    pub fn new(
        pool: PgPool,
        registry: Arc<ProviderRegistry>,
        coordinator: Arc<RequestCoordinator>,
    ) -> Self {
        Self {
            pool,
            registry,
            coordinator,
            loader: DataLoader::new(true),
            incremental: true,
            on_conflict: ConflictPolicy::DoNothing,
        }
    }

    pub fn with_policy(
        mut self,
        incremental: bool,
        on_conflict: ConflictPolicy,
        use_copy: bool,
    ) -> Self {
        self.incremental = incremental;
        self.on_conflict = on_conflict;
        self.loader = DataLoader::new(use_copy);
        self
    }

    pub async fn ingest(&self, params: IngestParams) -> IngestOutcome {
        let started = std::time::Instant::now();

        match self.try_ingest(&params, started).await {
            Ok(outcome) => outcome,
            Err((asset_id, error)) => {
                self.failed_outcome(&params, asset_id, error, started).await
            }
        }
    }

    async fn try_ingest(
        &self,
        params: &IngestParams,
        started: std::time::Instant,
    ) -> Result<IngestOutcome, (Option<i32>, IngestError)> {
        if params.start > params.end {
            return Err((
                None,
                AppError::Validation(format!(
                    "Invalid date range: start {} is after end {}",
                    params.start, params.end
                ))
                .into(),
            ));
        }

        let asset_type: AssetType = params
            .asset_type
            .parse()
            .map_err(|e: String| (None, AppError::Validation(e).into()))?;

        let provider = self
            .registry
            .get(asset_type)
            .map_err(|e| (None, e.into()))?;

        info!(
            "Starting ingestion for {} ({}) from {} to {}",
            params.symbol, asset_type, params.start, params.end
        );

        // Provider metadata is best-effort; a job must still run when the
        // info endpoint is down
        let info = match provider.asset_info(&params.symbol).await {
            Ok(info) => info,
            Err(e) => {
                warn!(
                    "Could not get asset info for {}: {}. Using defaults.",
                    params.symbol, e
                );
                AssetInfo::default()
            }
        };

        let asset_id = asset_manager::get_or_create_asset(
            &self.pool,
            &params.symbol,
            asset_type,
            &info,
            params.asset_metadata.as_ref(),
        )
        .await
        .map_err(|e| (None, e.into()))?;

        let with_asset = |e: IngestError| (Some(asset_id), e);

        let ranges = if self.incremental {
            let gaps = incremental::calculate_missing_ranges(
                &self.pool,
                asset_id,
                asset_type,
                params.start,
                params.end,
            )
            .await
            .map_err(|e| with_asset(e.into()))?;

            if gaps.is_empty() {
                info!(
                    "All data already exists for {}, skipping collection",
                    params.symbol
                );
                return Ok(IngestOutcome {
                    asset_id: Some(asset_id),
                    records_collected: 0,
                    records_loaded: 0,
                    status: IngestStatus::Success,
                    error_message: None,
                    error_category: None,
                    recovery_suggestion: None,
                    execution_time_ms: started.elapsed().as_millis() as i64,
                    log_id: None,
                });
            }
            gaps
        } else {
            vec![(params.start, params.end)]
        };

        let kwargs: ProviderKwargs = params
            .collector_kwargs
            .as_ref()
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();

        let mut total_collected = 0i64;
        let mut total_loaded = 0i64;

        for (range_start, range_end) in ranges {
            info!(
                "Collecting data for {} from {} to {}",
                params.symbol, range_start, range_end
            );

            let rows = self
                .coordinator
                .fetch(
                    provider.clone(),
                    FetchRequest {
                        symbol: params.symbol.clone(),
                        start: range_start,
                        end: range_end,
                        kwargs: kwargs.clone(),
                        timeout: Some(FETCH_TIMEOUT),
                    },
                )
                .await
                .map_err(|e| with_asset(e.into()))?;

            if rows.is_empty() {
                warn!(
                    "No data collected for {} in range {} to {}",
                    params.symbol, range_start, range_end
                );
                continue;
            }

            total_collected += rows.len() as i64;

            let mapped = schema_mapper::map_rows(asset_type, asset_id, &rows)
                .map_err(|e| with_asset(e.into()))?;

            if mapped.is_empty() {
                warn!(
                    "Schema mapping produced no loadable rows for {} in range {} to {}",
                    params.symbol, range_start, range_end
                );
                continue;
            }

            let load = self
                .loader
                .load(&self.pool, &mapped, self.on_conflict)
                .await
                .map_err(|e| with_asset(e.into()))?;
            total_loaded += load.affected;
        }

        let execution_time_ms = started.elapsed().as_millis() as i64;
        let (status, log_status, error_message) =
            resolve_status(&params.symbol, total_collected, total_loaded);

        let log_id = self
            .write_log(
                asset_id,
                provider.name(),
                params.start,
                params.end,
                total_collected,
                log_status,
                error_message.as_deref(),
                execution_time_ms,
            )
            .await;

        info!(
            "Completed ingestion for {}: {} record(s) loaded, status={:?}",
            params.symbol, total_loaded, status
        );

        Ok(IngestOutcome {
            asset_id: Some(asset_id),
            records_collected: total_collected,
            records_loaded: total_loaded,
            status,
            error_message,
            error_category: None,
            recovery_suggestion: None,
            execution_time_ms,
            log_id,
        })
    }

    /// Fold an error into the result contract and still account for the
    /// attempt in the collection log, creating the asset if that is the
    /// only thing standing between us and a log row.
    async fn failed_outcome(
        &self,
        params: &IngestParams,
        asset_id: Option<i32>,
        error: IngestError,
        started: std::time::Instant,
    ) -> IngestOutcome {
        let execution_time_ms = started.elapsed().as_millis() as i64;
        let message = error.to_string();
        let (category, suggestion) = classify_message(&message);

        error!("Failed to ingest data for {}: {}", params.symbol, message);

        let asset_id = match asset_id {
            Some(id) => Some(id),
            None => match params.asset_type.parse::<AssetType>() {
                Ok(asset_type) => asset_manager::get_or_create_asset(
                    &self.pool,
                    &params.symbol,
                    asset_type,
                    &AssetInfo::default(),
                    params.asset_metadata.as_ref(),
                )
                .await
                .map_err(|e| {
                    error!("Failed to get/create asset for logging: {}", e);
                    e
                })
                .ok(),
                Err(_) => None,
            },
        };

        let provider_name = params
            .asset_type
            .parse::<AssetType>()
            .ok()
            .and_then(|at| self.registry.get(at).ok())
            .map(|p| p.name())
            .unwrap_or("Unknown");

        let log_id = match asset_id {
            Some(asset_id) => {
                self.write_log(
                    asset_id,
                    provider_name,
                    params.start,
                    params.end,
                    0,
                    CollectionStatus::Failed,
                    Some(&message),
                    execution_time_ms,
                )
                .await
            }
            None => None,
        };

        IngestOutcome {
            asset_id,
            records_collected: 0,
            records_loaded: 0,
            status: IngestStatus::Failed,
            error_message: Some(message),
            error_category: Some(category),
            recovery_suggestion: Some(suggestion.to_string()),
            execution_time_ms,
            log_id,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_log(
        &self,
        asset_id: i32,
        collector_type: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        records_collected: i64,
        status: CollectionStatus,
        error_message: Option<&str>,
        execution_time_ms: i64,
    ) -> Option<i64> {
        match collection_log_queries::insert_log(
            &self.pool,
            asset_id,
            collector_type,
            start,
            end,
            records_collected as i32,
            status,
            error_message,
            execution_time_ms,
        )
        .await
        {
            Ok(log_id) => Some(log_id),
            Err(e) => {
                error!("Failed to log collection run: {}", e);
                None
            }
        }
    }
}

/// Status arithmetic for a completed (exception-free) run.
fn resolve_status(
    symbol: &str,
    collected: i64,
    loaded: i64,
) -> (IngestStatus, CollectionStatus, Option<String>) {
    if loaded > 0 && loaded == collected {
        return (IngestStatus::Success, CollectionStatus::Success, None);
    }

    if loaded > 0 {
        // Partial loads are failures to investigate, not a third status
        let dropped = collected - loaded;
        let message = format!(
            "Partial load failure for {}: collected {} record(s) but only loaded {}. \
             {} record(s) were dropped. Check logs for validation errors or \
             constraint violations.",
            symbol, collected, loaded, dropped
        );
        return (IngestStatus::Failed, CollectionStatus::Partial, Some(message));
    }

    let message = if collected == 0 {
        format!(
            "No data collected for {}. The provider returned empty results for the \
             requested range. The symbol may be unknown, or no data exists for \
             this window.",
            symbol
        )
    } else {
        format!(
            "Collected {} record(s) for {} but failed to load any into the database. \
             The rows were rejected by the loader; check for validation errors or \
             constraint violations.",
            collected, symbol
        )
    };

    (IngestStatus::Failed, CollectionStatus::Failed, Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_load_is_success() {
        let (status, log_status, message) = resolve_status("AAPL", 5, 5);
        assert_eq!(status, IngestStatus::Success);
        assert_eq!(log_status, CollectionStatus::Success);
        assert!(message.is_none());
    }

    #[test]
    fn test_partial_load_is_failure_with_partial_log() {
        let (status, log_status, message) = resolve_status("AAPL", 5, 3);
        assert_eq!(status, IngestStatus::Failed);
        assert_eq!(log_status, CollectionStatus::Partial);
        let message = message.unwrap();
        assert!(message.contains("2 record(s) were dropped"));
    }

    #[test]
    fn test_zero_loaded_distinguishes_empty_from_rejected() {
        let (_, _, empty) = resolve_status("AAPL", 0, 0);
        assert!(empty.unwrap().contains("provider returned empty results"));

        let (_, _, rejected) = resolve_status("AAPL", 4, 0);
        assert!(rejected.unwrap().contains("rejected by the loader"));
    }
}
