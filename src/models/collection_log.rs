use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Per-ingestion accounting status. `partial` is legal here even though the
/// paired execution records `failed`; partial loads are failures to
/// investigate, not a third execution outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStatus {
    Success,
    Failed,
    Partial,
}

impl CollectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionStatus::Success => "success",
            CollectionStatus::Failed => "failed",
            CollectionStatus::Partial => "partial",
        }
    }
}

impl fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CollectionLog {
    pub log_id: i64,
    pub asset_id: i32,
    pub collector_type: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub records_collected: i32,
    pub status: String,
    pub error_message: Option<String>,
    pub execution_time_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// One-off collection run driven through the ingestion API, persisted in
/// `active_collection_jobs`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CollectionJob {
    pub job_id: String,
    pub symbol: String,
    pub asset_type: String,
    pub status: String,
    pub request_data: Option<serde_json::Value>,
    pub result_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
