use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

use crate::errors::AppError;
use crate::models::trigger::Trigger;

pub const DEFAULT_MAX_RETRIES: i32 = 3;
pub const DEFAULT_RETRY_DELAY_SECONDS: i32 = 60;
pub const DEFAULT_RETRY_BACKOFF_MULTIPLIER: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Active,
    Paused,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Active => "active",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether a job in this status may be fired (scheduled or manual).
    pub fn is_runnable(&self) -> bool {
        matches!(self, JobStatus::Active | JobStatus::Pending)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "active" => Ok(JobStatus::Active),
            "paused" => Ok(JobStatus::Paused),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("Unknown job status: {}", other)),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition attached to a dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyCondition {
    /// Parent's last execution finished with `success`.
    Success,
    /// Parent finished (success or failed), i.e. is no longer running.
    Complete,
    /// Parent has executed at least once.
    Any,
}

impl DependencyCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyCondition::Success => "success",
            DependencyCondition::Complete => "complete",
            DependencyCondition::Any => "any",
        }
    }
}

impl FromStr for DependencyCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(DependencyCondition::Success),
            "complete" => Ok(DependencyCondition::Complete),
            "any" => Ok(DependencyCondition::Any),
            other => Err(format!("Unknown dependency condition: {}", other)),
        }
    }
}

/// Declarative description of a recurring (or one-shot) ingestion, as
/// persisted in `scheduler_jobs`. Timer state in the scheduler is only a
/// cache over these rows.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Job {
    pub job_id: String,
    pub symbol: String,
    pub asset_type: String,
    pub trigger_type: String,
    pub trigger_config: serde_json::Value,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub collector_kwargs: Option<serde_json::Value>,
    pub asset_metadata: Option<serde_json::Value>,
    pub status: String,
    pub max_retries: i32,
    pub retry_delay_seconds: i32,
    pub retry_backoff_multiplier: f64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn job_status(&self) -> JobStatus {
        // The status column carries a CHECK constraint; an unparseable value
        // can only mean schema drift, treat it as failed.
        self.status.parse().unwrap_or(JobStatus::Failed)
    }

    pub fn trigger(&self) -> Result<Trigger, AppError> {
        Trigger::parse(&self.trigger_type, &self.trigger_config)
    }

    pub fn is_execute_now(&self) -> bool {
        matches!(self.trigger(), Ok(Trigger::ExecuteNow))
    }

    /// Backoff delay before retry number `current_attempt + 1`.
    pub fn retry_delay_for_attempt(&self, current_attempt: i32) -> std::time::Duration {
        let delay = self.retry_delay_seconds.max(0) as f64
            * self
                .retry_backoff_multiplier
                .powi(current_attempt.max(0));
        std::time::Duration::from_secs_f64(delay)
    }
}

/// A dependency edge as exposed on job responses.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobDependency {
    pub depends_on_job_id: String,
    pub condition: String,
}

/// A dependency edge together with its owning job, used for batch loading.
#[derive(Debug, Clone, FromRow)]
pub struct JobDependencyEdge {
    pub job_id: String,
    pub depends_on_job_id: String,
    pub condition: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DependencyInput {
    pub depends_on_job_id: String,
    #[serde(default)]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobCreate {
    #[serde(default)]
    pub job_id: Option<String>,
    pub symbol: String,
    pub asset_type: String,
    pub trigger_type: String,
    pub trigger_config: serde_json::Value,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub collector_kwargs: Option<serde_json::Value>,
    #[serde(default)]
    pub asset_metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub dependencies: Option<Vec<DependencyInput>>,
    #[serde(default)]
    pub max_retries: Option<i32>,
    #[serde(default)]
    pub retry_delay_seconds: Option<i32>,
    #[serde(default)]
    pub retry_backoff_multiplier: Option<f64>,
}

/// Partial update. Every column this can set is in the store's update
/// whitelist; unknown fields in the request body fail deserialization.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobUpdate {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub asset_type: Option<String>,
    #[serde(default)]
    pub trigger_type: Option<String>,
    #[serde(default)]
    pub trigger_config: Option<serde_json::Value>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub collector_kwargs: Option<serde_json::Value>,
    #[serde(default)]
    pub asset_metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub max_retries: Option<i32>,
    #[serde(default)]
    pub retry_delay_seconds: Option<i32>,
    #[serde(default)]
    pub retry_backoff_multiplier: Option<f64>,
    #[serde(default)]
    pub dependencies: Option<Vec<DependencyInput>>,
}

/// Job row plus its dependency edges, the shape the API returns.
#[derive(Debug, Clone, Serialize)]
pub struct JobResponse {
    #[serde(flatten)]
    pub job: Job,
    pub dependencies: Vec<JobDependency>,
}

/// `{asset_type}_{symbol}_{epoch}_{8-hex}` for clients that do not supply
/// their own job id.
pub fn generate_job_id(symbol: &str, asset_type: &str) -> String {
    let timestamp = Utc::now().timestamp();
    format!(
        "{}_{}_{}_{:08x}",
        asset_type,
        symbol,
        timestamp,
        rand::random::<u32>()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_job() -> Job {
        Job {
            job_id: "stock_AAPL_1_abc".to_string(),
            symbol: "AAPL".to_string(),
            asset_type: "stock".to_string(),
            trigger_type: "interval".to_string(),
            trigger_config: json!({"seconds": 2}),
            start_date: None,
            end_date: None,
            collector_kwargs: None,
            asset_metadata: None,
            status: "active".to_string(),
            max_retries: 3,
            retry_delay_seconds: 60,
            retry_backoff_multiplier: 2.0,
            last_run_at: None,
            next_run_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_generate_job_id_shape() {
        let id = generate_job_id("AAPL", "stock");
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "stock");
        assert_eq!(parts[1], "AAPL");
        assert!(parts[2].parse::<i64>().is_ok());
        assert_eq!(parts[3].len(), 8);
    }

    #[test]
    fn test_retry_delay_backoff() {
        let job = sample_job();
        assert_eq!(
            job.retry_delay_for_attempt(0),
            std::time::Duration::from_secs(60)
        );
        assert_eq!(
            job.retry_delay_for_attempt(1),
            std::time::Duration::from_secs(120)
        );
        assert_eq!(
            job.retry_delay_for_attempt(2),
            std::time::Duration::from_secs(240)
        );
    }

    #[test]
    fn test_execute_now_detection() {
        let mut job = sample_job();
        assert!(!job.is_execute_now());
        job.trigger_config = json!({"seconds": 2, "execute_now": true});
        assert!(job.is_execute_now());
    }

    #[test]
    fn test_runnable_statuses() {
        assert!(JobStatus::Active.is_runnable());
        assert!(JobStatus::Pending.is_runnable());
        assert!(!JobStatus::Paused.is_runnable());
        assert!(!JobStatus::Completed.is_runnable());
        assert!(!JobStatus::Failed.is_runnable());
    }
}
