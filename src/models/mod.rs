mod asset;
mod collection_log;
mod execution;
mod job;
mod series;
mod trigger;

pub use asset::{Asset, AssetType};
pub use collection_log::{CollectionJob, CollectionLog, CollectionStatus};
pub use execution::{ErrorCategory, ExecutionStatus, JobExecution, NewExecution};
pub use job::{
    generate_job_id, DependencyCondition, DependencyInput, Job, JobCreate, JobDependency,
    JobDependencyEdge, JobResponse, JobStatus, JobUpdate, DEFAULT_MAX_RETRIES,
    DEFAULT_RETRY_BACKOFF_MULTIPLIER, DEFAULT_RETRY_DELAY_SECONDS,
};
pub use series::{MappedRows, MarketDataRow, RatePoint, ValuePoint};
pub use trigger::{CronSchedule, IntervalSchedule, Trigger};
