use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use sqlx::PgPool;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::sleep;
use tokio_cron_scheduler::{Job as TimerJob, JobScheduler};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::{dependency_queries, execution_queries, job_queries};
use crate::errors::AppError;
use crate::models::{
    ErrorCategory, ExecutionStatus, Job, JobStatus, NewExecution, Trigger,
};
use crate::services::dependency_evaluator;
use crate::services::error_classifier::classify_message;
use crate::services::ingestion_engine::{IngestParams, IngestStatus, IngestionEngine};
use crate::services::metrics::MetricsSink;

const SHUTDOWN_WAIT: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub max_workers: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self { max_workers: 5 }
    }
}

/// Timer wheel bound to the job store.
///
/// Jobs live in `scheduler_jobs`; the wheel state here (`installed`) is a
/// cache keyed by job id that can always be rebuilt from the store. Fired
/// jobs run in a bounded worker pool, one slot per job end-to-end, and a
/// per-job lock coalesces overlapping fires of the same job.
pub struct PersistentScheduler {
    sched: JobScheduler,
    pool: PgPool,
    engine: Arc<IngestionEngine>,
    metrics: Arc<dyn MetricsSink>,
    installed: DashMap<String, Uuid>,
    run_locks: DashMap<String, Arc<Mutex<()>>>,
    workers: Arc<Semaphore>,
    accepting: AtomicBool,
    in_flight: Arc<AtomicUsize>,
}

impl PersistentScheduler {
    pub async fn new(
        pool: PgPool,
        engine: Arc<IngestionEngine>,
        metrics: Arc<dyn MetricsSink>,
        settings: SchedulerSettings,
    ) -> Result<Arc<Self>, AppError> {
        let sched = JobScheduler::new()
            .await
            .map_err(|e| AppError::Scheduler(format!("Failed to create scheduler: {}", e)))?;

        Ok(Arc::new(Self {
            sched,
            pool,
            engine,
            metrics,
            installed: DashMap::new(),
            run_locks: DashMap::new(),
            workers: Arc::new(Semaphore::new(settings.max_workers.max(1))),
            accepting: AtomicBool::new(true),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }))
    }

    /// A cloned wheel handle; the wheel has interior locking, clones are
    /// cheap and share state.
    fn wheel(&self) -> JobScheduler {
        self.sched.clone()
    }

    /// Load persisted jobs and start ticking.
    pub async fn start(self: &Arc<Self>) -> Result<(), AppError> {
        info!("🚀 Starting persistent scheduler...");

        let loaded = self.load_jobs_from_store().await?;
        info!("Loaded {} job(s) from the store", loaded.len());

        self.wheel()
            .start()
            .await
            .map_err(|e| AppError::Scheduler(format!("Failed to start scheduler: {}", e)))?;

        info!("✅ Persistent scheduler started");
        Ok(())
    }

    /// Install every active/pending job. A job whose trigger fails to parse
    /// is logged and skipped; it must not block the rest.
    async fn load_jobs_from_store(self: &Arc<Self>) -> Result<Vec<String>, AppError> {
        let jobs = job_queries::load_active_jobs(&self.pool).await?;
        let mut loaded = Vec::with_capacity(jobs.len());

        for job in jobs {
            let job_id = job.job_id.clone();
            match self.install_job(&job).await {
                Ok(()) => loaded.push(job_id),
                Err(e) => error!("Failed to load job {}: {}", job_id, e),
            }
        }

        Ok(loaded)
    }

    /// Decode the job's trigger and install a timer for it. Execute-now jobs
    /// never get a timer; they are only reconciled against the store.
    async fn install_job(self: &Arc<Self>, job: &Job) -> Result<(), AppError> {
        let trigger = job.trigger()?;
        let job_id = job.job_id.clone();

        let timer_job = match trigger {
            Trigger::ExecuteNow => {
                if job.last_run_at.is_some() {
                    // Already executed on a prior run of this process
                    job_queries::set_status(&self.pool, &job_id, JobStatus::Completed, None)
                        .await?;
                    info!("Marked execute_now job {} as completed (already executed)", job_id);
                } else if job.job_status() == JobStatus::Pending {
                    job_queries::set_status(&self.pool, &job_id, JobStatus::Active, None)
                        .await?;
                }
                return Ok(());
            }
            Trigger::Cron(schedule) => {
                let expression = schedule.expression();
                let this = Arc::clone(self);
                let captured_id = job_id.clone();
                TimerJob::new_async(expression.as_str(), move |_uuid, _lock| {
                    let this = this.clone();
                    let job_id = captured_id.clone();
                    Box::pin(async move {
                        this.run_job_once(job_id, 0).await;
                    })
                })
                .map_err(|e| {
                    AppError::Validation(format!(
                        "Invalid cron expression '{}' for job {}: {}",
                        expression, job_id, e
                    ))
                })?
            }
            Trigger::Interval(schedule) => {
                let this = Arc::clone(self);
                let captured_id = job_id.clone();
                TimerJob::new_repeated_async(schedule.duration(), move |_uuid, _lock| {
                    let this = this.clone();
                    let job_id = captured_id.clone();
                    Box::pin(async move {
                        this.run_job_once(job_id, 0).await;
                    })
                })
                .map_err(|e| {
                    AppError::Scheduler(format!(
                        "Failed to build interval timer for job {}: {}",
                        job_id, e
                    ))
                })?
            }
        };

        let uuid = self
            .wheel()
            .add(timer_job)
            .await
            .map_err(|e| AppError::Scheduler(format!("Failed to add job {}: {}", job_id, e)))?;
        self.installed.insert(job_id.clone(), uuid);

        let next_run_at = self.next_tick(uuid).await;
        job_queries::set_status(&self.pool, &job_id, JobStatus::Active, next_run_at).await?;

        info!(
            "📅 Installed job {} ({} {}), next fire at {:?}",
            job_id, job.asset_type, job.symbol, next_run_at
        );
        Ok(())
    }

    async fn next_tick(&self, uuid: Uuid) -> Option<DateTime<Utc>> {
        self.wheel().next_tick_for_job(uuid).await.ok().flatten()
    }

    /// Install a job by id. Idempotent: re-adding an installed job is a
    /// successful no-op.
    pub async fn add_from_store(self: &Arc<Self>, job_id: &str) -> Result<bool, AppError> {
        if self.installed.contains_key(job_id) {
            info!("Job {} already in scheduler", job_id);
            return Ok(true);
        }

        let Some(job) = job_queries::fetch_job(&self.pool, job_id).await? else {
            warn!("Job {} not found in store", job_id);
            return Ok(false);
        };

        if !job.job_status().is_runnable() {
            info!(
                "Job {} has status {}, not adding to scheduler",
                job_id, job.status
            );
            return Ok(false);
        }

        self.install_job(&job).await?;
        Ok(true)
    }

    /// Remove a job's timer. Tolerates jobs the wheel does not know.
    pub async fn remove(&self, job_id: &str) -> bool {
        let Some((_, uuid)) = self.installed.remove(job_id) else {
            debug!("Job {} not installed, nothing to remove", job_id);
            return false;
        };

        match self.wheel().remove(&uuid).await {
            Ok(()) => {
                info!("Removed job {} from scheduler", job_id);
                true
            }
            Err(e) => {
                warn!("Failed to remove job {} from scheduler: {}", job_id, e);
                false
            }
        }
    }

    /// Replace = remove + re-add from the store.
    pub async fn update_in_scheduler(self: &Arc<Self>, job_id: &str) -> Result<bool, AppError> {
        self.remove(job_id).await;
        self.add_from_store(job_id).await
    }

    /// Drop the upcoming fires. An already-running execution finishes and
    /// records its outcome; pending retry one-shots abort at fire time when
    /// they see the paused status.
    pub async fn pause(&self, job_id: &str) -> bool {
        self.remove(job_id).await;
        info!("Paused job {} in scheduler", job_id);
        true
    }

    pub async fn resume(self: &Arc<Self>, job_id: &str) -> Result<bool, AppError> {
        self.add_from_store(job_id).await
    }

    /// Manually fire a job. Works for jobs without a timer (execute_now, or
    /// wheel state that drifted from the store); the store decides
    /// eligibility, not the wheel.
    pub async fn trigger_now(self: &Arc<Self>, job_id: &str) -> Result<(), AppError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(AppError::Scheduler(
                "Scheduler is shutting down".to_string(),
            ));
        }

        let Some(job) = job_queries::fetch_job(&self.pool, job_id).await? else {
            return Err(AppError::NotFound(format!("Job {} not found", job_id)));
        };

        if !job.job_status().is_runnable() {
            return Err(AppError::Validation(format!(
                "Job {} has status {}, cannot trigger",
                job_id, job.status
            )));
        }

        info!("Manually triggering job {}", job_id);
        let this = Arc::clone(self);
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            this.run_job_once(job_id, 0).await;
        });

        Ok(())
    }

    /// The execution wrapper every fire goes through: dependency gate,
    /// window computation, pipeline, execution record, retry hand-off,
    /// dependent cascade.
    async fn run_job_once(self: Arc<Self>, job_id: String, retry_attempt: i32) {
        if !self.accepting.load(Ordering::SeqCst) {
            info!("Scheduler shutting down, dropping fire for job {}", job_id);
            return;
        }

        // Counted before the pool wait so shutdown sees queued fires too
        let _in_flight = InFlightGuard::enter(&self.in_flight);

        let Ok(_permit) = self.workers.clone().acquire_owned().await else {
            return;
        };

        // One fire at a time per job; an overlapping fire is coalesced
        let run_lock = self
            .run_locks
            .entry(job_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let Ok(_run_guard) = run_lock.try_lock() else {
            info!(
                "Job {} is still running its previous fire, coalescing",
                job_id
            );
            return;
        };

        let job = match job_queries::fetch_job(&self.pool, &job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                // Deleted since the fire was scheduled; drop it
                warn!("Job {} no longer exists, dropping fire", job_id);
                return;
            }
            Err(e) => {
                error!("Failed to load job {} for execution: {}", job_id, e);
                return;
            }
        };

        let status = job.job_status();
        let eligible = if retry_attempt > 0 {
            // Retries abort unless the job is still active
            status == JobStatus::Active
        } else {
            status.is_runnable()
        };
        if !eligible {
            info!(
                "Job {} has status {}, skipping fire (retry_attempt={})",
                job_id, job.status, retry_attempt
            );
            return;
        }

        let (ready, unmet) =
            match dependency_evaluator::check_dependencies_met(&self.pool, &job_id).await {
                Ok(result) => result,
                Err(e) => {
                    error!("Dependency check failed for job {}: {}", job_id, e);
                    return;
                }
            };

        if !ready {
            info!(
                "Skipping job {} execution - unmet dependencies: {:?}",
                job_id, unmet
            );
            let details = NewExecution {
                error_message: Some(format!("Unmet dependencies: {}", unmet.join(", "))),
                execution_time_ms: Some(0),
                retry_attempt,
                ..Default::default()
            };
            if let Err(e) =
                execution_queries::record_execution(&self.pool, &job_id, ExecutionStatus::Skipped, &details)
                    .await
            {
                error!("Failed to record skipped execution for {}: {}", job_id, e);
            }
            self.metrics.record_job_execution(
                &job.asset_type,
                ExecutionStatus::Skipped.as_str(),
                0.0,
                None,
            );
            return;
        }

        let (start, end) = effective_window(job.start_date, job.end_date, Utc::now());

        info!(
            "Executing scheduled ingestion for {} ({})",
            job.symbol, job.asset_type
        );

        let outcome = self
            .engine
            .ingest(IngestParams {
                symbol: job.symbol.clone(),
                asset_type: job.asset_type.clone(),
                start,
                end,
                collector_kwargs: job.collector_kwargs.clone(),
                asset_metadata: job.asset_metadata.clone(),
            })
            .await;

        let execution_status = match outcome.status {
            IngestStatus::Success => ExecutionStatus::Success,
            IngestStatus::Failed => ExecutionStatus::Failed,
        };

        // Fill the category through the classifier when the pipeline
        // reported a failure without one
        let error_category = outcome.error_category.or_else(|| {
            if execution_status == ExecutionStatus::Failed {
                outcome
                    .error_message
                    .as_deref()
                    .map(|m| classify_message(m).0)
            } else {
                None
            }
        });
        let recovery_suggestion = outcome.recovery_suggestion.clone().or_else(|| {
            if execution_status == ExecutionStatus::Failed {
                outcome
                    .error_message
                    .as_deref()
                    .map(|m| classify_message(m).1.to_string())
            } else {
                None
            }
        });

        let details = NewExecution {
            log_id: outcome.log_id,
            error_message: outcome.error_message.clone(),
            error_category,
            recovery_suggestion,
            execution_time_ms: Some(outcome.execution_time_ms),
            retry_attempt,
        };
        if let Err(e) =
            execution_queries::record_execution(&self.pool, &job_id, execution_status, &details)
                .await
        {
            error!("Failed to record execution for job {}: {}", job_id, e);
        }

        self.metrics.record_job_execution(
            &job.asset_type,
            execution_status.as_str(),
            outcome.execution_time_ms as f64 / 1000.0,
            error_category.map(|c| c.as_str()),
        );
        if retry_attempt > 0 {
            self.metrics.record_job_retry(&job_id, &job.asset_type);
        }

        // Keep the persisted next-fire in step with the wheel
        if let Some(uuid) = self.installed.get(&job_id).map(|e| *e.value()) {
            let next_run_at = self.next_tick(uuid).await;
            if let Err(e) = job_queries::set_next_run_at(&self.pool, &job_id, next_run_at).await {
                warn!("Failed to update next_run_at for job {}: {}", job_id, e);
            }
        }

        info!(
            "Completed ingestion for {}: status={}, records={}, time={}ms",
            job.symbol, execution_status, outcome.records_loaded, outcome.execution_time_ms
        );

        if job.is_execute_now() {
            let final_status = match execution_status {
                ExecutionStatus::Success => JobStatus::Completed,
                _ => JobStatus::Failed,
            };
            if let Err(e) =
                job_queries::set_status(&self.pool, &job_id, final_status, None).await
            {
                error!("Failed to finalize execute_now job {}: {}", job_id, e);
            } else {
                info!("Marked execute_now job {} as {}", job_id, final_status);
            }
        }

        match execution_status {
            ExecutionStatus::Failed if error_category == Some(ErrorCategory::Transient) => {
                self.handle_retry(&job_id, retry_attempt).await;
            }
            ExecutionStatus::Success => {
                self.notify_dependents_completed(&job_id).await;
            }
            _ => {}
        }
    }

    /// Retry controller. Only transient failures land here; the job's policy
    /// decides between a backoff one-shot and giving up.
    fn handle_retry<'a>(
        self: &'a Arc<Self>,
        job_id: &'a str,
        current_attempt: i32,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let job = match job_queries::fetch_job(&self.pool, job_id).await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    // Deleted mid-flight; its retries die with it
                    warn!("Job {} not found for retry handling", job_id);
                    return;
                }
                Err(e) => {
                    error!("Failed to load retry policy for job {}: {}", job_id, e);
                    return;
                }
            };

            if !job.job_status().is_runnable() {
                info!(
                    "Job {} is not active (status: {}), skipping retry",
                    job_id, job.status
                );
                return;
            }

            if current_attempt >= job.max_retries {
                warn!(
                    "Job {} exceeded max retries ({}). Marking as failed.",
                    job_id, job.max_retries
                );
                if let Err(e) =
                    job_queries::set_status(&self.pool, job_id, JobStatus::Failed, None).await
                {
                    error!("Failed to mark job {} as failed: {}", job_id, e);
                }
                return;
            }

            let delay = job.retry_delay_for_attempt(current_attempt);
            let next_attempt = current_attempt + 1;
            info!(
                "Scheduling retry {}/{} for job {} in {:?}",
                next_attempt, job.max_retries, job_id, delay
            );

            let this = Arc::clone(self);
            let captured_id = job_id.to_string();
            let one_shot = TimerJob::new_one_shot_async(delay, move |_uuid, _lock| {
                let this = this.clone();
                let job_id = captured_id.clone();
                Box::pin(async move {
                    this.run_job_once(job_id, next_attempt).await;
                })
            });

            match one_shot {
                Ok(timer_job) => {
                    if let Err(e) = self.wheel().add(timer_job).await {
                        error!("Failed to schedule retry for job {}: {}", job_id, e);
                    }
                }
                Err(e) => error!("Failed to build retry timer for job {}: {}", job_id, e),
            }
        })
    }

    /// Called after a successful execution: fire every dependent whose
    /// dependencies are now met. The store is the source of truth, so a
    /// dependent that stops being eligible re-evaluates at its own fire.
    pub fn notify_dependents_completed<'a>(
        self: &'a Arc<Self>,
        job_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let dependents = match dependency_queries::fetch_dependents(&self.pool, job_id).await {
                Ok(dependents) => dependents,
                Err(e) => {
                    error!("Failed to list dependents of {}: {}", job_id, e);
                    return;
                }
            };

            for dependent_id in dependents {
                let ready = match dependency_evaluator::check_dependencies_met(
                    &self.pool,
                    &dependent_id,
                )
                .await
                {
                    Ok((ready, unmet)) => {
                        if !ready {
                            debug!(
                                "Job {} still has unmet dependencies: {:?}",
                                dependent_id, unmet
                            );
                        }
                        ready
                    }
                    Err(e) => {
                        error!("Dependency check failed for {}: {}", dependent_id, e);
                        false
                    }
                };
                if !ready {
                    continue;
                }

                match job_queries::fetch_job(&self.pool, &dependent_id).await {
                    Ok(Some(job)) if job.job_status().is_runnable() => {
                        info!(
                            "All dependencies met for job {}, triggering execution",
                            dependent_id
                        );
                        let this = Arc::clone(self);
                        tokio::spawn(async move {
                            this.run_job_once(dependent_id, 0).await;
                        });
                    }
                    Ok(_) => {}
                    Err(e) => error!("Failed to load dependent job {}: {}", dependent_id, e),
                }
            }
        })
    }

    /// Reject new fires, wait (bounded) for in-flight executions, stop the
    /// wheel. Transport calls already under way are not force-cancelled.
    pub async fn shutdown(&self) {
        info!("🛑 Stopping persistent scheduler...");
        self.accepting.store(false, Ordering::SeqCst);

        let deadline = tokio::time::Instant::now() + SHUTDOWN_WAIT;
        while self.in_flight.load(Ordering::SeqCst) > 0
            && tokio::time::Instant::now() < deadline
        {
            sleep(std::time::Duration::from_millis(100)).await;
        }

        let remaining = self.in_flight.load(Ordering::SeqCst);
        if remaining > 0 {
            warn!("Shutting down with {} execution(s) still in flight", remaining);
        }

        if let Err(e) = self.wheel().shutdown().await {
            warn!("Failed to stop scheduler cleanly: {}", e);
        } else {
            info!("✅ Persistent scheduler stopped");
        }
    }
}

/// Effective ingest window for a fire: a missing end means "up to now", a
/// missing start means "one day before the end".
pub(crate) fn effective_window(
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let end = end_date.unwrap_or(now);
    let start = start_date.unwrap_or(end - ChronoDuration::days(1));
    (start, end)
}

struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_effective_window_uses_stored_dates() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        assert_eq!(
            effective_window(Some(start), Some(end), now),
            (start, end)
        );
    }

    #[test]
    fn test_effective_window_defaults_end_to_now() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        assert_eq!(effective_window(Some(start), None, now), (start, now));
    }

    #[test]
    fn test_effective_window_defaults_start_to_one_day_before_end() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        let (start, end) = effective_window(None, None, now);
        assert_eq!(end, now);
        assert_eq!(start, now - ChronoDuration::days(1));
    }

    #[test]
    fn test_in_flight_guard_counts_enter_and_drop() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let _a = InFlightGuard::enter(&counter);
            let _b = InFlightGuard::enter(&counter);
            assert_eq!(counter.load(Ordering::SeqCst), 2);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
