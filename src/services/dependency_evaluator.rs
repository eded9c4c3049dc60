use sqlx::PgPool;

use crate::db::{dependency_queries, execution_queries, job_queries};
use crate::errors::AppError;
use crate::models::{DependencyCondition, Job, JobExecution, JobStatus};

/// Evaluate whether all of a job's dependencies are satisfied.
///
/// Returns `(ready, unmet_parent_ids)`. The evaluator only reads; triggering
/// a ready job is the scheduler's business. The store is the source of
/// truth, so a dependent that stops being ready between evaluation and fire
/// simply re-evaluates (and skips) at fire time.
pub async fn check_dependencies_met(
    pool: &PgPool,
    job_id: &str,
) -> Result<(bool, Vec<String>), AppError> {
    let dependencies = dependency_queries::fetch_for_job(pool, job_id).await?;

    if dependencies.is_empty() {
        return Ok((true, Vec::new()));
    }

    let mut unmet = Vec::new();

    for dep in dependencies {
        let condition: DependencyCondition = dep
            .condition
            .parse()
            .unwrap_or(DependencyCondition::Success);

        let parent = job_queries::fetch_job(pool, &dep.depends_on_job_id).await?;

        let needs_execution = matches!(
            condition,
            DependencyCondition::Success | DependencyCondition::Complete
        );
        let last_execution = if parent.is_some() && needs_execution {
            execution_queries::fetch_last_execution(pool, &dep.depends_on_job_id).await?
        } else {
            None
        };

        if !edge_met(condition, parent.as_ref(), last_execution.as_ref()) {
            unmet.push(dep.depends_on_job_id);
        }
    }

    Ok((unmet.is_empty(), unmet))
}

/// Pure per-edge check. Missing parents are unconditionally unmet; a parent
/// that never existed never becomes "ready by absence".
pub fn edge_met(
    condition: DependencyCondition,
    parent: Option<&Job>,
    last_execution: Option<&JobExecution>,
) -> bool {
    let Some(parent) = parent else {
        return false;
    };

    match condition {
        DependencyCondition::Success => last_execution
            .map(|e| e.execution_status == "success")
            .unwrap_or(false),
        DependencyCondition::Complete => {
            if matches!(
                parent.job_status(),
                JobStatus::Completed | JobStatus::Failed
            ) {
                return true;
            }
            // Recorded executions are terminal; a stale "running" marker
            // from a prior schema would not count.
            last_execution
                .map(|e| e.execution_status != "running")
                .unwrap_or(false)
        }
        DependencyCondition::Any => parent.last_run_at.is_some(),
    }
}
