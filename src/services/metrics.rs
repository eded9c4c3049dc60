use tracing::info;

/// Fire-and-forget metrics seam. Implementations must never fail the
/// hosting operation; there is nothing to propagate.
pub trait MetricsSink: Send + Sync {
    fn record_job_created(&self, asset_type: &str, status: &str);

    fn record_job_execution(
        &self,
        asset_type: &str,
        status: &str,
        duration_seconds: f64,
        error_category: Option<&str>,
    );

    fn record_job_retry(&self, job_id: &str, asset_type: &str);
}

/// Default sink: structured log events under the `metrics` target, ready
/// for a scraper or a Loki query.
pub struct LogMetrics;

impl MetricsSink for LogMetrics {
    fn record_job_created(&self, asset_type: &str, status: &str) {
        info!(target: "metrics", metric = "job_created", asset_type, status);
    }

    fn record_job_execution(
        &self,
        asset_type: &str,
        status: &str,
        duration_seconds: f64,
        error_category: Option<&str>,
    ) {
        info!(
            target: "metrics",
            metric = "job_execution",
            asset_type,
            status,
            duration_seconds,
            error_category = error_category.unwrap_or("")
        );
    }

    fn record_job_retry(&self, job_id: &str, asset_type: &str) {
        info!(target: "metrics", metric = "job_retry", job_id, asset_type);
    }
}
