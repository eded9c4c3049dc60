use sqlx::PgPool;
use std::sync::Arc;

use crate::external::registry::ProviderRegistry;
use crate::services::metrics::MetricsSink;
use crate::services::persistent_scheduler::PersistentScheduler;
use crate::services::request_coordinator::RequestCoordinator;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    /// None when the embedded scheduler is disabled; mutating endpoints
    /// answer 503 in that case.
    pub scheduler: Option<Arc<PersistentScheduler>>,
    pub coordinator: Arc<RequestCoordinator>,
    pub registry: Arc<ProviderRegistry>,
    pub metrics: Arc<dyn MetricsSink>,
}
