use axum::Router;
use http::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use http::Method;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

use crate::routes::{assets, health, ingestion, scheduler};
use crate::state::AppState;

pub fn create_app(state: AppState, cors_origins: &[String]) -> Router {
    // No configured origins means deny-all
    let allow_origin = if cors_origins.is_empty() {
        AllowOrigin::list(Vec::<HeaderValue>::new())
    } else {
        AllowOrigin::list(cors_origins.iter().filter_map(|origin| {
            match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring unparseable CORS origin: {}", origin);
                    None
                }
            }
        }))
    };

    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION]);

    Router::<AppState>::new()
        .nest("/health", health::router())
        .nest("/api/assets", assets::router())
        .nest("/api/ingestion", ingestion::router())
        .nest("/api/scheduler", scheduler::router())
        .with_state(state)
        .layer(cors)
}
