use std::net::SocketAddr;

/// Runtime configuration, resolved once at startup from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub scheduler_max_workers: usize,
    pub enable_embedded_scheduler: bool,
    pub enable_request_coordinator: bool,
    pub request_coordinator_window_seconds: f64,
    /// Comma-separated allowed origins. Empty means deny-all.
    pub cors_origins: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: database_url_from_env(),
            bind_addr: SocketAddr::from((
                [0, 0, 0, 0],
                env_parse("PORT", 3000u16),
            )),
            scheduler_max_workers: env_parse("SCHEDULER_MAX_WORKERS", 5usize),
            enable_embedded_scheduler: env_parse("ENABLE_EMBEDDED_SCHEDULER", true),
            enable_request_coordinator: env_parse("ENABLE_REQUEST_COORDINATOR", true),
            request_coordinator_window_seconds: env_parse(
                "REQUEST_COORDINATOR_WINDOW_SECONDS",
                1.0f64,
            ),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

/// Prefer DATABASE_URL; otherwise compose from the DB_* parts.
fn database_url_from_env() -> String {
    if let Ok(url) = std::env::var("DATABASE_URL") {
        return url;
    }

    let host = std::env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string());
    let port = std::env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());
    let name = std::env::var("DB_NAME").unwrap_or_else(|_| "marketpipe".to_string());
    let user = std::env::var("DB_USER").unwrap_or_else(|_| "postgres".to_string());
    let password = std::env::var("DB_PASSWORD").unwrap_or_default();

    format!("postgres://{user}:{password}@{host}:{port}/{name}")
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        std::env::set_var("MARKETPIPE_TEST_WORKERS", "not-a-number");
        let parsed: usize = env_parse("MARKETPIPE_TEST_WORKERS", 5);
        assert_eq!(parsed, 5);
        std::env::remove_var("MARKETPIPE_TEST_WORKERS");
    }

    #[test]
    fn test_env_parse_reads_value() {
        std::env::set_var("MARKETPIPE_TEST_WINDOW", "2.5");
        let parsed: f64 = env_parse("MARKETPIPE_TEST_WINDOW", 1.0);
        assert_eq!(parsed, 2.5);
        std::env::remove_var("MARKETPIPE_TEST_WINDOW");
    }
}
