use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use thiserror::Error;

pub type ProviderKwargs = serde_json::Map<String, Value>;

/// Errors a provider adapter may surface. Everything a provider's transport
/// or API can throw is wrapped into this taxonomy before it leaves the
/// adapter; the error classifier only ever sees these messages.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("provider configuration error: {0}")]
    Config(String),

    #[error("provider API error: {0}")]
    Api(String),

    #[error("rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("validation error: {0}")]
    Validation(String),
}

/// One observation as returned by a provider: a timestamp plus loosely typed
/// named fields. The schema mapper normalizes these into table rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRow {
    pub time: DateTime<Utc>,
    pub fields: BTreeMap<String, Value>,
}

impl ProviderRow {
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: Value) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }
}

/// Asset metadata as reported by a provider, merged into the assets table on
/// upsert. Caller-supplied metadata wins over these values.
#[derive(Debug, Clone, Default)]
pub struct AssetInfo {
    pub name: Option<String>,
    pub source: Option<String>,
    pub exchange: Option<String>,
    pub currency: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub base_currency: Option<String>,
    pub quote_currency: Option<String>,
    pub series_id: Option<String>,
    pub security_type: Option<String>,
    pub extra: ProviderKwargs,
}

/// A data-provider adapter. Adapters own their transport-level retry policy;
/// the request coordinator and rate limiter sit above this seam.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Stable name, used as the coordinator grouping key, the rate-limiter
    /// bucket key, and the `collector_type` recorded in the collection log.
    fn name(&self) -> &'static str;

    /// Whether the coordinator may hand this adapter a whole batch of
    /// symbols at once.
    fn supports_batch(&self) -> bool {
        false
    }

    /// Token-bucket parameters for this provider class.
    fn rate_limit(&self) -> (u32, Duration) {
        (10, Duration::from_secs(60))
    }

    /// Fetch rows for one symbol over `[start, end]`. An empty result is a
    /// valid outcome, not an error.
    async fn fetch_range(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        kwargs: &ProviderKwargs,
    ) -> Result<Vec<ProviderRow>, ProviderError>;

    /// Fetch rows for several symbols over the same window. The default
    /// issues one `fetch_range` per symbol; adapters with a native batch
    /// endpoint override this and declare `supports_batch`.
    async fn fetch_range_batch(
        &self,
        symbols: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        kwargs: &ProviderKwargs,
    ) -> Result<HashMap<String, Vec<ProviderRow>>, ProviderError> {
        let mut results = HashMap::with_capacity(symbols.len());
        for symbol in symbols {
            let rows = self.fetch_range(symbol, start, end, kwargs).await?;
            results.insert(symbol.clone(), rows);
        }
        Ok(results)
    }

    /// Metadata about the asset behind `symbol`.
    async fn asset_info(&self, symbol: &str) -> Result<AssetInfo, ProviderError>;
}
