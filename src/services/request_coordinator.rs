use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::external::provider::{DataProvider, ProviderError, ProviderKwargs, ProviderRow};
use crate::services::rate_limiter::SharedRateLimiter;

/// One outbound fetch as submitted by a pipeline run.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub symbol: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub kwargs: ProviderKwargs,
    pub timeout: Option<Duration>,
}

struct Pending {
    provider: Arc<dyn DataProvider>,
    symbol: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    kwargs: ProviderKwargs,
    reply: oneshot::Sender<Result<Vec<ProviderRow>, ProviderError>>,
}

enum Msg {
    Fetch(Box<Pending>),
    Shutdown,
}

/// Collapses bursts of similar outbound fetches.
///
/// Submissions buffer for a short window, then get grouped by
/// `(provider, start, end, canonical kwargs)`. A group against a
/// batch-capable provider becomes one batch call; otherwise its members run
/// sequentially. One drain task owns the queue; callers interact only
/// through futures. All outbound calls pass through the shared rate
/// limiter, one token per provider call (a batch counts once).
pub struct RequestCoordinator {
    enabled: bool,
    limiter: Arc<SharedRateLimiter>,
    tx: mpsc::UnboundedSender<Msg>,
}

impl RequestCoordinator {
    pub fn new(
        limiter: Arc<SharedRateLimiter>,
        enabled: bool,
        window_seconds: f64,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let window = Duration::from_secs_f64(window_seconds.max(0.0));

        if enabled {
            info!("Request coordinator enabled (window: {:?})", window);
            tokio::spawn(drain_loop(rx, limiter.clone(), window));
        } else {
            info!("Request coordinator disabled");
        }

        Arc::new(Self {
            enabled,
            limiter,
            tx,
        })
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Submit a fetch and wait for its result.
    ///
    /// When the coordinator is disabled this executes the request
    /// synchronously, preserving the API for callers. A per-request timeout
    /// fails only this caller's future; an in-flight batch keeps running and
    /// other members still receive their results.
    pub async fn fetch(
        &self,
        provider: Arc<dyn DataProvider>,
        request: FetchRequest,
    ) -> Result<Vec<ProviderRow>, ProviderError> {
        if !self.enabled {
            let (calls, period) = provider.rate_limit();
            self.limiter.acquire(provider.name(), calls, period).await;
            return provider
                .fetch_range(&request.symbol, request.start, request.end, &request.kwargs)
                .await;
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let pending = Pending {
            provider,
            symbol: request.symbol,
            start: request.start,
            end: request.end,
            kwargs: request.kwargs,
            reply: reply_tx,
        };

        self.tx.send(Msg::Fetch(Box::new(pending))).map_err(|_| {
            ProviderError::Api("request coordinator is shut down".to_string())
        })?;

        let outcome = match request.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, reply_rx).await {
                Ok(received) => received,
                Err(_) => {
                    return Err(ProviderError::Api(format!(
                        "request timed out after {:?} waiting for coordinated fetch",
                        timeout
                    )))
                }
            },
            None => reply_rx.await,
        };

        outcome.unwrap_or_else(|_| {
            Err(ProviderError::Api(
                "request coordinator dropped the request".to_string(),
            ))
        })
    }

    /// Stop accepting work. Requests already buffered are still processed.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Msg::Shutdown);
    }
}

async fn drain_loop(
    mut rx: mpsc::UnboundedReceiver<Msg>,
    limiter: Arc<SharedRateLimiter>,
    window: Duration,
) {
    loop {
        let first = match rx.recv().await {
            Some(Msg::Fetch(pending)) => pending,
            Some(Msg::Shutdown) | None => {
                info!("Request coordinator shut down");
                return;
            }
        };

        // Window wait: accumulate whatever arrives before the deadline
        let mut buffer = vec![first];
        let deadline = tokio::time::Instant::now() + window;
        let mut shutting_down = false;

        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(Msg::Fetch(pending))) => buffer.push(pending),
                Ok(Some(Msg::Shutdown)) | Ok(None) => {
                    shutting_down = true;
                    break;
                }
                Err(_) => break,
            }
        }

        process_buffer(buffer, &limiter).await;

        if shutting_down {
            info!("Request coordinator shut down");
            return;
        }
    }
}

async fn process_buffer(buffer: Vec<Box<Pending>>, limiter: &SharedRateLimiter) {
    let mut groups: HashMap<(String, i64, i64, String), Vec<Box<Pending>>> = HashMap::new();

    for pending in buffer {
        let key = (
            pending.provider.name().to_string(),
            pending.start.timestamp_micros(),
            pending.end.timestamp_micros(),
            canonical_kwargs(&pending.kwargs),
        );
        groups.entry(key).or_default().push(pending);
    }

    for (_, group) in groups {
        process_group(group, limiter).await;
    }
}

async fn process_group(group: Vec<Box<Pending>>, limiter: &SharedRateLimiter) {
    let provider = group[0].provider.clone();
    let (calls, period) = provider.rate_limit();

    if provider.supports_batch() && group.len() > 1 {
        let mut symbols: Vec<String> = group.iter().map(|p| p.symbol.clone()).collect();
        symbols.sort();
        symbols.dedup();
        info!(
            "Executing batch request for {}: {} symbol(s)",
            provider.name(),
            symbols.len()
        );

        limiter.acquire(provider.name(), calls, period).await;

        let start = group[0].start;
        let end = group[0].end;
        let kwargs = group[0].kwargs.clone();

        match provider
            .fetch_range_batch(&symbols, start, end, &kwargs)
            .await
        {
            Ok(by_symbol) => {
                for pending in group {
                    // A symbol the batch did not cover produced no rows;
                    // that is an empty result, not an error
                    let rows = by_symbol.get(&pending.symbol).cloned().unwrap_or_default();
                    let _ = pending.reply.send(Ok(rows));
                }
            }
            Err(e) => {
                error!("Batch request for {} failed: {}", provider.name(), e);
                for pending in group {
                    let _ = pending.reply.send(Err(e.clone()));
                }
            }
        }
    } else {
        for pending in group {
            limiter
                .acquire(pending.provider.name(), calls, period)
                .await;
            let result = pending
                .provider
                .fetch_range(&pending.symbol, pending.start, pending.end, &pending.kwargs)
                .await;
            if let Err(e) = &result {
                warn!("Request for {} failed: {}", pending.symbol, e);
            }
            let _ = pending.reply.send(result);
        }
    }
}

/// Stable textual form of the kwargs map, used in the grouping key.
/// `serde_json::Map` iterates in sorted key order, so equal maps always
/// serialize identically.
pub(crate) fn canonical_kwargs(kwargs: &ProviderKwargs) -> String {
    serde_json::to_string(kwargs).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    struct ScriptedProvider {
        batch: bool,
        fail_batch: bool,
        delay: Option<Duration>,
        single_calls: Mutex<Vec<String>>,
        batch_calls: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedProvider {
        fn new(batch: bool) -> Self {
            Self {
                batch,
                fail_batch: false,
                delay: None,
                single_calls: Mutex::new(Vec::new()),
                batch_calls: Mutex::new(Vec::new()),
            }
        }

        fn rows_for(symbol: &str) -> Vec<ProviderRow> {
            if symbol == "EMPTY" {
                return Vec::new();
            }
            vec![ProviderRow::new(Utc::now()).with_field("close", json!(1.0))]
        }
    }

    #[async_trait]
    impl DataProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "ScriptedProvider"
        }

        fn supports_batch(&self) -> bool {
            self.batch
        }

        fn rate_limit(&self) -> (u32, Duration) {
            (1000, Duration::from_secs(1))
        }

        async fn fetch_range(
            &self,
            symbol: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _kwargs: &ProviderKwargs,
        ) -> Result<Vec<ProviderRow>, ProviderError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.single_calls.lock().push(symbol.to_string());
            Ok(Self::rows_for(symbol))
        }

        async fn fetch_range_batch(
            &self,
            symbols: &[String],
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _kwargs: &ProviderKwargs,
        ) -> Result<HashMap<String, Vec<ProviderRow>>, ProviderError> {
            self.batch_calls.lock().push(symbols.to_vec());
            if self.fail_batch {
                return Err(ProviderError::Api("batch exploded".to_string()));
            }
            Ok(symbols
                .iter()
                .map(|s| (s.clone(), Self::rows_for(s)))
                .collect())
        }

        async fn asset_info(
            &self,
            _symbol: &str,
        ) -> Result<crate::external::provider::AssetInfo, ProviderError> {
            Ok(Default::default())
        }
    }

    fn request(symbol: &str) -> FetchRequest {
        FetchRequest {
            symbol: symbol.to_string(),
            start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap(),
            kwargs: ProviderKwargs::new(),
            timeout: None,
        }
    }

    use chrono::TimeZone;

    #[tokio::test]
    async fn test_same_window_requests_batch_into_one_call() {
        let limiter = Arc::new(SharedRateLimiter::new());
        let coordinator = RequestCoordinator::new(limiter, true, 0.1);
        let provider = Arc::new(ScriptedProvider::new(true));

        let (a, b) = tokio::join!(
            coordinator.fetch(provider.clone(), request("AAPL")),
            coordinator.fetch(provider.clone(), request("MSFT")),
        );

        assert_eq!(a.unwrap().len(), 1);
        assert_eq!(b.unwrap().len(), 1);
        let batches = provider.batch_calls.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert!(provider.single_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_non_batch_provider_runs_sequentially() {
        let limiter = Arc::new(SharedRateLimiter::new());
        let coordinator = RequestCoordinator::new(limiter, true, 0.1);
        let provider = Arc::new(ScriptedProvider::new(false));

        let (a, b) = tokio::join!(
            coordinator.fetch(provider.clone(), request("AAPL")),
            coordinator.fetch(provider.clone(), request("MSFT")),
        );

        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(provider.single_calls.lock().len(), 2);
        assert!(provider.batch_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_empty_symbol_gets_empty_result_not_error() {
        let limiter = Arc::new(SharedRateLimiter::new());
        let coordinator = RequestCoordinator::new(limiter, true, 0.1);
        let provider = Arc::new(ScriptedProvider::new(true));

        let (a, b) = tokio::join!(
            coordinator.fetch(provider.clone(), request("AAPL")),
            coordinator.fetch(provider.clone(), request("EMPTY")),
        );

        assert_eq!(a.unwrap().len(), 1);
        assert_eq!(b.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_batch_error_broadcasts_to_all_futures() {
        let limiter = Arc::new(SharedRateLimiter::new());
        let coordinator = RequestCoordinator::new(limiter, true, 0.1);
        let mut provider = ScriptedProvider::new(true);
        provider.fail_batch = true;
        let provider = Arc::new(provider);

        let (a, b) = tokio::join!(
            coordinator.fetch(provider.clone(), request("AAPL")),
            coordinator.fetch(provider.clone(), request("MSFT")),
        );

        assert!(matches!(a, Err(ProviderError::Api(_))));
        assert!(matches!(b, Err(ProviderError::Api(_))));
    }

    #[tokio::test]
    async fn test_different_kwargs_split_groups() {
        let limiter = Arc::new(SharedRateLimiter::new());
        let coordinator = RequestCoordinator::new(limiter, true, 0.1);
        let provider = Arc::new(ScriptedProvider::new(true));

        let mut special = request("MSFT");
        special.kwargs.insert("interval".to_string(), json!("1h"));

        let (a, b) = tokio::join!(
            coordinator.fetch(provider.clone(), request("AAPL")),
            coordinator.fetch(provider.clone(), special),
        );

        assert!(a.is_ok());
        assert!(b.is_ok());
        // Two groups of one request each: no batch call is worth making
        assert!(provider.batch_calls.lock().is_empty());
        assert_eq!(provider.single_calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_mode_executes_synchronously() {
        let limiter = Arc::new(SharedRateLimiter::new());
        let coordinator = RequestCoordinator::new(limiter, false, 1.0);
        let provider = Arc::new(ScriptedProvider::new(true));

        let result = coordinator.fetch(provider.clone(), request("AAPL")).await;
        assert_eq!(result.unwrap().len(), 1);
        assert_eq!(provider.single_calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_fails_only_the_waiting_future() {
        let limiter = Arc::new(SharedRateLimiter::new());
        let coordinator = RequestCoordinator::new(limiter, true, 0.05);
        let mut provider = ScriptedProvider::new(false);
        provider.delay = Some(Duration::from_millis(300));
        let provider = Arc::new(provider);

        let mut impatient = request("AAPL");
        impatient.timeout = Some(Duration::from_millis(100));

        let result = coordinator.fetch(provider.clone(), impatient).await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("timed out"));

        // The in-flight request was not cancelled
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(provider.single_calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_canonical_kwargs_is_order_independent() {
        let mut a = ProviderKwargs::new();
        a.insert("b".to_string(), json!(2));
        a.insert("a".to_string(), json!(1));

        let mut b = ProviderKwargs::new();
        b.insert("a".to_string(), json!(1));
        b.insert("b".to_string(), json!(2));

        assert_eq!(canonical_kwargs(&a), canonical_kwargs(&b));
    }

    #[tokio::test]
    async fn test_fetch_after_shutdown_is_rejected() {
        let limiter = Arc::new(SharedRateLimiter::new());
        let coordinator = RequestCoordinator::new(limiter, true, 0.05);
        let provider = Arc::new(ScriptedProvider::new(true));

        coordinator.shutdown();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let result = coordinator.fetch(provider, request("AAPL")).await;
        assert!(result.is_err());
    }
}
