use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tokio::time::sleep;
use tracing::warn;

use crate::external::provider::{
    AssetInfo, DataProvider, ProviderError, ProviderKwargs, ProviderRow,
};

const MAX_TRANSPORT_RETRIES: u32 = 3;

/// Yahoo chart-API adapter for the market-data asset types (stock, crypto,
/// commodity). One instance is shared across all jobs of those types.
pub struct YahooProvider {
    client: reqwest::Client,
}

impl YahooProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn fetch_chart(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: &str,
    ) -> Result<YahooResult, ProviderError> {
        let url = format!(
            "https://query1.finance.yahoo.com/v8/finance/chart/{symbol}?period1={}&period2={}&interval={interval}&events=div%2Csplit",
            start.timestamp(),
            end.timestamp(),
        );

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProviderError::Api(format!("network error: {}", e)))?;

        match resp.status() {
            reqwest::StatusCode::TOO_MANY_REQUESTS => {
                return Err(ProviderError::RateLimit(format!(
                    "HTTP 429 too many requests for {}",
                    symbol
                )))
            }
            reqwest::StatusCode::NOT_FOUND => {
                return Err(ProviderError::Validation(format!(
                    "HTTP 404 not found: symbol {} is unknown to the provider",
                    symbol
                )))
            }
            status if !status.is_success() => {
                return Err(ProviderError::Api(format!(
                    "HTTP {} from chart endpoint for {}",
                    status, symbol
                )))
            }
            _ => {}
        }

        let body = resp
            .json::<YahooChartResponse>()
            .await
            .map_err(|e| ProviderError::Api(format!("bad response: {}", e)))?;

        body.chart
            .result
            .and_then(|mut r| {
                if r.is_empty() {
                    None
                } else {
                    Some(r.remove(0))
                }
            })
            .ok_or_else(|| {
                ProviderError::Validation(format!(
                    "chart response carried no result for symbol {}",
                    symbol
                ))
            })
    }

    /// Transport-level retry with exponential wait. Validation and config
    /// errors are surfaced immediately; only API and rate-limit errors are
    /// worth another attempt here.
    async fn fetch_chart_with_retry(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: &str,
    ) -> Result<YahooResult, ProviderError> {
        let mut attempt = 0u32;
        loop {
            match self.fetch_chart(symbol, start, end, interval).await {
                Ok(result) => return Ok(result),
                Err(e @ (ProviderError::Api(_) | ProviderError::RateLimit(_)))
                    if attempt + 1 < MAX_TRANSPORT_RETRIES =>
                {
                    attempt += 1;
                    let delay = std::time::Duration::from_secs((2u64 << (attempt - 1)).min(10));
                    warn!(
                        "Transient provider error for {} (attempt {}/{}), retrying in {:?}: {}",
                        symbol, attempt, MAX_TRANSPORT_RETRIES, delay, e
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for YahooProvider {
    fn default() -> Self {
        Self::new()
    }
}

// Minimal response structs (only what we need)
#[derive(Debug, Deserialize)]
struct YahooChartResponse {
    chart: YahooChart,
}

#[derive(Debug, Deserialize)]
struct YahooChart {
    result: Option<Vec<YahooResult>>,
}

#[derive(Debug, Deserialize)]
struct YahooResult {
    meta: Option<YahooMeta>,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Option<YahooIndicators>,
}

#[derive(Debug, Deserialize)]
struct YahooMeta {
    currency: Option<String>,
    #[serde(rename = "exchangeName")]
    exchange_name: Option<String>,
    #[serde(rename = "instrumentType")]
    instrument_type: Option<String>,
    #[serde(rename = "shortName")]
    short_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YahooIndicators {
    quote: Vec<YahooQuote>,
}

#[derive(Debug, Deserialize, Default)]
struct YahooQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

#[async_trait]
impl DataProvider for YahooProvider {
    fn name(&self) -> &'static str {
        "YahooProvider"
    }

    fn supports_batch(&self) -> bool {
        true
    }

    async fn fetch_range(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        kwargs: &ProviderKwargs,
    ) -> Result<Vec<ProviderRow>, ProviderError> {
        let interval = kwargs
            .get("interval")
            .and_then(Value::as_str)
            .unwrap_or("1d");

        let result = self
            .fetch_chart_with_retry(symbol, start, end, interval)
            .await?;

        if result.timestamp.is_empty() {
            return Ok(Vec::new());
        }

        let quote = result
            .indicators
            .and_then(|i| i.quote.into_iter().next())
            .ok_or_else(|| {
                ProviderError::Api(format!("missing quote block for symbol {}", symbol))
            })?;

        let mut rows = Vec::with_capacity(result.timestamp.len());
        for (i, ts) in result.timestamp.iter().enumerate() {
            // Bars without a close are placeholders the exchange has not
            // filled yet; skip them rather than inventing values.
            let Some(close) = quote.close.get(i).copied().flatten() else {
                continue;
            };
            let time = DateTime::<Utc>::from_timestamp(*ts, 0).ok_or_else(|| {
                ProviderError::Api(format!("bad timestamp {} for symbol {}", ts, symbol))
            })?;

            let mut row = ProviderRow::new(time).with_field("close", Value::from(close));
            if let Some(open) = quote.open.get(i).copied().flatten() {
                row = row.with_field("open", Value::from(open));
            }
            if let Some(high) = quote.high.get(i).copied().flatten() {
                row = row.with_field("high", Value::from(high));
            }
            if let Some(low) = quote.low.get(i).copied().flatten() {
                row = row.with_field("low", Value::from(low));
            }
            if let Some(volume) = quote.volume.get(i).copied().flatten() {
                row = row.with_field("volume", Value::from(volume));
            }
            rows.push(row);
        }

        rows.sort_by_key(|r| r.time);
        Ok(rows)
    }

    async fn asset_info(&self, symbol: &str) -> Result<AssetInfo, ProviderError> {
        let end = Utc::now();
        let start = end - chrono::Duration::days(7);
        let result = self.fetch_chart_with_retry(symbol, start, end, "1d").await?;

        let meta = result.meta.unwrap_or_else(|| YahooMeta {
            currency: None,
            exchange_name: None,
            instrument_type: None,
            short_name: None,
        });

        Ok(AssetInfo {
            name: meta.short_name.or_else(|| Some(symbol.to_string())),
            source: Some("Yahoo Finance".to_string()),
            exchange: meta.exchange_name,
            currency: meta.currency,
            security_type: meta.instrument_type,
            ..AssetInfo::default()
        })
    }
}
