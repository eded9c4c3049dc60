use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use crate::external::provider::{
    AssetInfo, DataProvider, ProviderError, ProviderKwargs, ProviderRow,
};

const FRED_BASE_URL: &str = "https://api.stlouisfed.org/fred";

const MAX_TRANSPORT_RETRIES: u32 = 3;

/// FRED (Federal Reserve Economic Data) adapter, used for bond yields and
/// economic indicators. Symbols are FRED series ids (`DGS10`, `GDPC1`); a
/// `series_id` collector kwarg overrides the symbol when the two differ.
pub struct FredProvider {
    client: reqwest::Client,
    api_key: String,
}

impl FredProvider {
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("FRED_API_KEY").map_err(|_| {
            ProviderError::Config(
                "FRED API key not configured. Set the FRED_API_KEY environment variable."
                    .to_string(),
            )
        })?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
        })
    }

    fn series_id<'a>(symbol: &'a str, kwargs: &'a ProviderKwargs) -> &'a str {
        kwargs
            .get("series_id")
            .and_then(Value::as_str)
            .unwrap_or(symbol)
    }

    /// Transport-level retry with exponential wait. Validation and config
    /// errors are surfaced immediately; only API and rate-limit errors are
    /// worth another attempt here.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        series_id: &str,
        extra: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let mut attempt = 0u32;
        loop {
            match self.get_json_once(path, series_id, extra).await {
                Ok(response) => return Ok(response),
                Err(e @ (ProviderError::Api(_) | ProviderError::RateLimit(_)))
                    if attempt + 1 < MAX_TRANSPORT_RETRIES =>
                {
                    attempt += 1;
                    let delay = Duration::from_secs((2u64 << (attempt - 1)).min(10));
                    warn!(
                        "Transient FRED error for {} (attempt {}/{}), retrying in {:?}: {}",
                        series_id, attempt, MAX_TRANSPORT_RETRIES, delay, e
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_json_once<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        series_id: &str,
        extra: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let mut query: Vec<(&str, String)> = vec![
            ("series_id", series_id.to_string()),
            ("api_key", self.api_key.clone()),
            ("file_type", "json".to_string()),
        ];
        query.extend(extra.iter().cloned());

        let resp = self
            .client
            .get(format!("{}/{}", FRED_BASE_URL, path))
            .query(&query)
            .send()
            .await
            .map_err(|e| ProviderError::Api(format!("network error: {}", e)))?;

        match resp.status() {
            reqwest::StatusCode::TOO_MANY_REQUESTS => {
                return Err(ProviderError::RateLimit(format!(
                    "HTTP 429 too many requests for series {}",
                    series_id
                )))
            }
            reqwest::StatusCode::BAD_REQUEST => {
                return Err(ProviderError::Validation(format!(
                    "HTTP 400 bad request: series id {} is invalid or unknown",
                    series_id
                )))
            }
            status if !status.is_success() => {
                return Err(ProviderError::Api(format!(
                    "HTTP {} from FRED for series {}",
                    status, series_id
                )))
            }
            _ => {}
        }

        resp.json::<T>()
            .await
            .map_err(|e| ProviderError::Api(format!("bad response: {}", e)))
    }
}

#[derive(Debug, Deserialize)]
struct ObservationsResponse {
    #[serde(default)]
    observations: Vec<Observation>,
}

#[derive(Debug, Deserialize)]
struct Observation {
    date: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct SeriesResponse {
    #[serde(rename = "seriess", default)]
    series: Vec<SeriesInfo>,
}

#[derive(Debug, Deserialize)]
struct SeriesInfo {
    id: String,
    title: Option<String>,
    units: Option<String>,
    frequency: Option<String>,
}

#[async_trait]
impl DataProvider for FredProvider {
    fn name(&self) -> &'static str {
        "FredProvider"
    }

    fn rate_limit(&self) -> (u32, Duration) {
        // FRED allows 120 requests/minute; stay comfortably below
        (60, Duration::from_secs(60))
    }

    async fn fetch_range(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        kwargs: &ProviderKwargs,
    ) -> Result<Vec<ProviderRow>, ProviderError> {
        let series_id = Self::series_id(symbol, kwargs);

        let response: ObservationsResponse = self
            .get_json(
                "series/observations",
                series_id,
                &[
                    ("observation_start", start.format("%Y-%m-%d").to_string()),
                    ("observation_end", end.format("%Y-%m-%d").to_string()),
                ],
            )
            .await?;

        let mut rows = Vec::with_capacity(response.observations.len());
        for obs in response.observations {
            // FRED marks missing observations with "."
            let Ok(value) = obs.value.parse::<f64>() else {
                continue;
            };
            let Ok(date) = NaiveDate::parse_from_str(&obs.date, "%Y-%m-%d") else {
                continue;
            };
            let time = date
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc())
                .ok_or_else(|| {
                    ProviderError::Api(format!("bad observation date {}", obs.date))
                })?;

            rows.push(ProviderRow::new(time).with_field("value", Value::from(value)));
        }

        Ok(rows)
    }

    async fn asset_info(&self, symbol: &str) -> Result<AssetInfo, ProviderError> {
        let kwargs = ProviderKwargs::new();
        let series_id = Self::series_id(symbol, &kwargs);

        let response: SeriesResponse = self.get_json("series", series_id, &[]).await?;
        let info = response.series.into_iter().next().ok_or_else(|| {
            ProviderError::Validation(format!("FRED carries no series named {}", series_id))
        })?;

        let mut extra = ProviderKwargs::new();
        if let Some(units) = info.units {
            extra.insert("units".to_string(), Value::from(units));
        }
        if let Some(frequency) = info.frequency {
            extra.insert("frequency".to_string(), Value::from(frequency));
        }

        Ok(AssetInfo {
            name: info.title.or_else(|| Some(symbol.to_string())),
            source: Some("FRED".to_string()),
            series_id: Some(info.id),
            extra,
            ..AssetInfo::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_series_id_prefers_kwarg() {
        let mut kwargs = ProviderKwargs::new();
        kwargs.insert("series_id".to_string(), json!("DGS10"));
        assert_eq!(FredProvider::series_id("US10Y", &kwargs), "DGS10");
    }

    #[test]
    fn test_series_id_falls_back_to_symbol() {
        let kwargs = ProviderKwargs::new();
        assert_eq!(FredProvider::series_id("GDPC1", &kwargs), "GDPC1");
    }

    #[test]
    fn test_observations_parse_and_skip_missing() {
        let payload: ObservationsResponse = serde_json::from_value(json!({
            "observations": [
                {"date": "2024-01-01", "value": "4.02"},
                {"date": "2024-01-02", "value": "."},
                {"date": "2024-01-03", "value": "4.05"}
            ]
        }))
        .unwrap();

        let parsed: Vec<f64> = payload
            .observations
            .iter()
            .filter_map(|o| o.value.parse().ok())
            .collect();
        assert_eq!(parsed, vec![4.02, 4.05]);
    }
}
