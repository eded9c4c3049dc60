use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use crate::external::provider::{
    AssetInfo, DataProvider, ProviderError, ProviderKwargs, ProviderRow,
};
use crate::external::yahoo::YahooProvider;

/// Forex adapter on top of the Yahoo chart API.
///
/// Symbols are currency pairs in `BASE_QUOTE` form (`USD_EUR`). Yahoo quotes
/// pairs as `BASEQUOTE=X` and usually carries only one direction, so the
/// reversed pair is tried as a fallback and its close is inverted.
pub struct YahooForexProvider {
    inner: YahooProvider,
}

impl YahooForexProvider {
    pub fn new() -> Self {
        Self {
            inner: YahooProvider::new(),
        }
    }

    fn parse_pair(symbol: &str) -> Result<(String, String), ProviderError> {
        let Some((base, quote)) = symbol.split_once('_') else {
            return Err(ProviderError::Validation(format!(
                "Invalid symbol format: {}. Expected 'BASE_QUOTE' (e.g. 'USD_EUR')",
                symbol
            )));
        };
        if base.is_empty() || quote.is_empty() {
            return Err(ProviderError::Validation(format!(
                "Invalid symbol format: {}. Expected 'BASE_QUOTE' (e.g. 'USD_EUR')",
                symbol
            )));
        }
        Ok((base.to_uppercase(), quote.to_uppercase()))
    }
}

impl Default for YahooForexProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataProvider for YahooForexProvider {
    fn name(&self) -> &'static str {
        "YahooForexProvider"
    }

    async fn fetch_range(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        kwargs: &ProviderKwargs,
    ) -> Result<Vec<ProviderRow>, ProviderError> {
        let (base, quote) = Self::parse_pair(symbol)?;

        let candidates = [
            (format!("{}{}=X", base, quote), false),
            (format!("{}{}=X", quote, base), true),
        ];

        let mut bars = Vec::new();
        let mut inverted = false;
        for (yahoo_symbol, reversed) in &candidates {
            debug!("Trying Yahoo forex symbol: {}", yahoo_symbol);
            match self.inner.fetch_range(yahoo_symbol, start, end, kwargs).await {
                Ok(rows) if !rows.is_empty() => {
                    bars = rows;
                    inverted = *reversed;
                    info!(
                        "Collected {} bar(s) for {}/{} via {}",
                        bars.len(),
                        base,
                        quote,
                        yahoo_symbol
                    );
                    break;
                }
                Ok(_) => continue,
                Err(e @ ProviderError::RateLimit(_)) => return Err(e),
                Err(e) => {
                    debug!("Yahoo symbol {} failed: {}", yahoo_symbol, e);
                    continue;
                }
            }
        }

        let mut out = Vec::with_capacity(bars.len());
        for bar in bars {
            let Some(close) = bar.fields.get("close").and_then(Value::as_f64) else {
                continue;
            };
            let rate = if inverted { 1.0 / close } else { close };
            if !rate.is_finite() || rate <= 0.0 {
                continue;
            }

            out.push(
                ProviderRow::new(bar.time)
                    .with_field("rate", Value::from(rate))
                    .with_field("base_currency", Value::from(base.clone()))
                    .with_field("quote_currency", Value::from(quote.clone())),
            );
        }

        Ok(out)
    }

    async fn asset_info(&self, symbol: &str) -> Result<AssetInfo, ProviderError> {
        let (base, quote) = Self::parse_pair(symbol)?;

        Ok(AssetInfo {
            name: Some(format!("{}/{} Exchange Rate", base, quote)),
            source: Some("Yahoo Finance".to_string()),
            base_currency: Some(base),
            quote_currency: Some(quote),
            ..AssetInfo::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_parsing_uppercases() {
        let (base, quote) = YahooForexProvider::parse_pair("usd_eur").unwrap();
        assert_eq!(base, "USD");
        assert_eq!(quote, "EUR");
    }

    #[test]
    fn test_pair_without_separator_is_rejected() {
        assert!(matches!(
            YahooForexProvider::parse_pair("USDEUR"),
            Err(ProviderError::Validation(_))
        ));
    }

    #[test]
    fn test_empty_pair_sides_are_rejected() {
        assert!(YahooForexProvider::parse_pair("_EUR").is_err());
        assert!(YahooForexProvider::parse_pair("USD_").is_err());
    }
}
