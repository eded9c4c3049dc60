use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};

/// One OHLCV bar, shaped for the `market_data` table.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketDataRow {
    pub asset_id: i32,
    pub time: DateTime<Utc>,
    pub open: BigDecimal,
    pub high: BigDecimal,
    pub low: BigDecimal,
    pub close: BigDecimal,
    pub volume: Option<i64>,
    pub dividends: Option<BigDecimal>,
    pub stock_splits: Option<BigDecimal>,
}

/// One rate observation, shaped for `forex_rates` / `bond_rates`.
#[derive(Debug, Clone, PartialEq)]
pub struct RatePoint {
    pub asset_id: i32,
    pub time: DateTime<Utc>,
    pub rate: BigDecimal,
    pub base_currency: Option<String>,
    pub quote_currency: Option<String>,
}

/// One indicator observation, shaped for `economic_data`.
#[derive(Debug, Clone, PartialEq)]
pub struct ValuePoint {
    pub asset_id: i32,
    pub time: DateTime<Utc>,
    pub value: BigDecimal,
}

/// Mapper output: rows normalized for exactly one time-series table.
#[derive(Debug, Clone)]
pub enum MappedRows {
    Market(Vec<MarketDataRow>),
    Forex(Vec<RatePoint>),
    Bond(Vec<RatePoint>),
    Economic(Vec<ValuePoint>),
}

impl MappedRows {
    pub fn len(&self) -> usize {
        match self {
            MappedRows::Market(rows) => rows.len(),
            MappedRows::Forex(rows) | MappedRows::Bond(rows) => rows.len(),
            MappedRows::Economic(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
