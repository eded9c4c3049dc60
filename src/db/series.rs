use crate::models::AssetType;

/// Conflict target shared by every time-series table.
pub const CONFLICT_TARGET: &str = "asset_id, time";

/// Static description of one time-series table. All table and column names
/// that ever reach SQL come from these constants; caller-supplied values are
/// only ever bound as parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesTable {
    pub table: &'static str,
    pub insert_columns: &'static [&'static str],
    /// Non-key columns, used by the `DO UPDATE` conflict path.
    pub update_columns: &'static [&'static str],
}

impl SeriesTable {
    pub fn insert_column_list(&self) -> String {
        self.insert_columns.join(", ")
    }

    pub fn update_set_clause(&self) -> String {
        self.update_columns
            .iter()
            .map(|col| format!("{} = EXCLUDED.{}", col, col))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub const MARKET_DATA: SeriesTable = SeriesTable {
    table: "market_data",
    insert_columns: &[
        "asset_id",
        "time",
        "open",
        "high",
        "low",
        "close",
        "volume",
        "dividends",
        "stock_splits",
    ],
    update_columns: &[
        "open",
        "high",
        "low",
        "close",
        "volume",
        "dividends",
        "stock_splits",
    ],
};

pub const FOREX_RATES: SeriesTable = SeriesTable {
    table: "forex_rates",
    insert_columns: &["asset_id", "time", "rate", "base_currency", "quote_currency"],
    update_columns: &["rate", "base_currency", "quote_currency"],
};

pub const BOND_RATES: SeriesTable = SeriesTable {
    table: "bond_rates",
    insert_columns: &["asset_id", "time", "rate"],
    update_columns: &["rate"],
};

pub const ECONOMIC_DATA: SeriesTable = SeriesTable {
    table: "economic_data",
    insert_columns: &["asset_id", "time", "value"],
    update_columns: &["value"],
};

/// The single source of truth for asset-type → table resolution, shared by
/// the store, the incremental-range calculator, and the loader.
pub fn table_for(asset_type: AssetType) -> &'static SeriesTable {
    match asset_type {
        AssetType::Stock | AssetType::Crypto | AssetType::Commodity => &MARKET_DATA,
        AssetType::Forex => &FOREX_RATES,
        AssetType::Bond => &BOND_RATES,
        AssetType::EconomicIndicator => &ECONOMIC_DATA,
    }
}
