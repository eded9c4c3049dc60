use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// The supported asset classes. The asset type determines which time-series
/// table holds the asset's rows (see `db::series`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Stock,
    Crypto,
    Commodity,
    Forex,
    Bond,
    EconomicIndicator,
}

impl AssetType {
    pub const ALL: [AssetType; 6] = [
        AssetType::Stock,
        AssetType::Crypto,
        AssetType::Commodity,
        AssetType::Forex,
        AssetType::Bond,
        AssetType::EconomicIndicator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Stock => "stock",
            AssetType::Crypto => "crypto",
            AssetType::Commodity => "commodity",
            AssetType::Forex => "forex",
            AssetType::Bond => "bond",
            AssetType::EconomicIndicator => "economic_indicator",
        }
    }
}

impl FromStr for AssetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stock" => Ok(AssetType::Stock),
            "crypto" => Ok(AssetType::Crypto),
            "commodity" => Ok(AssetType::Commodity),
            "forex" => Ok(AssetType::Forex),
            "bond" => Ok(AssetType::Bond),
            "economic_indicator" => Ok(AssetType::EconomicIndicator),
            other => Err(format!("Unknown asset type: {}", other)),
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered external time-series identity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Asset {
    pub asset_id: i32,
    pub symbol: String,
    pub asset_type: String,
    pub name: String,
    pub source: String,
    pub exchange: Option<String>,
    pub currency: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub base_currency: Option<String>,
    pub quote_currency: Option<String>,
    pub series_id: Option<String>,
    pub security_type: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_type_round_trip() {
        for at in AssetType::ALL {
            assert_eq!(at.as_str().parse::<AssetType>().unwrap(), at);
        }
    }

    #[test]
    fn test_unknown_asset_type_rejected() {
        assert!("mutual_fund".parse::<AssetType>().is_err());
    }
}
