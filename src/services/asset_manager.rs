use serde_json::Value;
use sqlx::PgPool;
use tracing::{debug, info};

use crate::db::asset_queries;
use crate::errors::AppError;
use crate::external::provider::AssetInfo;
use crate::models::AssetType;

const KNOWN_COLUMNS: [&str; 8] = [
    "exchange",
    "currency",
    "sector",
    "industry",
    "base_currency",
    "quote_currency",
    "series_id",
    "security_type",
];

/// Get the asset id for `symbol`, creating the asset on first ingest.
///
/// Provider-reported info fills the descriptive columns; caller-supplied
/// metadata wins over it key-by-key. Keys that do not map to a known column
/// land in the JSONB metadata map. On an existing asset the same values are
/// merged rather than replacing what is stored.
pub async fn get_or_create_asset(
    pool: &PgPool,
    symbol: &str,
    asset_type: AssetType,
    info: &AssetInfo,
    caller_metadata: Option<&Value>,
) -> Result<i32, AppError> {
    let caller_map = caller_metadata.and_then(Value::as_object);

    let column =
        |key: &str, fallback: &Option<String>| -> Option<String> {
            caller_map
                .and_then(|m| m.get(key))
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| fallback.clone())
        };

    let name = column("name", &info.name).unwrap_or_else(|| symbol.to_string());
    let source = column("source", &info.source).unwrap_or_else(|| "Unknown".to_string());
    let exchange = column("exchange", &info.exchange);
    let currency = column("currency", &info.currency);
    let sector = column("sector", &info.sector);
    let industry = column("industry", &info.industry);
    let base_currency = column("base_currency", &info.base_currency);
    let quote_currency = column("quote_currency", &info.quote_currency);
    let series_id = column("series_id", &info.series_id);
    let security_type = column("security_type", &info.security_type);

    // Everything that is not a column goes into the metadata map,
    // provider extras first so caller keys overwrite them.
    let mut metadata_map = info.extra.clone();
    if let Some(caller_map) = caller_map {
        for (key, value) in caller_map {
            if key == "name" || key == "source" || KNOWN_COLUMNS.contains(&key.as_str()) {
                continue;
            }
            metadata_map.insert(key.clone(), value.clone());
        }
    }
    let metadata = if metadata_map.is_empty() {
        None
    } else {
        Some(Value::Object(metadata_map))
    };

    if let Some(existing) = asset_queries::fetch_by_symbol(pool, symbol).await? {
        debug!(
            "Asset {} already exists with asset_id={}",
            symbol, existing.asset_id
        );
        asset_queries::update_metadata(
            pool,
            existing.asset_id,
            exchange.as_deref(),
            currency.as_deref(),
            sector.as_deref(),
            industry.as_deref(),
            base_currency.as_deref(),
            quote_currency.as_deref(),
            series_id.as_deref(),
            security_type.as_deref(),
            metadata.as_ref(),
        )
        .await?;
        return Ok(existing.asset_id);
    }

    let insert_result = asset_queries::insert(
        pool,
        symbol,
        asset_type.as_str(),
        &name,
        &source,
        exchange.as_deref(),
        currency.as_deref(),
        sector.as_deref(),
        industry.as_deref(),
        base_currency.as_deref(),
        quote_currency.as_deref(),
        series_id.as_deref(),
        security_type.as_deref(),
        metadata.as_ref(),
    )
    .await;

    match insert_result {
        Ok(asset_id) => {
            info!(
                "Created new asset: {} (asset_id={}, type={})",
                symbol, asset_id, asset_type
            );
            Ok(asset_id)
        }
        Err(e) => {
            // Lost a create race to a parallel job for the same symbol
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.is_unique_violation() {
                    if let Some(existing) = asset_queries::fetch_by_symbol(pool, symbol).await? {
                        return Ok(existing.asset_id);
                    }
                }
            }
            Err(e.into())
        }
    }
}
