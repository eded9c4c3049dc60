use bigdecimal::BigDecimal;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

use crate::db::series;
use crate::errors::AppError;
use crate::external::provider::ProviderRow;
use crate::models::{AssetType, MappedRows, MarketDataRow, RatePoint, ValuePoint};

/// Normalize provider rows into the shape of the asset type's table.
///
/// Column names are lowercased and trimmed before lookup. Rows that cannot
/// satisfy the target table's NOT NULL columns are dropped here; the
/// resulting shortfall against `records_collected` is what the pipeline
/// reports as a partial-load failure.
pub fn map_rows(
    asset_type: AssetType,
    asset_id: i32,
    rows: &[ProviderRow],
) -> Result<MappedRows, AppError> {
    let table = series::table_for(asset_type).table;

    match table {
        "market_data" => map_to_market_data(asset_id, rows).map(MappedRows::Market),
        "forex_rates" => {
            map_rate_points(asset_id, rows, &["rate", "close", "value"], "forex")
                .map(MappedRows::Forex)
        }
        "bond_rates" => {
            map_rate_points(asset_id, rows, &["value", "rate", "close"], "bond")
                .map(MappedRows::Bond)
        }
        "economic_data" => map_value_points(asset_id, rows).map(MappedRows::Economic),
        other => Err(AppError::Validation(format!("Unknown table: {}", other))),
    }
}

fn map_to_market_data(
    asset_id: i32,
    rows: &[ProviderRow],
) -> Result<Vec<MarketDataRow>, AppError> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let required = ["open", "high", "low", "close"];
    let present = column_union(rows);
    let missing: Vec<&str> = required
        .iter()
        .filter(|col| !present.contains(&col.to_string()))
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(AppError::Validation(format!(
            "Missing required columns for market_data: {:?}",
            missing
        )));
    }

    let mut mapped = Vec::with_capacity(rows.len());
    let mut dropped = 0usize;

    for row in rows {
        let fields = normalized(row);

        let bar = (
            decimal_field(&fields, "open"),
            decimal_field(&fields, "high"),
            decimal_field(&fields, "low"),
            decimal_field(&fields, "close"),
        );
        let (Some(open), Some(high), Some(low), Some(close)) = bar else {
            dropped += 1;
            continue;
        };

        mapped.push(MarketDataRow {
            asset_id,
            time: row.time,
            open,
            high,
            low,
            close,
            volume: volume_field(&fields),
            dividends: optional_decimal_field(&fields, "dividends"),
            stock_splits: optional_decimal_field(&fields, "stock_splits")
                .or_else(|| optional_decimal_field(&fields, "stock splits")),
        });
    }

    if dropped > 0 {
        warn!(
            "Dropped {} market-data row(s) with incomplete OHLC values",
            dropped
        );
    }

    Ok(mapped)
}

fn map_rate_points(
    asset_id: i32,
    rows: &[ProviderRow],
    priority: &[&str],
    label: &str,
) -> Result<Vec<RatePoint>, AppError> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let rate_col = find_value_column(rows, priority).ok_or_else(|| {
        AppError::Validation(format!(
            "Could not find rate column in {} data. Expected one of: {:?}",
            label, priority
        ))
    })?;

    let mut mapped = Vec::with_capacity(rows.len());
    for row in rows {
        let fields = normalized(row);
        // Null rates cannot land in a NOT NULL column; drop the row
        let Some(rate) = decimal_field(&fields, &rate_col) else {
            continue;
        };

        mapped.push(RatePoint {
            asset_id,
            time: row.time,
            rate,
            base_currency: string_field(&fields, "base_currency"),
            quote_currency: string_field(&fields, "quote_currency"),
        });
    }

    Ok(mapped)
}

fn map_value_points(asset_id: i32, rows: &[ProviderRow]) -> Result<Vec<ValuePoint>, AppError> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let value_col = find_value_column(rows, &["value", "rate", "close"]).ok_or_else(|| {
        let columns: Vec<String> = column_union(rows).into_iter().collect();
        AppError::Validation(format!(
            "Could not find value column in economic data. Available columns: {:?}. \
             Expected one of: 'value', 'rate', 'close', or a sole numeric column.",
            columns
        ))
    })?;

    let mut mapped = Vec::with_capacity(rows.len());
    for row in rows {
        let fields = normalized(row);
        let Some(value) = decimal_field(&fields, &value_col) else {
            continue;
        };

        mapped.push(ValuePoint {
            asset_id,
            time: row.time,
            value,
        });
    }

    Ok(mapped)
}

/// Pick the value-bearing column: the priority list first, then the sole
/// numeric column (providers often name the column after the series).
fn find_value_column(rows: &[ProviderRow], priority: &[&str]) -> Option<String> {
    let present = column_union(rows);

    for candidate in priority {
        if present.contains(&candidate.to_string()) {
            return Some(candidate.to_string());
        }
    }

    let numeric: Vec<String> = present
        .iter()
        .filter(|col| {
            rows.iter().any(|row| {
                normalized(row)
                    .get(col.as_str())
                    .map(is_numeric_value)
                    .unwrap_or(false)
            })
        })
        .cloned()
        .collect();

    match numeric.len() {
        1 => Some(numeric.into_iter().next().unwrap()),
        0 if present.len() == 1 => present.into_iter().next(),
        n if n > 1 => {
            let first = numeric.into_iter().next().unwrap();
            warn!(
                "Multiple numeric columns found; using first column '{}' as value column",
                first
            );
            Some(first)
        }
        _ => None,
    }
}

fn normalized(row: &ProviderRow) -> BTreeMap<String, &Value> {
    row.fields
        .iter()
        .map(|(k, v)| (k.trim().to_lowercase(), v))
        .collect()
}

fn column_union(rows: &[ProviderRow]) -> std::collections::BTreeSet<String> {
    rows.iter()
        .flat_map(|row| row.fields.keys().map(|k| k.trim().to_lowercase()))
        .collect()
}

fn is_numeric_value(value: &&Value) -> bool {
    match value {
        Value::Number(_) => true,
        Value::String(s) => s.trim().parse::<f64>().is_ok(),
        _ => false,
    }
}

fn decimal_field(fields: &BTreeMap<String, &Value>, name: &str) -> Option<BigDecimal> {
    fields.get(name).and_then(|v| decimal_from_value(v))
}

/// Present-but-unparseable optional values coerce to zero, matching the
/// fill-with-zero treatment of dividend and split columns.
fn optional_decimal_field(fields: &BTreeMap<String, &Value>, name: &str) -> Option<BigDecimal> {
    fields
        .get(name)
        .map(|v| decimal_from_value(v).unwrap_or_else(|| BigDecimal::from(0)))
}

fn decimal_from_value(value: &Value) -> Option<BigDecimal> {
    match value {
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Volume columns arrive as integers, floats, or decimal strings; the
/// target column is BIGINT, so everything funnels through f64 → i64.
fn volume_field(fields: &BTreeMap<String, &Value>) -> Option<i64> {
    fields.get("volume").map(|v| match v {
        Value::Number(n) => n.as_f64().unwrap_or(0.0) as i64,
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0) as i64,
        _ => 0,
    })
}

fn string_field(fields: &BTreeMap<String, &Value>, name: &str) -> Option<String> {
    fields
        .get(name)
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn at(day: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn ohlcv_row(day: u32) -> ProviderRow {
        ProviderRow::new(at(day))
            .with_field("Open", json!(10.0))
            .with_field("High", json!(12.0))
            .with_field("Low", json!(9.0))
            .with_field("Close", json!(11.0))
            .with_field("Volume", json!("954.43296228"))
    }

    #[test]
    fn test_market_mapping_lowercases_and_coerces_volume() {
        let rows = vec![ohlcv_row(1)];
        let mapped = map_rows(AssetType::Stock, 7, &rows).unwrap();

        match mapped {
            MappedRows::Market(out) => {
                assert_eq!(out.len(), 1);
                assert_eq!(out[0].asset_id, 7);
                assert_eq!(out[0].close, "11".parse().unwrap());
                assert_eq!(out[0].volume, Some(954));
                assert_eq!(out[0].dividends, None);
            }
            other => panic!("expected market rows, got {:?}", other),
        }
    }

    #[test]
    fn test_market_mapping_requires_ohlc_columns() {
        let rows = vec![ProviderRow::new(at(1)).with_field("close", json!(11.0))];
        let err = map_rows(AssetType::Stock, 1, &rows).unwrap_err();
        assert!(err.to_string().contains("Missing required columns"));
    }

    #[test]
    fn test_market_mapping_drops_incomplete_bars() {
        let mut incomplete = ohlcv_row(2);
        incomplete.fields.remove("Open");
        let rows = vec![ohlcv_row(1), incomplete];

        match map_rows(AssetType::Stock, 1, &rows).unwrap() {
            MappedRows::Market(out) => assert_eq!(out.len(), 1),
            other => panic!("expected market rows, got {:?}", other),
        }
    }

    #[test]
    fn test_stock_splits_accepts_space_variant() {
        let rows = vec![ohlcv_row(1).with_field("Stock Splits", json!(2.0))];
        match map_rows(AssetType::Stock, 1, &rows).unwrap() {
            MappedRows::Market(out) => {
                assert_eq!(out[0].stock_splits, Some("2".parse().unwrap()))
            }
            other => panic!("expected market rows, got {:?}", other),
        }
    }

    #[test]
    fn test_forex_prefers_rate_column() {
        let rows = vec![ProviderRow::new(at(1))
            .with_field("rate", json!(1.08))
            .with_field("close", json!(9.99))
            .with_field("base_currency", json!("EUR"))
            .with_field("quote_currency", json!("USD"))];

        match map_rows(AssetType::Forex, 3, &rows).unwrap() {
            MappedRows::Forex(out) => {
                assert_eq!(out[0].rate, "1.08".parse().unwrap());
                assert_eq!(out[0].base_currency.as_deref(), Some("EUR"));
                assert_eq!(out[0].quote_currency.as_deref(), Some("USD"));
            }
            other => panic!("expected forex rows, got {:?}", other),
        }
    }

    #[test]
    fn test_value_bearing_priority_prefers_value() {
        let rows = vec![ProviderRow::new(at(1))
            .with_field("value", json!(4.25))
            .with_field("rate", json!(9.0))];

        match map_rows(AssetType::Bond, 1, &rows).unwrap() {
            MappedRows::Bond(out) => assert_eq!(out[0].rate, "4.25".parse().unwrap()),
            other => panic!("expected bond rows, got {:?}", other),
        }
    }

    #[test]
    fn test_economic_falls_back_to_sole_numeric_column() {
        // Economic providers often name the column after the series id
        let rows = vec![
            ProviderRow::new(at(1)).with_field("GDPC1", json!(22000.5)),
            ProviderRow::new(at(2)).with_field("GDPC1", json!(22100.0)),
        ];

        match map_rows(AssetType::EconomicIndicator, 1, &rows).unwrap() {
            MappedRows::Economic(out) => {
                assert_eq!(out.len(), 2);
                assert_eq!(out[0].value, "22000.5".parse().unwrap());
            }
            other => panic!("expected economic rows, got {:?}", other),
        }
    }

    #[test]
    fn test_null_values_are_dropped() {
        let rows = vec![
            ProviderRow::new(at(1)).with_field("value", json!(1.0)),
            ProviderRow::new(at(2)).with_field("value", Value::Null),
        ];

        match map_rows(AssetType::EconomicIndicator, 1, &rows).unwrap() {
            MappedRows::Economic(out) => assert_eq!(out.len(), 1),
            other => panic!("expected economic rows, got {:?}", other),
        }
    }

    #[test]
    fn test_no_value_column_is_an_error() {
        let rows = vec![ProviderRow::new(at(1))
            .with_field("notes", json!("n/a"))
            .with_field("flag", json!(true))];
        assert!(map_rows(AssetType::EconomicIndicator, 1, &rows).is_err());
    }

    #[test]
    fn test_empty_input_maps_to_empty_output() {
        let mapped = map_rows(AssetType::Stock, 1, &[]).unwrap();
        assert!(mapped.is_empty());
    }
}
