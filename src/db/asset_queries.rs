use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::models::Asset;

const ASSET_COLUMNS: &str = "asset_id, symbol, asset_type, name, source, exchange, currency, \
     sector, industry, base_currency, quote_currency, series_id, \
     security_type, metadata, is_active, created_at, updated_at";

pub async fn fetch_by_symbol(pool: &PgPool, symbol: &str) -> Result<Option<Asset>, sqlx::Error> {
    sqlx::query_as::<_, Asset>(&format!(
        "SELECT {} FROM assets WHERE symbol = $1",
        ASSET_COLUMNS
    ))
    .bind(symbol)
    .fetch_optional(pool)
    .await
}

/// Lookup by id, soft-deleted assets excluded.
pub async fn fetch_active_by_id(
    pool: &PgPool,
    asset_id: i32,
) -> Result<Option<Asset>, sqlx::Error> {
    sqlx::query_as::<_, Asset>(&format!(
        "SELECT {} FROM assets WHERE asset_id = $1 AND is_active = TRUE",
        ASSET_COLUMNS
    ))
    .bind(asset_id)
    .fetch_optional(pool)
    .await
}

/// Active assets, newest first, optionally filtered by type.
pub async fn list_active(
    pool: &PgPool,
    asset_type: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Asset>, sqlx::Error> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
        "SELECT {} FROM assets WHERE is_active = TRUE",
        ASSET_COLUMNS
    ));

    if let Some(asset_type) = asset_type {
        qb.push(" AND asset_type = ")
            .push_bind(asset_type.to_string());
    }

    qb.push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    qb.build_query_as::<Asset>().fetch_all(pool).await
}

#[allow(clippy::too_many_arguments)]
pub async fn insert(
    pool: &PgPool,
    symbol: &str,
    asset_type: &str,
    name: &str,
    source: &str,
    exchange: Option<&str>,
    currency: Option<&str>,
    sector: Option<&str>,
    industry: Option<&str>,
    base_currency: Option<&str>,
    quote_currency: Option<&str>,
    series_id: Option<&str>,
    security_type: Option<&str>,
    metadata: Option<&serde_json::Value>,
) -> Result<i32, sqlx::Error> {
    sqlx::query_scalar::<_, i32>(
        r#"
        INSERT INTO assets (
            symbol, asset_type, name, source, exchange, currency, sector,
            industry, base_currency, quote_currency, series_id, security_type,
            metadata
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        RETURNING asset_id
        "#,
    )
    .bind(symbol)
    .bind(asset_type)
    .bind(name)
    .bind(source)
    .bind(exchange)
    .bind(currency)
    .bind(sector)
    .bind(industry)
    .bind(base_currency)
    .bind(quote_currency)
    .bind(series_id)
    .bind(security_type)
    .bind(metadata)
    .fetch_one(pool)
    .await
}

/// Merge optional descriptive fields and the JSONB metadata map, bumping
/// `updated_at`. NULL arguments leave the stored value alone.
#[allow(clippy::too_many_arguments)]
pub async fn update_metadata(
    pool: &PgPool,
    asset_id: i32,
    exchange: Option<&str>,
    currency: Option<&str>,
    sector: Option<&str>,
    industry: Option<&str>,
    base_currency: Option<&str>,
    quote_currency: Option<&str>,
    series_id: Option<&str>,
    security_type: Option<&str>,
    metadata: Option<&serde_json::Value>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE assets
        SET exchange       = COALESCE($2, exchange),
            currency       = COALESCE($3, currency),
            sector         = COALESCE($4, sector),
            industry       = COALESCE($5, industry),
            base_currency  = COALESCE($6, base_currency),
            quote_currency = COALESCE($7, quote_currency),
            series_id      = COALESCE($8, series_id),
            security_type  = COALESCE($9, security_type),
            metadata       = CASE
                                 WHEN $10::jsonb IS NULL THEN metadata
                                 ELSE COALESCE(metadata, '{}'::jsonb) || $10::jsonb
                             END,
            updated_at     = NOW()
        WHERE asset_id = $1
        "#,
    )
    .bind(asset_id)
    .bind(exchange)
    .bind(currency)
    .bind(sector)
    .bind(industry)
    .bind(base_currency)
    .bind(quote_currency)
    .bind(series_id)
    .bind(security_type)
    .bind(metadata)
    .execute(pool)
    .await?;

    Ok(())
}
