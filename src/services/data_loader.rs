use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use std::str::FromStr;
use tracing::{debug, info};

use crate::db::series::{self, SeriesTable};
use crate::errors::AppError;
use crate::models::{MappedRows, MarketDataRow, RatePoint, ValuePoint};

/// Stay well under Postgres's 65535 bind-parameter ceiling even for the
/// widest table (9 columns).
const INSERT_CHUNK_ROWS: usize = 1000;

const TEMP_TABLE: &str = "tmp_series_load";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Existing `(asset_id, time)` rows win; duplicates are skipped.
    DoNothing,
    /// Existing rows are overwritten column-by-column from the new data.
    Update,
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "do_nothing" | "skip" => Ok(ConflictPolicy::DoNothing),
            "update" => Ok(ConflictPolicy::Update),
            other => Err(format!("Unknown conflict policy: {}", other)),
        }
    }
}

/// Outcome of one load call. `affected` counts rows actually inserted or
/// updated and can never exceed `attempted`; duplicates skipped under
/// `DoNothing` only show up in `skipped`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOutcome {
    pub attempted: i64,
    pub affected: i64,
    pub skipped: i64,
}

/// Lands mapped rows in the asset type's table with conflict handling on
/// `(asset_id, time)`.
pub struct DataLoader {
    use_copy: bool,
}

impl DataLoader {
    /// `use_copy` enables the temp-table bulk path for `DoNothing` loads;
    /// the `Update` policy always takes the row-by-row path.
    pub fn new(use_copy: bool) -> Self {
        Self { use_copy }
    }

    pub async fn load(
        &self,
        pool: &PgPool,
        rows: &MappedRows,
        on_conflict: ConflictPolicy,
    ) -> Result<LoadOutcome, AppError> {
        if rows.is_empty() {
            debug!("No rows to load");
            return Ok(LoadOutcome::default());
        }

        let table = table_of(rows);
        let outcome = if self.use_copy && on_conflict == ConflictPolicy::DoNothing {
            self.load_bulk(pool, rows, table).await?
        } else {
            self.load_row_by_row(pool, rows, table, on_conflict).await?
        };

        info!(
            "Loaded {} of {} record(s) into {} ({} skipped)",
            outcome.affected, outcome.attempted, table.table, outcome.skipped
        );

        Ok(outcome)
    }

    /// Bulk path: stage the rows into a session-local temp table, then merge
    /// with `ON CONFLICT DO NOTHING` in one statement.
    async fn load_bulk(
        &self,
        pool: &PgPool,
        rows: &MappedRows,
        table: &SeriesTable,
    ) -> Result<LoadOutcome, AppError> {
        let mut tx = pool.begin().await?;

        sqlx::query(&format!(
            "CREATE TEMP TABLE {} (LIKE {} INCLUDING DEFAULTS) ON COMMIT DROP",
            TEMP_TABLE, table.table
        ))
        .execute(&mut *tx)
        .await?;

        stage_rows(&mut tx, rows, table).await?;

        let affected = sqlx::query(&bulk_merge_sql(table))
            .execute(&mut *tx)
            .await?
            .rows_affected() as i64;

        tx.commit().await?;

        let attempted = rows.len() as i64;
        Ok(LoadOutcome {
            attempted,
            affected,
            skipped: attempted - affected,
        })
    }

    async fn load_row_by_row(
        &self,
        pool: &PgPool,
        rows: &MappedRows,
        table: &SeriesTable,
        on_conflict: ConflictPolicy,
    ) -> Result<LoadOutcome, AppError> {
        let sql = row_upsert_sql(table, on_conflict);
        let mut tx = pool.begin().await?;
        let mut affected = 0i64;

        match rows {
            MappedRows::Market(items) => {
                for row in items {
                    affected += bind_market(sqlx::query(&sql), row)
                        .execute(&mut *tx)
                        .await?
                        .rows_affected() as i64;
                }
            }
            MappedRows::Forex(items) => {
                for row in items {
                    affected += bind_forex(sqlx::query(&sql), row)
                        .execute(&mut *tx)
                        .await?
                        .rows_affected() as i64;
                }
            }
            MappedRows::Bond(items) => {
                for row in items {
                    affected += bind_bond(sqlx::query(&sql), row)
                        .execute(&mut *tx)
                        .await?
                        .rows_affected() as i64;
                }
            }
            MappedRows::Economic(items) => {
                for row in items {
                    affected += bind_economic(sqlx::query(&sql), row)
                        .execute(&mut *tx)
                        .await?
                        .rows_affected() as i64;
                }
            }
        }

        tx.commit().await?;

        let attempted = rows.len() as i64;
        Ok(LoadOutcome {
            attempted,
            affected,
            skipped: attempted - affected,
        })
    }
}

fn table_of(rows: &MappedRows) -> &'static SeriesTable {
    match rows {
        MappedRows::Market(_) => &series::MARKET_DATA,
        MappedRows::Forex(_) => &series::FOREX_RATES,
        MappedRows::Bond(_) => &series::BOND_RATES,
        MappedRows::Economic(_) => &series::ECONOMIC_DATA,
    }
}

fn bulk_merge_sql(table: &SeriesTable) -> String {
    let columns = table.insert_column_list();
    format!(
        "INSERT INTO {} ({}) SELECT {} FROM {} ON CONFLICT ({}) DO NOTHING",
        table.table,
        columns,
        columns,
        TEMP_TABLE,
        series::CONFLICT_TARGET
    )
}

fn row_upsert_sql(table: &SeriesTable, on_conflict: ConflictPolicy) -> String {
    let columns = table.insert_column_list();
    let placeholders = (1..=table.insert_columns.len())
        .map(|i| format!("${}", i))
        .collect::<Vec<_>>()
        .join(", ");

    match on_conflict {
        ConflictPolicy::DoNothing => format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO NOTHING",
            table.table,
            columns,
            placeholders,
            series::CONFLICT_TARGET
        ),
        ConflictPolicy::Update => format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {}",
            table.table,
            columns,
            placeholders,
            series::CONFLICT_TARGET,
            table.update_set_clause()
        ),
    }
}

async fn stage_rows(
    tx: &mut Transaction<'_, Postgres>,
    rows: &MappedRows,
    table: &SeriesTable,
) -> Result<(), sqlx::Error> {
    let prefix = format!("INSERT INTO {} ({}) ", TEMP_TABLE, table.insert_column_list());

    match rows {
        MappedRows::Market(items) => {
            for chunk in items.chunks(INSERT_CHUNK_ROWS) {
                let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(&prefix);
                qb.push_values(chunk, |mut b, row| {
                    b.push_bind(row.asset_id)
                        .push_bind(row.time)
                        .push_bind(row.open.clone())
                        .push_bind(row.high.clone())
                        .push_bind(row.low.clone())
                        .push_bind(row.close.clone())
                        .push_bind(row.volume)
                        .push_bind(row.dividends.clone())
                        .push_bind(row.stock_splits.clone());
                });
                qb.build().execute(&mut **tx).await?;
            }
        }
        MappedRows::Forex(items) => {
            for chunk in items.chunks(INSERT_CHUNK_ROWS) {
                let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(&prefix);
                qb.push_values(chunk, |mut b, row| {
                    b.push_bind(row.asset_id)
                        .push_bind(row.time)
                        .push_bind(row.rate.clone())
                        .push_bind(row.base_currency.clone())
                        .push_bind(row.quote_currency.clone());
                });
                qb.build().execute(&mut **tx).await?;
            }
        }
        MappedRows::Bond(items) => {
            for chunk in items.chunks(INSERT_CHUNK_ROWS) {
                let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(&prefix);
                qb.push_values(chunk, |mut b, row| {
                    b.push_bind(row.asset_id)
                        .push_bind(row.time)
                        .push_bind(row.rate.clone());
                });
                qb.build().execute(&mut **tx).await?;
            }
        }
        MappedRows::Economic(items) => {
            for chunk in items.chunks(INSERT_CHUNK_ROWS) {
                let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(&prefix);
                qb.push_values(chunk, |mut b, row| {
                    b.push_bind(row.asset_id)
                        .push_bind(row.time)
                        .push_bind(row.value.clone());
                });
                qb.build().execute(&mut **tx).await?;
            }
        }
    }

    Ok(())
}

fn bind_market<'q>(
    query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    row: &'q MarketDataRow,
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(row.asset_id)
        .bind(row.time)
        .bind(&row.open)
        .bind(&row.high)
        .bind(&row.low)
        .bind(&row.close)
        .bind(row.volume)
        .bind(&row.dividends)
        .bind(&row.stock_splits)
}

fn bind_forex<'q>(
    query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    row: &'q RatePoint,
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(row.asset_id)
        .bind(row.time)
        .bind(&row.rate)
        .bind(&row.base_currency)
        .bind(&row.quote_currency)
}

fn bind_bond<'q>(
    query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    row: &'q RatePoint,
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    query.bind(row.asset_id).bind(row.time).bind(&row.rate)
}

fn bind_economic<'q>(
    query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    row: &'q ValuePoint,
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    query.bind(row.asset_id).bind(row.time).bind(&row.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_merge_sql_targets_conflict_key() {
        let sql = bulk_merge_sql(&series::MARKET_DATA);
        assert!(sql.contains("INSERT INTO market_data"));
        assert!(sql.contains("FROM tmp_series_load"));
        assert!(sql.contains("ON CONFLICT (asset_id, time) DO NOTHING"));
    }

    #[test]
    fn test_row_upsert_sql_do_nothing() {
        let sql = row_upsert_sql(&series::BOND_RATES, ConflictPolicy::DoNothing);
        assert_eq!(
            sql,
            "INSERT INTO bond_rates (asset_id, time, rate) VALUES ($1, $2, $3) \
             ON CONFLICT (asset_id, time) DO NOTHING"
        );
    }

    #[test]
    fn test_row_upsert_sql_update_sets_non_key_columns() {
        let sql = row_upsert_sql(&series::MARKET_DATA, ConflictPolicy::Update);
        assert!(sql.contains("DO UPDATE SET open = EXCLUDED.open"));
        assert!(sql.contains("volume = EXCLUDED.volume"));
        assert!(!sql.contains("asset_id = EXCLUDED"));
        assert!(!sql.contains("time = EXCLUDED"));
    }

    #[test]
    fn test_conflict_policy_parsing() {
        assert_eq!(
            "do_nothing".parse::<ConflictPolicy>().unwrap(),
            ConflictPolicy::DoNothing
        );
        assert_eq!(
            "skip".parse::<ConflictPolicy>().unwrap(),
            ConflictPolicy::DoNothing
        );
        assert_eq!(
            "update".parse::<ConflictPolicy>().unwrap(),
            ConflictPolicy::Update
        );
        assert!("merge".parse::<ConflictPolicy>().is_err());
    }
}
