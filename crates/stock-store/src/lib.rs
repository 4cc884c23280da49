//! Persistence for scrape history.
//!
//! `stocks` is append-only: every scrape adds a batch keyed by
//! `(code, scraped_at)` and nothing is updated afterwards. `shareholders` and
//! `financials` hold the latest company-page snapshot and are upserted.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use synthesis_core::{FinancialMetric, HistorySource, Row, ScrapeBatch, Shareholder, StoreError};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS stocks (
        code TEXT NOT NULL,
        scraped_at TEXT NOT NULL,
        title TEXT NOT NULL,
        consensus TEXT NOT NULL,
        potential TEXT NOT NULL,
        potential_pct DOUBLE PRECISION NOT NULL,
        recommendation TEXT,
        PRIMARY KEY (code, scraped_at)
    )",
    "CREATE INDEX IF NOT EXISTS idx_stocks_scraped_at ON stocks(scraped_at)",
    "CREATE TABLE IF NOT EXISTS shareholders (
        company_code TEXT NOT NULL,
        name TEXT NOT NULL,
        percentage TEXT NOT NULL,
        scraped_at TEXT NOT NULL,
        PRIMARY KEY (company_code, name)
    )",
    "CREATE TABLE IF NOT EXISTS financials (
        company_code TEXT NOT NULL,
        metric TEXT NOT NULL,
        values_json TEXT NOT NULL,
        scraped_at TEXT NOT NULL,
        PRIMARY KEY (company_code, metric)
    )",
];

type StockRecord = (String, String, String, String, f64, Option<String>, String);

/// Row counts per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub stocks: i64,
    pub shareholders: i64,
    pub financials: i64,
}

#[derive(Clone)]
pub struct StockStore {
    pool: AnyPool,
}

impl StockStore {
    /// Connect to `database_url` (sqlite or postgres) and create tables.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        sqlx::any::install_default_drivers();

        // Every connection to an in-memory sqlite database is a new database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(db_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }

    /// Append one scrape batch. Rows already stored under the same
    /// `(code, scraped_at)` are left untouched. Returns rows inserted.
    pub async fn append_batch(&self, batch: &ScrapeBatch) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut inserted = 0;

        for row in &batch.rows {
            let result = sqlx::query(
                "INSERT INTO stocks (code, scraped_at, title, consensus, potential, potential_pct, recommendation)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (code, scraped_at) DO NOTHING",
            )
            .bind(&row.code)
            .bind(timestamp(&row.scraped_at))
            .bind(&row.title)
            .bind(&row.consensus)
            .bind(&row.potential)
            .bind(row.potential_pct)
            .bind(row.recommendation.clone())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            inserted += result.rows_affected();
        }

        tx.commit().await.map_err(db_err)?;
        tracing::debug!("Stored {} of {} synthesis rows", inserted, batch.len());
        Ok(inserted)
    }

    /// Potentials stored for `code`, newest first.
    pub async fn potentials_for(&self, code: &str, limit: usize) -> Result<Vec<f64>, StoreError> {
        let rows: Vec<(f64,)> = sqlx::query_as(
            "SELECT potential_pct FROM stocks WHERE code = $1 ORDER BY scraped_at DESC LIMIT $2",
        )
        .bind(code)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(|(pct,)| pct).collect())
    }

    /// Rows of the most recent stored batch, ordered by code.
    pub async fn latest_batch(&self) -> Result<Vec<Row>, StoreError> {
        let records: Vec<StockRecord> = sqlx::query_as(
            "SELECT title, code, consensus, potential, potential_pct, recommendation, scraped_at
             FROM stocks
             WHERE scraped_at = (SELECT MAX(scraped_at) FROM stocks)
             ORDER BY code",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        records.into_iter().map(row_from_record).collect()
    }

    /// Full stored history of one code, oldest first.
    pub async fn history(&self, code: &str) -> Result<Vec<Row>, StoreError> {
        let records: Vec<StockRecord> = sqlx::query_as(
            "SELECT title, code, consensus, potential, potential_pct, recommendation, scraped_at
             FROM stocks WHERE code = $1 ORDER BY scraped_at",
        )
        .bind(code)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        records.into_iter().map(row_from_record).collect()
    }

    /// Insert or refresh shareholders keyed by `(company_code, name)`.
    pub async fn upsert_shareholders(&self, shareholders: &[Shareholder]) -> Result<u64, StoreError> {
        let mut written = 0;
        for sh in shareholders {
            let result = sqlx::query(
                "INSERT INTO shareholders (company_code, name, percentage, scraped_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (company_code, name) DO UPDATE
                 SET percentage = excluded.percentage, scraped_at = excluded.scraped_at",
            )
            .bind(&sh.company_code)
            .bind(&sh.name)
            .bind(&sh.percentage)
            .bind(timestamp(&sh.scraped_at))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            written += result.rows_affected();
        }
        Ok(written)
    }

    /// Insert or refresh financial metrics keyed by `(company_code, metric)`.
    pub async fn upsert_financials(&self, metrics: &[FinancialMetric]) -> Result<u64, StoreError> {
        let mut written = 0;
        for fin in metrics {
            let values = serde_json::to_string(&fin.values)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            let result = sqlx::query(
                "INSERT INTO financials (company_code, metric, values_json, scraped_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (company_code, metric) DO UPDATE
                 SET values_json = excluded.values_json, scraped_at = excluded.scraped_at",
            )
            .bind(&fin.company_code)
            .bind(&fin.metric)
            .bind(values)
            .bind(timestamp(&fin.scraped_at))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            written += result.rows_affected();
        }
        Ok(written)
    }

    pub async fn shareholders(&self, company_code: &str) -> Result<Vec<Shareholder>, StoreError> {
        let records: Vec<(String, String, String, String)> = sqlx::query_as(
            "SELECT company_code, name, percentage, scraped_at
             FROM shareholders WHERE company_code = $1 ORDER BY name",
        )
        .bind(company_code)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        records
            .into_iter()
            .map(|(company_code, name, percentage, scraped_at)| {
                Ok(Shareholder {
                    company_code,
                    name,
                    percentage,
                    scraped_at: parse_timestamp(&scraped_at)?,
                })
            })
            .collect()
    }

    pub async fn financials(&self, company_code: &str) -> Result<Vec<FinancialMetric>, StoreError> {
        let records: Vec<(String, String, String, String)> = sqlx::query_as(
            "SELECT company_code, metric, values_json, scraped_at
             FROM financials WHERE company_code = $1 ORDER BY metric",
        )
        .bind(company_code)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        records
            .into_iter()
            .map(|(company_code, metric, values_json, scraped_at)| {
                Ok(FinancialMetric {
                    company_code,
                    metric,
                    values: serde_json::from_str(&values_json)
                        .map_err(|e| StoreError::Serialization(e.to_string()))?,
                    scraped_at: parse_timestamp(&scraped_at)?,
                })
            })
            .collect()
    }

    pub async fn counts(&self) -> Result<StoreCounts, StoreError> {
        Ok(StoreCounts {
            stocks: self.count_rows("stocks").await?,
            shareholders: self.count_rows("shareholders").await?,
            financials: self.count_rows("financials").await?,
        })
    }

    async fn count_rows(&self, table: &str) -> Result<i64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {table}");
        let (n,): (i64,) = sqlx::query_as(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(n)
    }
}

#[async_trait]
impl HistorySource for StockStore {
    async fn potential_history(&self, code: &str, limit: usize) -> Result<Vec<f64>, StoreError> {
        self.potentials_for(code, limit).await
    }
}

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("bad timestamp {raw:?}: {e}")))
}

fn row_from_record(record: StockRecord) -> Result<Row, StoreError> {
    let (title, code, consensus, potential, potential_pct, recommendation, scraped_at) = record;
    Ok(Row {
        title,
        code,
        consensus,
        potential,
        potential_pct,
        recommendation,
        scraped_at: parse_timestamp(&scraped_at)?,
    })
}
