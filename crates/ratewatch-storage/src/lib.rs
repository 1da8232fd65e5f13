//! Rate persistence (SQLite) + HTTP fetch utilities for ratewatch.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use ratewatch_core::{PromoCode, RateObservation, ReportRow};
use serde::Deserialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};

pub const CRATE_NAME: &str = "ratewatch-storage";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

/// Connection-level failures are retried; anything that produced a response
/// (including error statuses) is handed back to the caller as-is.
pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Source of result pages for the refresh pipeline.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<String, FetchError>;
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }

    pub async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let span = info_span!("http_fetch", url);
        self.fetch_with_retries(url).instrument(span).await
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<String, FetchError> {
        let mut attempt = 0;
        loop {
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp.text().await?);
                    }
                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: resp.url().to_string(),
                    });
                }
                Err(err) => {
                    let disposition = classify_reqwest_error(&err);
                    if disposition == RetryDisposition::NonRetryable
                        || attempt >= self.backoff.max_retries
                    {
                        return Err(FetchError::Request(err));
                    }
                    let delay = self.backoff.delay_for_attempt(attempt);
                    warn!(attempt, ?delay, error = %err, "retrying request");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
        self.fetch_text(url).await
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("reading promo code file {path}: {source}")]
    SeedRead {
        path: String,
        source: std::io::Error,
    },
    #[error("parsing promo code file {path}: {source}")]
    SeedParse {
        path: String,
        source: serde_yaml::Error,
    },
}

/// Read-only view of the promo code lookup table.
#[async_trait]
pub trait ReferenceData: Send + Sync {
    async fn all_promo_codes(&self) -> Result<Vec<PromoCode>, StoreError>;
}

/// Repository over persisted rate observations.
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Delete every stored observation and insert `observations` in a single
    /// transaction. On error nothing changes.
    async fn replace_all(&self, observations: &[RateObservation]) -> Result<usize, StoreError>;

    /// Ranked stay summaries, optionally limited to one promo description.
    async fn query(&self, promo_description: Option<&str>) -> Result<Vec<ReportRow>, StoreError>;
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS promo_code_reference (
  code TEXT PRIMARY KEY NOT NULL,
  description TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS hotel_rate (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  hotel_name TEXT NOT NULL,
  check_in_date TEXT NOT NULL,
  check_out_date TEXT NOT NULL,
  search_url TEXT NOT NULL,
  promo_code TEXT NULL REFERENCES promo_code_reference(code),
  nightly_rate REAL NOT NULL,
  CHECK (nightly_rate >= 0),
  CHECK (check_out_date > check_in_date)
);
CREATE INDEX IF NOT EXISTS hr_promo_idx ON hotel_rate(promo_code);
"#;

const REPORT_SQL: &str = r#"
WITH stays AS (
  SELECT hr.hotel_name,
         hr.check_in_date,
         hr.check_out_date,
         pc.description,
         MIN(hr.nightly_rate) AS nightly_rate,
         hr.search_url
    FROM hotel_rate AS hr
   INNER JOIN promo_code_reference AS pc
      ON hr.promo_code = pc.code
   WHERE ?1 IS NULL OR pc.description = ?1
   GROUP BY hr.hotel_name, hr.check_in_date, hr.check_out_date, hr.promo_code
)
SELECT CAST(JULIANDAY(check_out_date) - JULIANDAY(check_in_date) AS INTEGER)
         * CAST(nightly_rate AS INTEGER) AS total_cost,
       hotel_name,
       CAST(JULIANDAY(check_out_date) - JULIANDAY(check_in_date) AS INTEGER) AS num_nights,
       description,
       check_in_date,
       check_out_date,
       CAST(nightly_rate AS INTEGER) AS nightly_rate,
       search_url
  FROM stays
 ORDER BY description, total_cost, num_nights, check_in_date, check_out_date, hotel_name
"#;

#[derive(Debug, Clone)]
pub struct SqliteRateStore {
    pool: SqlitePool,
}

impl SqliteRateStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    /// Private in-memory database on a single pinned connection.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Upsert reference rows; all-or-nothing.
    pub async fn seed_promo_codes(&self, codes: &[PromoCode]) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        for promo in codes {
            sqlx::query(
                "INSERT INTO promo_code_reference (code, description) VALUES (?1, ?2) \
                 ON CONFLICT (code) DO UPDATE SET description = excluded.description",
            )
            .bind(&promo.code)
            .bind(&promo.description)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(codes.len())
    }

    /// Every stored observation in insertion order. Used to inspect what a
    /// refresh committed.
    pub async fn observations(&self) -> Result<Vec<RateObservation>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT hotel_name, check_in_date, check_out_date, search_url, promo_code, nightly_rate
              FROM hotel_rate
             ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(RateObservation {
                hotel_name: row.try_get("hotel_name")?,
                check_in_date: row.try_get::<NaiveDate, _>("check_in_date")?,
                check_out_date: row.try_get::<NaiveDate, _>("check_out_date")?,
                source_url: row.try_get("search_url")?,
                promo_code: row.try_get("promo_code")?,
                nightly_rate: row.try_get("nightly_rate")?,
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl ReferenceData for SqliteRateStore {
    async fn all_promo_codes(&self) -> Result<Vec<PromoCode>, StoreError> {
        let rows = sqlx::query("SELECT code, description FROM promo_code_reference ORDER BY code")
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(PromoCode {
                code: row.try_get("code")?,
                description: row.try_get("description")?,
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl RateStore for SqliteRateStore {
    async fn replace_all(&self, observations: &[RateObservation]) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM hotel_rate")
            .execute(&mut *tx)
            .await?
            .rows_affected();

        for obs in observations {
            sqlx::query(
                r#"
                INSERT INTO hotel_rate
                  (hotel_name, check_in_date, check_out_date, search_url, promo_code, nightly_rate)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(&obs.hotel_name)
            .bind(obs.check_in_date)
            .bind(obs.check_out_date)
            .bind(&obs.source_url)
            .bind(obs.promo_code.as_deref())
            .bind(obs.nightly_rate)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(deleted, inserted = observations.len(), "replaced hotel rates");
        Ok(observations.len())
    }

    async fn query(&self, promo_description: Option<&str>) -> Result<Vec<ReportRow>, StoreError> {
        let rows = sqlx::query(REPORT_SQL)
            .bind(promo_description)
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(ReportRow {
                total_cost: row.try_get("total_cost")?,
                hotel_name: row.try_get("hotel_name")?,
                num_nights: row.try_get("num_nights")?,
                description: row.try_get("description")?,
                check_in_date: row.try_get("check_in_date")?,
                check_out_date: row.try_get("check_out_date")?,
                nightly_rate: row.try_get("nightly_rate")?,
                search_url: row.try_get("search_url")?,
            });
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct PromoCodesYaml {
    promo_codes: Vec<PromoCode>,
}

/// Reference rows used when no seed file is available.
pub fn default_promo_codes() -> Vec<PromoCode> {
    vec![
        PromoCode::new("", "Default"),
        PromoCode::new("ZEMPUS", "Friends & Family"),
        PromoCode::new("ZEMPUR", "UOTM Red Carpet"),
    ]
}

pub fn load_promo_codes_yaml(path: impl AsRef<Path>) -> Result<Vec<PromoCode>, StoreError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| StoreError::SeedRead {
        path: path.display().to_string(),
        source,
    })?;
    let parsed: PromoCodesYaml =
        serde_yaml::from_str(&text).map_err(|source| StoreError::SeedParse {
            path: path.display().to_string(),
            source,
        })?;
    Ok(parsed.promo_codes)
}
