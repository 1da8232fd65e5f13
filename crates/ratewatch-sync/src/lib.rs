//! Refresh pipeline orchestration: tuple enumeration, per-tuple fetch and
//! extraction, and wholesale replacement of the stored rate set.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Days, Local, NaiveDateTime, TimeDelta, Utc};
use ratewatch_adapters::{RateExtractor, SearchEndpoint, DEFAULT_BASE_URL};
use ratewatch_core::{PromoCode, QueryTuple, RateObservation};
use ratewatch_storage::{
    default_promo_codes, load_promo_codes_yaml, HttpClientConfig, HttpFetcher, PageFetcher,
    RateStore, ReferenceData, SqliteRateStore, StoreError,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "ratewatch-sync";

/// Check-in dates start this many hours past `now`.
const CHECK_IN_LEAD_HOURS: i64 = 2;

/// Upper bounds applied to the search window read from the environment.
pub const MAX_FORECAST_DAYS: u32 = 366;
pub const MAX_STAY_NIGHTS: u32 = 30;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: String,
    pub base_url: String,
    pub forecast_days: u32,
    pub max_nights: u32,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub scheduler_enabled: bool,
    pub refresh_cron: String,
    pub promo_codes_file: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://ratewatch.db?mode=rwc".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            forecast_days: 14,
            max_nights: 7,
            user_agent: "ratewatch-bot/0.1".to_string(),
            http_timeout_secs: 20,
            scheduler_enabled: false,
            refresh_cron: "0 0 6 * * *".to_string(),
            promo_codes_file: PathBuf::from("promo_codes.yaml"),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            base_url: std::env::var("RATEWATCH_BASE_URL").unwrap_or(defaults.base_url),
            forecast_days: env_parse("RATEWATCH_FORECAST_DAYS").unwrap_or(defaults.forecast_days),
            max_nights: env_parse("RATEWATCH_MAX_NIGHTS").unwrap_or(defaults.max_nights),
            user_agent: std::env::var("RATEWATCH_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: env_parse("RATEWATCH_HTTP_TIMEOUT_SECS")
                .unwrap_or(defaults.http_timeout_secs),
            scheduler_enabled: std::env::var("RATEWATCH_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(defaults.scheduler_enabled),
            refresh_cron: std::env::var("REFRESH_CRON").unwrap_or(defaults.refresh_cron),
            promo_codes_file: std::env::var("RATEWATCH_PROMO_CODES_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.promo_codes_file),
        }
        .bounded()
    }

    /// Clamps the forecast window and stay length to their upper bounds.
    pub fn bounded(mut self) -> Self {
        self.forecast_days = self.forecast_days.min(MAX_FORECAST_DAYS);
        self.max_nights = self.max_nights.min(MAX_STAY_NIGHTS);
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Every (check-in, nights, promo) combination for the forecast window, in
/// check-in / nights / promo-list order.
pub fn enumerate_tuples(
    now: NaiveDateTime,
    forecast_days: u32,
    max_nights: u32,
    promo_codes: &[PromoCode],
) -> Vec<QueryTuple> {
    let earliest = (now + TimeDelta::hours(CHECK_IN_LEAD_HOURS)).date();
    let mut tuples = Vec::new();

    for offset in 0..forecast_days {
        let check_in = earliest + Days::new(u64::from(offset));
        for nights in 1..=max_nights {
            for promo in promo_codes {
                tuples.push(QueryTuple {
                    check_in,
                    nights,
                    promo_code: promo.code.clone(),
                });
            }
        }
    }
    tuples
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("loading promo code reference data")]
    ReferenceData(#[source] StoreError),
    #[error("no promo codes configured; refusing to replace stored rates")]
    NoPromoCodes,
    #[error("replacing stored hotel rates")]
    Storage(#[source] StoreError),
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub promo_codes: usize,
    pub tuples: usize,
    pub fetched_pages: usize,
    pub skipped_tuples: usize,
    pub persisted_observations: usize,
}

pub struct RefreshPipeline {
    config: SyncConfig,
    endpoint: SearchEndpoint,
    extractor: RateExtractor,
    fetcher: Arc<dyn PageFetcher>,
    reference: Arc<dyn ReferenceData>,
    store: Arc<dyn RateStore>,
    in_flight: Mutex<()>,
}

impl RefreshPipeline {
    pub fn new(
        config: SyncConfig,
        fetcher: Arc<dyn PageFetcher>,
        reference: Arc<dyn ReferenceData>,
        store: Arc<dyn RateStore>,
    ) -> Result<Self> {
        let config = config.bounded();
        let endpoint = SearchEndpoint::new(&config.base_url)?;
        let extractor = RateExtractor::new()?;
        Ok(Self {
            config,
            endpoint,
            extractor,
            fetcher,
            reference,
            store,
            in_flight: Mutex::new(()),
        })
    }

    /// Wires the HTTP fetcher and the SQLite store described by `config`.
    pub async fn from_config(config: SyncConfig) -> Result<Self> {
        let store = Arc::new(open_store(&config).await?);
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?;
        Self::new(config, Arc::new(http), store.clone(), store)
    }

    pub async fn run_once(&self) -> Result<RefreshSummary, RefreshError> {
        self.run_at(Local::now().naive_local()).await
    }

    /// One full refresh relative to `now`. Fetch failures only skip their
    /// tuple; reference-data and commit failures abort the run.
    pub async fn run_at(&self, now: NaiveDateTime) -> Result<RefreshSummary, RefreshError> {
        let _running = self.in_flight.lock().await;
        self.refresh(now).await
    }

    /// Runs one refresh unless another is in flight, in which case `None`.
    pub async fn try_run_at(
        &self,
        now: NaiveDateTime,
    ) -> Option<Result<RefreshSummary, RefreshError>> {
        let _running = self.in_flight.try_lock().ok()?;
        Some(self.refresh(now).await)
    }

    /// Caller holds `in_flight`.
    async fn refresh(&self, now: NaiveDateTime) -> Result<RefreshSummary, RefreshError> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();

        let promo_codes = self
            .reference
            .all_promo_codes()
            .await
            .map_err(RefreshError::ReferenceData)?;
        if promo_codes.is_empty() {
            return Err(RefreshError::NoPromoCodes);
        }

        let tuples = enumerate_tuples(
            now,
            self.config.forecast_days,
            self.config.max_nights,
            &promo_codes,
        );
        info!(%run_id, tuples = tuples.len(), promo_codes = promo_codes.len(), "starting refresh");

        let mut observations = Vec::new();
        let mut fetched_pages = 0usize;
        let mut skipped_tuples = 0usize;

        for tuple in &tuples {
            let url = self.endpoint.query_url(tuple);
            debug!(
                check_in = %tuple.check_in,
                nights = tuple.nights,
                promo = %tuple.promo_code,
                "querying stays"
            );

            let body = match self.fetcher.fetch_page(&url).await {
                Ok(body) => body,
                Err(err) => {
                    warn!(%run_id, url = %url, error = %err, "fetch failed; skipping tuple");
                    skipped_tuples += 1;
                    continue;
                }
            };
            fetched_pages += 1;

            let rates = self.extractor.extract(&body);
            observations.extend(
                rates
                    .into_iter()
                    .map(|rate| RateObservation::from_tuple(tuple, &url, rate)),
            );
        }

        let persisted_observations = self
            .store
            .replace_all(&observations)
            .await
            .map_err(RefreshError::Storage)?;

        let finished_at = Utc::now();
        info!(
            %run_id,
            fetched_pages,
            skipped_tuples,
            persisted_observations,
            "refresh complete"
        );

        Ok(RefreshSummary {
            run_id,
            started_at,
            finished_at,
            promo_codes: promo_codes.len(),
            tuples: tuples.len(),
            fetched_pages,
            skipped_tuples,
            persisted_observations,
        })
    }

    /// Cron-driven refresh when enabled. A tick that lands while a run is in
    /// flight is dropped.
    pub async fn maybe_build_scheduler(self: Arc<Self>) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let cron = self.config.refresh_cron.clone();
        let pipeline = self;
        let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            Box::pin(async move {
                match pipeline.try_run_at(Local::now().naive_local()).await {
                    None => warn!("refresh still running; skipping scheduled tick"),
                    Some(Ok(summary)) => info!(
                        run_id = %summary.run_id,
                        persisted = summary.persisted_observations,
                        "scheduled refresh finished"
                    ),
                    Some(Err(err)) => error!(error = ?anyhow::Error::from(err), "scheduled refresh failed"),
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(Some(sched))
    }
}

/// Opens the configured database and makes sure the schema exists.
pub async fn open_store(config: &SyncConfig) -> Result<SqliteRateStore> {
    let store = SqliteRateStore::connect(&config.database_url)
        .await
        .with_context(|| format!("connecting to {}", config.database_url))?;
    store.migrate().await.context("creating schema")?;
    Ok(store)
}

/// Promo codes from `config.promo_codes_file`, or the built-in defaults when
/// that file does not exist.
pub fn promo_codes_for_seeding(config: &SyncConfig) -> Result<Vec<PromoCode>> {
    if config.promo_codes_file.exists() {
        Ok(load_promo_codes_yaml(&config.promo_codes_file)?)
    } else {
        warn!(
            path = %config.promo_codes_file.display(),
            "promo code file missing; seeding defaults"
        );
        Ok(default_promo_codes())
    }
}

pub async fn run_refresh_once_from_env() -> Result<RefreshSummary> {
    let config = SyncConfig::from_env();
    let pipeline = RefreshPipeline::from_config(config).await?;
    Ok(pipeline.run_once().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeSet, HashMap};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use ratewatch_core::ReportRow;
    use ratewatch_storage::FetchError;

    const BASE: &str = "http://rates.test/ibe/default.aspx?hgID=641";

    fn page_with(hotel: &str, rate_text: &str) -> String {
        format!(
            r#"<html><body><div class="ws-property-item"><a class="wsName">{hotel}</a><span class="ws-number">{rate_text}</span></div></body></html>"#
        )
    }

    /// Serves the same single-property page for every URL, except URLs
    /// containing `fail_marker`, which get an HTTP 500.
    struct StubFetcher {
        body: String,
        fail_marker: Option<String>,
        calls: AtomicUsize,
    }

    impl StubFetcher {
        fn new(body: String) -> Self {
            Self {
                body,
                fail_marker: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing_on(mut self, marker: &str) -> Self {
            self.fail_marker = Some(marker.to_string());
            self
        }
    }

    #[async_trait]
    impl PageFetcher for StubFetcher {
        async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.fail_marker {
                Some(marker) if url.contains(marker.as_str()) => Err(FetchError::HttpStatus {
                    status: 500,
                    url: url.to_string(),
                }),
                _ => Ok(self.body.clone()),
            }
        }
    }

    struct BrokenReference;

    #[async_trait]
    impl ReferenceData for BrokenReference {
        async fn all_promo_codes(&self) -> Result<Vec<PromoCode>, StoreError> {
            Err(StoreError::Sqlx(sqlx::Error::PoolClosed))
        }
    }

    struct FixedReference(Vec<PromoCode>);

    #[async_trait]
    impl ReferenceData for FixedReference {
        async fn all_promo_codes(&self) -> Result<Vec<PromoCode>, StoreError> {
            Ok(self.0.clone())
        }
    }

    struct RejectingStore;

    #[async_trait]
    impl RateStore for RejectingStore {
        async fn replace_all(&self, _observations: &[RateObservation]) -> Result<usize, StoreError> {
            Err(StoreError::Sqlx(sqlx::Error::PoolClosed))
        }

        async fn query(&self, _promo: Option<&str>) -> Result<Vec<ReportRow>, StoreError> {
            Ok(vec![])
        }
    }

    fn scenario_codes() -> Vec<PromoCode> {
        vec![
            PromoCode::new("", "Default"),
            PromoCode::new("ZEMPUR", "UOTM Red Carpet"),
        ]
    }

    fn config(forecast_days: u32, max_nights: u32) -> SyncConfig {
        SyncConfig {
            base_url: BASE.to_string(),
            forecast_days,
            max_nights,
            ..SyncConfig::default()
        }
    }

    fn morning() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    async fn seeded_store(codes: &[PromoCode]) -> Arc<SqliteRateStore> {
        let store = SqliteRateStore::in_memory().await.unwrap();
        store.migrate().await.unwrap();
        store.seed_promo_codes(codes).await.unwrap();
        Arc::new(store)
    }

    #[test]
    fn enumeration_covers_full_cartesian_product() {
        let codes = vec![
            PromoCode::new("", "Default"),
            PromoCode::new("ZEMPUS", "Friends & Family"),
            PromoCode::new("ZEMPUR", "UOTM Red Carpet"),
        ];
        let tuples = enumerate_tuples(morning(), 14, 7, &codes);
        assert_eq!(tuples.len(), 14 * 7 * 3);

        let mut nights_seen: HashMap<(NaiveDate, String), Vec<u32>> = HashMap::new();
        for t in &tuples {
            nights_seen
                .entry((t.check_in, t.promo_code.clone()))
                .or_default()
                .push(t.nights);
        }
        assert_eq!(nights_seen.len(), 14 * 3);
        for nights in nights_seen.values() {
            assert_eq!(nights, &(1..=7).collect::<Vec<_>>());
        }

        let days: BTreeSet<_> = tuples.iter().map(|t| t.check_in).collect();
        assert_eq!(days.len(), 14);
        assert_eq!(days.first().copied(), NaiveDate::from_ymd_opt(2026, 10, 19));
        assert_eq!(days.last().copied(), NaiveDate::from_ymd_opt(2026, 11, 1));
    }

    #[test]
    fn enumeration_order_is_check_in_then_nights_then_promo() {
        let tuples = enumerate_tuples(morning(), 2, 2, &scenario_codes());
        let order: Vec<_> = tuples
            .iter()
            .map(|t| (t.check_in.format("%d").to_string(), t.nights, t.promo_code.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("19".to_string(), 1, ""),
                ("19".to_string(), 1, "ZEMPUR"),
                ("19".to_string(), 2, ""),
                ("19".to_string(), 2, "ZEMPUR"),
                ("20".to_string(), 1, ""),
                ("20".to_string(), 1, "ZEMPUR"),
                ("20".to_string(), 2, ""),
                ("20".to_string(), 2, "ZEMPUR"),
            ]
        );
    }

    #[test]
    fn late_evening_run_starts_next_day() {
        let late = NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(22, 30, 0)
            .unwrap();
        let tuples = enumerate_tuples(late, 1, 1, &scenario_codes());
        assert!(tuples
            .iter()
            .all(|t| t.check_in == NaiveDate::from_ymd_opt(2026, 10, 20).unwrap()));
    }

    #[test]
    fn empty_inputs_enumerate_nothing() {
        assert!(enumerate_tuples(morning(), 0, 7, &scenario_codes()).is_empty());
        assert!(enumerate_tuples(morning(), 14, 0, &scenario_codes()).is_empty());
        assert!(enumerate_tuples(morning(), 14, 7, &[]).is_empty());
    }

    #[tokio::test]
    async fn end_to_end_refresh_then_report() {
        let store = seeded_store(&scenario_codes()).await;
        let fetcher = Arc::new(StubFetcher::new(page_with("Hotel X", "$199 per night")));
        let pipeline =
            RefreshPipeline::new(config(2, 1), fetcher.clone(), store.clone(), store.clone())
                .unwrap();

        let summary = pipeline.run_at(morning()).await.unwrap();
        assert_eq!(summary.tuples, 4);
        assert_eq!(summary.persisted_observations, 4);
        assert_eq!(summary.skipped_tuples, 0);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 4);
        assert_eq!(store.observations().await.unwrap().len(), 4);

        let rows = store.query(Some("UOTM Red Carpet")).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.num_nights == 1 && r.total_cost == 199));
        assert_eq!(rows[0].check_in_date, "2026-10-19");
        assert_eq!(rows[1].check_in_date, "2026-10-20");
        assert!(rows[0].search_url.contains("promo=ZEMPUR"));
    }

    #[tokio::test]
    async fn observations_span_exactly_their_stay_length() {
        let store = seeded_store(&scenario_codes()).await;
        let fetcher = Arc::new(StubFetcher::new(page_with("Hotel X", "$120")));
        let pipeline =
            RefreshPipeline::new(config(3, 4), fetcher, store.clone(), store.clone()).unwrap();
        pipeline.run_at(morning()).await.unwrap();

        let stored = store.observations().await.unwrap();
        assert_eq!(stored.len(), 3 * 4 * 2);
        for obs in &stored {
            let nights = obs.stay_length();
            assert!(nights >= 1);
            assert!(obs.source_url.contains(&format!("nights={nights}")));
        }
    }

    #[tokio::test]
    async fn http_error_skips_only_that_tuple() {
        let store = seeded_store(&scenario_codes()).await;
        // Only the 10/20 check-in with the red carpet promo fails.
        let fetcher = Arc::new(
            StubFetcher::new(page_with("Hotel X", "$199"))
                .failing_on("checkin=10%2F20%2F2026&nights=1&promo=ZEMPUR"),
        );
        let pipeline =
            RefreshPipeline::new(config(2, 1), fetcher.clone(), store.clone(), store.clone())
                .unwrap();

        let summary = pipeline.run_at(morning()).await.unwrap();
        assert_eq!(summary.tuples, 4);
        assert_eq!(summary.skipped_tuples, 1);
        assert_eq!(summary.fetched_pages, 3);
        assert_eq!(summary.persisted_observations, 3);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn reference_failure_aborts_before_fetching() {
        let store = seeded_store(&scenario_codes()).await;
        let fetcher = Arc::new(StubFetcher::new(page_with("Hotel X", "$199")));
        let seeded = RefreshPipeline::new(config(1, 1), fetcher.clone(), store.clone(), store.clone())
            .unwrap();
        seeded.run_at(morning()).await.unwrap();
        let before = store.observations().await.unwrap();
        fetcher.calls.store(0, Ordering::SeqCst);

        let pipeline = RefreshPipeline::new(
            config(1, 1),
            fetcher.clone(),
            Arc::new(BrokenReference),
            store.clone(),
        )
        .unwrap();
        let err = pipeline.run_at(morning()).await.unwrap_err();
        assert!(matches!(err, RefreshError::ReferenceData(_)));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.observations().await.unwrap(), before);
    }

    #[tokio::test]
    async fn empty_reference_data_keeps_previous_rates() {
        let store = seeded_store(&scenario_codes()).await;
        let fetcher = Arc::new(StubFetcher::new(page_with("Hotel X", "$199")));
        RefreshPipeline::new(config(1, 1), fetcher.clone(), store.clone(), store.clone())
            .unwrap()
            .run_at(morning())
            .await
            .unwrap();

        let pipeline = RefreshPipeline::new(
            config(1, 1),
            fetcher,
            Arc::new(FixedReference(vec![])),
            store.clone(),
        )
        .unwrap();
        assert!(matches!(
            pipeline.run_at(morning()).await,
            Err(RefreshError::NoPromoCodes)
        ));
        assert_eq!(store.observations().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn storage_failure_is_fatal() {
        let fetcher = Arc::new(StubFetcher::new(page_with("Hotel X", "$199")));
        let pipeline = RefreshPipeline::new(
            config(1, 1),
            fetcher,
            Arc::new(FixedReference(scenario_codes())),
            Arc::new(RejectingStore),
        )
        .unwrap();
        let err = pipeline.run_at(morning()).await.unwrap_err();
        assert!(matches!(err, RefreshError::Storage(_)));
    }

    #[tokio::test]
    async fn pages_without_availability_persist_nothing() {
        let store = seeded_store(&scenario_codes()).await;
        let fetcher = Arc::new(StubFetcher::new("<html><body>No rooms</body></html>".into()));
        let pipeline =
            RefreshPipeline::new(config(2, 2), fetcher, store.clone(), store.clone()).unwrap();
        let summary = pipeline.run_at(morning()).await.unwrap();
        assert_eq!(summary.fetched_pages, 8);
        assert_eq!(summary.persisted_observations, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn scheduler_only_built_when_enabled() {
        let store = seeded_store(&scenario_codes()).await;
        let fetcher = Arc::new(StubFetcher::new(String::new()));

        let disabled = Arc::new(
            RefreshPipeline::new(config(1, 1), fetcher.clone(), store.clone(), store.clone())
                .unwrap(),
        );
        assert!(disabled.maybe_build_scheduler().await.unwrap().is_none());

        let enabled = Arc::new(
            RefreshPipeline::new(
                SyncConfig {
                    scheduler_enabled: true,
                    ..config(1, 1)
                },
                fetcher.clone(),
                store.clone(),
                store.clone(),
            )
            .unwrap(),
        );
        assert!(enabled.maybe_build_scheduler().await.unwrap().is_some());

        let bad_cron = Arc::new(
            RefreshPipeline::new(
                SyncConfig {
                    scheduler_enabled: true,
                    refresh_cron: "whenever".into(),
                    ..config(1, 1)
                },
                fetcher,
                store.clone(),
                store,
            )
            .unwrap(),
        );
        assert!(bad_cron.maybe_build_scheduler().await.is_err());
    }

    #[test]
    fn oversized_window_is_clamped() {
        let cfg = SyncConfig {
            forecast_days: u32::MAX,
            max_nights: u32::MAX,
            ..SyncConfig::default()
        }
        .bounded();
        assert_eq!(cfg.forecast_days, MAX_FORECAST_DAYS);
        assert_eq!(cfg.max_nights, MAX_STAY_NIGHTS);

        let pipeline = RefreshPipeline::new(
            SyncConfig {
                forecast_days: 1_000_000,
                ..config(1, 1)
            },
            Arc::new(StubFetcher::new(String::new())),
            Arc::new(FixedReference(scenario_codes())),
            Arc::new(RejectingStore),
        )
        .unwrap();
        assert_eq!(pipeline.config.forecast_days, MAX_FORECAST_DAYS);
        assert_eq!(SyncConfig::default().bounded().forecast_days, 14);
    }

    #[tokio::test]
    async fn tick_during_running_refresh_is_dropped() {
        let store = seeded_store(&scenario_codes()).await;
        let fetcher = Arc::new(StubFetcher::new(page_with("Hotel X", "$199")));
        let pipeline =
            RefreshPipeline::new(config(1, 1), fetcher.clone(), store.clone(), store.clone())
                .unwrap();

        let running = pipeline.in_flight.lock().await;
        assert!(pipeline.try_run_at(morning()).await.is_none());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        drop(running);

        let summary = pipeline.try_run_at(morning()).await.unwrap().unwrap();
        assert_eq!(summary.persisted_observations, 2);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn seeding_falls_back_to_defaults_without_file() {
        let cfg = SyncConfig {
            promo_codes_file: PathBuf::from("/no/such/promo_codes.yaml"),
            ..SyncConfig::default()
        };
        assert_eq!(promo_codes_for_seeding(&cfg).unwrap(), default_promo_codes());
    }

    #[test]
    fn invalid_base_url_is_rejected_up_front() {
        let result = RefreshPipeline::new(
            SyncConfig {
                base_url: "::not-a-url::".into(),
                ..SyncConfig::default()
            },
            Arc::new(StubFetcher::new(String::new())),
            Arc::new(FixedReference(vec![])),
            Arc::new(RejectingStore),
        );
        assert!(result.is_err());
    }
}
