//! Axum + Askama read-only report of ranked stay costs.

use std::sync::Arc;

use anyhow::Context;
use askama::Template;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use ratewatch_core::{PromoCode, ReportRow};
use ratewatch_storage::{RateStore, ReferenceData, SqliteRateStore};
use ratewatch_sync::{open_store, SyncConfig};
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "ratewatch-web";

#[derive(Clone)]
pub struct AppState {
    pub store: SqliteRateStore,
    /// Promo description applied when the request names none.
    pub default_promo: Option<String>,
}

impl AppState {
    pub fn new(store: SqliteRateStore) -> Self {
        Self {
            store,
            default_promo: None,
        }
    }

    pub fn with_default_promo(mut self, description: Option<String>) -> Self {
        self.default_promo = description.filter(|d| !d.is_empty());
        self
    }
}

#[derive(Debug, Deserialize, Default)]
struct ReportQuery {
    promo: Option<String>,
}

#[derive(Template)]
#[template(path = "report.html")]
struct ReportTemplate {
    rows: Vec<ReportRow>,
    promo_codes: Vec<PromoCode>,
    selected: String,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(report_handler))
        .route("/api/rates", get(rates_json_handler))
        .route("/api/promo-codes", get(promo_codes_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = SyncConfig::from_env();
    let host = std::env::var("RATEWATCH_WEB_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("RATEWATCH_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);

    let store = open_store(&config).await?;
    let state =
        AppState::new(store).with_default_promo(std::env::var("RATEWATCH_DEFAULT_PROMO").ok());
    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("binding {host}:{port}"))?;
    info!(%host, port, "serving rate report");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
    info!("shutting down web report");
}

/// An explicit empty `promo` means "all promos"; an absent one falls back to
/// the configured default.
fn resolve_filter(state: &AppState, query: ReportQuery) -> Option<String> {
    match query.promo {
        Some(promo) if promo.is_empty() => None,
        Some(promo) => Some(promo),
        None => state.default_promo.clone(),
    }
}

async fn report_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReportQuery>,
) -> Response {
    let filter = resolve_filter(&state, query);
    let rows = match state.store.query(filter.as_deref()).await {
        Ok(rows) => rows,
        Err(err) => return server_error(err.into()),
    };
    let promo_codes = match state.store.all_promo_codes().await {
        Ok(codes) => codes,
        Err(err) => return server_error(err.into()),
    };
    render_html(ReportTemplate {
        rows,
        promo_codes,
        selected: filter.unwrap_or_default(),
    })
}

async fn rates_json_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReportQuery>,
) -> Response {
    let filter = resolve_filter(&state, query);
    match state.store.query(filter.as_deref()).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn promo_codes_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.all_promo_codes().await {
        Ok(codes) => Json(codes).into_response(),
        Err(err) => server_error(err.into()),
    }
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Server error: {err:#}")),
    )
        .into_response()
}
