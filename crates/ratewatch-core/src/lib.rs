//! Core domain model for ratewatch: promo reference data, query tuples,
//! persisted rate observations and ranked report rows.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "ratewatch-core";

/// Reference row mapping a promo code to its display label. The empty code is
/// the site's "no promo" default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoCode {
    pub code: String,
    pub description: String,
}

impl PromoCode {
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
        }
    }
}

/// One (check-in date, stay length, promo code) combination to query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryTuple {
    pub check_in: NaiveDate,
    pub nights: u32,
    pub promo_code: String,
}

impl QueryTuple {
    pub fn check_out(&self) -> NaiveDate {
        self.check_in + Days::new(u64::from(self.nights))
    }
}

/// Hotel name and nightly rate pulled from a single property block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedRate {
    pub hotel_name: String,
    pub nightly_rate: f64,
}

/// Persisted unit of refresh output. `check_out_date` is always
/// `check_in_date + nights` for the tuple that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateObservation {
    pub hotel_name: String,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    pub source_url: String,
    pub promo_code: Option<String>,
    pub nightly_rate: f64,
}

impl RateObservation {
    pub fn from_tuple(tuple: &QueryTuple, source_url: &str, rate: ExtractedRate) -> Self {
        Self {
            hotel_name: rate.hotel_name,
            check_in_date: tuple.check_in,
            check_out_date: tuple.check_out(),
            source_url: source_url.to_string(),
            promo_code: Some(tuple.promo_code.clone()),
            nightly_rate: rate.nightly_rate,
        }
    }

    pub fn stay_length(&self) -> i64 {
        (self.check_out_date - self.check_in_date).num_days()
    }
}

/// Ranked stay summary handed to presentation layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub total_cost: i64,
    pub hotel_name: String,
    pub num_nights: i64,
    pub description: String,
    pub check_in_date: String,
    pub check_out_date: String,
    pub nightly_rate: i64,
    pub search_url: String,
}

impl ReportRow {
    /// `[url](url)` form used by markdown renderers.
    pub fn search_link_markdown(&self) -> String {
        format!("[{0}]({0})", self.search_url)
    }
}
