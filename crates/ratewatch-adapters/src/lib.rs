//! Reservation search page adapter: query URL construction and nightly rate
//! extraction from the search-results markup.

use ratewatch_core::{ExtractedRate, QueryTuple};
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::warn;

pub const CRATE_NAME: &str = "ratewatch-adapters";

pub const DEFAULT_BASE_URL: &str =
    "https://reservations.universalorlando.com/ibe/default.aspx?hgID=641";

const PROPERTY_BLOCK_SELECTOR: &str = "div.ws-property-item";
const HOTEL_NAME_SELECTOR: &str = "a.wsName";
const RATE_SELECTOR: &str = "span.ws-number";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("invalid selector {selector}: {message}")]
    Selector { selector: String, message: String },
    #[error("invalid base url {url}: {message}")]
    BaseUrl { url: String, message: String },
}

/// Search endpoint the tuples are issued against.
#[derive(Debug, Clone)]
pub struct SearchEndpoint {
    base: Url,
}

impl SearchEndpoint {
    pub fn new(base_url: &str) -> Result<Self, AdapterError> {
        let base = Url::parse(base_url).map_err(|e| AdapterError::BaseUrl {
            url: base_url.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { base })
    }

    /// Appends `checkin`, `nights` and `promo` to whatever query the base
    /// endpoint already carries.
    pub fn query_url(&self, tuple: &QueryTuple) -> String {
        let mut url = self.base.clone();
        url.query_pairs_mut()
            .append_pair("checkin", &tuple.check_in.format("%m/%d/%Y").to_string())
            .append_pair("nights", &tuple.nights.to_string())
            .append_pair("promo", &tuple.promo_code);
        url.to_string()
    }
}

/// Pulls (hotel name, nightly rate) pairs out of a search-results page.
#[derive(Debug, Clone)]
pub struct RateExtractor {
    block: Selector,
    name: Selector,
    rate: Selector,
}

impl RateExtractor {
    pub fn new() -> Result<Self, AdapterError> {
        Ok(Self {
            block: parse_selector(PROPERTY_BLOCK_SELECTOR)?,
            name: parse_selector(HOTEL_NAME_SELECTOR)?,
            rate: parse_selector(RATE_SELECTOR)?,
        })
    }

    /// Blocks missing a name or a parseable rate are logged and skipped. A
    /// page without property blocks yields an empty list.
    pub fn extract(&self, body: &str) -> Vec<ExtractedRate> {
        let document = Html::parse_document(body);
        let mut out = Vec::new();

        for (index, block) in document.select(&self.block).enumerate() {
            let Some(hotel_name) = first_text(block, &self.name) else {
                warn!(index, "property block without hotel name; skipping");
                continue;
            };
            let Some(rate_text) = first_text(block, &self.rate) else {
                warn!(index, hotel = %hotel_name, "property block without rate; skipping");
                continue;
            };
            let Some(nightly_rate) = first_number(&rate_text) else {
                warn!(index, hotel = %hotel_name, rate_text = %rate_text, "rate text has no digits; skipping");
                continue;
            };
            out.push(ExtractedRate {
                hotel_name,
                nightly_rate,
            });
        }

        out
    }
}

fn parse_selector(selector: &str) -> Result<Selector, AdapterError> {
    Selector::parse(selector).map_err(|e| AdapterError::Selector {
        selector: selector.to_string(),
        message: e.to_string(),
    })
}

fn text_or_none(value: String) -> Option<String> {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

fn first_text(block: ElementRef<'_>, selector: &Selector) -> Option<String> {
    block
        .select(selector)
        .next()
        .and_then(|n| text_or_none(n.text().collect::<String>()))
}

/// First integer or decimal run in `text`. Commas between digits are read as
/// thousands separators.
pub fn first_number(text: &str) -> Option<f64> {
    let mut current = String::new();
    let mut seen_dot = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch.is_ascii_digit() {
            current.push(ch);
            continue;
        }
        if current.is_empty() {
            continue;
        }
        let next_is_digit = chars.peek().is_some_and(|c| c.is_ascii_digit());
        if ch == ',' && !seen_dot && next_is_digit {
            continue;
        }
        if ch == '.' && !seen_dot && next_is_digit {
            current.push(ch);
            seen_dot = true;
            continue;
        }
        break;
    }

    if current.is_empty() {
        None
    } else {
        current.parse::<f64>().ok()
    }
}
