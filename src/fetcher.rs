use std::time::Duration;

use chrono::DateTime;
use serde::Serialize;
use tracing::{debug, warn};

use crate::collector::{AppSource, TrendSource};
use crate::config::{Config, HTTP_TIMEOUT_SECS, ITUNES_MAX_LIMIT, PLATFORM_GOOGLE_TRENDS};
use crate::error::{AppError, Result};
use crate::types::{AppRecord, FetchedApp, TrendPoint};

fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .cookie_store(true)
        .user_agent("Mozilla/5.0 (compatible; ferret-scanner/0.1)")
        .build()?)
}

// ---------------------------------------------------------------------------
// App Store (iTunes Search API)
// ---------------------------------------------------------------------------

pub struct ItunesClient {
    client: reqwest::Client,
    base_url: String,
    country: String,
}

impl ItunesClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: cfg.itunes_api_url.trim_end_matches('/').to_string(),
            country: cfg.scrape_country.clone(),
        })
    }

    /// Search the software catalogue. Returns parsed records alongside the raw JSON.
    pub async fn search_apps(&self, term: &str, limit: usize) -> Result<Vec<FetchedApp>> {
        let limit = limit.clamp(1, ITUNES_MAX_LIMIT).to_string();
        let url = format!("{}/search", self.base_url);
        let resp: serde_json::Value = self
            .client
            .get(&url)
            .query(&[
                ("term", term),
                ("country", self.country.as_str()),
                ("entity", "software"),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let apps = parse_itunes_results(&resp)?;
        debug!(term, found = apps.len(), "iTunes search");
        Ok(apps)
    }
}

impl AppSource for ItunesClient {
    async fn search(&self, term: &str, limit: usize) -> Result<Vec<FetchedApp>> {
        self.search_apps(term, limit).await
    }
}

/// Parse the `results` array of an iTunes Search API response.
pub fn parse_itunes_results(resp: &serde_json::Value) -> Result<Vec<FetchedApp>> {
    let items = resp
        .get("results")
        .and_then(|r| r.as_array())
        .ok_or_else(|| AppError::Upstream("iTunes response has no results array".to_string()))?;

    Ok(items
        .iter()
        .map(|raw| FetchedApp {
            record: parse_itunes_app(raw),
            raw: raw.clone(),
        })
        .collect())
}

/// Map one loosely-typed iTunes listing onto an [`AppRecord`].
/// Wrong-typed or missing fields come through as `None` / empty.
pub fn parse_itunes_app(v: &serde_json::Value) -> AppRecord {
    let text = |key: &str| {
        v.get(key)
            .and_then(|x| x.as_str())
            .unwrap_or("")
            .to_string()
    };

    AppRecord {
        app_id: v.get("trackId").map(id_string).unwrap_or_default(),
        name: text("trackName"),
        category: text("primaryGenreName"),
        rating: number(v, "averageUserRating"),
        review_count: count(v, "userRatingCount"),
        price: number(v, "price"),
        last_update: v
            .get("currentVersionReleaseDate")
            .and_then(|x| x.as_str())
            .map(|s| s.to_string()),
        current_version_reviews: count(v, "userRatingCountForCurrentVersion"),
        url: text("trackViewUrl"),
    }
}

/// Listing detail shown alongside a stored opportunity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AppDetails {
    pub description: String,
    pub release_date: String,
    pub current_version: String,
    pub current_version_date: String,
    pub seller_name: String,
    pub file_size: u64,
    pub content_advisory_rating: String,
    pub language_codes: Vec<String>,
    pub screenshot_urls: Vec<String>,
    pub artwork_url: String,
    pub current_version_rating: f64,
    pub current_version_reviews: u64,
    pub minimum_os_version: String,
    pub supported_devices: Vec<String>,
    pub is_game_center_enabled: bool,
    pub bundle_id: String,
}

/// At most this many screenshots are surfaced per app.
const MAX_SCREENSHOTS: usize = 5;

impl AppDetails {
    pub fn from_itunes(v: &serde_json::Value) -> Self {
        let text = |key: &str| {
            v.get(key)
                .and_then(|x| x.as_str())
                .unwrap_or("")
                .to_string()
        };
        let artwork = [text("artworkUrl512"), text("artworkUrl100")]
            .into_iter()
            .find(|u| !u.is_empty())
            .unwrap_or_default();

        Self {
            description: text("description"),
            release_date: text("releaseDate"),
            current_version: text("version"),
            current_version_date: text("currentVersionReleaseDate"),
            seller_name: text("sellerName"),
            file_size: count(v, "fileSizeBytes").unwrap_or(0),
            content_advisory_rating: text("contentAdvisoryRating"),
            language_codes: string_list(v.get("languageCodesISO2A")),
            screenshot_urls: string_list(v.get("screenshotUrls"))
                .into_iter()
                .take(MAX_SCREENSHOTS)
                .collect(),
            artwork_url: artwork,
            current_version_rating: number(v, "averageUserRatingForCurrentVersion").unwrap_or(0.0),
            current_version_reviews: count(v, "userRatingCountForCurrentVersion").unwrap_or(0),
            minimum_os_version: text("minimumOsVersion"),
            supported_devices: string_list(v.get("supportedDevices")),
            is_game_center_enabled: v
                .get("isGameCenterEnabled")
                .and_then(|x| x.as_bool())
                .unwrap_or(false),
            bundle_id: text("bundleId"),
        }
    }
}

/// Array of strings, or a single comma-separated string.
fn string_list(v: Option<&serde_json::Value>) -> Vec<String> {
    match v {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|x| x.as_str())
            .map(|s| s.to_string())
            .collect(),
        Some(serde_json::Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect(),
        _ => Vec::new(),
    }
}

fn id_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

/// Number or numeric string; anything else is treated as absent.
fn number(v: &serde_json::Value, key: &str) -> Option<f64> {
    let x = v.get(key)?;
    x.as_f64()
        .or_else(|| x.as_str().and_then(|s| s.trim().parse().ok()))
        .filter(|n: &f64| n.is_finite())
}

fn count(v: &serde_json::Value, key: &str) -> Option<u64> {
    number(v, key).filter(|n| *n >= 0.0).map(|n| n as u64)
}

// ---------------------------------------------------------------------------
// Google Trends
// ---------------------------------------------------------------------------

/// Interest-over-time client for the public Google Trends widget API.
/// Two requests per keyword: `explore` yields a signed widget token, then
/// `widgetdata/multiline` returns the timeline.
pub struct GoogleTrendsClient {
    client: reqwest::Client,
    base_url: String,
}

impl GoogleTrendsClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: cfg.trends_api_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn interest_over_time(&self, keyword: &str, timeframe: &str) -> Result<Vec<TrendPoint>> {
        let explore_req = serde_json::json!({
            "comparisonItem": [{ "keyword": keyword, "geo": "", "time": timeframe }],
            "category": 0,
            "property": "",
        })
        .to_string();

        let body = self
            .client
            .get(format!("{}/explore", self.base_url))
            .query(&[("hl", "en-US"), ("tz", "0"), ("req", explore_req.as_str())])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let (token, widget_req) = parse_explore_widget(&body)?;

        let body = self
            .client
            .get(format!("{}/widgetdata/multiline", self.base_url))
            .query(&[
                ("hl", "en-US"),
                ("tz", "0"),
                ("req", widget_req.as_str()),
                ("token", token.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        parse_timeline(&body)
    }
}

impl TrendSource for GoogleTrendsClient {
    async fn fetch(&self, keyword: &str, platform: &str, timeframe: &str) -> Result<Vec<TrendPoint>> {
        if platform != PLATFORM_GOOGLE_TRENDS {
            warn!(keyword, platform, "no trend source for platform, skipping");
            return Ok(Vec::new());
        }
        self.interest_over_time(keyword, timeframe).await
    }
}

/// Google prefixes JSON bodies with an anti-XSSI guard such as `)]}'`.
fn strip_xssi(body: &str) -> &str {
    match body.find('{') {
        Some(i) => &body[i..],
        None => body,
    }
}

/// Pull the TIMESERIES widget's token and request payload from an explore response.
pub fn parse_explore_widget(body: &str) -> Result<(String, String)> {
    let v: serde_json::Value = serde_json::from_str(strip_xssi(body))?;
    let widget = v
        .get("widgets")
        .and_then(|w| w.as_array())
        .and_then(|ws| {
            ws.iter()
                .find(|w| w.get("id").and_then(|id| id.as_str()) == Some("TIMESERIES"))
        })
        .ok_or_else(|| AppError::Upstream("explore response has no TIMESERIES widget".to_string()))?;

    let token = widget
        .get("token")
        .and_then(|t| t.as_str())
        .ok_or_else(|| AppError::Upstream("TIMESERIES widget has no token".to_string()))?
        .to_string();
    let request = widget
        .get("request")
        .ok_or_else(|| AppError::Upstream("TIMESERIES widget has no request".to_string()))?
        .to_string();

    Ok((token, request))
}

/// Parse `default.timelineData[]` into dated points. Entries flagged as having
/// no data or carrying no numeric value are skipped.
pub fn parse_timeline(body: &str) -> Result<Vec<TrendPoint>> {
    let v: serde_json::Value = serde_json::from_str(strip_xssi(body))?;
    let timeline = v
        .pointer("/default/timelineData")
        .and_then(|t| t.as_array())
        .ok_or_else(|| AppError::Upstream("multiline response has no timelineData".to_string()))?;

    let points = timeline
        .iter()
        .filter_map(|entry| {
            if entry.pointer("/hasData/0").and_then(|h| h.as_bool()) == Some(false) {
                return None;
            }
            let value = entry.pointer("/value/0").and_then(|x| x.as_f64())?;
            let date = entry
                .get("time")
                .and_then(|t| t.as_str())
                .and_then(|t| t.parse::<i64>().ok())
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .map(|dt| dt.format("%Y-%m-%d").to_string())
                .or_else(|| {
                    entry
                        .get("formattedAxisTime")
                        .and_then(|t| t.as_str())
                        .map(|s| s.to_string())
                })?;
            Some(TrendPoint { date, value })
        })
        .collect();

    Ok(points)
}
