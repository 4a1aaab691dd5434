use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

pub const ITUNES_API_URL: &str = "https://itunes.apple.com";
pub const TRENDS_API_URL: &str = "https://trends.google.com/trends/api";

/// Timeout applied to every outbound HTTP request.
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// iTunes Search API rejects limits above this.
pub const ITUNES_MAX_LIMIT: usize = 200;

/// The only trend platform with a wired-up source.
pub const PLATFORM_GOOGLE_TRENDS: &str = "google_trends";

pub const DEFAULT_TIMEFRAME: &str = "today 12-m";

/// Fixed recommendation gates, not exposed through `/config`.
pub mod recommendation_gates {
    /// At least a month of daily points.
    pub const MIN_DATA_POINTS: usize = 30;
    /// Volatility (coefficient of variation, %) must stay strictly below this.
    pub const MAX_VOLATILITY: f64 = 40.0;
}

/// Growth-rate windows used by the trend analyzer.
pub mod growth_windows {
    /// Series at least this long compare two trailing windows.
    pub const LONG_SERIES_MIN: usize = 60;
    /// Width of each trailing window.
    pub const WINDOW: usize = 30;
}

// ---------------------------------------------------------------------------
// Scoring configuration
// ---------------------------------------------------------------------------

/// Weights for the five opportunity sub-scores.
/// Not normalized: a configuration whose weights sum to 2.0 yields totals up to 2.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub market_size: f64,
    pub competition: f64,
    pub user_satisfaction: f64,
    pub growth_trend: f64,
    pub monetization: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            market_size: 0.3,
            competition: 0.25,
            user_satisfaction: 0.2,
            growth_trend: 0.15,
            monetization: 0.1,
        }
    }
}

/// Inclusive cut-offs applied by the opportunity pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpportunityThresholds {
    pub min_score: f64,
    pub min_reviews: u64,
}

impl Default for OpportunityThresholds {
    fn default() -> Self {
        Self { min_score: 0.6, min_reviews: 10 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationThresholds {
    pub min_trend_score: f64,
    pub min_growth_rate: f64,
    pub min_avg_value: f64,
}

impl Default for RecommendationThresholds {
    fn default() -> Self {
        Self {
            min_trend_score: 0.6,
            min_growth_rate: 15.0,
            min_avg_value: 30.0,
        }
    }
}

/// Runtime-editable scoring section (`GET/POST /config`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    pub thresholds: OpportunityThresholds,
    pub recommendations: RecommendationThresholds,
}

// ---------------------------------------------------------------------------
// Process configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    pub itunes_api_url: String,
    pub trends_api_url: String,
    /// Storefront used for App Store searches (SCRAPE_COUNTRY)
    pub scrape_country: String,
    /// Pause between consecutive upstream requests (SCRAPE_DELAY_MS)
    pub scrape_delay_ms: u64,
    pub scoring: ScoringConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let weight_defaults = ScoringWeights::default();
        let threshold_defaults = OpportunityThresholds::default();
        let rec_defaults = RecommendationThresholds::default();

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "opportunities.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            itunes_api_url: std::env::var("ITUNES_API_URL")
                .unwrap_or_else(|_| ITUNES_API_URL.to_string()),
            trends_api_url: std::env::var("TRENDS_API_URL")
                .unwrap_or_else(|_| TRENDS_API_URL.to_string()),
            scrape_country: std::env::var("SCRAPE_COUNTRY").unwrap_or_else(|_| "us".to_string()),
            scrape_delay_ms: env_or("SCRAPE_DELAY_MS", 1000),
            scoring: ScoringConfig {
                weights: ScoringWeights {
                    market_size: env_or("WEIGHT_MARKET_SIZE", weight_defaults.market_size),
                    competition: env_or("WEIGHT_COMPETITION", weight_defaults.competition),
                    user_satisfaction: env_or(
                        "WEIGHT_USER_SATISFACTION",
                        weight_defaults.user_satisfaction,
                    ),
                    growth_trend: env_or("WEIGHT_GROWTH_TREND", weight_defaults.growth_trend),
                    monetization: env_or("WEIGHT_MONETIZATION", weight_defaults.monetization),
                },
                thresholds: OpportunityThresholds {
                    min_score: env_or("MIN_SCORE", threshold_defaults.min_score),
                    min_reviews: env_or("MIN_REVIEWS", threshold_defaults.min_reviews),
                },
                recommendations: RecommendationThresholds {
                    min_trend_score: env_or("MIN_TREND_SCORE", rec_defaults.min_trend_score),
                    min_growth_rate: env_or("MIN_GROWTH_RATE", rec_defaults.min_growth_rate),
                    min_avg_value: env_or("MIN_AVG_VALUE", rec_defaults.min_avg_value),
                },
            },
        })
    }
}

/// Read `key` and parse it, falling back to `default` when unset or malformed.
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}
