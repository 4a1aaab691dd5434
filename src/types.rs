use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// App records
// ---------------------------------------------------------------------------

/// One App Store listing as fetched. Every signal field may be missing upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppRecord {
    pub app_id: String,
    pub name: String,
    pub category: String,
    /// Average user rating, 0–5.
    pub rating: Option<f64>,
    pub review_count: Option<u64>,
    pub price: Option<f64>,
    /// Release timestamp of the current version, as the upstream text.
    pub last_update: Option<String>,
    pub current_version_reviews: Option<u64>,
    pub url: String,
}

/// A parsed listing together with the upstream JSON it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedApp {
    pub record: AppRecord,
    pub raw: serde_json::Value,
}

/// Per-app sub-scores and their weighted total.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    pub market_size: f64,
    pub competition: f64,
    pub user_satisfaction: f64,
    pub growth_trend: f64,
    pub monetization: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityScore {
    pub app_id: String,
    #[serde(flatten)]
    pub sub_scores: SubScores,
    /// Σ sub-score × weight, rounded to 3 decimals.
    pub total: f64,
}

/// Row of the opportunity result table. Field names are consumed by
/// persistence and export; keep them stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub app_id: String,
    pub name: String,
    pub category: String,
    pub rating: f64,
    pub review_count: u64,
    pub price: f64,
    pub opportunity_score: f64,
    pub url: String,
}

// ---------------------------------------------------------------------------
// Trend series
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    /// Free-form date text; parsed leniently at analysis time.
    pub date: String,
    pub value: f64,
}

/// Search-interest time series for one (keyword, platform) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSeries {
    pub keyword: String,
    pub platform: String,
    pub points: Vec<TrendPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendClass {
    Rising,
    SlightlyRising,
    #[default]
    Stable,
    SlightlyDeclining,
    Declining,
}

impl TrendClass {
    /// Step function over the growth rate (%). Both ±20 and ±5 fall on the
    /// calmer side of each boundary.
    pub fn from_growth_rate(growth_rate: f64) -> Self {
        if growth_rate > 20.0 {
            TrendClass::Rising
        } else if growth_rate > 5.0 {
            TrendClass::SlightlyRising
        } else if growth_rate < -20.0 {
            TrendClass::Declining
        } else if growth_rate < -5.0 {
            TrendClass::SlightlyDeclining
        } else {
            TrendClass::Stable
        }
    }
}

impl std::fmt::Display for TrendClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TrendClass::Rising => "rising",
            TrendClass::SlightlyRising => "slightly_rising",
            TrendClass::Stable => "stable",
            TrendClass::SlightlyDeclining => "slightly_declining",
            TrendClass::Declining => "declining",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub keyword: String,
    pub platform: String,
    /// Signed percentage.
    pub growth_rate: f64,
    pub trend: TrendClass,
    pub avg_value: f64,
    pub max_value: f64,
    pub min_value: f64,
    /// Coefficient of variation, in percent.
    pub volatility: f64,
    pub data_points: usize,
}

impl TrendAnalysis {
    /// Zeroed, stable analysis for a series with no usable points.
    pub fn empty(keyword: &str, platform: &str) -> Self {
        Self {
            keyword: keyword.to_string(),
            platform: platform.to_string(),
            growth_rate: 0.0,
            trend: TrendClass::Stable,
            avg_value: 0.0,
            max_value: 0.0,
            min_value: 0.0,
            volatility: 0.0,
            data_points: 0,
        }
    }
}

/// An analysis paired with its composite trend score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredTrend {
    #[serde(flatten)]
    pub analysis: TrendAnalysis,
    pub trend_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPeriod {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSummary {
    pub keyword: String,
    pub platform: String,
    pub trend: TrendClass,
    pub growth_rate: f64,
    pub trend_score: f64,
    pub avg_value: f64,
    pub data_points: usize,
    pub period: TrendPeriod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub keyword: String,
    pub platform: String,
    /// Composite 0–100 score.
    pub opportunity_score: f64,
    pub trend_score: f64,
    pub growth_rate: f64,
    pub avg_value: f64,
    pub volatility: f64,
    pub data_points: usize,
    pub trend: TrendClass,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trend_class_boundaries() {
        assert_eq!(TrendClass::from_growth_rate(20.0), TrendClass::SlightlyRising);
        assert_eq!(TrendClass::from_growth_rate(20.01), TrendClass::Rising);
        assert_eq!(TrendClass::from_growth_rate(5.0), TrendClass::Stable);
        assert_eq!(TrendClass::from_growth_rate(-5.0), TrendClass::Stable);
        assert_eq!(TrendClass::from_growth_rate(-5.5), TrendClass::SlightlyDeclining);
        assert_eq!(TrendClass::from_growth_rate(-20.0), TrendClass::SlightlyDeclining);
        assert_eq!(TrendClass::from_growth_rate(-20.5), TrendClass::Declining);
    }

    #[test]
    fn trend_class_serializes_snake_case() {
        let json = serde_json::to_string(&TrendClass::SlightlyRising).unwrap();
        assert_eq!(json, "\"slightly_rising\"");
        assert_eq!(TrendClass::SlightlyDeclining.to_string(), "slightly_declining");
    }

    #[test]
    fn scored_trend_flattens_analysis_fields() {
        let scored = ScoredTrend {
            analysis: TrendAnalysis::empty("notes", "google_trends"),
            trend_score: 0.35,
        };
        let v = serde_json::to_value(&scored).unwrap();
        assert_eq!(v["keyword"], "notes");
        assert_eq!(v["trend"], "stable");
        assert_eq!(v["trend_score"], 0.35);
    }
}
