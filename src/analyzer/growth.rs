use std::cmp::Ordering;

use chrono::NaiveDateTime;

use crate::analyzer::trend_score::trend_score;
use crate::config::growth_windows::{LONG_SERIES_MIN, WINDOW};
use crate::dates::parse_lenient;
use crate::error::{AppError, Result};
use crate::scorer::opportunity::round3;
use crate::types::{TrendAnalysis, TrendClass, TrendPeriod, TrendSeries, TrendSummary};

/// Parse every point's date, drop the ones that fail, and order the rest
/// by date. Points sharing a date keep their input order.
pub fn prepare_points(series: &TrendSeries) -> Vec<(NaiveDateTime, f64)> {
    let mut points: Vec<(NaiveDateTime, f64)> = series
        .points
        .iter()
        .filter_map(|p| parse_lenient(&p.date).map(|d| (d, p.value)))
        .collect();
    points.sort_by_key(|(d, _)| *d);
    points
}

pub fn analyze_trend_growth(series: &TrendSeries) -> TrendAnalysis {
    let values: Vec<f64> = prepare_points(series).into_iter().map(|(_, v)| v).collect();
    analyze_values(&series.keyword, &series.platform, &values)
}

/// Growth, classification and summary statistics over values already in
/// chronological order.
pub fn analyze_values(keyword: &str, platform: &str, values: &[f64]) -> TrendAnalysis {
    if values.is_empty() {
        return TrendAnalysis::empty(keyword, platform);
    }

    let growth_rate = growth_rate(values);
    let avg_value = mean(values);
    let max_value = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min_value = values.iter().copied().fold(f64::INFINITY, f64::min);
    let volatility = if avg_value > 0.0 {
        std_dev(values, avg_value) / avg_value * 100.0
    } else {
        0.0
    };

    TrendAnalysis {
        keyword: keyword.to_string(),
        platform: platform.to_string(),
        growth_rate,
        trend: TrendClass::from_growth_rate(growth_rate),
        avg_value,
        max_value,
        min_value,
        volatility,
        data_points: values.len(),
    }
}

/// Percentage change between the last two 30-point windows for long series,
/// or between the first and last point otherwise. A zero baseline yields 0.
pub fn growth_rate(values: &[f64]) -> f64 {
    let n = values.len();
    if n >= LONG_SERIES_MIN {
        let previous = mean(&values[n - 2 * WINDOW..n - WINDOW]);
        let recent = mean(&values[n - WINDOW..]);
        percent_change(previous, recent)
    } else if n >= 2 {
        percent_change(values[0], values[n - 1])
    } else {
        0.0
    }
}

fn percent_change(base: f64, current: f64) -> f64 {
    if base > 0.0 {
        (current - base) / base * 100.0
    } else {
        0.0
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
fn std_dev(values: &[f64], mean: f64) -> f64 {
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Analyse each requested keyword that has data, in request order.
///
/// Comparing fewer than two keywords is a caller error, as is a request
/// where none of the keywords has any stored data.
pub fn compare_keywords(requested: &[String], available: &[TrendSeries]) -> Result<Vec<TrendAnalysis>> {
    if requested.len() < 2 {
        return Err(AppError::InvalidParameter(
            "at least two keywords are required for a comparison".to_string(),
        ));
    }
    let analyses: Vec<TrendAnalysis> = requested
        .iter()
        .filter_map(|kw| available.iter().find(|s| &s.keyword == kw))
        .map(analyze_trend_growth)
        .collect();
    if analyses.is_empty() {
        return Err(AppError::NoData("none of the keywords has trend data".to_string()));
    }
    Ok(analyses)
}

/// Keywords whose growth meets `min_growth_rate`, fastest-growing first.
pub fn identify_hot_keywords(analyses: &[TrendAnalysis], min_growth_rate: f64) -> Vec<TrendAnalysis> {
    let mut hot: Vec<TrendAnalysis> = analyses
        .iter()
        .filter(|a| a.growth_rate >= min_growth_rate)
        .cloned()
        .collect();
    hot.sort_by(|a, b| b.growth_rate.partial_cmp(&a.growth_rate).unwrap_or(Ordering::Equal));
    hot
}

pub fn trend_summary(series: &TrendSeries) -> TrendSummary {
    let points = prepare_points(series);
    let values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
    let analysis = analyze_values(&series.keyword, &series.platform, &values);
    let score = trend_score(&analysis);

    TrendSummary {
        keyword: analysis.keyword,
        platform: analysis.platform,
        trend: analysis.trend,
        growth_rate: analysis.growth_rate,
        trend_score: round3(score),
        avg_value: analysis.avg_value,
        data_points: analysis.data_points,
        period: TrendPeriod {
            start: points.first().map(|(d, _)| iso(d)),
            end: points.last().map(|(d, _)| iso(d)),
        },
    }
}

fn iso(d: &NaiveDateTime) -> String {
    d.format("%Y-%m-%dT%H:%M:%S").to_string()
}
