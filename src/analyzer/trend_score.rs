use crate::types::{ScoredTrend, TrendAnalysis};

/// Composite 0–1 trend score: growth (≤0.5) + average heat (≤0.3) +
/// stability (≤0.2), clamped to 1.
///
/// Heat assumes the reference 0–100 search-interest scale.
pub fn trend_score(a: &TrendAnalysis) -> f64 {
    (growth_component(a.growth_rate) + heat_component(a.avg_value) + stability_component(a.volatility))
        .min(1.0)
}

pub fn with_score(analysis: TrendAnalysis) -> ScoredTrend {
    let trend_score = trend_score(&analysis);
    ScoredTrend { analysis, trend_score }
}

fn growth_component(growth_rate: f64) -> f64 {
    if growth_rate > 50.0 {
        0.5
    } else if growth_rate > 20.0 {
        0.4
    } else if growth_rate > 10.0 {
        0.3
    } else if growth_rate > 5.0 {
        0.2
    } else {
        0.1
    }
}

fn heat_component(avg_value: f64) -> f64 {
    if avg_value > 80.0 {
        0.3
    } else if avg_value > 50.0 {
        0.2
    } else if avg_value > 20.0 {
        0.15
    } else {
        0.1
    }
}

fn stability_component(volatility: f64) -> f64 {
    if volatility < 10.0 {
        0.2
    } else if volatility < 20.0 {
        0.15
    } else if volatility < 30.0 {
        0.1
    } else {
        0.05
    }
}
