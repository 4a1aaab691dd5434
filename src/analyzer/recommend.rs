use std::cmp::Ordering;

use crate::config::recommendation_gates::{MAX_VOLATILITY, MIN_DATA_POINTS};
use crate::config::RecommendationThresholds;
use crate::types::{Recommendation, ScoredTrend, TrendClass};

/// Keep candidates that pass every gate and rank them by composite score.
pub fn recommend(candidates: &[ScoredTrend], thresholds: &RecommendationThresholds) -> Vec<Recommendation> {
    let mut out: Vec<Recommendation> = candidates
        .iter()
        .filter(|c| qualifies(c, thresholds))
        .map(|c| {
            let a = &c.analysis;
            Recommendation {
                keyword: a.keyword.clone(),
                platform: a.platform.clone(),
                opportunity_score: round_to(composite_score(c), 2),
                trend_score: round_to(c.trend_score, 3),
                growth_rate: round_to(a.growth_rate, 2),
                avg_value: round_to(a.avg_value, 2),
                volatility: round_to(a.volatility, 2),
                data_points: a.data_points,
                trend: a.trend,
                reason: reason(c),
            }
        })
        .collect();

    out.sort_by(|a, b| {
        b.opportunity_score
            .partial_cmp(&a.opportunity_score)
            .unwrap_or(Ordering::Equal)
    });
    out
}

pub fn qualifies(c: &ScoredTrend, t: &RecommendationThresholds) -> bool {
    let a = &c.analysis;
    c.trend_score >= t.min_trend_score
        && a.growth_rate >= t.min_growth_rate
        && a.avg_value >= t.min_avg_value
        && a.data_points >= MIN_DATA_POINTS
        && a.volatility < MAX_VOLATILITY
}

/// 0–100 blend: trend score 40%, growth 30%, heat 20%, stability 10%.
pub fn composite_score(c: &ScoredTrend) -> f64 {
    let a = &c.analysis;
    100.0
        * (c.trend_score * 0.40
            + (a.growth_rate / 100.0).min(1.0) * 0.30
            + (a.avg_value / 100.0).min(1.0) * 0.20
            + ((100.0 - a.volatility) / 100.0).min(1.0) * 0.10)
}

/// Human-readable justification, one fragment per satisfied check, in a
/// fixed order.
pub fn reason(c: &ScoredTrend) -> String {
    let a = &c.analysis;
    let mut parts: Vec<String> = Vec::new();

    if a.growth_rate > 30.0 {
        parts.push(format!("rapid growth ({:.1}%)", a.growth_rate));
    } else if a.growth_rate > 15.0 {
        parts.push(format!("steady growth ({:.1}%)", a.growth_rate));
    }

    if a.avg_value > 70.0 {
        parts.push("high search interest".to_string());
    } else if a.avg_value > 40.0 {
        parts.push("moderate search interest".to_string());
    }

    if a.volatility < 20.0 {
        parts.push("stable trend".to_string());
    } else if a.volatility < 35.0 {
        parts.push("relatively stable trend".to_string());
    }

    match a.trend {
        TrendClass::Rising => parts.push("clear upward trend".to_string()),
        TrendClass::SlightlyRising => parts.push("emerging upward trend".to_string()),
        _ => {}
    }

    if parts.is_empty() {
        parts.push("strong overall score".to_string());
    }
    parts.join("; ")
}

fn round_to(x: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (x * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TrendAnalysis;

    fn candidate(kw: &str, trend_score: f64, growth: f64, avg: f64, vol: f64, points: usize) -> ScoredTrend {
        ScoredTrend {
            analysis: TrendAnalysis {
                growth_rate: growth,
                trend: TrendClass::from_growth_rate(growth),
                avg_value: avg,
                volatility: vol,
                data_points: points,
                ..TrendAnalysis::empty(kw, "google_trends")
            },
            trend_score,
        }
    }

    #[test]
    fn reference_candidate_scores_53() {
        let c = candidate("budget app", 0.7, 20.0, 50.0, 10.0, 40);
        let recs = recommend(&[c], &RecommendationThresholds::default());
        assert_eq!(recs.len(), 1);
        assert!((recs[0].opportunity_score - 53.0).abs() < 1e-9, "{}", recs[0].opportunity_score);
        assert_eq!(recs[0].trend, TrendClass::SlightlyRising);
    }

    #[test]
    fn each_gate_rejects() {
        let t = RecommendationThresholds::default();
        let ok = candidate("k", 0.7, 20.0, 50.0, 10.0, 40);
        assert!(qualifies(&ok, &t));
        assert!(!qualifies(&candidate("k", 0.59, 20.0, 50.0, 10.0, 40), &t));
        assert!(!qualifies(&candidate("k", 0.7, 14.9, 50.0, 10.0, 40), &t));
        assert!(!qualifies(&candidate("k", 0.7, 20.0, 29.9, 10.0, 40), &t));
        assert!(!qualifies(&candidate("k", 0.7, 20.0, 50.0, 10.0, 29), &t));
        assert!(!qualifies(&candidate("k", 0.7, 20.0, 50.0, 40.0, 40), &t));
    }

    #[test]
    fn gates_are_inclusive_where_configurable() {
        let t = RecommendationThresholds::default();
        assert!(qualifies(&candidate("k", 0.6, 15.0, 30.0, 39.99, 30), &t));
    }

    #[test]
    fn sorted_by_composite_descending() {
        let recs = recommend(
            &[
                candidate("slow", 0.6, 16.0, 31.0, 30.0, 40),
                candidate("fast", 0.9, 120.0, 90.0, 5.0, 90),
                candidate("mid", 0.7, 40.0, 60.0, 15.0, 60),
                candidate("rejected", 0.2, 1.0, 1.0, 90.0, 5),
            ],
            &RecommendationThresholds::default(),
        );
        let keywords: Vec<_> = recs.iter().map(|r| r.keyword.as_str()).collect();
        assert_eq!(keywords, vec!["fast", "mid", "slow"]);
    }

    #[test]
    fn growth_and_heat_are_capped_in_composite() {
        let c = candidate("k", 1.0, 500.0, 250.0, 0.0, 90);
        assert!((composite_score(&c) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn reason_fragments_in_order() {
        let c = candidate("k", 0.9, 45.0, 75.0, 12.0, 60);
        assert_eq!(
            reason(&c),
            "rapid growth (45.0%); high search interest; stable trend; clear upward trend"
        );
        let c = candidate("k", 0.7, 18.0, 45.0, 25.0, 60);
        assert_eq!(
            reason(&c),
            "steady growth (18.0%); moderate search interest; relatively stable trend; emerging upward trend"
        );
    }

    #[test]
    fn reason_falls_back_to_generic() {
        let c = candidate("k", 0.9, 2.0, 10.0, 38.0, 60);
        assert_eq!(reason(&c), "strong overall score");
    }

    #[test]
    fn output_fields_are_rounded() {
        let c = candidate("k", 0.66666, 33.3333, 44.4444, 11.1111, 60);
        let r = &recommend(&[c], &RecommendationThresholds::default())[0];
        assert_eq!(r.trend_score, 0.667);
        assert_eq!(r.growth_rate, 33.33);
        assert_eq!(r.avg_value, 44.44);
        assert_eq!(r.volatility, 11.11);
    }
}
