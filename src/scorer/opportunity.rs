use chrono::{DateTime, Utc};

use crate::config::ScoringWeights;
use crate::scorer::features;
use crate::types::{AppRecord, OpportunityScore, SubScores};

/// Weighted opportunity score for one app. Pure: the same record, weights and
/// clock always produce the same score.
///
/// Weights are applied as given; they are not normalised to sum to 1.
pub fn score(app: &AppRecord, weights: &ScoringWeights, now: DateTime<Utc>) -> OpportunityScore {
    let sub_scores = features::extract(app, now);
    OpportunityScore {
        app_id: app.app_id.clone(),
        sub_scores,
        total: round3(weighted_total(&sub_scores, weights)),
    }
}

pub fn weighted_total(s: &SubScores, w: &ScoringWeights) -> f64 {
    s.market_size * w.market_size
        + s.competition * w.competition
        + s.user_satisfaction * w.user_satisfaction
        + s.growth_trend * w.growth_trend
        + s.monetization * w.monetization
}

pub fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}
