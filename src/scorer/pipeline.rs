use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::{OpportunityThresholds, ScoringWeights};
use crate::scorer::opportunity::score;
use crate::types::{AppRecord, Opportunity};

/// Score every record, rank by score, apply both inclusive thresholds and
/// keep the first (highest-ranked) row per app id.
///
/// The sort is stable, so equal scores keep their input order.
pub fn analyze_opportunities(
    apps: &[AppRecord],
    weights: &ScoringWeights,
    thresholds: &OpportunityThresholds,
    now: DateTime<Utc>,
) -> Vec<Opportunity> {
    let mut rows: Vec<Opportunity> = apps
        .iter()
        .map(|app| Opportunity {
            app_id: app.app_id.clone(),
            name: app.name.clone(),
            category: app.category.clone(),
            rating: app.rating.unwrap_or(0.0),
            review_count: app.review_count.unwrap_or(0),
            price: app.price.unwrap_or(0.0),
            opportunity_score: score(app, weights, now).total,
            url: app.url.clone(),
        })
        .collect();

    rows.sort_by(|a, b| {
        b.opportunity_score
            .partial_cmp(&a.opportunity_score)
            .unwrap_or(Ordering::Equal)
    });

    let scored = rows.len();
    let mut seen = HashSet::new();
    let kept: Vec<Opportunity> = rows
        .into_iter()
        .filter(|r| {
            r.opportunity_score >= thresholds.min_score && r.review_count >= thresholds.min_reviews
        })
        .filter(|r| seen.insert(r.app_id.clone()))
        .collect();

    debug!(
        scored,
        kept = kept.len(),
        min_score = thresholds.min_score,
        min_reviews = thresholds.min_reviews,
        "opportunity pipeline pass"
    );
    kept
}
