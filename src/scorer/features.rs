//! Fixed-breakpoint sub-scores extracted from a single App Store listing.
//!
//! Every function here is total: a missing or malformed field degrades to a
//! conservative default instead of failing, so one bad record never aborts a
//! scoring pass.

use chrono::{DateTime, Utc};

use crate::dates::parse_lenient_utc;
use crate::types::{AppRecord, SubScores};

/// Score substituted whenever growth cannot be inferred.
pub const DEFAULT_GROWTH: f64 = 0.5;

pub fn extract(app: &AppRecord, now: DateTime<Utc>) -> SubScores {
    SubScores {
        market_size: market_size(app),
        competition: competition(app),
        user_satisfaction: user_satisfaction(app),
        growth_trend: growth_trend(app, now),
        monetization: monetization(app),
    }
}

/// Review volume as a proxy for the size of the niche.
pub fn market_size(app: &AppRecord) -> f64 {
    let reviews = app.review_count.unwrap_or(0);
    if reviews > 10_000 {
        1.0
    } else if reviews > 1_000 {
        0.7
    } else if reviews > 100 {
        0.5
    } else if reviews > 10 {
        0.3
    } else {
        0.1
    }
}

/// Mid-range ratings mean the category leader is beatable.
pub fn competition(app: &AppRecord) -> f64 {
    let rating = rating(app);
    if (4.0..=4.5).contains(&rating) {
        1.0
    } else if rating > 4.5 && rating <= 4.8 {
        0.6
    } else {
        0.3
    }
}

/// Room for improvement: users like the app but not unreservedly.
pub fn user_satisfaction(app: &AppRecord) -> f64 {
    let rating = rating(app);
    if (4.0..=4.5).contains(&rating) {
        1.0
    } else if rating > 4.5 && rating <= 4.7 {
        0.7
    } else {
        0.3
    }
}

/// Update recency, or the current-version share of reviews when no
/// release date is known.
pub fn growth_trend(app: &AppRecord, now: DateTime<Utc>) -> f64 {
    if let Some(raw) = app.last_update.as_deref().filter(|s| !s.trim().is_empty()) {
        let Some(released) = parse_lenient_utc(raw) else {
            return DEFAULT_GROWTH;
        };
        let days = (now - released).num_days();
        return if days <= 30 {
            1.0
        } else if days <= 90 {
            0.7
        } else if days <= 180 {
            0.5
        } else {
            0.3
        };
    }

    let total = app.review_count.unwrap_or(0);
    if total == 0 {
        return DEFAULT_GROWTH;
    }
    let current = app.current_version_reviews.unwrap_or(0);
    let ratio = current as f64 / total as f64;
    if ratio > 0.3 {
        0.8
    } else if ratio > 0.1 {
        0.6
    } else {
        DEFAULT_GROWTH
    }
}

/// Paid apps are presumed to monetize; in-app purchases are not modelled.
pub fn monetization(app: &AppRecord) -> f64 {
    if app.price.unwrap_or(0.0) > 0.0 {
        0.8
    } else {
        0.5
    }
}

fn rating(app: &AppRecord) -> f64 {
    app.rating.filter(|r| r.is_finite()).unwrap_or(0.0)
}
