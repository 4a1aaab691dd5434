pub mod growth;
pub mod recommend;
pub mod trend_score;

pub use growth::{analyze_trend_growth, compare_keywords, identify_hot_keywords, trend_summary};
pub use recommend::recommend;
pub use trend_score::{trend_score, with_score};
