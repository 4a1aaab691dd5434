pub mod features;
pub mod opportunity;
pub mod pipeline;

pub use opportunity::score;
pub use pipeline::analyze_opportunities;
