//! Period analysis: cost estimation and executive summaries.

pub mod cost;
pub mod summary;
