//! Shared data structures for the inspection pipeline
//!
//! - `inspection`: class labels, probabilities, explanation maps, the
//!   per-request `InspectionResult` and its durable `HistoryRecord`
//! - `statistics`: aggregates derived from history on demand

mod inspection;
mod statistics;

pub use inspection::*;
pub use statistics::*;
