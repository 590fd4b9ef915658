//! castscope: Casting Defect Inspection
//!
//! Classifies product images of cast parts as normal or defective, explains
//! each verdict with a gradient-weighted class activation map, and keeps a
//! durable, queryable inspection history.
//!
//! ## Architecture
//!
//! - **Classifier** (`model`): convolutional network behind an exclusive lease
//! - **Explainability Engine** (`explain`): Grad-CAM over the last conv block
//! - **History Store** (`history`): append-only Sled log with windowed queries
//! - **Orchestrator** (`orchestrator`): classify -> explain -> record, plus
//!   optional narrative analysis (`analysis`) and report rendering (`report`)
//! - **API** (`api`): Axum HTTP surface

pub mod analysis;
pub mod api;
pub mod config;
pub mod explain;
pub mod history;
pub mod imaging;
pub mod model;
pub mod orchestrator;
pub mod report;
pub mod types;

pub use config::InspectionConfig;
pub use explain::{ExplainError, Explanation, GradCam};
pub use history::{HistoryError, HistoryStore};
pub use model::{Classifier, ClassifierError, ForwardArtifacts, ModelLease, Prediction};
pub use orchestrator::{InspectionError, InspectionOrchestrator, OrchestratorParts};
pub use types::{
    ClassProbabilities, DefectClass, ExplanationMap, HistoryRecord, HourlyBucket, InspectionResult,
    InspectionStage, StatisticsSnapshot,
};
