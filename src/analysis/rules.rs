//! Offline analyst: fixed recommendations by confidence band.

use async_trait::async_trait;

use super::{AnalysisError, Narrative, NarrativeAnalyst};
use crate::config::defaults::{HIGH_CONFIDENCE, MEDIUM_CONFIDENCE};
use crate::config::ClassLabels;
use crate::types::{DefectClass, InspectionSummary};

/// One-line recommendation for a verdict and its confidence.
pub fn simple_recommendation(class: DefectClass, confidence: f64) -> &'static str {
    match class {
        DefectClass::Normal if confidence >= HIGH_CONFIDENCE => "[OK] Part judged normal. Cleared for shipment.",
        DefectClass::Normal if confidence >= MEDIUM_CONFIDENCE => {
            "[WARNING] Part looks normal but confidence is moderate. Visual re-check recommended."
        }
        DefectClass::Normal => "[WARNING] Verdict confidence is low. Further inspection required.",
        DefectClass::Defective if confidence >= HIGH_CONFIDENCE => {
            "[NG] Clear defect detected. Reject the part immediately."
        }
        DefectClass::Defective if confidence >= MEDIUM_CONFIDENCE => {
            "[WARNING] Part judged defective. Inspect in detail before acting."
        }
        DefectClass::Defective => "[WARNING] Possible defect with low confidence. Expert review required.",
    }
}

fn confidence_band(confidence: f64) -> &'static str {
    if confidence >= HIGH_CONFIDENCE {
        "The model is very certain. No further verification needed."
    } else if confidence >= MEDIUM_CONFIDENCE {
        "The model is reliable. A visual re-check is recommended."
    } else if confidence >= 0.60 {
        "The model is uncertain. An expert visual inspection is required."
    } else {
        "The model cannot be trusted. A detailed expert inspection is mandatory."
    }
}

/// Deterministic analyst that needs no network access.
#[derive(Debug, Clone, Default)]
pub struct RuleBasedAnalyst {
    labels: ClassLabels,
}

impl RuleBasedAnalyst {
    pub fn new(labels: ClassLabels) -> Self {
        Self { labels }
    }
}

#[async_trait]
impl NarrativeAnalyst for RuleBasedAnalyst {
    async fn analyze(&self, summary: &InspectionSummary) -> Result<Narrative, AnalysisError> {
        let analysis = format!(
            "Verdict: {} at {:.2}% confidence (normal {:.2}%, defective {:.2}%).\n{}",
            self.labels.label(summary.predicted_class),
            summary.confidence * 100.0,
            summary.class_probabilities.normal * 100.0,
            summary.class_probabilities.defective * 100.0,
            confidence_band(summary.confidence),
        );
        let recommendation = simple_recommendation(summary.predicted_class, summary.confidence).to_string();
        Ok(Narrative { analysis, recommendation })
    }

    fn backend_name(&self) -> &'static str {
        "rules"
    }
}
