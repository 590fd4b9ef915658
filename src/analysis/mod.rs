//! Narrative Analysis
//!
//! Turns an inspection summary into operator-facing text. Two backends:
//!
//! - [`ClaudeAnalyst`]: Anthropic Messages API over `reqwest`
//! - [`RuleBasedAnalyst`]: offline confidence-band recommendations
//!
//! Analysis never re-runs inference; it only sees the
//! [`InspectionSummary`] of a finished result.

mod claude;
pub mod prompt;
mod rules;

pub use claude::ClaudeAnalyst;
pub use rules::{simple_recommendation, RuleBasedAnalyst};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{ClassLabels, LlmConfig, LlmProvider};
use crate::types::InspectionSummary;

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("API key not configured (set {0})")]
    MissingApiKey(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API returned status {status}: {body}")]
    Api { status: reqwest::StatusCode, body: String },
    #[error("response contained no text content")]
    EmptyResponse,
}

/// Text produced for one inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Narrative {
    /// Cause analysis and confidence interpretation.
    pub analysis: String,
    /// Immediate actions for operators and QC.
    pub recommendation: String,
}

impl Narrative {
    /// Markdown with a detailed-analysis and a recommended-actions section.
    pub fn to_markdown(&self) -> String {
        format!(
            "### Detailed analysis\n{}\n\n### Recommended actions\n{}\n",
            self.analysis.trim(),
            self.recommendation.trim()
        )
    }
}

/// Narrative-analysis backend.
#[async_trait]
pub trait NarrativeAnalyst: Send + Sync {
    async fn analyze(&self, summary: &InspectionSummary) -> Result<Narrative, AnalysisError>;

    /// Backend name for logging.
    fn backend_name(&self) -> &'static str;
}

/// Build the configured backend.
pub fn from_config(llm: &LlmConfig, labels: &ClassLabels) -> Result<Arc<dyn NarrativeAnalyst>, AnalysisError> {
    match llm.provider {
        LlmProvider::Anthropic => Ok(Arc::new(ClaudeAnalyst::from_env(llm, labels.clone())?)),
        LlmProvider::Rules => Ok(Arc::new(RuleBasedAnalyst::new(labels.clone()))),
    }
}
