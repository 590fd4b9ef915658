//! Anthropic Messages API client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::{prompt, AnalysisError, Narrative, NarrativeAnalyst};
use crate::config::{ClassLabels, LlmConfig};
use crate::types::InspectionSummary;

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    messages: [Message<'a>; 1],
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

/// Narrative analyst backed by Claude.
#[derive(Clone)]
pub struct ClaudeAnalyst {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    labels: ClassLabels,
}

impl std::fmt::Debug for ClaudeAnalyst {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeAnalyst")
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl ClaudeAnalyst {
    /// Read the API key from the environment variable named in `llm`.
    pub fn from_env(llm: &LlmConfig, labels: ClassLabels) -> Result<Self, AnalysisError> {
        let api_key = std::env::var(&llm.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AnalysisError::MissingApiKey(llm.api_key_env.clone()))?;
        Self::new(llm, api_key, labels)
    }

    pub fn new(llm: &LlmConfig, api_key: String, labels: ClassLabels) -> Result<Self, AnalysisError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(llm.timeout_secs))
            .build()?;

        info!(model = %llm.model, "Claude analyst configured");
        Ok(Self {
            http,
            api_url: llm.api_url.clone(),
            api_key,
            model: llm.model.clone(),
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
            labels,
        })
    }

    /// Send one single-turn prompt and return the concatenated text blocks.
    pub async fn generate(&self, prompt: &str) -> Result<String, AnalysisError> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: [Message { role: "user", content: prompt }],
        };

        let resp = self
            .http
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AnalysisError::Api { status, body });
        }

        let parsed: MessagesResponse = resp.json().await?;
        extract_text(parsed)
    }
}

fn extract_text(resp: MessagesResponse) -> Result<String, AnalysisError> {
    let text: Vec<String> = resp
        .content
        .into_iter()
        .filter(|b| b.kind == "text" && !b.text.is_empty())
        .map(|b| b.text)
        .collect();
    if text.is_empty() {
        return Err(AnalysisError::EmptyResponse);
    }
    Ok(text.join("\n"))
}

#[async_trait]
impl NarrativeAnalyst for ClaudeAnalyst {
    async fn analyze(&self, summary: &InspectionSummary) -> Result<Narrative, AnalysisError> {
        let label = self.labels.label(summary.predicted_class);
        let analysis = self.generate(&prompt::defect_analysis(summary, label)).await?;
        let recommendation = self.generate(&prompt::recommendation(summary)).await?;

        debug!(
            analysis_chars = analysis.len(),
            recommendation_chars = recommendation.len(),
            "Claude narrative received"
        );
        Ok(Narrative { analysis, recommendation })
    }

    fn backend_name(&self) -> &'static str {
        "anthropic"
    }
}
