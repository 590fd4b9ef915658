//! Inspection Orchestrator
//!
//! Sequences one inspection: `Classifying -> Explaining -> Recorded`, then
//! optionally `Analyzed` and `Reported` on caller request.
//!
//! - Classification and explanation run under one model lease, so the
//!   forward artifacts are explained by the call that produced them.
//! - Recording is synchronous and unconditional. A persistence failure is
//!   logged and reported via `history_persisted`, never returned as an error.
//! - Analysis and report rendering reuse the finished result and never
//!   re-run inference.
//!
//! Constructed explicitly at process start and torn down with
//! [`InspectionOrchestrator::shutdown`].

use chrono::{DateTime, Duration, Utc};
use image::{DynamicImage, RgbImage};
use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analysis::{self, AnalysisError, Narrative, NarrativeAnalyst};
use crate::config::{ClassLabels, ConfigError, InspectionConfig};
use crate::explain::{ExplainError, GradCam};
use crate::history::{HistoryError, HistoryStore};
use crate::imaging::decode_rgb;
use crate::model::{Classifier, ClassifierError};
use crate::report::{HtmlReportRenderer, ReportError, ReportInput, ReportRenderer};
use crate::types::{HistoryRecord, HourlyBucket, InspectionResult, InspectionStage, StatisticsSnapshot};

#[derive(Debug, thiserror::Error)]
pub enum InspectionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    Explain(#[from] ExplainError),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Report(#[from] ReportError),
}

/// Wall clock that never runs backwards within one process.
pub struct MonotonicClock {
    source: fn() -> DateTime<Utc>,
    last: Mutex<Option<DateTime<Utc>>>,
}

impl MonotonicClock {
    pub fn system() -> Self {
        Self::with_source(Utc::now)
    }

    pub fn with_source(source: fn() -> DateTime<Utc>) -> Self {
        Self {
            source,
            last: Mutex::new(None),
        }
    }

    /// `max(source(), last issued)`.
    pub fn now(&self) -> DateTime<Utc> {
        let mut last = self.last.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = (self.source)();
        let ts = match *last {
            Some(prev) if prev > now => prev,
            _ => now,
        };
        *last = Some(ts);
        ts
    }
}

/// Pre-built components for [`InspectionOrchestrator::from_parts`].
pub struct OrchestratorParts {
    pub classifier: Classifier,
    pub explainer: GradCam,
    pub history: HistoryStore,
    pub analyst: Arc<dyn NarrativeAnalyst>,
    pub renderer: Arc<dyn ReportRenderer>,
    pub labels: ClassLabels,
    pub default_window: Duration,
}

pub struct InspectionOrchestrator {
    classifier: Classifier,
    explainer: GradCam,
    history: HistoryStore,
    analyst: Arc<dyn NarrativeAnalyst>,
    renderer: Arc<dyn ReportRenderer>,
    labels: ClassLabels,
    default_window: Duration,
    clock: MonotonicClock,
}

impl InspectionOrchestrator {
    /// Build every component from configuration. Fails fast if the model
    /// weights or the history database cannot be opened.
    pub fn open(config: &InspectionConfig) -> Result<Self, InspectionError> {
        config.validate()?;

        let classifier = Classifier::load(&config.model.checkpoint_path, &config.imaging)?;
        let history = HistoryStore::open(&config.history.db_path, config.history.flush_on_append)?;
        let analyst = analysis::from_config(&config.llm, &config.classes)?;

        info!(
            model = classifier.model_name(),
            history = %config.history.db_path.display(),
            analyst = analyst.backend_name(),
            "Inspection orchestrator ready"
        );

        Ok(Self::from_parts(OrchestratorParts {
            classifier,
            explainer: GradCam::new(config.explain.overlay_alpha),
            history,
            analyst,
            renderer: Arc::new(HtmlReportRenderer::new()),
            labels: config.classes.clone(),
            default_window: Duration::days(config.history.default_window_days),
        }))
    }

    pub fn from_parts(parts: OrchestratorParts) -> Self {
        Self {
            classifier: parts.classifier,
            explainer: parts.explainer,
            history: parts.history,
            analyst: parts.analyst,
            renderer: parts.renderer,
            labels: parts.labels,
            default_window: parts.default_window,
            clock: MonotonicClock::system(),
        }
    }

    /// Replace the timestamp source.
    pub fn with_clock(mut self, clock: MonotonicClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn labels(&self) -> &ClassLabels {
        &self.labels
    }

    pub fn model_name(&self) -> &str {
        self.classifier.model_name()
    }

    pub const fn default_window(&self) -> Duration {
        self.default_window
    }

    pub fn analyst_name(&self) -> &'static str {
        self.analyst.backend_name()
    }

    pub fn report_content_type(&self) -> &'static str {
        self.renderer.content_type()
    }

    /// Run one inspection on an encoded image (PNG, JPEG, BMP).
    pub fn inspect_bytes(&self, bytes: &[u8]) -> Result<InspectionResult, InspectionError> {
        let rgb = decode_rgb(bytes).map_err(|e| ClassifierError::Input(format!("cannot decode image: {}", e)))?;
        self.inspect_rgb(&rgb)
    }

    /// Run one inspection on a decoded image.
    pub fn inspect(&self, image: &DynamicImage) -> Result<InspectionResult, InspectionError> {
        self.inspect_rgb(&image.to_rgb8())
    }

    pub fn inspect_rgb(&self, image: &RgbImage) -> Result<InspectionResult, InspectionError> {
        debug!(
            stage = %InspectionStage::Classifying,
            width = image.width(),
            height = image.height(),
            "Inspection started"
        );

        let (prediction, timestamp, explanation) = {
            let mut lease = self.classifier.acquire();
            let (prediction, artifacts) = lease.predict(image)?;
            let timestamp = self.clock.now();

            debug!(stage = %InspectionStage::Explaining, inference_id = prediction.inference_id, "Classified");
            let explanation = self.explainer.explain(&lease, artifacts, prediction.target(), image)?;
            (prediction, timestamp, explanation)
        };

        let mut result = InspectionResult {
            id: Uuid::new_v4(),
            predicted_class: prediction.predicted_class,
            confidence: prediction.confidence,
            class_probabilities: prediction.class_probabilities,
            timestamp,
            explanation_map: explanation.map,
            overlay: explanation.overlay,
            history_persisted: false,
        };

        match self.history.append(&result) {
            Ok(()) => {
                result.history_persisted = true;
                debug!(stage = %InspectionStage::Recorded, id = %result.id, "Inspection recorded");
            }
            Err(e) => {
                warn!(id = %result.id, error = %e, "Failed to record inspection history, returning result anyway");
            }
        }

        info!(
            id = %result.id,
            class = %result.predicted_class,
            confidence = result.confidence,
            persisted = result.history_persisted,
            "Inspection complete"
        );
        Ok(result)
    }

    /// Narrative for a finished inspection. May be called repeatedly.
    pub async fn analyze(&self, result: &InspectionResult) -> Result<Narrative, InspectionError> {
        let narrative = self.analyst.analyze(&result.summary()).await?;
        debug!(stage = %InspectionStage::Analyzed, id = %result.id, backend = self.analyst.backend_name(), "Narrative ready");
        Ok(narrative)
    }

    /// Render the report document for a finished, analysed inspection.
    pub fn render_report(
        &self,
        result: &InspectionResult,
        narrative: &Narrative,
        original: &RgbImage,
    ) -> Result<Vec<u8>, InspectionError> {
        let bytes = self.renderer.render(&ReportInput {
            result,
            narrative,
            original,
            labels: &self.labels,
            model_name: self.classifier.model_name(),
        })?;
        debug!(stage = %InspectionStage::Reported, id = %result.id, bytes = bytes.len(), "Report rendered");
        Ok(bytes)
    }

    pub fn statistics(&self, window: Duration) -> Result<StatisticsSnapshot, InspectionError> {
        Ok(self.history.statistics(window)?)
    }

    pub fn history(&self, window: Duration) -> Result<Vec<HistoryRecord>, InspectionError> {
        Ok(self.history.query(window)?)
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<HistoryRecord>, InspectionError> {
        Ok(self.history.recent(limit)?)
    }

    pub fn hourly_breakdown(&self, window: Duration) -> Result<Vec<HourlyBucket>, InspectionError> {
        Ok(self.history.hourly_breakdown(window)?)
    }

    pub fn export_csv<W: Write>(&self, window: Duration, out: &mut W) -> Result<usize, InspectionError> {
        Ok(self.history.export_csv(window, &self.labels, out)?)
    }

    pub fn history_count(&self) -> usize {
        self.history.count()
    }

    /// Flush history and release the model.
    pub fn shutdown(self) -> Result<(), InspectionError> {
        self.history.flush()?;
        info!(records = self.history.count(), "Inspection orchestrator shut down");
        Ok(())
    }
}
