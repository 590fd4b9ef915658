//! API route handlers.
//!
//! All handlers return `Response` via [`ApiResponse`] or [`ApiErrorResponse`],
//! except the report endpoint which returns the rendered document itself.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

use super::envelope::{ApiErrorResponse, ApiResponse};
use super::ApiState;
use crate::analysis::Narrative;
use crate::config::defaults::MAX_WINDOW_DAYS;
use crate::imaging::{decode_rgb, encode_png};
use crate::model::ClassifierError;
use crate::orchestrator::{InspectionError, InspectionOrchestrator};
use crate::types::{ClassProbabilities, DefectClass, HistoryRecord, HourlyBucket, InspectionResult, StatisticsSnapshot};

// ============================================================================
// Response types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ExplanationSummary {
    pub width: u32,
    pub height: u32,
    pub raw_min: f32,
    pub raw_max: f32,
    pub degenerate: bool,
}

/// Response for `POST /api/v1/inspect`.
#[derive(Debug, Serialize)]
pub struct InspectionResponse {
    pub id: Uuid,
    pub predicted_class: DefectClass,
    pub class_label: String,
    pub confidence: f64,
    pub class_probabilities: ClassProbabilities,
    pub timestamp: DateTime<Utc>,
    pub history_persisted: bool,
    pub explanation: ExplanationSummary,
    /// Heat map overlay, PNG, base64.
    pub overlay_png: String,
}

#[derive(Debug, Serialize)]
pub struct AnalysisResponse {
    pub id: Uuid,
    pub analyst: &'static str,
    pub narrative: Narrative,
    pub markdown: String,
}

#[derive(Debug, Serialize)]
pub struct StatisticsResponse {
    pub days: i64,
    #[serde(flatten)]
    pub snapshot: StatisticsSnapshot,
}

#[derive(Debug, Serialize)]
pub struct HourlyResponse {
    pub days: i64,
    pub buckets: Vec<HourlyBucket>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub days: i64,
    pub count: usize,
    pub records: Vec<HistoryRecord>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model: String,
    pub analyst: &'static str,
    pub history_records: usize,
    pub sessions: usize,
    pub uptime_secs: i64,
}

// ============================================================================
// Query parameters
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct WindowQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub days: Option<i64>,
    /// Keep only the most recent `limit` records of the window.
    pub limit: Option<usize>,
}

/// Resolve `?days=` against the configured default window.
fn resolve_days(state: &ApiState, days: Option<i64>) -> Result<i64, Response> {
    match days {
        None => Ok(state.orchestrator.default_window().num_days().max(1)),
        Some(d) if (1..=MAX_WINDOW_DAYS).contains(&d) => Ok(d),
        Some(d) => Err(ApiErrorResponse::bad_request(format!(
            "days must be between 1 and {} (got {})",
            MAX_WINDOW_DAYS, d
        ))),
    }
}

fn error_response(e: InspectionError) -> Response {
    match e {
        InspectionError::Classifier(ClassifierError::Input(msg)) => ApiErrorResponse::bad_request(msg),
        InspectionError::Analysis(e) => {
            warn!(error = %e, "Narrative analysis failed");
            ApiErrorResponse::analyst_unavailable(e.to_string())
        }
        other => {
            error!(error = %other, "Request failed");
            ApiErrorResponse::internal(other.to_string())
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/inspect - raw image bytes in the body
pub async fn inspect(State(state): State<ApiState>, body: Bytes) -> Response {
    if body.is_empty() {
        return ApiErrorResponse::bad_request("request body must contain an image");
    }

    let orchestrator = Arc::clone(&state.orchestrator);
    let joined = tokio::task::spawn_blocking(move || {
        let original = decode_rgb(&body)
            .map_err(|e| InspectionError::from(ClassifierError::Input(format!("cannot decode image: {}", e))))?;
        let result = orchestrator.inspect_rgb(&original)?;
        let overlay_png = encode_png(&result.overlay).map_err(crate::report::ReportError::from)?;
        Ok::<_, InspectionError>((result, original, overlay_png))
    })
    .await;

    let (result, original, overlay_png) = match joined {
        Ok(Ok(done)) => done,
        Ok(Err(e)) => return error_response(e),
        Err(e) => {
            error!(error = %e, "Inspection task panicked");
            return ApiErrorResponse::internal("inspection task failed");
        }
    };

    let response = inspection_response(&state, &result, &overlay_png);
    state.sessions.write().await.insert(result, original);
    ApiResponse::created(response)
}

fn inspection_response(state: &ApiState, result: &InspectionResult, overlay_png: &[u8]) -> InspectionResponse {
    let map = &result.explanation_map;
    InspectionResponse {
        id: result.id,
        predicted_class: result.predicted_class,
        class_label: state.orchestrator.labels().label(result.predicted_class).to_string(),
        confidence: result.confidence,
        class_probabilities: result.class_probabilities,
        timestamp: result.timestamp,
        history_persisted: result.history_persisted,
        explanation: ExplanationSummary {
            width: map.width,
            height: map.height,
            raw_min: map.raw_min,
            raw_max: map.raw_max,
            degenerate: map.is_degenerate(),
        },
        overlay_png: BASE64.encode(overlay_png),
    }
}

/// POST /api/v1/inspections/:id/analysis
pub async fn analyze(State(state): State<ApiState>, Path(id): Path<Uuid>) -> Response {
    let result = match state.sessions.read().await.get(&id) {
        Some(session) => Arc::clone(&session.result),
        None => return ApiErrorResponse::not_found(format!("inspection {} not found", id)),
    };

    let narrative = match state.orchestrator.analyze(&result).await {
        Ok(n) => n,
        Err(e) => return error_response(e),
    };

    state.sessions.write().await.set_narrative(&id, narrative.clone());
    ApiResponse::ok(AnalysisResponse {
        id,
        analyst: state.orchestrator.analyst_name(),
        markdown: narrative.to_markdown(),
        narrative,
    })
}

/// GET /api/v1/inspections/:id/report
pub async fn report(State(state): State<ApiState>, Path(id): Path<Uuid>) -> Response {
    let session = match state.sessions.read().await.get(&id) {
        Some(session) => session.clone(),
        None => return ApiErrorResponse::not_found(format!("inspection {} not found", id)),
    };
    let Some(narrative) = session.narrative else {
        return ApiErrorResponse::analysis_required("request analysis before the report");
    };

    let orchestrator = Arc::clone(&state.orchestrator);
    let rendered = tokio::task::spawn_blocking(move || {
        orchestrator.render_report(&session.result, &narrative, &session.original)
    })
    .await;

    match rendered {
        Ok(Ok(bytes)) => (
            [
                (header::CONTENT_TYPE, state.orchestrator.report_content_type().to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("inline; filename=\"inspection-{}.html\"", id),
                ),
            ],
            bytes,
        )
            .into_response(),
        Ok(Err(e)) => error_response(e),
        Err(e) => {
            error!(error = %e, "Report task panicked");
            ApiErrorResponse::internal("report rendering failed")
        }
    }
}

/// Run a history read off the async executor; sled range scans block.
async fn read_history<T, F>(state: &ApiState, read: F) -> Result<T, Response>
where
    T: Send + 'static,
    F: FnOnce(&InspectionOrchestrator) -> Result<T, InspectionError> + Send + 'static,
{
    let orchestrator = Arc::clone(&state.orchestrator);
    match tokio::task::spawn_blocking(move || read(&orchestrator)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(error_response(e)),
        Err(e) => {
            error!(error = %e, "History read task panicked");
            Err(ApiErrorResponse::internal("history read failed"))
        }
    }
}

/// GET /api/v1/statistics?days=N
pub async fn statistics(State(state): State<ApiState>, Query(q): Query<WindowQuery>) -> Response {
    let days = match resolve_days(&state, q.days) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    match read_history(&state, move |o| o.statistics(Duration::days(days))).await {
        Ok(snapshot) => ApiResponse::ok(StatisticsResponse { days, snapshot }),
        Err(resp) => resp,
    }
}

/// GET /api/v1/statistics/hourly?days=N
pub async fn statistics_hourly(State(state): State<ApiState>, Query(q): Query<WindowQuery>) -> Response {
    let days = match resolve_days(&state, q.days) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    match read_history(&state, move |o| o.hourly_breakdown(Duration::days(days))).await {
        Ok(buckets) => ApiResponse::ok(HourlyResponse { days, buckets }),
        Err(resp) => resp,
    }
}

/// GET /api/v1/history?days=N&limit=M
pub async fn history(State(state): State<ApiState>, Query(q): Query<HistoryQuery>) -> Response {
    let days = match resolve_days(&state, q.days) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    let mut records = match read_history(&state, move |o| o.history(Duration::days(days))).await {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    if let Some(limit) = q.limit {
        let skip = records.len().saturating_sub(limit);
        records.drain(..skip);
    }

    ApiResponse::ok(HistoryResponse {
        days,
        count: records.len(),
        records,
    })
}

/// GET /api/v1/health
pub async fn health(State(state): State<ApiState>) -> Response {
    let sessions = state.sessions.read().await.len();
    ApiResponse::ok(HealthResponse {
        status: "ok",
        model: state.orchestrator.model_name().to_string(),
        analyst: state.orchestrator.analyst_name(),
        history_records: state.orchestrator.history_count(),
        sessions,
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}
