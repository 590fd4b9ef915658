//! REST API module using Axum
//!
//! HTTP surface of an inspection station. Every JSON response uses the
//! `{data, meta}` / `{error, meta}` envelope.

pub mod envelope;
pub mod handlers;
mod routes;
pub mod session;

pub use session::{Session, SessionCache};

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::orchestrator::InspectionOrchestrator;

/// Environment variable with a comma-separated list of allowed CORS origins.
pub const CORS_ORIGINS_ENV: &str = "CASTSCOPE_CORS_ORIGINS";

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<InspectionOrchestrator>,
    /// Recently completed inspections, for analysis and report follow-ups.
    pub sessions: Arc<RwLock<SessionCache>>,
    pub started_at: DateTime<Utc>,
    pub max_upload_bytes: usize,
}

impl ApiState {
    pub fn new(orchestrator: Arc<InspectionOrchestrator>, session_capacity: usize, max_upload_bytes: usize) -> Self {
        Self {
            orchestrator,
            sessions: Arc::new(RwLock::new(SessionCache::new(session_capacity))),
            started_at: Utc::now(),
            max_upload_bytes,
        }
    }
}

/// Build a CORS layer that is restrictive by default (same-origin only).
fn build_cors_layer() -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    match std::env::var(CORS_ORIGINS_ENV) {
        Ok(origins) => {
            let allowed: Vec<_> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            tracing::info!(origins = %origins, "CORS: allowing configured origins");
            base.allow_origin(allowed)
        }
        Err(_) => base,
    }
}

/// Create the complete application router.
pub fn create_app(state: ApiState) -> Router {
    let body_limit = state.max_upload_bytes;

    Router::new()
        .nest("/api/v1", routes::api_routes(state))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer())
}
