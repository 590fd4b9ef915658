//! API route definitions
//!
//! - /api/v1/inspect - run one inspection on an uploaded image
//! - /api/v1/inspections/:id/analysis - narrative for a cached inspection
//! - /api/v1/inspections/:id/report - rendered report (after analysis)
//! - /api/v1/statistics, /api/v1/statistics/hourly - windowed aggregates
//! - /api/v1/history - windowed inspection records
//! - /api/v1/health - liveness and component summary

use axum::{routing::{get, post}, Router};

use super::handlers;
use super::ApiState;

/// Create all API routes.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/inspect", post(handlers::inspect))
        .route("/inspections/:id/analysis", post(handlers::analyze))
        .route("/inspections/:id/report", get(handlers::report))
        .route("/statistics", get(handlers::statistics))
        .route("/statistics/hourly", get(handlers::statistics_hourly))
        .route("/history", get(handlers::history))
        .route("/health", get(handlers::health))
        .with_state(state)
}
