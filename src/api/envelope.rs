//! JSON envelope shared by every inspection API endpoint.
//!
//! Successes are `{ "data": ..., "meta": ... }`, failures are
//! `{ "error": { "code", "message" }, "meta": ... }`. The report endpoint is
//! the one exception: it returns the rendered document unwrapped.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Stamped on every envelope so clients can tell which build answered.
#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub service: &'static str,
    pub version: &'static str,
    pub generated_at: DateTime<Utc>,
}

impl ResponseMeta {
    fn now() -> Self {
        Self {
            service: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            generated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub meta: ResponseMeta,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Response {
        Self::with_status(StatusCode::OK, data)
    }

    /// 201, used when an inspection has been run and recorded.
    pub fn created(data: T) -> Response {
        Self::with_status(StatusCode::CREATED, data)
    }

    fn with_status(status: StatusCode, data: T) -> Response {
        let body = Self {
            data,
            meta: ResponseMeta::now(),
        };
        (status, axum::Json(body)).into_response()
    }
}

/// Machine-readable failure category; each maps to one HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Undecodable image, bad window, empty body.
    BadRequest,
    /// Inspection id unknown or evicted from the session cache.
    NotFound,
    /// Report requested before any analysis.
    AnalysisRequired,
    /// The narrative analyst failed.
    AnalystUnavailable,
    Internal,
}

impl ErrorCode {
    pub const fn status(self) -> StatusCode {
        match self {
            ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::AnalysisRequired => StatusCode::CONFLICT,
            ErrorCode::AnalystUnavailable => StatusCode::BAD_GATEWAY,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub error: ErrorDetail,
    pub meta: ResponseMeta,
}

impl ApiErrorResponse {
    pub fn new(code: ErrorCode, msg: impl Into<String>) -> Response {
        let body = Self {
            error: ErrorDetail {
                code,
                message: msg.into(),
            },
            meta: ResponseMeta::now(),
        };
        (code.status(), axum::Json(body)).into_response()
    }

    pub fn bad_request(msg: impl Into<String>) -> Response {
        Self::new(ErrorCode::BadRequest, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Response {
        Self::new(ErrorCode::NotFound, msg)
    }

    pub fn analysis_required(msg: impl Into<String>) -> Response {
        Self::new(ErrorCode::AnalysisRequired, msg)
    }

    pub fn analyst_unavailable(msg: impl Into<String>) -> Response {
        Self::new(ErrorCode::AnalystUnavailable, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Response {
        Self::new(ErrorCode::Internal, msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_created_carries_data_and_meta() {
        let resp = ApiResponse::created(serde_json::json!({"id": "abc"}));
        assert_eq!(resp.status(), StatusCode::CREATED);

        let v = body_json(resp).await;
        assert_eq!(v["data"]["id"], "abc");
        assert_eq!(v["meta"]["service"], "castscope");
        assert_eq!(v["meta"]["version"], env!("CARGO_PKG_VERSION"));
        assert!(v["meta"]["generated_at"].is_string());
    }

    #[tokio::test]
    async fn test_analysis_required_is_conflict() {
        let resp = ApiErrorResponse::analysis_required("request analysis before the report");
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let v = body_json(resp).await;
        assert_eq!(v["error"]["code"], "ANALYSIS_REQUIRED");
        assert_eq!(v["error"]["message"], "request analysis before the report");
        assert!(v.get("data").is_none());
    }

    #[test]
    fn test_every_code_has_distinct_status() {
        let codes = [
            ErrorCode::BadRequest,
            ErrorCode::NotFound,
            ErrorCode::AnalysisRequired,
            ErrorCode::AnalystUnavailable,
            ErrorCode::Internal,
        ];
        let mut statuses: Vec<u16> = codes.iter().map(|c| c.status().as_u16()).collect();
        statuses.sort_unstable();
        statuses.dedup();
        assert_eq!(statuses.len(), codes.len());
    }
}
