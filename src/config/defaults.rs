//! System-wide default constants.
//!
//! Grouped by subsystem. Every configurable field's built-in value lives here.

// ============================================================================
// Imaging
// ============================================================================

/// Side length of the default model input (pixels).
pub const MODEL_INPUT_SIZE: u32 = 224;

/// Per-channel normalisation mean (ImageNet statistics, RGB order).
pub const NORMALIZE_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Per-channel normalisation standard deviation (ImageNet statistics, RGB order).
pub const NORMALIZE_STD: [f32; 3] = [0.229, 0.224, 0.225];

// ============================================================================
// Model
// ============================================================================

/// Default classifier checkpoint location.
pub const MODEL_CHECKPOINT_PATH: &str = "models/casting_classifier.json";

/// Checkpoint format version understood by this build.
pub const CHECKPOINT_VERSION: u32 = 1;

// ============================================================================
// Explainability
// ============================================================================

/// Weight of the heat map when blending it over the original image.
pub const OVERLAY_ALPHA: f32 = 0.5;

/// Range below which a clipped activation map is treated as uniform.
pub const DEGENERATE_RANGE_EPSILON: f32 = 1e-7;

// ============================================================================
// History
// ============================================================================

/// Default inspection history database path.
pub const HISTORY_DB_PATH: &str = "./data/inspection_history.db";

/// Default statistics / history window (days).
pub const HISTORY_WINDOW_DAYS: i64 = 1;

/// Widest window accepted from configuration and the API (days).
pub const MAX_WINDOW_DAYS: i64 = 3650;

// ============================================================================
// Narrative analysis
// ============================================================================

pub const LLM_MODEL: &str = "claude-sonnet-4-5";
pub const LLM_TEMPERATURE: f64 = 0.7;
pub const LLM_MAX_TOKENS: u32 = 2048;
pub const LLM_API_URL: &str = "https://api.anthropic.com/v1/messages";
pub const LLM_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
pub const LLM_TIMEOUT_SECS: u64 = 60;

/// Confidence at or above which a verdict needs no follow-up.
pub const HIGH_CONFIDENCE: f64 = 0.95;

/// Confidence at or above which a verdict only needs a visual re-check.
pub const MEDIUM_CONFIDENCE: f64 = 0.80;

// ============================================================================
// Server
// ============================================================================

pub const SERVER_ADDR: &str = "0.0.0.0:8080";

/// Completed inspections kept in memory for follow-up analysis/report requests.
pub const SESSION_CAPACITY: usize = 64;

/// Maximum accepted upload size for `POST /inspect` (bytes).
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
