//! Inspection Configuration - every tunable as a TOML value
//!
//! Each section implements `Default` with the values from `defaults`, so a
//! missing file or a partial file behaves exactly like the built-ins.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;
use crate::types::DefectClass;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "CASTSCOPE_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "castscope.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for an inspection station.
///
/// Load with `InspectionConfig::load()` which searches:
/// 1. `$CASTSCOPE_CONFIG` env var
/// 2. `./castscope.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InspectionConfig {
    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub imaging: ImagingConfig,

    #[serde(default)]
    pub explain: ExplainConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub classes: ClassLabels,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

impl InspectionConfig {
    /// Load configuration using the standard search order.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check every field; all violations are reported together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        for (i, std) in self.imaging.normalize_std.iter().enumerate() {
            if !(std.is_finite() && *std > 0.0) {
                errors.push(format!("imaging.normalize_std[{}] must be > 0 (got {})", i, std));
            }
        }
        for (i, mean) in self.imaging.normalize_mean.iter().enumerate() {
            if !mean.is_finite() {
                errors.push(format!("imaging.normalize_mean[{}] must be finite", i));
            }
        }

        if !(0.0..=1.0).contains(&self.explain.overlay_alpha) {
            errors.push(format!(
                "explain.overlay_alpha must be within [0, 1] (got {})",
                self.explain.overlay_alpha
            ));
        }

        if !(1..=defaults::MAX_WINDOW_DAYS).contains(&self.history.default_window_days) {
            errors.push(format!(
                "history.default_window_days must be in 1..={} (got {})",
                defaults::MAX_WINDOW_DAYS,
                self.history.default_window_days
            ));
        }

        if !(0.0..=1.0).contains(&self.llm.temperature) {
            errors.push(format!("llm.temperature must be within [0, 1] (got {})", self.llm.temperature));
        }
        if self.llm.max_tokens == 0 {
            errors.push("llm.max_tokens must be > 0".to_string());
        }
        if self.llm.timeout_secs == 0 {
            errors.push("llm.timeout_secs must be > 0".to_string());
        }

        if self.server.session_capacity == 0 {
            errors.push("server.session_capacity must be > 0".to_string());
        }
        if self.server.max_upload_bytes == 0 {
            errors.push("server.max_upload_bytes must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),
    #[error("Config parse error ({}): {}", .0.display(), .1)]
    Parse(PathBuf, #[source] toml::de::Error),
    #[error("Config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

// ============================================================================
// Sections
// ============================================================================

/// Classifier weights location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self { checkpoint_path: default_checkpoint_path() }
    }
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from(defaults::MODEL_CHECKPOINT_PATH)
}

/// Input normalisation. The spatial size comes from the checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagingConfig {
    #[serde(default = "default_mean")]
    pub normalize_mean: [f32; 3],
    #[serde(default = "default_std")]
    pub normalize_std: [f32; 3],
}

impl Default for ImagingConfig {
    fn default() -> Self {
        Self {
            normalize_mean: default_mean(),
            normalize_std: default_std(),
        }
    }
}

fn default_mean() -> [f32; 3] {
    defaults::NORMALIZE_MEAN
}

fn default_std() -> [f32; 3] {
    defaults::NORMALIZE_STD
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplainConfig {
    /// Heat-map weight in the overlay blend (0 = original only, 1 = heat map only).
    #[serde(default = "default_overlay_alpha")]
    pub overlay_alpha: f32,
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self { overlay_alpha: default_overlay_alpha() }
    }
}

fn default_overlay_alpha() -> f32 {
    defaults::OVERLAY_ALPHA
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Flush sled after each append instead of relying on background flushing.
    #[serde(default = "default_true")]
    pub flush_on_append: bool,

    #[serde(default = "default_window_days")]
    pub default_window_days: i64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            flush_on_append: true,
            default_window_days: default_window_days(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(defaults::HISTORY_DB_PATH)
}

fn default_true() -> bool {
    true
}

fn default_window_days() -> i64 {
    defaults::HISTORY_WINDOW_DAYS
}

/// Display labels; not used for logic, but appear in reports and exports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassLabels {
    #[serde(default = "default_normal_label")]
    pub normal: String,
    #[serde(default = "default_defective_label")]
    pub defective: String,
}

impl ClassLabels {
    pub fn label(&self, class: DefectClass) -> &str {
        match class {
            DefectClass::Normal => &self.normal,
            DefectClass::Defective => &self.defective,
        }
    }
}

impl Default for ClassLabels {
    fn default() -> Self {
        Self {
            normal: default_normal_label(),
            defective: default_defective_label(),
        }
    }
}

fn default_normal_label() -> String {
    "Normal (OK)".to_string()
}

fn default_defective_label() -> String {
    "Defective (NG)".to_string()
}

/// Which narrative-analysis backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[default]
    Anthropic,
    /// Offline confidence-band recommendations, no network access.
    Rules,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            model: default_llm_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            api_url: default_api_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_llm_model() -> String {
    defaults::LLM_MODEL.to_string()
}

fn default_temperature() -> f64 {
    defaults::LLM_TEMPERATURE
}

fn default_max_tokens() -> u32 {
    defaults::LLM_MAX_TOKENS
}

fn default_api_url() -> String {
    defaults::LLM_API_URL.to_string()
}

fn default_api_key_env() -> String {
    defaults::LLM_API_KEY_ENV.to_string()
}

fn default_timeout_secs() -> u64 {
    defaults::LLM_TIMEOUT_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_addr")]
    pub addr: String,
    #[serde(default = "default_session_capacity")]
    pub session_capacity: usize,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
            session_capacity: default_session_capacity(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_server_addr() -> String {
    defaults::SERVER_ADDR.to_string()
}

fn default_session_capacity() -> usize {
    defaults::SESSION_CAPACITY
}

fn default_max_upload_bytes() -> usize {
    defaults::MAX_UPLOAD_BYTES
}
