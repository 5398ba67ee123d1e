use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub screen: ScreenConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Optional key stored in config.toml; falls back to ANTHROPIC_API_KEY.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_true")]
    pub enable_caching: bool,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_rate_window")]
    pub rate_limit_window_secs: u64,
    #[serde(default = "default_max_calls")]
    pub max_calls_per_window: usize,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenConfig {
    /// Model-space display dimensions advertised in the tool declaration.
    #[serde(default = "default_model_width")]
    pub model_width: u32,
    #[serde(default = "default_model_height")]
    pub model_height: u32,
    /// JPEG quality for color/grayscale captures (bw mode uses its own).
    #[serde(default = "default_quality")]
    pub screenshot_quality: u8,
    #[serde(default = "default_screenshot_ttl")]
    pub screenshot_cache_ttl_secs: u64,
    #[serde(default)]
    pub optimization: Optimization,
    #[serde(default = "default_settle_ms")]
    pub action_settle_ms: u64,
    /// Auto-switch to bw mode for text-focused element captures.
    #[serde(default = "default_true")]
    pub auto_bw_for_text: bool,
}

/// Which screenshots are skipped by default, per action kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Optimization {
    /// Keep every screenshot for maximum visual feedback.
    Minimal,
    #[default]
    Balanced,
    Aggressive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_true")]
    pub truncate: bool,
    #[serde(default = "default_truncation_threshold")]
    pub truncation_threshold: usize,
    #[serde(default = "default_keep_ratio")]
    pub keep_ratio: f64,
    /// Persist the snapshot every N appended messages.
    #[serde(default = "default_persist_every")]
    pub persist_every: usize,
    /// Override for the history directory; defaults to the platform data dir.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

fn default_model() -> String {
    "claude-3-5-sonnet-20241022".into()
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_base_url() -> String {
    "https://api.anthropic.com".into()
}
fn default_true() -> bool {
    true
}
fn default_cache_ttl() -> u64 {
    3600
}
fn default_rate_window() -> u64 {
    60
}
fn default_max_calls() -> usize {
    20
}
fn default_timeout() -> u64 {
    60
}
fn default_model_width() -> u32 {
    1024
}
fn default_model_height() -> u32 {
    640
}
fn default_quality() -> u8 {
    70
}
fn default_screenshot_ttl() -> u64 {
    5
}
fn default_settle_ms() -> u64 {
    200
}
fn default_truncation_threshold() -> usize {
    10
}
fn default_keep_ratio() -> f64 {
    0.75
}
fn default_persist_every() -> usize {
    5
}

impl Default for ApiConfig {
    fn default() -> Self {
        toml::from_str("").expect("defaults deserialize")
    }
}

impl Default for ScreenConfig {
    fn default() -> Self {
        toml::from_str("").expect("defaults deserialize")
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        toml::from_str("").expect("defaults deserialize")
    }
}

impl ApiConfig {
    /// Config value first, then the environment.
    pub fn resolve_api_key(&self) -> PilotResult<String> {
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.is_empty()) {
            return Ok(key.to_string());
        }
        std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                PilotError::Config(
                    "ANTHROPIC_API_KEY not found in environment variables or config".into(),
                )
            })
    }
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Some(candidate);
            }
        }
    }

    if let Ok(cwd) = std::env::current_dir() {
        let candidate = cwd.join("config.toml");
        if candidate.exists() {
            tracing::debug!(path = %candidate.display(), "config found in working directory");
            return Some(candidate);
        }
    }

    None
}

/// Load config.toml from next to the executable or the working directory,
/// falling back to built-in defaults when absent.
pub fn load_config() -> PilotResult<AppConfig> {
    let Some(path) = resolve_config_path() else {
        tracing::info!("no config.toml found, using defaults");
        return Ok(AppConfig::default());
    };
    let content = std::fs::read_to_string(&path)?;
    let config: AppConfig = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), model = %config.api.model, "config loaded");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.api.max_tokens, 1024);
        assert_eq!(cfg.api.max_calls_per_window, 20);
        assert_eq!(cfg.screen.model_width, 1024);
        assert_eq!(cfg.screen.model_height, 640);
        assert_eq!(cfg.screen.optimization, Optimization::Balanced);
        assert_eq!(cfg.history.truncation_threshold, 10);
        assert!((cfg.history.keep_ratio - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [api]
            model = "claude-3-5-haiku-20241022"

            [screen]
            optimization = "aggressive"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.api.model, "claude-3-5-haiku-20241022");
        assert_eq!(cfg.api.cache_ttl_secs, 3600);
        assert_eq!(cfg.screen.optimization, Optimization::Aggressive);
        assert_eq!(cfg.screen.screenshot_quality, 70);
    }
}
