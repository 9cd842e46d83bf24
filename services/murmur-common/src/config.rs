//! Configuration management for the Murmur agent.
//!
//! Configuration lives in a single JSON file at `~/.murmur/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `BOTMADANG_API_KEY` → platform.api_key
//! - `GEMINI_API_KEY` → brain.api_key
//! - `TELEGRAM_BOT_TOKEN` → telegram.bot_token
//! - `TELEGRAM_CHAT_ID` → telegram.chat_id
//! - `MURMUR_LOG_LEVEL` → observability.log_level
//! - `MURMUR_LOG_FORMAT` → observability.log_format
//! - `MURMUR_DATA_DIR` → agent.data_dir
//! - `MURMUR_SWEEP_INTERVAL_SECS` → agent.sweep_interval_secs

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".murmur"),
        |dirs| dirs.home_dir().join(".murmur"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Agent Configuration
// ============================================================================

/// Sweep loop and daily quota settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Seconds between sweeps of the polling loop.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Maximum posts published per calendar day.
    #[serde(default = "default_max_posts_per_day")]
    pub max_posts_per_day: u32,

    /// Maximum comments published per calendar day.
    #[serde(default = "default_max_comments_per_day")]
    pub max_comments_per_day: u32,

    /// How many times a human may ask for a regenerated draft before the
    /// action falls through to rejection.
    #[serde(default = "default_max_regenerations")]
    pub max_regenerations: u32,

    /// Seconds to wait for a human decision before treating the request as
    /// implicitly rejected.
    #[serde(default = "default_decision_timeout_secs")]
    pub decision_timeout_secs: u64,

    /// Minimum seconds between two published posts.
    #[serde(default = "default_post_spacing_secs")]
    pub post_spacing_secs: u64,

    /// Minimum interest score (0-10) for a proactive comment.
    #[serde(default = "default_proactive_score_threshold")]
    pub proactive_score_threshold: i32,

    /// Probability of attempting a daily post on any given sweep after the
    /// first one.
    #[serde(default = "default_daily_post_chance")]
    pub daily_post_chance: f64,

    /// Topics rotated through for daily posts.
    #[serde(default = "default_topics")]
    pub topics: Vec<String>,

    /// Directory for the SQLite state store.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            max_posts_per_day: default_max_posts_per_day(),
            max_comments_per_day: default_max_comments_per_day(),
            max_regenerations: default_max_regenerations(),
            decision_timeout_secs: default_decision_timeout_secs(),
            post_spacing_secs: default_post_spacing_secs(),
            proactive_score_threshold: default_proactive_score_threshold(),
            daily_post_chance: default_daily_post_chance(),
            topics: default_topics(),
            data_dir: None,
        }
    }
}

fn default_sweep_interval_secs() -> u64 {
    600
}

fn default_max_posts_per_day() -> u32 {
    4
}

fn default_max_comments_per_day() -> u32 {
    20
}

fn default_max_regenerations() -> u32 {
    3
}

fn default_decision_timeout_secs() -> u64 {
    600
}

fn default_post_spacing_secs() -> u64 {
    2 * 60 * 60
}

fn default_proactive_score_threshold() -> i32 {
    7
}

fn default_daily_post_chance() -> f64 {
    0.4
}

fn default_topics() -> Vec<String> {
    vec![
        "finance and markets".into(),
        "software engineering".into(),
        "everyday wisdom".into(),
        "career growth".into(),
    ]
}

// ============================================================================
// Platform Configuration
// ============================================================================

/// Community platform REST settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Base URL of the platform API.
    #[serde(default = "default_platform_base_url")]
    pub base_url: String,

    /// Bearer token for the platform API. Required for any write.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Seconds enforced between two post writes (platform policy: 3 minutes).
    #[serde(default = "default_post_interval_secs")]
    pub post_interval_secs: u64,

    /// Seconds enforced between two comment writes.
    /// Platform policy is 10s; one extra second of slack.
    #[serde(default = "default_comment_interval_secs")]
    pub comment_interval_secs: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: default_platform_base_url(),
            api_key: None,
            post_interval_secs: default_post_interval_secs(),
            comment_interval_secs: default_comment_interval_secs(),
        }
    }
}

fn default_platform_base_url() -> String {
    "https://botmadang.org/api/v1".into()
}

fn default_post_interval_secs() -> u64 {
    3 * 60
}

fn default_comment_interval_secs() -> u64 {
    11
}

// ============================================================================
// Brain (LLM) Configuration
// ============================================================================

/// A single generative-model tier with its quota limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelTierConfig {
    /// Model name, used both as API model id and rate-limit resource key.
    pub name: String,
    /// Requests per minute allowed by the provider.
    pub requests_per_minute: u32,
    /// Requests per day allowed by the provider.
    pub requests_per_day: u32,
}

/// Generative model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainConfig {
    /// API key for the model provider.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Base URL of the model provider API.
    #[serde(default = "default_brain_base_url")]
    pub base_url: String,

    /// Model tiers in priority order; the first tier with remaining quota
    /// is tried first.
    #[serde(default = "default_model_tiers")]
    pub tiers: Vec<ModelTierConfig>,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_brain_base_url(),
            tiers: default_model_tiers(),
        }
    }
}

fn default_brain_base_url() -> String {
    "https://generativelanguage.googleapis.com".into()
}

fn default_model_tiers() -> Vec<ModelTierConfig> {
    vec![
        ModelTierConfig {
            name: "gemini-2.5-flash".into(),
            requests_per_minute: 10,
            requests_per_day: 250,
        },
        ModelTierConfig {
            name: "gemini-2.5-flash-lite".into(),
            requests_per_minute: 15,
            requests_per_day: 1000,
        },
    ]
}

// ============================================================================
// Telegram Configuration
// ============================================================================

/// Telegram decision-channel settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token. Missing token disables the approval channel.
    #[serde(default)]
    pub bot_token: Option<String>,

    /// Chat to send approval requests to.
    #[serde(default)]
    pub chat_id: Option<i64>,
}

impl TelegramConfig {
    /// Whether the channel has enough credentials to operate.
    pub fn is_configured(&self) -> bool {
        self.bot_token.is_some() && self.chat_id.is_some()
    }
}

// ============================================================================
// Observability Configuration
// ============================================================================

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Base log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Output format: "json" or "pretty".
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration for the Murmur agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub brain: BrainConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path with environment overlay.
    pub fn load() -> Result<Self> {
        let path = config_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))
    }

    /// Overlay environment variables onto the loaded config.
    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("BOTMADANG_API_KEY") {
            self.platform.api_key = Some(key);
        }
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            self.brain.api_key = Some(key);
        }
        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(token);
        }
        if let Ok(chat) = std::env::var("TELEGRAM_CHAT_ID") {
            if let Ok(id) = chat.parse() {
                self.telegram.chat_id = Some(id);
            }
        }
        if let Ok(level) = std::env::var("MURMUR_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Ok(format) = std::env::var("MURMUR_LOG_FORMAT") {
            self.observability.log_format = format;
        }
        if let Ok(dir) = std::env::var("MURMUR_DATA_DIR") {
            self.agent.data_dir = Some(PathBuf::from(dir));
        }
        if let Ok(secs) = std::env::var("MURMUR_SWEEP_INTERVAL_SECS") {
            if let Ok(secs) = secs.parse() {
                self.agent.sweep_interval_secs = secs;
            }
        }
    }

    /// Resolve the data directory for the state store.
    pub fn data_dir(&self) -> PathBuf {
        self.agent
            .data_dir
            .clone()
            .unwrap_or_else(|| config_dir().join("data"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.agent.max_posts_per_day, 4);
        assert_eq!(config.agent.max_comments_per_day, 20);
        assert_eq!(config.agent.max_regenerations, 3);
        assert_eq!(config.platform.comment_interval_secs, 11);
        assert_eq!(config.brain.tiers.len(), 2);
        assert_eq!(config.brain.tiers[0].name, "gemini-2.5-flash");
        assert!(!config.telegram.is_configured());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(
            &path,
            r#"{"agent": {"max_posts_per_day": 2}, "telegram": {"bot_token": "t", "chat_id": 42}}"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.agent.max_posts_per_day, 2);
        assert_eq!(config.agent.max_comments_per_day, 20);
        assert!(config.telegram.is_configured());
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, "not json").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.is_config());
    }
}
