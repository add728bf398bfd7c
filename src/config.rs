//! Configuration types for the nova agent.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NovaConfig {
    /// Durable profile store settings.
    pub store: StoreConfig,
    /// Enrichment API settings (geocode, timezone, chart).
    pub enrichment: EnrichmentConfig,
    /// Language model provider settings.
    pub llm: LlmConfig,
    /// Dialogue session settings.
    pub session: SessionConfig,
    /// Content guard settings.
    pub guard: GuardConfig,
}

/// Durable profile store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file path (None = platform data dir).
    pub db_path: Option<PathBuf>,
    /// Sliding retention window for every stored field group, in days.
    ///
    /// Each successful read of a present group pushes its expiry out by
    /// this much again.
    pub ttl_days: u32,
    /// Maximum retained conversations per user (oldest dropped first).
    pub max_conversations: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            ttl_days: 90,
            max_conversations: 5,
        }
    }
}

impl StoreConfig {
    /// Retention window in seconds.
    pub fn ttl_secs(&self) -> i64 {
        i64::from(self.ttl_days) * 86_400
    }

    /// Resolve the database path, defaulting to the platform data dir.
    pub fn resolved_db_path(&self) -> PathBuf {
        if let Some(path) = &self.db_path {
            return path.clone();
        }
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("nova")
            .join("nova.db")
    }
}

/// Enrichment API configuration.
///
/// The two Google keys are distinct on purpose: geocoding and timezone
/// lookup can be provisioned separately, and each degrades independently
/// when its key is absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Base URL for the Google Maps APIs (geocode + timezone).
    pub maps_base_url: String,
    /// Base URL for the birth chart API.
    pub chart_base_url: String,
    /// Google Geocoding API key (None = geocoding disabled, place lookups
    /// resolve to no result).
    pub geocode_api_key: Option<String>,
    /// Google Time Zone API key (None = offset estimated from longitude).
    pub timezone_api_key: Option<String>,
    /// Chart API account id (basic auth user).
    pub chart_user_id: Option<String>,
    /// Chart API key (basic auth password).
    pub chart_api_key: Option<String>,
    /// Per-request timeout for geocode/timezone lookups, in seconds.
    pub maps_timeout_secs: u64,
    /// Per-request timeout for each chart endpoint lookup, in seconds.
    pub chart_timeout_secs: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            maps_base_url: "https://maps.googleapis.com/maps/api".to_owned(),
            chart_base_url: "https://json.astrologyapi.com/v1".to_owned(),
            geocode_api_key: None,
            timezone_api_key: None,
            chart_user_id: None,
            chart_api_key: None,
            maps_timeout_secs: 10,
            chart_timeout_secs: 30,
        }
    }
}

/// Language model provider configuration (OpenAI-compatible API).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of the chat completions endpoint.
    pub base_url: String,
    /// API key (None = unauthenticated local endpoint).
    pub api_key: Option<String>,
    /// Model used for conversation turns.
    pub model: String,
    /// Model used for profile synthesis (None = same as `model`).
    pub profiler_model: Option<String>,
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum tokens per reply.
    pub max_tokens: u32,
    /// Whole-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_owned(),
            api_key: None,
            model: "gpt-4o-mini".to_owned(),
            profiler_model: None,
            temperature: 0.7,
            max_tokens: 1024,
            request_timeout_secs: 60,
        }
    }
}

impl LlmConfig {
    /// Model to use for profile synthesis.
    pub fn profiler_model(&self) -> &str {
        self.profiler_model.as_deref().unwrap_or(&self.model)
    }
}

/// Dialogue session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum generate/tool-dispatch rounds per user turn.
    ///
    /// A round ends when the model stops without requesting tools; the cap
    /// prevents a model that keeps calling tools from looping forever.
    pub max_tool_rounds: usize,
    /// Maximum seeded history messages carried into a new session.
    pub max_seed_messages: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 4,
            max_seed_messages: 40,
        }
    }
}

/// Content guard configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Whether input screening and output redaction run at all.
    pub enabled: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl NovaConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::AgentError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::AgentError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/nova/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("nova").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("nova")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/nova-config/config.toml")
        }
    }

    /// Overlay secrets from process environment variables.
    ///
    /// Existing config values win; env vars only fill gaps. Recognised:
    /// `GOOGLE_GEOCODE_API_KEY`, `GOOGLE_MAPS_API_KEY`,
    /// `ASTROLOGY_API_USER_ID`, `ASTROLOGY_API_KEY`, `OPENAI_API_KEY`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_with(|key| std::env::var(key).ok());
    }

    /// Overlay secrets from an arbitrary lookup (injectable for tests).
    pub fn apply_overrides_with(&mut self, get: impl Fn(&str) -> Option<String>) {
        let fill = |slot: &mut Option<String>, key: &str| {
            if slot.is_none()
                && let Some(value) = get(key)
                && !value.is_empty()
            {
                *slot = Some(value);
            }
        };
        fill(&mut self.enrichment.geocode_api_key, "GOOGLE_GEOCODE_API_KEY");
        fill(&mut self.enrichment.timezone_api_key, "GOOGLE_MAPS_API_KEY");
        fill(&mut self.enrichment.chart_user_id, "ASTROLOGY_API_USER_ID");
        fill(&mut self.enrichment.chart_api_key, "ASTROLOGY_API_KEY");
        fill(&mut self.llm.api_key, "OPENAI_API_KEY");
    }
}
