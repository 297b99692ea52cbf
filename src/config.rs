//! # Configuration
//!
//! Runtime configuration for the teambot server, loaded from a YAML file in
//! the platform config directory (see [`crate::config_dir()`]) with an
//! optional `TEAMBOT_*` environment-variable override layer applied on top.
//!
//! Unlike a CLI tool that can fall back to interactive prompts, teambot is a
//! long-running service: a missing required field aborts startup rather than
//! limping along with a partial configuration.

use std::{env, fs};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, TeambotError};
use crate::privacy::PrivacyTier;

/// Complete runtime configuration for teambot.
///
/// # YAML shape
///
/// ```yaml
/// chat_api_base: "https://slack.com/api"
/// app_token: "xapp-..."
/// bot_token: "xoxb-..."
/// llm_api_base: "https://openrouter.ai/api/v1"
/// llm_api_key: "sk-..."
/// llm_model: "anthropic/claude-3.5-sonnet"
///
/// privacy_tier: "medium"
/// use_enterprise_zdr: false
/// external_embedder_url: "https://api.example.com/embed"
///
/// store_path: "/var/lib/teambot/store"
/// lsh_num_tables: 5
/// lsh_hyperplanes_per_table: 10
///
/// channel_whitelist: []
/// trigger_keywords: ["help", "bot"]
/// max_context_messages: 8
/// context_window_hours: 24.0
/// response_style: "helpful"
/// action_confidence_threshold: 0.7
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BotConfig {
    /// Base URL of the chat platform's REST API (`apps.connections.open`,
    /// `chat.postMessage`).
    pub chat_api_base: String,
    /// App-level token used to open the Socket-Mode WebSocket connection.
    pub app_token: String,
    /// Bot-level token used for outbound REST calls.
    pub bot_token: String,
    /// The bot's own user id, used to strip its mention token off the front
    /// of an `app_mention`'s text before treating the rest as a query.
    pub bot_user_id: String,

    /// Base URL of the OpenAI-compatible LLM gateway.
    pub llm_api_base: String,
    /// API key for the LLM gateway.
    pub llm_api_key: String,
    /// Default model identifier passed to chat completions.
    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    /// Privacy tier controlling embedding routing: `"high"`, `"medium"`, or
    /// `"low"`.
    #[serde(default = "default_privacy_tier")]
    pub privacy_tier: String,
    /// Whether the external embedding provider is under an enterprise
    /// zero-data-retention agreement (affects the reported compliance
    /// score only, never routing).
    #[serde(default)]
    pub use_enterprise_zdr: bool,
    /// Endpoint for the external embedding API. Required when
    /// `privacy_tier` is `"medium"` or `"low"`.
    #[serde(default)]
    pub external_embedder_url: Option<String>,

    /// Filesystem path to the `sled` store directory.
    pub store_path: String,
    /// Number of independent LSH hash tables.
    #[serde(default = "default_lsh_num_tables")]
    pub lsh_num_tables: usize,
    /// Hyperplanes per LSH table (hash length in bits).
    #[serde(default = "default_lsh_hyperplanes")]
    pub lsh_hyperplanes_per_table: usize,

    /// Channels the bot ingests messages from. An empty list means every
    /// channel the bot is a member of.
    #[serde(default)]
    pub channel_whitelist: Vec<String>,
    /// Keywords stripped from the front of an `app_mention` before it's
    /// treated as a query, in addition to the bot's own mention token.
    #[serde(default)]
    pub trigger_keywords: Vec<String>,
    /// Maximum number of retrieved/remembered messages folded into a
    /// response prompt.
    #[serde(default = "default_max_context_messages")]
    pub max_context_messages: usize,
    /// Messages older than this many hours are excluded from context
    /// assembly even if otherwise retrieved.
    #[serde(default = "default_context_window_hours")]
    pub context_window_hours: f64,
    /// Response tone: `"helpful"`, `"casual"`, or `"professional"`.
    #[serde(default = "default_response_style")]
    pub response_style: String,
    /// Minimum action confidence required before the orchestrator dispatches
    /// a parsed action to a handler.
    #[serde(default = "default_action_confidence_threshold")]
    pub action_confidence_threshold: f32,

    /// Master switch for the whole AI reply path. When `false`, messages are
    /// still ingested and indexed but mentions are never answered.
    #[serde(default = "default_true")]
    pub ai_enabled: bool,
    /// `max_tokens` passed to the LLM gateway for mention replies.
    #[serde(default = "default_ai_response_max_tokens")]
    pub ai_response_max_tokens: u32,
    /// Sampling temperature for mention replies (not for the lower-temperature
    /// summarisation path, which is fixed at 0.3 in `llm.rs`).
    #[serde(default = "default_ai_temperature")]
    pub ai_temperature: f32,
    /// Whether `summarise` (a lower-temperature auxiliary path reusing the
    /// same LLM client) is available to callers.
    #[serde(default = "default_true")]
    pub enable_conversation_summary: bool,

    /// Whether parsed actions are dispatched to registered handlers at all.
    #[serde(default = "default_true")]
    pub enable_actions: bool,
    /// Whether a dispatched action's handler success triggers a follow-up
    /// confirmation message back to the channel.
    #[serde(default = "default_true")]
    pub action_confirmation_required: bool,

    /// Whether `app_mention` events are answered automatically.
    #[serde(default = "default_true")]
    pub auto_respond_to_mentions: bool,
    /// Delay, in milliseconds, inserted between generating a reply and
    /// sending it.
    #[serde(default = "default_response_delay_ms")]
    pub response_delay_ms: u64,
    /// Extra keywords (beyond the bot's own mention token) stripped from the
    /// front of a mention before it's treated as a query.
    #[serde(default)]
    pub mention_keywords: Vec<String>,

    /// Keepalive ping cadence for the Socket-Mode transport.
    #[serde(default = "default_socket_ping_interval_s")]
    pub socket_ping_interval_s: u64,
    /// Maximum reconnect attempts before the transport gives up.
    #[serde(default = "default_socket_reconnect_attempts")]
    pub socket_reconnect_attempts: u32,
    /// Base reconnect backoff delay, in seconds.
    #[serde(default = "default_socket_reconnect_delay_s")]
    pub socket_reconnect_delay_s: u64,
}

fn default_llm_model() -> String {
    "anthropic/claude-3.5-sonnet".to_string()
}
fn default_privacy_tier() -> String {
    "high".to_string()
}
fn default_lsh_num_tables() -> usize {
    5
}
fn default_lsh_hyperplanes() -> usize {
    10
}
fn default_max_context_messages() -> usize {
    8
}
fn default_context_window_hours() -> f64 {
    24.0
}
fn default_response_style() -> String {
    "helpful".to_string()
}
fn default_action_confidence_threshold() -> f32 {
    0.7
}
fn default_true() -> bool {
    true
}
fn default_ai_response_max_tokens() -> u32 {
    800
}
fn default_ai_temperature() -> f32 {
    0.7
}
fn default_response_delay_ms() -> u64 {
    1000
}
fn default_socket_ping_interval_s() -> u64 {
    30
}
fn default_socket_reconnect_attempts() -> u32 {
    5
}
fn default_socket_reconnect_delay_s() -> u64 {
    5
}

impl BotConfig {
    /// Validate required fields and cross-field constraints. Called
    /// automatically by [`load_config`]; exposed separately so
    /// programmatically constructed configs can be checked too.
    pub fn validate(&self) -> Result<()> {
        if self.chat_api_base.trim().is_empty() {
            return Err(TeambotError::Configuration("chat_api_base must not be empty".into()));
        }
        if self.app_token.trim().is_empty() {
            return Err(TeambotError::Configuration("app_token must not be empty".into()));
        }
        if self.bot_token.trim().is_empty() {
            return Err(TeambotError::Configuration("bot_token must not be empty".into()));
        }
        if self.bot_user_id.trim().is_empty() {
            return Err(TeambotError::Configuration("bot_user_id must not be empty".into()));
        }
        if self.llm_api_base.trim().is_empty() {
            return Err(TeambotError::Configuration("llm_api_base must not be empty".into()));
        }
        if self.store_path.trim().is_empty() {
            return Err(TeambotError::Configuration("store_path must not be empty".into()));
        }
        let tier = PrivacyTier::parse(&self.privacy_tier).ok_or_else(|| {
            TeambotError::Configuration(format!("unrecognised privacy_tier: {}", self.privacy_tier))
        })?;
        if !matches!(tier, PrivacyTier::High) && self.external_embedder_url.is_none() {
            return Err(TeambotError::Configuration(
                "external_embedder_url is required when privacy_tier is medium or low".into(),
            ));
        }
        if self.lsh_num_tables == 0 || self.lsh_hyperplanes_per_table == 0 {
            return Err(TeambotError::Configuration(
                "lsh_num_tables and lsh_hyperplanes_per_table must be nonzero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.action_confidence_threshold) {
            return Err(TeambotError::Configuration(
                "action_confidence_threshold must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }

    /// Apply `TEAMBOT_*` environment overrides on top of YAML-loaded values.
    /// Only variables that are actually set are applied; anything absent
    /// leaves the YAML (or its serde default) untouched.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("TEAMBOT_APP_TOKEN") {
            self.app_token = v;
        }
        if let Ok(v) = env::var("TEAMBOT_BOT_TOKEN") {
            self.bot_token = v;
        }
        if let Ok(v) = env::var("TEAMBOT_LLM_API_KEY") {
            self.llm_api_key = v;
        }
        if let Ok(v) = env::var("TEAMBOT_LLM_API_BASE") {
            self.llm_api_base = v;
        }
        if let Ok(v) = env::var("TEAMBOT_PRIVACY_TIER") {
            self.privacy_tier = v;
        }
        if let Ok(v) = env::var("TEAMBOT_STORE_PATH") {
            self.store_path = v;
        }
        if let Ok(v) = env::var("TEAMBOT_EXTERNAL_EMBEDDER_URL") {
            self.external_embedder_url = Some(v);
        }
    }
}

/// Load, environment-override, and validate a [`BotConfig`] from a YAML file.
/// Aborts with a descriptive error rather than returning a partially-formed
/// config: teambot is a long-running service, not a CLI that can recover
/// interactively.
pub fn load_config(path: &str) -> Result<BotConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| TeambotError::Configuration(format!("reading {path}: {e}")))?;
    let mut config: BotConfig = serde_yaml::from_str(&content)
        .map_err(|e| TeambotError::Configuration(format!("parsing {path}: {e}")))?;

    config.apply_env_overrides();

    if config.store_path.trim().is_empty() {
        warn!("store_path is empty, using default path in config directory");
        let default_path = crate::config_dir()
            .map_err(|e| TeambotError::Configuration(e.to_string()))?
            .join("store");
        config.store_path = default_path.to_string_lossy().to_string();
    }

    config.validate()?;
    Ok(config)
}
