//! Configuration surface (spec §4.2): feature flags and secrets loaded once
//! at boot, plus the ordered intent-rule table consumed by the RuleMatcher
//! (§4.3) and the message templates consumed by the Renderer (§4.8).
//!
//! Scalars use `figment` (Toml file + raw env overrides) the way the pack's
//! `skynet-core::config::SkynetConfig::load` does; the teacher only ever had
//! a bare `toml` dependency with no override story. Templates stay on
//! `rust_i18n` locale files, which is the teacher's own mechanism for
//! keyed-message-with-placeholders lookup.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::AppError;

fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_confidence() -> f64 {
    0.7
}
fn default_ai_timeout_ms() -> u64 {
    5000
}
fn default_messaging_timeout_ms() -> u64 {
    15_000
}
fn default_kv_timeout_ms() -> u64 {
    2000
}
fn default_store_timeout_ms() -> u64 {
    10_000
}
fn default_context_ttl_secs() -> u64 {
    1800
}
fn default_reminder_minutes() -> i64 {
    30
}
fn default_port() -> u16 {
    3000
}
fn default_node_env() -> String {
    "development".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

/// Feature flags, §4.2. Every field has the spec's documented default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default = "default_true", rename = "ENABLE_AI_FALLBACK")]
    pub enable_ai_fallback: bool,
    #[serde(default = "default_confidence", rename = "AI_FALLBACK_MIN_CONFIDENCE")]
    pub ai_fallback_min_confidence: f64,
    #[serde(default = "default_ai_timeout_ms", rename = "AI_FALLBACK_TIMEOUT_MS")]
    pub ai_fallback_timeout_ms: u64,
    #[serde(default = "default_true", rename = "ENABLE_RECURRING_COURSES")]
    pub enable_recurring_courses: bool,
    #[serde(default = "default_false", rename = "QA_FORCE_REAL")]
    pub qa_force_real: bool,
    #[serde(default = "default_false", rename = "ALLOW_TEST_WEBHOOK")]
    pub allow_test_webhook: bool,
    #[serde(default = "default_false", rename = "DISABLE_CONTEXT_AUTO_FILL")]
    pub disable_context_auto_fill: bool,
    #[serde(default = "default_false", rename = "STRICT_RECORD_REQUIRES_COURSE")]
    pub strict_record_requires_course: bool,
    #[serde(default = "default_false", rename = "USE_MOCK_LINE_SERVICE")]
    pub use_mock_line_service: bool,
    #[serde(default = "default_false", rename = "ENABLE_DEBUG_ENDPOINT")]
    pub enable_debug_endpoint: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_ai_fallback: true,
            ai_fallback_min_confidence: default_confidence(),
            ai_fallback_timeout_ms: default_ai_timeout_ms(),
            enable_recurring_courses: true,
            qa_force_real: false,
            allow_test_webhook: false,
            disable_context_auto_fill: false,
            strict_record_requires_course: false,
            use_mock_line_service: false,
            enable_debug_endpoint: false,
        }
    }
}

/// Per-suspension-point timeouts (spec §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeouts {
    #[serde(default = "default_messaging_timeout_ms")]
    pub messaging_ms: u64,
    #[serde(default = "default_kv_timeout_ms")]
    pub kv_ms: u64,
    #[serde(default = "default_store_timeout_ms")]
    pub store_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            messaging_ms: default_messaging_timeout_ms(),
            kv_ms: default_kv_timeout_ms(),
            store_ms: default_store_timeout_ms(),
        }
    }
}

/// Root configuration document. Field names match the spec's literal
/// environment-variable names (spec §6) so `Figment`'s raw env provider
/// overrides them without any prefix translation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default, rename = "CHANNEL_ACCESS_TOKEN")]
    pub channel_access_token: Option<String>,
    #[serde(default, rename = "CHANNEL_SECRET")]
    pub channel_secret: Option<String>,
    #[serde(default, rename = "REDIS_URL")]
    pub redis_url: Option<String>,
    #[serde(default, rename = "MONGODB_URI")]
    pub mongodb_uri: Option<String>,
    #[serde(default, rename = "OPENAI_API_KEY")]
    pub openai_api_key: Option<String>,
    #[serde(default = "default_llm_model", rename = "OPENAI_MODEL")]
    pub openai_model: String,
    #[serde(default = "default_llm_base_url", rename = "OPENAI_BASE_URL")]
    pub openai_base_url: String,
    #[serde(default = "default_node_env", rename = "NODE_ENV")]
    pub node_env: String,
    #[serde(default = "default_port", rename = "PORT")]
    pub port: u16,
    #[serde(default = "default_context_ttl_secs")]
    pub context_ttl_secs: u64,
    #[serde(default = "default_reminder_minutes")]
    pub default_reminder_minutes: i64,
    #[serde(flatten)]
    pub features: FeatureFlags,
    #[serde(default)]
    pub timeouts: Timeouts,
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.node_env == "production"
    }

    /// Load from `config/default.toml` (or an explicit path) with raw
    /// environment variable overrides — same two-provider shape as
    /// `SkynetConfig::load`, minus the `SKYNET_`-prefix split (this spec's
    /// env vars are unprefixed, spec §6).
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        use figment::providers::{Env, Format, Toml};
        use figment::Figment;

        let default_path = Path::new("config/default.toml");
        let path = path.unwrap_or(default_path);

        let mut figment = Figment::new();
        if path.exists() {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::raw());

        figment
            .extract()
            .map_err(|err| AppError::Config(err.to_string()))
    }
}

/// One row of the intent-rule table (spec §4.2/§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRule {
    pub intent: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub required_keywords: Vec<String>,
    #[serde(default)]
    pub required_groups: Vec<Vec<String>>,
    #[serde(default)]
    pub exclusions: Vec<String>,
    pub priority: i32,
    #[serde(default)]
    pub requires_context: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct IntentRuleFile {
    #[serde(default, rename = "rule")]
    rules: Vec<IntentRule>,
}

/// Process-wide, read-heavy configuration surface: scalar config, the
/// intent-rule table, and a reload notification channel. Rule tables and
/// templates are immutable after load (spec §9's "treat rule files as
/// immutable data ... to enable hot-reload later without locks"); only
/// `config` itself can be swapped by `reload`.
pub struct ConfigRegistry {
    config: arc_swap::ArcSwap<AppConfig>,
    intent_rules: Vec<IntentRule>,
    reload_tx: watch::Sender<()>,
}

impl ConfigRegistry {
    pub fn load(config_path: Option<&Path>, rules_path: Option<&Path>) -> Result<Arc<Self>, AppError> {
        let config = AppConfig::load(config_path)?;
        let intent_rules = load_intent_rules(rules_path)?;
        let (reload_tx, _rx) = watch::channel(());

        Ok(Arc::new(Self {
            config: arc_swap::ArcSwap::new(Arc::new(config)),
            intent_rules,
            reload_tx,
        }))
    }

    pub fn config(&self) -> Arc<AppConfig> {
        self.config.load_full()
    }

    pub fn intent_rules(&self) -> &[IntentRule] {
        &self.intent_rules
    }

    /// Re-read scalar config from disk/env and notify listeners. Intent
    /// rules and templates are not reloaded here (spec §4.2: "reload is
    /// optional"); this crate only exercises it for feature flags.
    pub fn reload(&self, config_path: Option<&Path>) -> Result<(), AppError> {
        let fresh = AppConfig::load(config_path)?;
        self.config.store(Arc::new(fresh));
        let _ = self.reload_tx.send(());
        Ok(())
    }

    pub fn subscribe(&self) -> watch::Receiver<()> {
        self.reload_tx.subscribe()
    }

    /// Generic namespaced getter, spec §4.2's `get(namespace, keypath,
    /// default)`. Only scalar flags live under the "features" namespace
    /// today; unknown namespaces fall back to `default`.
    pub fn get_bool(&self, namespace: &str, keypath: &str, default: bool) -> bool {
        let config = self.config();
        match (namespace, keypath) {
            ("features", "ENABLE_AI_FALLBACK") => config.features.enable_ai_fallback,
            ("features", "ENABLE_RECURRING_COURSES") => config.features.enable_recurring_courses,
            ("features", "ALLOW_TEST_WEBHOOK") => config.features.allow_test_webhook,
            ("features", "QA_FORCE_REAL") => config.features.qa_force_real,
            ("features", "DISABLE_CONTEXT_AUTO_FILL") => config.features.disable_context_auto_fill,
            ("features", "STRICT_RECORD_REQUIRES_COURSE") => {
                config.features.strict_record_requires_course
            }
            _ => default,
        }
    }
}

fn load_intent_rules(path: Option<&Path>) -> Result<Vec<IntentRule>, AppError> {
    let default_path = Path::new("assets/intent_rules.toml");
    let path = path.unwrap_or(default_path);

    if !path.exists() {
        return Ok(Vec::new());
    }

    let raw = std::fs::read_to_string(path)
        .map_err(|err| AppError::Config(format!("reading {}: {err}", path.display())))?;
    let parsed: IntentRuleFile =
        toml::from_str(&raw).map_err(|err| AppError::Config(format!("parsing {}: {err}", path.display())))?;

    let mut rules = parsed.rules;
    rules.sort_by_key(|rule| rule.priority);
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let flags = FeatureFlags::default();
        assert!(flags.enable_ai_fallback);
        assert_eq!(flags.ai_fallback_min_confidence, 0.7);
        assert_eq!(flags.ai_fallback_timeout_ms, 5000);
    }

    #[test]
    fn load_without_file_falls_back_to_defaults() {
        let config = AppConfig::load(Some(Path::new("/nonexistent/path.toml"))).unwrap();
        assert_eq!(config.node_env, "development");
        assert_eq!(config.port, 3000);
    }

    #[test]
    fn missing_rules_file_yields_empty_table() {
        let rules = load_intent_rules(Some(Path::new("/nonexistent/rules.toml"))).unwrap();
        assert!(rules.is_empty());
    }
}
