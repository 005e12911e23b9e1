use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// `${NAME}` and `${NAME:-default}` placeholders, substituted from the
/// environment before the config is deserialized.
static ENV_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("env placeholder regex is valid")
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityConfig {
    pub agent_id: String,
    #[serde(default = "default_display_name")]
    pub display_name: String,
    /// Handle other participants use to mention the agent, without any
    /// platform sigil ("@" is stripped during matching).
    pub handle: String,
}

fn default_display_name() -> String {
    "parley".to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Http,
    Shell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    pub kind: TransportKind,
    pub base_url: String,
    pub conversation_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// External retrieval executable, shell transport only.
    #[serde(default)]
    pub fetch_command: String,
    /// External publish executable, shell transport only.
    #[serde(default)]
    pub send_command: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalityConfig {
    #[serde(default = "default_proactivity")]
    pub proactivity: f64,
    #[serde(default = "default_formality")]
    pub formality: f64,
    #[serde(default = "default_style")]
    pub style: String,
}

fn default_proactivity() -> f64 {
    0.5
}

fn default_formality() -> f64 {
    0.5
}

fn default_style() -> String {
    "conversational".to_string()
}

impl Default for PersonalityConfig {
    fn default() -> Self {
        Self {
            proactivity: default_proactivity(),
            formality: default_formality(),
            style: default_style(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetsConfig {
    #[serde(default = "default_density_target")]
    pub density: f64,
    #[serde(default = "default_quality_target")]
    pub quality: f64,
}

fn default_density_target() -> f64 {
    0.5
}

fn default_quality_target() -> f64 {
    0.6
}

impl Default for TargetsConfig {
    fn default() -> Self {
        Self {
            density: default_density_target(),
            quality: default_quality_target(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollingConfig {
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_min_interval_ms() -> u64 {
    5_000
}

fn default_max_interval_ms() -> u64 {
    120_000
}

fn default_batch_size() -> usize {
    50
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            batch_size: default_batch_size(),
        }
    }
}

/// Confidence weights for the think-phase factors. The weights of all
/// factors that hold are summed; the sum is deliberately allowed to
/// exceed 1.0 when several factors coincide.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionConfig {
    #[serde(default = "default_mention_weight")]
    pub mention_weight: f64,
    #[serde(default = "default_question_weight")]
    pub question_weight: f64,
    #[serde(default = "default_density_weight")]
    pub density_weight: f64,
    #[serde(default = "default_quality_weight")]
    pub quality_weight: f64,
    /// Hard ceiling on own messages in the trailing hour; at or above it
    /// the agent always waits.
    #[serde(default = "default_max_replies_per_hour")]
    pub max_replies_per_hour: usize,
}

fn default_mention_weight() -> f64 {
    0.6
}

fn default_question_weight() -> f64 {
    0.3
}

fn default_density_weight() -> f64 {
    0.25
}

fn default_quality_weight() -> f64 {
    0.2
}

fn default_max_replies_per_hour() -> usize {
    5
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            mention_weight: default_mention_weight(),
            question_weight: default_question_weight(),
            density_weight: default_density_weight(),
            quality_weight: default_quality_weight(),
            max_replies_per_hour: default_max_replies_per_hour(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    #[serde(default = "default_per_minute")]
    pub messages_per_minute: u32,
    #[serde(default = "default_per_hour")]
    pub messages_per_hour: u32,
    #[serde(default = "default_per_day")]
    pub messages_per_day: u32,
}

fn default_per_minute() -> u32 {
    10
}

fn default_per_hour() -> u32 {
    60
}

fn default_per_day() -> u32 {
    500
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            messages_per_minute: default_per_minute(),
            messages_per_hour: default_per_hour(),
            messages_per_day: default_per_day(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

fn default_max_entries() -> usize {
    200
}

fn default_max_age_secs() -> u64 {
    24 * 3600
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_age_secs: default_max_age_secs(),
        }
    }
}

/// Validated, immutable run parameters for one agent. Produced once at
/// startup by [`AgentConfig::load`]; the core treats it as read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub identity: IdentityConfig,
    pub transport: TransportConfig,
    #[serde(default)]
    pub personality: PersonalityConfig,
    #[serde(default)]
    pub targets: TargetsConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub decision: DecisionConfig,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

/// Substitute `${NAME}` / `${NAME:-default}` placeholders from the
/// environment. A placeholder with no value and no default is an error so
/// that missing credentials fail fast instead of producing empty strings.
pub fn substitute_env(raw: &str) -> Result<String> {
    let mut missing: Vec<String> = Vec::new();
    let substituted = ENV_PLACEHOLDER.replace_all(raw, |caps: &regex::Captures| {
        let name = &caps[1];
        match std::env::var(name) {
            Ok(value) => value,
            Err(_) => match caps.get(2) {
                Some(default) => default.as_str().to_string(),
                None => {
                    missing.push(name.to_string());
                    String::new()
                }
            },
        }
    });
    if !missing.is_empty() {
        return Err(Error::Config(format!(
            "Unresolved environment placeholders: {}",
            missing.join(", ")
        )));
    }
    Ok(substituted.into_owned())
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) || value.is_nan() {
        return Err(Error::Validation(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}

impl AgentConfig {
    /// Load, substitute and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_str(&raw)
    }

    /// Parse a raw JSON string through env substitution and validation.
    pub fn from_str(raw: &str) -> Result<Self> {
        let substituted = substitute_env(raw)?;
        let config: AgentConfig = serde_json::from_str(&substituted)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.identity.agent_id.trim().is_empty() {
            return Err(Error::Validation("identity.agentId must not be empty".into()));
        }
        if self.identity.handle.trim().is_empty() {
            return Err(Error::Validation("identity.handle must not be empty".into()));
        }
        if self.transport.conversation_id.trim().is_empty() {
            return Err(Error::Validation(
                "transport.conversationId must not be empty".into(),
            ));
        }
        match self.transport.kind {
            TransportKind::Http => {
                if self.transport.base_url.trim().is_empty() {
                    return Err(Error::Validation(
                        "transport.baseUrl is required for the http transport".into(),
                    ));
                }
            }
            TransportKind::Shell => {
                if self.transport.fetch_command.trim().is_empty()
                    || self.transport.send_command.trim().is_empty()
                {
                    return Err(Error::Validation(
                        "transport.fetchCommand and transport.sendCommand are required for the shell transport"
                            .into(),
                    ));
                }
            }
        }

        check_unit("personality.proactivity", self.personality.proactivity)?;
        check_unit("personality.formality", self.personality.formality)?;
        check_unit("targets.density", self.targets.density)?;
        check_unit("targets.quality", self.targets.quality)?;
        check_unit("decision.mentionWeight", self.decision.mention_weight)?;
        check_unit("decision.questionWeight", self.decision.question_weight)?;
        check_unit("decision.densityWeight", self.decision.density_weight)?;
        check_unit("decision.qualityWeight", self.decision.quality_weight)?;

        if self.polling.min_interval_ms < 1000 {
            return Err(Error::Validation(format!(
                "polling.minIntervalMs must be at least 1000, got {}",
                self.polling.min_interval_ms
            )));
        }
        if self.polling.max_interval_ms < self.polling.min_interval_ms {
            return Err(Error::Validation(format!(
                "polling.maxIntervalMs ({}) must be >= polling.minIntervalMs ({})",
                self.polling.max_interval_ms, self.polling.min_interval_ms
            )));
        }
        if self.polling.batch_size == 0 {
            return Err(Error::Validation("polling.batchSize must be > 0".into()));
        }
        if self.memory.max_entries == 0 {
            return Err(Error::Validation("memory.maxEntries must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_raw() -> String {
        r#"{
            "identity": { "agentId": "a1", "handle": "parley" },
            "transport": {
                "kind": "http",
                "baseUrl": "http://localhost:9000",
                "conversationId": "c1",
                "username": "bot",
                "password": "secret"
            }
        }"#
        .to_string()
    }

    #[test]
    fn test_minimal_config_valid_with_defaults() {
        let cfg = AgentConfig::from_str(&minimal_raw()).unwrap();
        assert_eq!(cfg.personality.proactivity, 0.5);
        assert_eq!(cfg.polling.min_interval_ms, 5000);
        assert_eq!(cfg.decision.max_replies_per_hour, 5);
        assert_eq!(cfg.memory.max_entries, 200);
    }

    #[test]
    fn test_env_substitution_with_default() {
        std::env::remove_var("PARLEY_TEST_MISSING");
        let out = substitute_env("url=${PARLEY_TEST_MISSING:-http://fallback}").unwrap();
        assert_eq!(out, "url=http://fallback");
    }

    #[test]
    fn test_env_substitution_from_environment() {
        std::env::set_var("PARLEY_TEST_TOKEN", "t0k3n");
        let out = substitute_env("auth=${PARLEY_TEST_TOKEN}").unwrap();
        assert_eq!(out, "auth=t0k3n");
        std::env::remove_var("PARLEY_TEST_TOKEN");
    }

    #[test]
    fn test_env_substitution_missing_fails() {
        std::env::remove_var("PARLEY_TEST_ABSENT");
        let err = substitute_env("x=${PARLEY_TEST_ABSENT}").unwrap_err();
        assert_eq!(err.code(), "config");
    }

    #[test]
    fn test_polling_interval_validation() {
        let mut cfg = AgentConfig::from_str(&minimal_raw()).unwrap();
        cfg.polling.min_interval_ms = 500;
        assert!(cfg.validate().is_err());
        cfg.polling.min_interval_ms = 5000;
        cfg.polling.max_interval_ms = 4000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_unit_range_validation() {
        let mut cfg = AgentConfig::from_str(&minimal_raw()).unwrap();
        cfg.personality.proactivity = 1.5;
        assert!(cfg.validate().is_err());
        cfg.personality.proactivity = 1.0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_shell_transport_requires_commands() {
        let mut cfg = AgentConfig::from_str(&minimal_raw()).unwrap();
        cfg.transport.kind = TransportKind::Shell;
        assert!(cfg.validate().is_err());
        cfg.transport.fetch_command = "/usr/local/bin/chat-fetch".into();
        cfg.transport.send_command = "/usr/local/bin/chat-send".into();
        assert!(cfg.validate().is_ok());
    }
}
