//! Uniform query interface over model back-ends.
//!
//! Every back-end failure is mapped into one error type with a
//! classification tag; no back-end-specific error ever crosses this
//! boundary. The match loop treats a failed adapter call exactly like an
//! unresponsive agent, which keeps the turn state machine small.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::config::{AgentConfig, Provider};

pub mod anthropic;
pub mod offline;
pub mod openai;
pub mod openrouter;

/// Fixed delay before the single rate-limit retry.
pub const RATE_LIMIT_RETRY_DELAY_S: u64 = 5;

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

/// Per-query context, mostly for offline strategies and diagnostics.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    pub match_id: String,
    pub seat: String,
    pub turn_number: u64,
}

#[derive(Debug, Clone)]
pub struct AdapterResponse {
    pub raw_text: String,
    pub reasoning_text: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub latency_ms: u64,
    pub model_id: String,
    pub model_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    RateLimit,
    ApiError,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::RateLimit => "rate_limit",
            FailureKind::ApiError => "api_error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The entire fault surface of the adapter layer.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct AdapterError {
    pub kind: FailureKind,
    pub message: String,
    /// Set when the back-end answered successfully but with no text; the
    /// match loop classifies this as an empty response rather than a
    /// timeout.
    pub empty_completion: bool,
}

impl AdapterError {
    pub fn timeout(message: impl Into<String>) -> Self {
        Self { kind: FailureKind::Timeout, message: message.into(), empty_completion: false }
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self { kind: FailureKind::RateLimit, message: message.into(), empty_completion: false }
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self { kind: FailureKind::ApiError, message: message.into(), empty_completion: false }
    }

    pub fn empty() -> Self {
        Self {
            kind: FailureKind::ApiError,
            message: "empty completion".to_string(),
            empty_completion: true,
        }
    }
}

#[async_trait]
pub trait Adapter: Send + Sync {
    async fn query(
        &self,
        messages: &[Message],
        max_tokens: u32,
        timeout_s: f64,
        context: &QueryContext,
    ) -> Result<AdapterResponse, AdapterError>;

    fn model_id(&self) -> &str;
}

/// Resolve a credential env var, failing fast with the variable name.
fn credential(agent_name: &str, env_var: &str) -> Result<String> {
    std::env::var(env_var)
        .map_err(|_| anyhow!("agent '{}': credential env var {} is not set", agent_name, env_var))
}

/// Build the adapter for one configured agent. All configuration errors
/// (missing credentials, unknown strategies) surface here, before any
/// match starts.
pub fn build_adapter(agent_name: &str, cfg: &AgentConfig) -> Result<Arc<dyn Adapter>> {
    match cfg.provider {
        Provider::Offline => {
            let strategy_name = cfg.strategy.as_deref().unwrap_or("always_call");
            let strategy = offline::registry(strategy_name).ok_or_else(|| {
                anyhow!("agent '{}': unknown offline strategy '{}'", agent_name, strategy_name)
            })?;
            let model_id = cfg
                .model_id
                .clone()
                .unwrap_or_else(|| format!("offline/{}", strategy_name));
            Ok(Arc::new(offline::OfflineAdapter::new(model_id, strategy)))
        }
        Provider::Openai => {
            let env_var = cfg.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY");
            let api_key = credential(agent_name, env_var)?;
            let model_id = require_model_id(agent_name, cfg)?;
            Ok(Arc::new(openai::OpenAiAdapter::new(
                api_key,
                cfg.base_url.clone(),
                model_id,
                cfg.temperature,
                Vec::new(),
            )?))
        }
        Provider::Anthropic => {
            let env_var = cfg.api_key_env.as_deref().unwrap_or("ANTHROPIC_API_KEY");
            let api_key = credential(agent_name, env_var)?;
            let model_id = require_model_id(agent_name, cfg)?;
            Ok(Arc::new(anthropic::AnthropicAdapter::new(
                api_key,
                cfg.base_url.clone(),
                model_id,
                cfg.temperature,
            )?))
        }
        Provider::Openrouter => {
            let env_var = cfg.api_key_env.as_deref().unwrap_or("OPENROUTER_API_KEY");
            let api_key = credential(agent_name, env_var)?;
            let model_id = require_model_id(agent_name, cfg)?;
            Ok(Arc::new(openrouter::OpenRouterAdapter::new(
                api_key,
                model_id,
                cfg.temperature,
                cfg.site_url.clone(),
                cfg.app_name.clone(),
            )?))
        }
    }
}

fn require_model_id(agent_name: &str, cfg: &AgentConfig) -> Result<String> {
    match &cfg.model_id {
        Some(id) => Ok(id.clone()),
        None => bail!("agent '{}': model_id is required for provider", agent_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TournamentConfig;

    fn agent_json(body: &str) -> AgentConfig {
        let cfg = TournamentConfig::from_json_str(&format!(
            r#"{{"tournament": {{"name": "t", "seed": 1}},
                 "models": {{"a": {body}}},
                 "events": {{}}}}"#
        ))
        .unwrap();
        cfg.models["a"].clone()
    }

    #[test]
    fn test_unknown_offline_strategy_is_config_error() {
        let agent = agent_json(r#"{"provider": "offline", "strategy": "psychic"}"#);
        let err = match build_adapter("a", &agent) {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(err.to_string().contains("unknown offline strategy"));
    }

    #[test]
    fn test_missing_credential_names_the_variable() {
        let agent = agent_json(
            r#"{"provider": "openai", "model_id": "gpt-x",
                "api_key_env": "TOURNEY_TEST_SURELY_UNSET"}"#,
        );
        let err = match build_adapter("a", &agent) {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(err.to_string().contains("TOURNEY_TEST_SURELY_UNSET"));
    }

    #[test]
    fn test_offline_default_model_id() {
        let agent = agent_json(r#"{"provider": "offline", "strategy": "always_fold"}"#);
        let adapter = build_adapter("a", &agent).unwrap();
        assert_eq!(adapter.model_id(), "offline/always_fold");
    }

    #[test]
    fn test_adapter_error_display() {
        let e = AdapterError::timeout("request timed out after 1.0s");
        assert_eq!(e.to_string(), "timeout: request timed out after 1.0s");
        assert!(AdapterError::empty().empty_completion);
    }
}
