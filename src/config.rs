//! Tournament configuration.
//!
//! The tournament document is deserialized once before the orchestrator is
//! built and is read-only for the rest of the run. Ambient runtime knobs
//! (log directory, document-store URI, parallelism) come from the
//! environment, not from the tournament document.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::referee::{default_strike_kinds, ViolationKind};

/// Version tag stamped on every turn record.
pub const PROMPT_SCHEMA_VERSION: &str = "1";

#[derive(Debug, Clone, Deserialize)]
pub struct TournamentConfig {
    pub tournament: TournamentMeta,
    pub models: BTreeMap<String, AgentConfig>,
    pub events: BTreeMap<String, EventConfig>,
    #[serde(default)]
    pub compute_caps: ComputeCaps,
}

impl TournamentConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("invalid tournament config")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TournamentMeta {
    pub name: String,
    pub seed: u64,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Offline,
    Openai,
    Anthropic,
    Openrouter,
}

/// One logical participant bound to one adapter configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub provider: Provider,
    #[serde(default)]
    pub model_id: Option<String>,
    /// Offline-provider strategy name; unknown names are configuration
    /// errors raised before any match starts.
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default)]
    pub timeout_s: Option<f64>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub site_url: Option<String>,
    #[serde(default)]
    pub app_name: Option<String>,
}

fn default_temperature() -> f64 {
    0.7
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchFormat {
    #[default]
    RoundRobin,
    Bracket,
    Explicit,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventConfig {
    /// Game kind, e.g. "highcard" or "dice".
    pub game: String,
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub format: MatchFormat,
    /// Explicit seat lists, only read when `format` is `explicit`.
    #[serde(default)]
    pub matchups: Vec<Vec<String>>,
    /// Event-specific engine parameters (hands, antes, stacks, dice rules).
    #[serde(default)]
    pub params: Value,
}

fn default_rounds() -> u32 {
    1
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComputeCaps {
    #[serde(default = "default_max_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_timeout_s")]
    pub timeout_s: f64,
    #[serde(default = "default_forfeit_threshold")]
    pub match_forfeit_threshold: u32,
    #[serde(default = "default_strike_kinds")]
    pub strike_violation_kinds: Vec<ViolationKind>,
    /// When set, the document sink stores prompts verbatim instead of the
    /// default hash + counts. The file sink always stores verbatim.
    #[serde(default)]
    pub store_prompt_text: bool,
}

impl Default for ComputeCaps {
    fn default() -> Self {
        Self {
            max_output_tokens: default_max_tokens(),
            timeout_s: default_timeout_s(),
            match_forfeit_threshold: default_forfeit_threshold(),
            strike_violation_kinds: default_strike_kinds(),
            store_prompt_text: false,
        }
    }
}

impl ComputeCaps {
    pub fn effective_max_tokens(&self, agent: &AgentConfig) -> u32 {
        agent.max_output_tokens.unwrap_or(self.max_output_tokens)
    }

    pub fn effective_timeout_s(&self, agent: &AgentConfig) -> f64 {
        agent.timeout_s.unwrap_or(self.timeout_s)
    }
}

fn default_max_tokens() -> u32 {
    512
}

fn default_timeout_s() -> f64 {
    30.0
}

fn default_forfeit_threshold() -> u32 {
    3
}

/// Ambient runtime settings, environment-driven like the rest of the
/// process configuration.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub log_dir: PathBuf,
    pub store_uri: Option<String>,
    pub max_parallel_matches: usize,
}

impl RunSettings {
    pub fn from_env() -> Self {
        Self {
            log_dir: std::env::var("TOURNEY_LOG_DIR")
                .unwrap_or_else(|_| "out/matches".to_string())
                .into(),
            store_uri: std::env::var("TOURNEY_STORE_URI").ok(),
            max_parallel_matches: std::env::var("TOURNEY_MAX_PARALLEL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
        }
    }
}
