//! Anthropic-style messages adapter.
//!
//! The response carries a mixed content list; blocks tagged `thinking`
//! populate `reasoning_text` and blocks tagged `text` concatenate into
//! `raw_text`. Reasoning is logged but never shown to downstream logic.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};

use super::{
    Adapter, AdapterError, AdapterResponse, Message, QueryContext, RATE_LIMIT_RETRY_DELAY_S,
};

const DEFAULT_BASE: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter {
    client: Client,
    base: String,
    api_key: String,
    model: String,
    temperature: f64,
}

impl AnthropicAdapter {
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        model: String,
        temperature: f64,
    ) -> Result<Self> {
        let client = Client::builder().build().context("failed to build HTTP client")?;
        let base = base_url.unwrap_or_else(|| DEFAULT_BASE.to_string());
        Ok(Self { client, base, api_key, model, temperature })
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thinking: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[async_trait]
impl Adapter for AnthropicAdapter {
    async fn query(
        &self,
        messages: &[Message],
        max_tokens: u32,
        timeout_s: f64,
        _context: &QueryContext,
    ) -> Result<AdapterResponse, AdapterError> {
        let url = format!("{}/v1/messages", self.base.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "temperature": self.temperature,
            "messages": messages,
        });

        let started = Instant::now();
        let mut retried = false;
        loop {
            let resp = match self
                .client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", API_VERSION)
                .timeout(Duration::from_secs_f64(timeout_s.max(0.001)))
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) if e.is_timeout() => {
                    return Err(AdapterError::timeout(format!(
                        "request timed out after {:.1}s",
                        timeout_s
                    )))
                }
                Err(e) => return Err(AdapterError::api(format!("transport error: {}", e))),
            };

            if resp.status().as_u16() == 429 {
                if !retried {
                    retried = true;
                    tokio::time::sleep(Duration::from_secs(RATE_LIMIT_RETRY_DELAY_S)).await;
                    continue;
                }
                return Err(AdapterError::rate_limit("rate limited by back-end"));
            }
            if !resp.status().is_success() {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                let text = text.trim();
                return Err(AdapterError::api(format!("HTTP {}: {}", status, text)));
            }

            let parsed: MessagesResponse = resp
                .json()
                .await
                .map_err(|e| AdapterError::api(format!("malformed response body: {}", e)))?;

            let mut raw_text = String::new();
            let mut reasoning = String::new();
            for block in &parsed.content {
                match block.kind.as_str() {
                    "text" => {
                        if let Some(t) = &block.text {
                            raw_text.push_str(t);
                        }
                    }
                    "thinking" => {
                        if let Some(t) = &block.thinking {
                            if !reasoning.is_empty() {
                                reasoning.push('\n');
                            }
                            reasoning.push_str(t);
                        }
                    }
                    _ => {}
                }
            }
            if raw_text.trim().is_empty() {
                return Err(AdapterError::empty());
            }
            let (input_tokens, output_tokens) = parsed
                .usage
                .map(|u| (u.input_tokens, u.output_tokens))
                .unwrap_or((0, (raw_text.len() / 4) as u64));
            return Ok(AdapterResponse {
                raw_text,
                reasoning_text: if reasoning.is_empty() { None } else { Some(reasoning) },
                input_tokens,
                output_tokens,
                latency_ms: started.elapsed().as_millis() as u64,
                model_id: self.model.clone(),
                model_version: parsed.model.unwrap_or_else(|| self.model.clone()),
            });
        }
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
