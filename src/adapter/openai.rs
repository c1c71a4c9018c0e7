//! OpenAI-compatible chat-completion adapter.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};

use super::{
    Adapter, AdapterError, AdapterResponse, Message, QueryContext, RATE_LIMIT_RETRY_DELAY_S,
};

const DEFAULT_BASE: &str = "https://api.openai.com/v1";

pub struct OpenAiAdapter {
    client: Client,
    base: String,
    api_key: String,
    model: String,
    temperature: f64,
    extra_headers: Vec<(String, String)>,
}

impl OpenAiAdapter {
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        model: String,
        temperature: f64,
        extra_headers: Vec<(String, String)>,
    ) -> Result<Self> {
        let client = Client::builder().build().context("failed to build HTTP client")?;
        let base = base_url.unwrap_or_else(|| DEFAULT_BASE.to_string());
        Ok(Self { client, base, api_key, model, temperature, extra_headers })
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
    /// Some compatible back-ends surface chain-of-thought separately.
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn snippet(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= 200 {
        trimmed.to_string()
    } else {
        let mut cut = 200;
        while cut > 0 && !trimmed.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}…", &trimmed[..cut])
    }
}

#[async_trait]
impl Adapter for OpenAiAdapter {
    async fn query(
        &self,
        messages: &[Message],
        max_tokens: u32,
        timeout_s: f64,
        _context: &QueryContext,
    ) -> Result<AdapterResponse, AdapterError> {
        let url = format!("{}/chat/completions", self.base.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": self.temperature,
        });

        let started = Instant::now();
        let mut retried = false;
        loop {
            let mut req = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .timeout(Duration::from_secs_f64(timeout_s.max(0.001)))
                .json(&body);
            for (name, value) in &self.extra_headers {
                req = req.header(name.as_str(), value.as_str());
            }

            let resp = match req.send().await {
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
                return Err(AdapterError::api(format!("HTTP {}: {}", status, snippet(&text))));
            }

            let parsed: ChatCompletion = resp
                .json()
                .await
                .map_err(|e| AdapterError::api(format!("malformed response body: {}", e)))?;
            let choice = parsed
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| AdapterError::api("no choices in response"))?;
            let raw_text = choice.message.content.unwrap_or_default();
            if raw_text.trim().is_empty() {
                return Err(AdapterError::empty());
            }
            let (input_tokens, output_tokens) = parsed
                .usage
                .map(|u| (u.prompt_tokens, u.completion_tokens))
                .unwrap_or((0, (raw_text.len() / 4) as u64));
            return Ok(AdapterResponse {
                raw_text,
                reasoning_text: choice.message.reasoning_content,
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
