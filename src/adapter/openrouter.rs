//! OpenRouter-routed adapter: the OpenAI-compatible wire shape with a
//! fixed base URL and optional attribution headers.

use anyhow::Result;
use async_trait::async_trait;

use super::openai::OpenAiAdapter;
use super::{Adapter, AdapterError, AdapterResponse, Message, QueryContext};

const OPENROUTER_BASE: &str = "https://openrouter.ai/api/v1";

pub struct OpenRouterAdapter {
    inner: OpenAiAdapter,
}

impl OpenRouterAdapter {
    pub fn new(
        api_key: String,
        model: String,
        temperature: f64,
        site_url: Option<String>,
        app_name: Option<String>,
    ) -> Result<Self> {
        let mut headers = Vec::new();
        if let Some(site) = site_url {
            headers.push(("HTTP-Referer".to_string(), site));
        }
        if let Some(app) = app_name {
            headers.push(("X-Title".to_string(), app));
        }
        let inner = OpenAiAdapter::new(
            api_key,
            Some(OPENROUTER_BASE.to_string()),
            model,
            temperature,
            headers,
        )?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl Adapter for OpenRouterAdapter {
    async fn query(
        &self,
        messages: &[Message],
        max_tokens: u32,
        timeout_s: f64,
        context: &QueryContext,
    ) -> Result<AdapterResponse, AdapterError> {
        self.inner.query(messages, max_tokens, timeout_s, context).await
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}
