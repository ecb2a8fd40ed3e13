//! OpenAI Chat Completions API client.
//!
//! Implements [`LanguageModel`] over `/v1/chat/completions` with a single
//! non-streaming request per completion. Requests pass through a client-side
//! rate limiter so bursts of planning/synthesis calls stay under provider quotas.

use std::num::NonZeroU32;
use std::sync::Arc;

use anyhow::Context;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

use super::provider::KeyPlacement;
use super::{LanguageModel, LlmSettings, Prompt};

/// Client for the OpenAI Chat Completions API.
#[derive(Clone)]
pub struct ChatCompletionsModel {
    http: reqwest::Client,
    settings: LlmSettings,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl std::fmt::Debug for ChatCompletionsModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsModel")
            .field("base_url", &self.settings.base_url)
            .field("model", &self.settings.model)
            .field("provider", &self.settings.provider)
            .finish_non_exhaustive()
    }
}

impl ChatCompletionsModel {
    /// Create a client allowing at most `requests_per_second` completions.
    #[must_use]
    pub fn new(settings: LlmSettings, requests_per_second: u32) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
        Self {
            http: reqwest::Client::new(),
            settings,
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    fn request_body(&self, prompt: &Prompt) -> serde_json::Value {
        let mut body = serde_json::json!({
            "stream": false,
            "temperature": self.settings.temperature,
            "messages": prompt.to_messages(),
        });
        if self.settings.provider.sends_model_in_body() {
            body["model"] = serde_json::Value::String(self.settings.model.clone());
        }
        body
    }
}

#[async_trait::async_trait]
impl LanguageModel for ChatCompletionsModel {
    async fn complete(&self, prompt: &Prompt) -> anyhow::Result<String> {
        self.limiter.until_ready().await;

        let url = self.settings.provider.build_chat_url(&self.settings.base_url);
        let mut rb = self.http.post(&url).json(&self.request_body(prompt));
        if let Some(k) = &self.settings.api_key {
            rb = match self.settings.provider.key_placement() {
                KeyPlacement::Bearer => rb.bearer_auth(k),
                KeyPlacement::ApiKeyHeader => rb.header("api-key", k),
            };
        }

        tracing::debug!(purpose = ?prompt.purpose, model = %self.settings.model, "LLM request");

        let resp = rb.send().await?.error_for_status()?;
        let v: serde_json::Value = resp.json().await?;
        extract_content(&v)
    }

    fn name(&self) -> &str {
        &self.settings.model
    }
}

/// Pull `choices[0].message.content` out of a completion response.
fn extract_content(v: &serde_json::Value) -> anyhow::Result<String> {
    let content = v["choices"][0]["message"]["content"]
        .as_str()
        .context("completion response has no message content")?;
    if content.trim().is_empty() {
        anyhow::bail!("completion response content is empty");
    }
    Ok(content.to_string())
}
