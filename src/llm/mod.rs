//! Language-model abstraction.
//!
//! The reasoning engine depends only on [`LanguageModel::complete`]: a
//! fallible, latent text completion used for plan decomposition, keyword
//! extraction, refinement and final synthesis. Any OpenAI-compatible endpoint
//! can back it through [`ChatCompletionsModel`].
//!
//! # Example
//!
//! ```rust,ignore
//! use medgraph_rag::llm::{ChatCompletionsModel, LanguageModel, Prompt, PromptPurpose};
//!
//! let model = ChatCompletionsModel::new(settings, 5);
//! let text = model
//!     .complete(&Prompt::new(PromptPurpose::Plan, "You plan searches.", "What treats X?"))
//!     .await?;
//! ```

pub mod chat_completions;
pub mod prompts;
pub mod provider;

use std::time::Duration;

pub use chat_completions::ChatCompletionsModel;
pub use provider::Provider;

/// LLM connection and model settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    /// Base URL for the LLM API (e.g., `https://api.openai.com`).
    pub base_url: String,
    /// Optional API key for authentication.
    pub api_key: Option<String>,
    /// Model identifier (e.g., `gpt-4o-mini`).
    pub model: String,
    /// Provider type (auto-detected from `base_url` if not specified).
    pub provider: Provider,
    /// Sampling temperature; 0 keeps planning and synthesis repeatable.
    pub temperature: f32,
}

/// What a prompt is used for; drives logging and lets test doubles script replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptPurpose {
    Plan,
    Keywords,
    Refine,
    Synthesize,
    Summarize,
}

/// A two-part prompt: system instructions plus the user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub purpose: PromptPurpose,
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn new(purpose: PromptPurpose, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            purpose,
            system: system.into(),
            user: user.into(),
        }
    }

    /// Chat-completions message array for this prompt.
    pub fn to_messages(&self) -> Vec<serde_json::Value> {
        vec![
            serde_json::json!({ "role": "system", "content": self.system }),
            serde_json::json!({ "role": "user", "content": self.user }),
        ]
    }
}

/// Text completion capability.
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync + std::fmt::Debug {
    /// Complete the prompt and return the model's text.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, is rejected, or yields no text.
    async fn complete(&self, prompt: &Prompt) -> anyhow::Result<String>;

    /// Model name for logging.
    fn name(&self) -> &str;
}

/// Complete `prompt`, treating a timeout like any other model failure.
pub async fn complete_within(
    model: &dyn LanguageModel,
    prompt: &Prompt,
    timeout: Duration,
) -> anyhow::Result<String> {
    match tokio::time::timeout(timeout, model.complete(prompt)).await {
        Ok(result) => result,
        Err(_) => anyhow::bail!(
            "{} did not answer the {:?} prompt within {}ms",
            model.name(),
            prompt.purpose,
            timeout.as_millis()
        ),
    }
}
