//! Provider-specific configuration and detection.
//!
//! This module handles differences between OpenAI-compatible providers:
//! completion URL layout and how the API key is presented.

/// Supported LLM providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    /// `OpenAI` (api.openai.com)
    OpenAI,
    /// Azure `OpenAI` Service
    AzureOpenAI {
        /// Deployment name (required for Azure)
        deployment_name: String,
        /// API version (e.g., "2024-08-01-preview")
        api_version: String,
    },
    /// `OpenRouter` (openrouter.ai)
    OpenRouter,
    /// Together AI (together.ai, together.xyz)
    TogetherAI,
    /// Groq (groq.com)
    Groq,
    /// Generic OpenAI-compatible provider (vLLM, Ollama, LM Studio, ...)
    Generic,
}

/// How the API key travels with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPlacement {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `api-key: <key>` header (Azure)
    ApiKeyHeader,
}

impl Provider {
    /// Detect provider from base URL.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let provider = Provider::detect_from_url("https://api.groq.com/openai");
    /// assert_eq!(provider, Provider::Groq);
    /// ```
    #[must_use]
    pub fn detect_from_url(base_url: &str) -> Self {
        let lower = base_url.to_lowercase();

        if lower.contains("openai.azure.com") || lower.contains("azure.com") {
            Self::AzureOpenAI {
                deployment_name: String::new(),
                api_version: "2024-08-01-preview".to_string(),
            }
        } else if lower.contains("openrouter.ai") {
            Self::OpenRouter
        } else if lower.contains("together.ai") || lower.contains("together.xyz") {
            Self::TogetherAI
        } else if lower.contains("groq.com") {
            Self::Groq
        } else if lower.contains("openai.com") {
            Self::OpenAI
        } else {
            Self::Generic
        }
    }

    /// Fill in Azure deployment details; other providers are returned unchanged.
    #[must_use]
    pub fn with_azure_deployment(self, deployment: Option<String>, api_version: Option<String>) -> Self {
        match (self, deployment) {
            (Self::AzureOpenAI { api_version: detected, .. }, Some(deployment_name)) => {
                Self::AzureOpenAI {
                    deployment_name,
                    api_version: api_version.unwrap_or(detected),
                }
            }
            (other, _) => other,
        }
    }

    /// Build the chat completions URL for this provider.
    ///
    /// Azure routes by deployment, so `model` only matters elsewhere.
    #[must_use]
    pub fn build_chat_url(&self, base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');

        match self {
            Self::AzureOpenAI {
                deployment_name,
                api_version,
            } => format!(
                "{base}/openai/deployments/{deployment_name}/chat/completions?api-version={api_version}"
            ),
            _ if base.ends_with("/v1") => format!("{base}/chat/completions"),
            _ => format!("{base}/v1/chat/completions"),
        }
    }

    #[must_use]
    pub fn key_placement(&self) -> KeyPlacement {
        match self {
            Self::AzureOpenAI { .. } => KeyPlacement::ApiKeyHeader,
            _ => KeyPlacement::Bearer,
        }
    }

    /// Whether the request body must carry the model name.
    #[must_use]
    pub fn sends_model_in_body(&self) -> bool {
        !matches!(self, Self::AzureOpenAI { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_openai() {
        assert_eq!(Provider::detect_from_url("https://api.openai.com"), Provider::OpenAI);
    }

    #[test]
    fn test_detect_azure() {
        let provider = Provider::detect_from_url("https://my-resource.openai.azure.com");
        assert!(matches!(provider, Provider::AzureOpenAI { .. }));
        assert_eq!(provider.key_placement(), KeyPlacement::ApiKeyHeader);
    }

    #[test]
    fn test_detect_generic_local() {
        let provider = Provider::detect_from_url("http://localhost:11434");
        assert_eq!(provider, Provider::Generic);
        assert_eq!(provider.key_placement(), KeyPlacement::Bearer);
    }

    #[test]
    fn test_build_url_handles_v1_suffix() {
        let provider = Provider::OpenRouter;
        assert_eq!(
            provider.build_chat_url("https://openrouter.ai/api/v1/"),
            "https://openrouter.ai/api/v1/chat/completions"
        );
        assert_eq!(
            Provider::OpenAI.build_chat_url("https://api.openai.com"),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_azure_deployment_url() {
        let provider = Provider::detect_from_url("https://my-resource.openai.azure.com")
            .with_azure_deployment(Some("gpt-4o".to_string()), None);
        assert_eq!(
            provider.build_chat_url("https://my-resource.openai.azure.com"),
            "https://my-resource.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-08-01-preview"
        );
        assert!(!provider.sends_model_in_body());
    }

    #[test]
    fn test_azure_deployment_ignored_elsewhere() {
        let provider = Provider::Groq.with_azure_deployment(Some("x".to_string()), None);
        assert_eq!(provider, Provider::Groq);
    }
}
