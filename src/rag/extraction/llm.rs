//! Language-model keyword extraction with a lexical safety net.

use super::{KeywordExtractor, LexicalKeywordExtractor};
use crate::llm::{LanguageModel, complete_within, prompts};
use crate::rag::entity_index::normalize;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Asks the model for a comma-separated keyword list.
///
/// Any model failure, timeout or empty reply falls back to
/// [`LexicalKeywordExtractor`], so extraction itself never fails.
#[derive(Debug, Clone)]
pub struct LlmKeywordExtractor {
    model: Arc<dyn LanguageModel>,
    fallback: LexicalKeywordExtractor,
    timeout: Duration,
}

impl LlmKeywordExtractor {
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self {
            model,
            fallback: LexicalKeywordExtractor::new(),
            timeout,
        }
    }
}

/// Split a model reply into normalized keywords, keeping reply order.
fn parse_keyword_list(reply: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    reply
        .split([',', '\n', ';'])
        .map(|k| normalize(k.trim_start_matches(['-', '*', ' '])))
        .filter(|k| !k.is_empty())
        .filter(|k| seen.insert(k.clone()))
        .collect()
}

#[async_trait]
impl KeywordExtractor for LlmKeywordExtractor {
    async fn extract_keywords(&self, text: &str) -> Result<Vec<String>> {
        match complete_within(self.model.as_ref(), &prompts::keywords(text), self.timeout).await {
            Ok(reply) => {
                let keywords = parse_keyword_list(&reply);
                if keywords.is_empty() {
                    tracing::debug!("Model returned no keywords, using lexical extraction");
                    Ok(self.fallback.keywords(text))
                } else {
                    Ok(keywords)
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Keyword extraction via model failed, using lexical extraction");
                Ok(self.fallback.keywords(text))
            }
        }
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}
