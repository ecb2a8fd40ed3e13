//! Keyword Extraction Strategies
//!
//! Provides the trait interface and implementations for pulling search
//! keywords out of a subquery. Keywords seed graph search (resolved through
//! the entity index) and community lookup.

pub mod llm;

pub use llm::LlmKeywordExtractor;

use crate::rag::entity_index::normalize;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;

// =============================================================================
// Extraction Strategy Trait
// =============================================================================

/// Strategy for extracting search keywords from text.
#[async_trait]
pub trait KeywordExtractor: Send + Sync + std::fmt::Debug {
    /// Keywords in order of appearance, deduplicated.
    async fn extract_keywords(&self, text: &str) -> Result<Vec<String>>;

    /// Get the name of this extraction strategy.
    fn name(&self) -> &'static str;
}

// =============================================================================
// Extraction Configuration
// =============================================================================

/// Configuration for extraction strategies.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// Tokens shorter than this are dropped unless they contain a digit
    pub min_token_len: usize,
    /// Maximum keywords per text
    pub max_keywords: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_token_len: 3,
            max_keywords: 16,
        }
    }
}

// =============================================================================
// Lexical Extractor
// =============================================================================

const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be",
    "been", "being", "between", "both", "but", "by", "can", "could", "did", "do", "does", "during",
    "each", "for", "from", "had", "has", "have", "how", "if", "in", "into", "is", "it", "its",
    "known", "many", "may", "more", "most", "much", "of", "on", "or", "other", "over", "should",
    "some", "such", "than", "that", "the", "their", "them", "then", "there", "these", "they",
    "this", "those", "through", "to", "under", "via", "was", "were", "what", "when", "where",
    "which", "while", "who", "whom", "whose", "why", "will", "with", "would", "find", "list",
    "tell", "show", "search", "identify", "describe", "explain", "step",
    // Boilerplate of generated community summaries
    "community", "communities", "entity", "entities", "contains", "relations",
];

/// Whether a normalized token carries no search signal.
pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

/// Stopword-filtered tokenizer; no backend calls.
#[derive(Debug, Clone, Default)]
pub struct LexicalKeywordExtractor {
    config: ExtractionConfig,
}

impl LexicalKeywordExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ExtractionConfig) -> Self {
        Self { config }
    }

    /// Synchronous extraction, shared with the LLM strategy's fallback.
    pub fn keywords(&self, text: &str) -> Vec<String> {
        let normalized = normalize(text);
        let mut seen = HashSet::new();
        normalized
            .split(' ')
            .filter(|t| !t.is_empty() && !is_stopword(t))
            .filter(|t| {
                t.chars().count() >= self.config.min_token_len
                    || t.chars().any(|c| c.is_ascii_digit())
            })
            .filter(|t| seen.insert(*t))
            .take(self.config.max_keywords)
            .map(str::to_string)
            .collect()
    }
}

#[async_trait]
impl KeywordExtractor for LexicalKeywordExtractor {
    async fn extract_keywords(&self, text: &str) -> Result<Vec<String>> {
        Ok(self.keywords(text))
    }

    fn name(&self) -> &'static str {
        "lexical"
    }
}
