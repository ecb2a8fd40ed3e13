//! Community summaries.
//!
//! Summaries are what community lookup matches keywords against and what a
//! CommunityHit carries as payload text.

use crate::domain::{Community, GraphSnapshot};
use crate::llm::{LanguageModel, complete_within, prompts};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// Member names shown in a summary.
const MAX_NAMED_MEMBERS: usize = 5;

/// Writes `summary` for each detected community.
#[async_trait]
pub trait Summarizer: Send + Sync + std::fmt::Debug {
    async fn summarize(&self, communities: &mut [Community], snapshot: &GraphSnapshot);
}

/// Member names (sorted by id, at most five) and relation types inside `community`.
fn describe(community: &Community, snapshot: &GraphSnapshot) -> (Vec<String>, Vec<String>) {
    let names: HashMap<&str, &str> = snapshot
        .entities
        .iter()
        .map(|e| (e.id.as_str(), e.name.as_str()))
        .collect();

    let members: Vec<String> = community
        .member_entity_ids
        .iter()
        .take(MAX_NAMED_MEMBERS)
        .map(|id| names.get(id.as_str()).copied().unwrap_or(id.as_str()).to_string())
        .collect();

    let relations: BTreeSet<&str> = snapshot
        .relationships
        .iter()
        .filter(|r| {
            community.member_entity_ids.contains(&r.source_id)
                && community.member_entity_ids.contains(&r.target_id)
        })
        .map(|r| r.relation_type.as_str())
        .collect();

    (members, relations.into_iter().map(str::to_string).collect())
}

/// `Community <id> (<size> entities): contains <names>; relations: <types>`.
pub fn lexical_summary(community: &Community, snapshot: &GraphSnapshot) -> String {
    let (members, relations) = describe(community, snapshot);
    let mut summary = format!(
        "Community {} ({} entities): contains {}",
        community.id,
        community.size,
        members.join(", ")
    );
    if community.size > members.len() {
        summary.push_str(", ...");
    }
    if !relations.is_empty() {
        summary.push_str("; relations: ");
        summary.push_str(&relations.join(", "));
    }
    summary
}

/// Deterministic summaries built from member names and relation types.
#[derive(Debug, Clone, Default)]
pub struct LexicalSummarizer;

#[async_trait]
impl Summarizer for LexicalSummarizer {
    async fn summarize(&self, communities: &mut [Community], snapshot: &GraphSnapshot) {
        for community in communities.iter_mut() {
            community.summary = lexical_summary(community, snapshot);
        }
    }
}

/// Model-written summaries; a community whose call fails keeps its lexical summary.
#[derive(Debug, Clone)]
pub struct LlmSummarizer {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl LlmSummarizer {
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, communities: &mut [Community], snapshot: &GraphSnapshot) {
        let mut failures = 0usize;
        for community in communities.iter_mut() {
            let lexical = lexical_summary(community, snapshot);
            let (members, relations) = describe(community, snapshot);
            let prompt = prompts::summarize(community, &members, &relations);
            community.summary =
                match complete_within(self.model.as_ref(), &prompt, self.timeout).await {
                    // Keep the lexical header so keyword lookup still sees member names.
                    Ok(text) => format!("{lexical}. {}", text.trim()),
                    Err(e) => {
                        failures += 1;
                        tracing::debug!(community = %community.id, error = %e, "Summary fell back to lexical");
                        lexical
                    }
                };
        }
        if failures > 0 {
            tracing::warn!(failures, total = communities.len(), "Some community summaries are lexical only");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Entity, EntityType, Relationship};

    fn snapshot() -> GraphSnapshot {
        GraphSnapshot {
            entities: vec![
                Entity::new("drug_x", "Drug X", EntityType::Drug),
                Entity::new("gene_y", "Gene Y", EntityType::GeneProtein),
            ],
            relationships: vec![Relationship::new("drug_x", "INHIBITS", "gene_y")],
        }
    }

    fn community() -> Community {
        Community {
            id: "community-0".into(),
            member_entity_ids: ["drug_x".to_string(), "gene_y".to_string()].into(),
            summary: String::new(),
            size: 2,
        }
    }

    #[test]
    fn test_lexical_summary_format() {
        assert_eq!(
            lexical_summary(&community(), &snapshot()),
            "Community community-0 (2 entities): contains Drug X, Gene Y; relations: INHIBITS"
        );
    }

    #[tokio::test]
    async fn test_lexical_summarizer_fills_every_summary() {
        let mut communities = vec![community()];
        LexicalSummarizer.summarize(&mut communities, &snapshot()).await;
        assert!(communities[0].summary.contains("Drug X"));
    }
}
