//! Community detection and the process-wide community table.
//!
//! Detection runs offline (at startup or on demand) and installs a complete
//! new table with a single pointer swap; retrieval only ever reads whole
//! tables, so it never observes a half-written assignment.

pub mod louvain;
pub mod summary;

pub use louvain::{CommunityDetector, LouvainConfig};
pub use summary::{LexicalSummarizer, LlmSummarizer, Summarizer};

use crate::domain::{Community, Entity, GraphSnapshot};
use crate::error::{CommunityError, StoreError};
use crate::persistence::GraphStore;
use crate::rag::entity_index::normalize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A community selected by lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct CommunityMatch {
    pub community: Community,
    /// Fraction of lookup keywords that matched, in `[0, 1]`
    pub strength: f32,
    /// Chosen by the largest-community fallback rather than by a match
    pub fallback: bool,
    /// Relationship types between members
    pub relation_types: BTreeSet<String>,
}

/// One installed detection result, immutable once built.
#[derive(Debug)]
struct CommunitySnapshot {
    communities: Vec<Community>,
    /// Normalized summary and member names, per community, for matching
    haystacks: Vec<Vec<String>>,
    relation_types: Vec<BTreeSet<String>>,
    installed_at: chrono::DateTime<chrono::Utc>,
}

impl CommunitySnapshot {
    fn build(communities: Vec<Community>, graph: &GraphSnapshot) -> Self {
        let entities: HashMap<&str, &Entity> =
            graph.entities.iter().map(|e| (e.id.as_str(), e)).collect();
        let haystacks = communities
            .iter()
            .map(|c| {
                let mut hay = vec![normalize(&c.summary)];
                for id in &c.member_entity_ids {
                    if let Some(entity) = entities.get(id.as_str()) {
                        hay.push(normalize(&entity.name));
                        hay.extend(entity.aliases.iter().map(|a| normalize(a)));
                    }
                }
                hay
            })
            .collect();
        let relation_types = communities
            .iter()
            .map(|c| {
                graph
                    .relationships
                    .iter()
                    .filter(|r| c.member_entity_ids.contains(&r.source_id) && c.member_entity_ids.contains(&r.target_id))
                    .map(|r| r.relation_type.clone())
                    .collect()
            })
            .collect();
        Self {
            communities,
            haystacks,
            relation_types,
            installed_at: chrono::Utc::now(),
        }
    }

    fn matches(&self, index: usize, keyword: &str) -> bool {
        !keyword.is_empty() && self.haystacks[index].iter().any(|h| h.contains(keyword))
    }

    /// Indices of the `k` largest communities, size descending, ties by id.
    fn largest(&self, k: usize) -> Vec<usize> {
        let mut all: Vec<usize> = (0..self.communities.len()).collect();
        all.sort_by(|&a, &b| {
            let (a, b) = (&self.communities[a], &self.communities[b]);
            b.size.cmp(&a.size).then_with(|| a.id.cmp(&b.id))
        });
        all.truncate(k);
        all
    }

    fn to_match(&self, index: usize, strength: f32, fallback: bool) -> CommunityMatch {
        CommunityMatch {
            community: self.communities[index].clone(),
            strength,
            fallback,
            relation_types: self.relation_types[index].clone(),
        }
    }
}

/// Shared, read-mostly community table. Starts empty (stale).
#[derive(Debug, Default)]
pub struct CommunityTable {
    current: RwLock<Option<Arc<CommunitySnapshot>>>,
}

impl CommunityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole table.
    pub async fn install(&self, communities: Vec<Community>, graph: &GraphSnapshot) {
        let snapshot = Arc::new(CommunitySnapshot::build(communities, graph));
        tracing::info!(
            communities = snapshot.communities.len(),
            installed_at = %snapshot.installed_at,
            "Community table installed"
        );
        *self.current.write().await = Some(snapshot);
    }

    async fn load(&self) -> Result<Arc<CommunitySnapshot>, CommunityError> {
        self.current
            .read()
            .await
            .clone()
            .ok_or(CommunityError::CommunityDetectionStale)
    }

    pub async fn is_stale(&self) -> bool {
        self.current.read().await.is_none()
    }

    /// Installed communities in detection order.
    pub async fn communities(&self) -> Result<Vec<Community>, CommunityError> {
        Ok(self.load().await?.communities.clone())
    }

    /// Communities whose summary or member names contain `keyword`
    /// (case-insensitive), best match first; the `fallback_k` largest when
    /// none match.
    pub async fn lookup(&self, keyword: &str, fallback_k: usize) -> Result<Vec<Community>, CommunityError> {
        Ok(self
            .lookup_keywords(&[keyword.to_string()], fallback_k)
            .await?
            .into_iter()
            .map(|m| m.community)
            .collect())
    }

    /// Lookup over a keyword set, strength = fraction of keywords matched.
    ///
    /// Matches are ordered by strength, then size, then id. With no match at
    /// all the `fallback_k` largest communities are returned, size descending,
    /// flagged as fallback with zero strength.
    pub async fn lookup_keywords(
        &self,
        keywords: &[String],
        fallback_k: usize,
    ) -> Result<Vec<CommunityMatch>, CommunityError> {
        let table = self.load().await?;
        let keywords: Vec<String> = keywords.iter().map(|k| normalize(k)).filter(|k| !k.is_empty()).collect();

        let mut matched: Vec<(usize, usize)> = (0..table.communities.len())
            .filter_map(|i| {
                let hits = keywords.iter().filter(|k| table.matches(i, k)).count();
                (hits > 0).then_some((hits, i))
            })
            .collect();

        if matched.is_empty() {
            return Ok(table
                .largest(fallback_k)
                .into_iter()
                .map(|i| table.to_match(i, 0.0, true))
                .collect());
        }

        matched.sort_by(|&(ha, a), &(hb, b)| {
            let (ca, cb) = (&table.communities[a], &table.communities[b]);
            hb.cmp(&ha)
                .then_with(|| cb.size.cmp(&ca.size))
                .then_with(|| ca.id.cmp(&cb.id))
        });
        let total = keywords.len() as f32;
        Ok(matched
            .into_iter()
            .map(|(hits, i)| table.to_match(i, hits as f32 / total, false))
            .collect())
    }

    /// Snapshot the graph, detect, summarize, write the assignment back and
    /// install the result. Returns the number of communities.
    ///
    /// Nothing is installed if the store rejects the assignment, so the
    /// table never disagrees with what was persisted.
    pub async fn refresh(
        &self,
        graph: &dyn GraphStore,
        detector: &CommunityDetector,
        summarizer: &dyn Summarizer,
    ) -> Result<usize, StoreError> {
        let snapshot = graph.snapshot().await?;
        let mut communities = detector.detect(&snapshot);
        summarizer.summarize(&mut communities, &snapshot).await;

        graph.write_community_assignment(&assignment(&communities)).await?;

        let count = communities.len();
        self.install(communities, &snapshot).await;
        Ok(count)
    }
}

/// Entity id → community id.
pub fn assignment(communities: &[Community]) -> BTreeMap<String, String> {
    communities
        .iter()
        .flat_map(|c| c.member_entity_ids.iter().map(|m| (m.clone(), c.id.clone())))
        .collect()
}
