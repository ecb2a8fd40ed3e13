//! Hybrid Retriever
//!
//! Fans a subquery out to three independent branches (vector similarity,
//! graph neighborhood and community lookup), then merges their hits into
//! one ranked, deduplicated evidence list.
//!
//! A single failing backend degrades retrieval to the remaining branches and
//! is reported alongside the results. Only losing both the vector index and
//! the graph store is fatal.

use crate::domain::{Chunk, EvidenceFacets, EvidenceItem, EvidenceKind, Relationship};
use crate::error::{Backend, CommunityError, RetrievalError, StoreError};
use crate::persistence::{GraphStore, Neighbor, VectorIndex};
use crate::rag::community::CommunityTable;
use crate::rag::embedding::Embedder;
use crate::rag::entity_index::EntityIndex;
use crate::rag::extraction::{KeywordExtractor, LexicalKeywordExtractor};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for hybrid retrieval.
#[derive(Debug, Clone)]
pub struct HybridRetrieverConfig {
    /// Relationship hops explored around each matched entity
    pub graph_max_hops: usize,
    /// Vector hits below this cosine similarity are dropped
    pub min_vector_score: f32,
    /// Score of a graph hit one hop away; hop `h` scores `base / h`
    pub graph_base_score: f32,
    /// Communities returned when no community matches the keywords
    pub fallback_communities: usize,
    /// Score given to fallback communities
    pub fallback_score: f32,
    /// Bound on every vector/graph/embedding call
    pub backend_timeout: Duration,
}

impl Default for HybridRetrieverConfig {
    fn default() -> Self {
        Self {
            graph_max_hops: 2,
            min_vector_score: 0.0,
            graph_base_score: 0.9,
            fallback_communities: 3,
            fallback_score: 0.05,
            backend_timeout: Duration::from_millis(5000),
        }
    }
}

// =============================================================================
// Retrieval Result
// =============================================================================

/// Merged evidence of one retrieval plus the backends it had to do without.
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub items: Vec<EvidenceItem>,
    pub degraded: Vec<RetrievalError>,
}

// =============================================================================
// Hybrid Retriever
// =============================================================================

/// Read-only over its backends; the same inputs produce the same evidence.
#[derive(Debug, Clone)]
pub struct HybridRetriever {
    config: HybridRetrieverConfig,
    graph: Arc<dyn GraphStore>,
    vectors: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    communities: Arc<CommunityTable>,
    entities: Arc<EntityIndex>,
    extractor: Arc<dyn KeywordExtractor>,
}

impl HybridRetriever {
    pub fn new(
        config: HybridRetrieverConfig,
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        communities: Arc<CommunityTable>,
        entities: Arc<EntityIndex>,
        extractor: Arc<dyn KeywordExtractor>,
    ) -> Self {
        Self {
            config,
            graph,
            vectors,
            embedder,
            communities,
            entities,
            extractor,
        }
    }

    pub fn config(&self) -> &HybridRetrieverConfig {
        &self.config
    }

    pub fn entities(&self) -> &EntityIndex {
        &self.entities
    }

    /// Retrieve up to `top_k` new evidence items for `subquery`.
    ///
    /// Items whose `source_ref` is in `prior` are never returned.
    ///
    /// # Errors
    ///
    /// [`RetrievalError::RetrievalUnavailable`] when both the vector index
    /// and the graph store fail. Every other failure is returned in
    /// [`Retrieval::degraded`].
    pub async fn retrieve(
        &self,
        subquery: &str,
        top_k: usize,
        prior: &HashSet<String>,
    ) -> Result<Retrieval, RetrievalError> {
        let keywords = match self.extractor.extract_keywords(subquery).await {
            Ok(keywords) => keywords,
            Err(e) => {
                tracing::warn!(extractor = self.extractor.name(), error = %e, "Keyword extraction failed");
                LexicalKeywordExtractor::new().keywords(subquery)
            }
        };

        // Ask for enough candidates that deduplication cannot starve the result.
        let want = top_k + prior.len();
        let (vector, graph, community) = tokio::join!(
            self.vector_branch(subquery, want),
            bounded(Backend::Graph, self.config.backend_timeout, self.graph_branch(subquery, &keywords)),
            self.community_branch(&keywords),
        );

        let mut degraded = Vec::new();
        let (vector, graph) = match (vector, graph) {
            (Err(v), Err(g)) => {
                tracing::error!(vector = %v, graph = %g, "Both retrieval backends unavailable");
                return Err(RetrievalError::RetrievalUnavailable {
                    vector: v.to_string(),
                    graph: g.to_string(),
                });
            }
            (v, g) => (
                v.unwrap_or_else(|e| {
                    degraded.push(e);
                    Vec::new()
                }),
                g.unwrap_or_else(|e| {
                    degraded.push(e);
                    Vec::new()
                }),
            ),
        };

        tracing::debug!(
            subquery,
            vector_hits = vector.len(),
            graph_hits = graph.len(),
            community_hits = community.len(),
            degraded = degraded.len(),
            "Retrieval branches joined"
        );

        Ok(Retrieval {
            items: merge([vector, graph, community], prior, top_k),
            degraded,
        })
    }

    // -------------------------------------------------------------------------
    // Vector branch
    // -------------------------------------------------------------------------

    async fn vector_branch(&self, subquery: &str, k: usize) -> Result<Vec<EvidenceItem>, RetrievalError> {
        let timeout = self.config.backend_timeout;
        let embedding = match tokio::time::timeout(timeout, self.embedder.embed(subquery)).await {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => return Err(RetrievalError::EmbeddingFailed(e.to_string())),
            Err(_) => {
                return Err(RetrievalError::EmbeddingFailed(format!(
                    "timed out after {}ms",
                    timeout.as_millis()
                )));
            }
        };

        bounded(Backend::Vector, timeout, async {
            let nearest: Vec<(String, f32)> = self
                .vectors
                .nearest(&embedding, k)
                .await
                .map_err(vector_error)?
                .into_iter()
                .filter(|(_, score)| *score >= self.config.min_vector_score)
                .collect();
            if nearest.is_empty() {
                return Ok::<_, RetrievalError>(Vec::new());
            }

            let ids: Vec<String> = nearest.iter().map(|(id, _)| id.clone()).collect();
            let mut chunks: HashMap<String, Chunk> = self
                .vectors
                .chunks(&ids)
                .await
                .map_err(vector_error)?
                .into_iter()
                .map(|c| (c.id.clone(), c))
                .collect();

            // Keep index order so equal similarities rank the same way every time.
            Ok(nearest
                .into_iter()
                .filter_map(|(id, score)| {
                    let chunk = chunks.remove(&id)?;
                    let facets = EvidenceFacets {
                        entity_types: self
                            .entities
                            .find_mentions(&chunk.text)
                            .iter()
                            .map(|e| e.entity_type)
                            .collect(),
                        document_id: Some(chunk.document_id.clone()),
                        section_path: chunk.section_path.clone(),
                        ..EvidenceFacets::default()
                    };
                    let payload = format!("{}: {}", chunk.citation_path(), chunk.text);
                    Some(EvidenceItem::new(EvidenceKind::VectorHit, id, score, payload).with_facets(facets))
                })
                .collect())
        })
        .await
    }

    // -------------------------------------------------------------------------
    // Graph branch
    // -------------------------------------------------------------------------

    /// Entity ids mentioned in the subquery, then those named by keywords.
    fn seeds(&self, subquery: &str, keywords: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        self.entities
            .find_mentions(subquery)
            .into_iter()
            .chain(keywords.iter().filter_map(|k| self.entities.resolve(k)))
            .map(|e| e.id.clone())
            .filter(|id| seen.insert(id.clone()))
            .collect()
    }

    async fn graph_branch(&self, subquery: &str, keywords: &[String]) -> Result<Vec<EvidenceItem>, RetrievalError> {
        let seeds = self.seeds(subquery, keywords);
        if seeds.is_empty() {
            tracing::debug!(subquery, "No entity mentioned, graph branch skipped");
            return Ok(Vec::new());
        }

        // Best (fewest hops) path per reached entity, across all seeds.
        let mut reached: HashMap<String, (String, Neighbor)> = HashMap::new();
        for seed in &seeds {
            let neighbors = match self.graph.neighborhood(seed, self.config.graph_max_hops).await {
                Ok(n) => n,
                Err(StoreError::UnknownEntity(id)) => {
                    tracing::debug!(entity = %id, "Indexed entity missing from graph store");
                    continue;
                }
                Err(e) => {
                    return Err(RetrievalError::BackendUnavailable {
                        backend: Backend::Graph,
                        reason: e.to_string(),
                    });
                }
            };
            for neighbor in neighbors {
                if seeds.contains(&neighbor.entity.id) {
                    continue;
                }
                let better = reached
                    .get(&neighbor.entity.id)
                    .is_none_or(|(_, existing)| neighbor.hops() < existing.hops());
                if better {
                    reached.insert(neighbor.entity.id.clone(), (seed.clone(), neighbor));
                }
            }
        }

        let mut hits: Vec<(String, Neighbor)> = reached.into_values().collect();
        // Equal hop counts: most recent relationship first, then entity id.
        hits.sort_by(|(_, a), (_, b)| {
            a.hops()
                .cmp(&b.hops())
                .then_with(|| path_recency(b).cmp(&path_recency(a)))
                .then_with(|| a.entity.id.cmp(&b.entity.id))
        });

        Ok(hits
            .into_iter()
            .map(|(seed, neighbor)| self.graph_hit(&seed, &neighbor))
            .collect())
    }

    fn graph_hit(&self, seed: &str, neighbor: &Neighbor) -> EvidenceItem {
        let score = self.config.graph_base_score / neighbor.hops().max(1) as f32;

        let mut facets = EvidenceFacets {
            relation_types: neighbor.path.iter().map(|r| r.relation_type.clone()).collect(),
            ..EvidenceFacets::default()
        };
        facets.entity_types.insert(neighbor.entity.entity_type);
        if let Some(start) = self.entities.get(seed) {
            facets.entity_types.insert(start.entity_type);
        }

        let mut payload = neighbor
            .path
            .iter()
            .map(|r| {
                format!(
                    "{} -[{}]-> {}",
                    self.display_name(&r.source_id),
                    r.relation_type,
                    self.display_name(&r.target_id)
                )
            })
            .collect::<Vec<_>>()
            .join("; ");

        if let Some(last) = neighbor.path.last() {
            if let Some(doc) = last.attributes.get(Relationship::SOURCE_DOC) {
                facets.document_id = Some(doc.clone());
                match last.attributes.get(Relationship::SECTION) {
                    Some(section) => {
                        facets.section_path = vec![section.clone()];
                        payload.push_str(&format!(" (source: {doc} › {section})"));
                    }
                    None => payload.push_str(&format!(" (source: {doc})")),
                }
            }
        }

        EvidenceItem::new(EvidenceKind::GraphHit, neighbor.entity.id.clone(), score, payload).with_facets(facets)
    }

    fn display_name(&self, entity_id: &str) -> String {
        self.entities
            .get(entity_id)
            .map_or_else(|| entity_id.to_string(), |e| e.name.clone())
    }

    // -------------------------------------------------------------------------
    // Community branch
    // -------------------------------------------------------------------------

    /// Never fails: a stale table simply contributes nothing.
    async fn community_branch(&self, keywords: &[String]) -> Vec<EvidenceItem> {
        let matches = match self
            .communities
            .lookup_keywords(keywords, self.config.fallback_communities)
            .await
        {
            Ok(m) => m,
            Err(CommunityError::CommunityDetectionStale) => {
                tracing::debug!("Community table stale, community branch empty");
                return Vec::new();
            }
        };

        matches
            .into_iter()
            .map(|m| {
                let facets = if m.fallback {
                    EvidenceFacets {
                        fallback: true,
                        ..EvidenceFacets::default()
                    }
                } else {
                    EvidenceFacets {
                        entity_types: m
                            .community
                            .member_entity_ids
                            .iter()
                            .filter_map(|id| self.entities.get(id))
                            .map(|e| e.entity_type)
                            .collect::<BTreeSet<_>>(),
                        relation_types: m.relation_types,
                        ..EvidenceFacets::default()
                    }
                };
                let score = if m.fallback { self.config.fallback_score } else { m.strength };
                EvidenceItem::new(EvidenceKind::CommunityHit, m.community.id, score, m.community.summary)
                    .with_facets(facets)
            })
            .collect()
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Union the branch outputs, drop anything already in `prior`, rank by score
/// (cross-kind ties: vector, graph, community) and keep the best `top_k`.
///
/// When one `source_ref` occurs more than once the highest-ranked copy wins.
pub fn merge<I>(batches: I, prior: &HashSet<String>, top_k: usize) -> Vec<EvidenceItem>
where
    I: IntoIterator<Item = Vec<EvidenceItem>>,
{
    let mut all: Vec<EvidenceItem> = batches
        .into_iter()
        .flatten()
        .filter(|item| !prior.contains(&item.source_ref))
        .collect();
    all.sort_by(EvidenceItem::rank_cmp);

    let mut seen = HashSet::new();
    all.retain(|item| seen.insert(item.source_ref.clone()));
    all.truncate(top_k);
    all
}

/// Run a backend call under `timeout`; expiry is reported as that backend failing.
async fn bounded<T, F>(backend: Backend, timeout: Duration, fut: F) -> Result<T, RetrievalError>
where
    F: Future<Output = Result<T, RetrievalError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(%backend, timeout_ms = timeout.as_millis() as u64, "Backend call timed out");
            Err(RetrievalError::BackendUnavailable {
                backend,
                reason: format!("timed out after {}ms", timeout.as_millis()),
            })
        }
    }
}

fn vector_error(e: StoreError) -> RetrievalError {
    RetrievalError::BackendUnavailable {
        backend: Backend::Vector,
        reason: e.to_string(),
    }
}

/// Most recent timestamp along a path, if any relationship carries one.
fn path_recency(neighbor: &Neighbor) -> Option<chrono::DateTime<chrono::Utc>> {
    neighbor.path.iter().filter_map(Relationship::timestamp).max()
}

// =============================================================================
// Tests
// =============================================================================
