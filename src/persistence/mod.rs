//! Store adapters.
//!
//! The engine never owns persisted state. It reads the relationship graph
//! through [`GraphStore`] and chunk embeddings through [`VectorIndex`]; the
//! only write it performs is the community assignment after detection.

use crate::domain::{Chunk, Entity, GraphSnapshot, Relationship};
use crate::error::StoreError;
use crate::rag::embedding::Embedder;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;

pub mod providers;

// =============================================================================
// Adapter Contracts
// =============================================================================

/// An entity reached from a start node, with the path that reached it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbor {
    pub entity: Entity,
    /// Relationships walked from the start entity, in order
    pub path: Vec<Relationship>,
}

impl Neighbor {
    pub fn hops(&self) -> usize {
        self.path.len()
    }
}

/// Property-graph backend.
#[async_trait]
pub trait GraphStore: Send + Sync + std::fmt::Debug {
    /// Entities within `max_hops` undirected relationship hops of `entity_id`,
    /// each with one shortest path. The start entity is not included.
    async fn neighborhood(&self, entity_id: &str, max_hops: usize)
    -> Result<Vec<Neighbor>, StoreError>;

    /// Copy of every entity and relationship.
    async fn snapshot(&self) -> Result<GraphSnapshot, StoreError>;

    /// Replace the whole Entity→Community assignment.
    async fn write_community_assignment(
        &self,
        mapping: &BTreeMap<String, String>,
    ) -> Result<(), StoreError>;

    async fn upsert_entity(&self, entity: &Entity) -> Result<(), StoreError>;

    /// Fails with [`StoreError::UnknownEntity`] when an endpoint is missing.
    async fn upsert_relationship(&self, relationship: &Relationship) -> Result<(), StoreError>;
}

/// Embedding similarity index over chunks.
#[async_trait]
pub trait VectorIndex: Send + Sync + std::fmt::Debug {
    /// Up to `k` chunk ids ordered by cosine similarity, best first. A query
    /// whose length differs from the stored embeddings is rejected with
    /// [`StoreError::DimensionMismatch`].
    async fn nearest(&self, embedding: &[f32], k: usize) -> Result<Vec<(String, f32)>, StoreError>;

    /// Fetch chunks by id; unknown ids are skipped.
    async fn chunks(&self, ids: &[String]) -> Result<Vec<Chunk>, StoreError>;

    /// The first stored chunk fixes the index dimension; later chunks must match it.
    async fn upsert_chunk(&self, chunk: &Chunk) -> Result<(), StoreError>;

    /// Dimension of stored embeddings, `None` while the index is empty.
    async fn dimension(&self) -> Result<Option<usize>, StoreError>;
}

// =============================================================================
// Seed Files
// =============================================================================

/// A prepared graph in JSON form: `{entities, relationships, chunks}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSeed {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub chunks: Vec<Chunk>,
}

impl GraphSeed {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading graph seed {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing graph seed {}", path.display()))
    }

    /// Compute embeddings for chunks that arrived without one. Returns how
    /// many were embedded.
    pub async fn embed_missing(&mut self, embedder: &dyn Embedder) -> Result<usize> {
        let mut embedded = 0;
        for chunk in self.chunks.iter_mut().filter(|c| c.embedding.is_empty()) {
            chunk.embedding = embedder
                .embed(&chunk.text)
                .await
                .with_context(|| format!("embedding chunk {}", chunk.id))?;
            embedded += 1;
        }
        Ok(embedded)
    }

    /// Upsert everything into the given stores, entities first.
    pub async fn load_into(&self, graph: &dyn GraphStore, vectors: &dyn VectorIndex) -> Result<()> {
        for entity in &self.entities {
            graph.upsert_entity(entity).await?;
        }
        for rel in &self.relationships {
            graph
                .upsert_relationship(rel)
                .await
                .with_context(|| format!("{} -[{}]-> {}", rel.source_id, rel.relation_type, rel.target_id))?;
        }
        for chunk in &self.chunks {
            vectors.upsert_chunk(chunk).await?;
        }
        tracing::info!(
            entities = self.entities.len(),
            relationships = self.relationships.len(),
            chunks = self.chunks.len(),
            "Graph seed loaded"
        );
        Ok(())
    }
}

// =============================================================================
// Shared helpers
// =============================================================================

/// Accept `chunk` into an index whose embeddings have `expected` dimensions.
pub(crate) fn check_chunk_dimension(expected: Option<usize>, chunk: &Chunk) -> Result<(), StoreError> {
    let actual = chunk.embedding.len();
    if actual == 0 {
        return Err(StoreError::Query(format!("chunk {} has no embedding", chunk.id)));
    }
    match expected {
        Some(expected) if expected != actual => Err(StoreError::DimensionMismatch { expected, actual }),
        _ => Ok(()),
    }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot_product: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

/// Rank `(id, embedding)` candidates by cosine similarity, ties by id.
///
/// Every candidate must have the query's length.
pub(crate) fn rank_by_similarity<'a, I>(
    query: &[f32],
    candidates: I,
    k: usize,
) -> Result<Vec<(String, f32)>, StoreError>
where
    I: IntoIterator<Item = (&'a str, &'a [f32])>,
{
    let mut scored: Vec<(String, f32)> = Vec::new();
    for (id, emb) in candidates {
        if emb.len() != query.len() {
            return Err(StoreError::DimensionMismatch {
                expected: emb.len(),
                actual: query.len(),
            });
        }
        scored.push((id.to_string(), cosine_similarity(query, emb)));
    }
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored.truncate(k);
    Ok(scored)
}

/// Breadth-first neighborhood over an undirected view of `relationships`.
///
/// Adjacency is visited in (neighbor id, relation type) order so the chosen
/// shortest path is deterministic.
pub(crate) fn bfs_neighborhood(
    entities: &HashMap<&str, &Entity>,
    relationships: &[Relationship],
    start: &str,
    max_hops: usize,
) -> Result<Vec<Neighbor>, StoreError> {
    if !entities.contains_key(start) {
        return Err(StoreError::UnknownEntity(start.to_string()));
    }

    let mut adjacency: HashMap<&str, Vec<(&str, &Relationship)>> = HashMap::new();
    for rel in relationships {
        if rel.source_id == rel.target_id {
            continue;
        }
        adjacency
            .entry(rel.source_id.as_str())
            .or_default()
            .push((rel.target_id.as_str(), rel));
        adjacency
            .entry(rel.target_id.as_str())
            .or_default()
            .push((rel.source_id.as_str(), rel));
    }
    for edges in adjacency.values_mut() {
        edges.sort_by(|a, b| a.0.cmp(b.0).then_with(|| a.1.relation_type.cmp(&b.1.relation_type)));
    }

    let mut visited: HashSet<&str> = HashSet::from([start]);
    let mut queue: VecDeque<(&str, Vec<Relationship>)> = VecDeque::from([(start, Vec::new())]);
    let mut found = Vec::new();

    while let Some((node, path)) = queue.pop_front() {
        if path.len() >= max_hops {
            continue;
        }
        let Some(edges) = adjacency.get(node) else {
            continue;
        };
        for &(next, rel) in edges {
            if !visited.insert(next) {
                continue;
            }
            let Some(entity) = entities.get(next) else {
                continue;
            };
            let mut next_path = path.clone();
            next_path.push(rel.clone());
            found.push(Neighbor {
                entity: (*entity).clone(),
                path: next_path.clone(),
            });
            queue.push_back((next, next_path));
        }
    }

    found.sort_by(|a, b| a.hops().cmp(&b.hops()).then_with(|| a.entity.id.cmp(&b.entity.id)));
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EntityType;

    fn chain() -> (Vec<Entity>, Vec<Relationship>) {
        let entities = vec![
            Entity::new("a", "A", EntityType::Drug),
            Entity::new("b", "B", EntityType::GeneProtein),
            Entity::new("c", "C", EntityType::Condition),
            Entity::new("d", "D", EntityType::Other),
        ];
        let rels = vec![
            Relationship::new("a", "INHIBITS", "b"),
            Relationship::new("c", "ASSOCIATED_WITH", "b"),
            Relationship::new("c", "PART_OF", "d"),
        ];
        (entities, rels)
    }

    #[test]
    fn test_bfs_respects_hop_limit_and_direction_agnostic() {
        let (entities, rels) = chain();
        let by_id: HashMap<&str, &Entity> = entities.iter().map(|e| (e.id.as_str(), e)).collect();

        let found = bfs_neighborhood(&by_id, &rels, "a", 2).unwrap();
        let ids: Vec<_> = found.iter().map(|n| (n.entity.id.as_str(), n.hops())).collect();
        assert_eq!(ids, vec![("b", 1), ("c", 2)]);
        assert_eq!(found[1].path[1].relation_type, "ASSOCIATED_WITH");
    }

    #[test]
    fn test_bfs_unknown_start() {
        let (entities, rels) = chain();
        let by_id: HashMap<&str, &Entity> = entities.iter().map(|e| (e.id.as_str(), e)).collect();
        assert!(matches!(
            bfs_neighborhood(&by_id, &rels, "zzz", 2),
            Err(StoreError::UnknownEntity(_))
        ));
    }

    #[test]
    fn test_rank_by_similarity_orders_and_truncates() {
        let a = [1.0_f32, 0.0];
        let b = [0.0_f32, 1.0];
        let c = [0.7_f32, 0.7];
        let ranked = rank_by_similarity(
            &[1.0, 0.0],
            vec![("b", &b[..]), ("a", &a[..]), ("c", &c[..])],
            2,
        )
        .unwrap();
        assert_eq!(ranked[0].0, "a");
        assert_eq!(ranked[1].0, "c");
        assert_eq!(ranked.len(), 2);
    }

    #[test]
    fn test_rank_rejects_mismatched_lengths() {
        let stored = [1.0_f32, 0.0];
        let err = rank_by_similarity(&[1.0, 0.0, 5.0, 5.0], vec![("a", &stored[..])], 1).unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 2, actual: 4 }));
    }

    #[tokio::test]
    async fn test_seed_file_loads_and_embeds() {
        use crate::persistence::providers::{InMemoryGraphStore, InMemoryVectorIndex};
        use crate::rag::embedding::HashingEmbedder;
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "entities": [
                    {{"id": "a", "name": "A", "type": "drug"}},
                    {{"id": "b", "name": "B", "type": "gene_protein"}}
                ],
                "relationships": [{{"source_id": "a", "type": "INHIBITS", "target_id": "b"}}],
                "chunks": [{{"id": "c1", "document_id": "doc", "text": "A inhibits B."}}]
            }}"#
        )
        .unwrap();

        let mut seed = GraphSeed::from_file(file.path()).unwrap();
        assert_eq!(seed.embed_missing(&HashingEmbedder::new(16)).await.unwrap(), 1);
        assert_eq!(seed.chunks[0].embedding.len(), 16);

        let graph = InMemoryGraphStore::new();
        let vectors = InMemoryVectorIndex::new();
        seed.load_into(&graph, &vectors).await.unwrap();
        let snapshot = graph.snapshot().await.unwrap();
        assert_eq!(snapshot.entities.len(), 2);
        assert_eq!(snapshot.relationships.len(), 1);
        assert_eq!(vectors.chunks(&["c1".to_string()]).await.unwrap().len(), 1);
    }
}
