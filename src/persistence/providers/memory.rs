//! In-process graph and vector stores.
//!
//! Used for development runs seeded from a JSON graph file and as the
//! default backend in tests.

use crate::domain::{Chunk, Entity, GraphSnapshot, Relationship};
use crate::error::StoreError;
use crate::persistence::{
    GraphStore, Neighbor, VectorIndex, bfs_neighborhood, check_chunk_dimension, rank_by_similarity,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

// =============================================================================
// Graph Store
// =============================================================================

#[derive(Debug, Default)]
struct GraphData {
    entities: BTreeMap<String, Entity>,
    relationships: Vec<Relationship>,
    assignments: BTreeMap<String, String>,
}

/// Property graph held in memory behind an async lock.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    data: RwLock<GraphData>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current Entity→Community assignment.
    pub async fn community_assignment(&self) -> BTreeMap<String, String> {
        self.data.read().await.assignments.clone()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn neighborhood(
        &self,
        entity_id: &str,
        max_hops: usize,
    ) -> Result<Vec<Neighbor>, StoreError> {
        let data = self.data.read().await;
        let by_id: HashMap<&str, &Entity> =
            data.entities.iter().map(|(id, e)| (id.as_str(), e)).collect();
        bfs_neighborhood(&by_id, &data.relationships, entity_id, max_hops)
    }

    async fn snapshot(&self) -> Result<GraphSnapshot, StoreError> {
        let data = self.data.read().await;
        Ok(GraphSnapshot {
            entities: data.entities.values().cloned().collect(),
            relationships: data.relationships.clone(),
        })
    }

    async fn write_community_assignment(
        &self,
        mapping: &BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        self.data.write().await.assignments = mapping.clone();
        Ok(())
    }

    async fn upsert_entity(&self, entity: &Entity) -> Result<(), StoreError> {
        self.data
            .write()
            .await
            .entities
            .insert(entity.id.clone(), entity.clone());
        Ok(())
    }

    async fn upsert_relationship(&self, relationship: &Relationship) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        for endpoint in [&relationship.source_id, &relationship.target_id] {
            if !data.entities.contains_key(endpoint) {
                return Err(StoreError::UnknownEntity(endpoint.clone()));
            }
        }

        // Same endpoints and type is the same edge; attributes are replaced.
        if let Some(existing) = data.relationships.iter_mut().find(|r| {
            r.source_id == relationship.source_id
                && r.target_id == relationship.target_id
                && r.relation_type == relationship.relation_type
        }) {
            existing.attributes = relationship.attributes.clone();
        } else {
            data.relationships.push(relationship.clone());
        }
        Ok(())
    }
}

// =============================================================================
// Vector Index
// =============================================================================

/// Brute-force cosine index over chunks held in memory.
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    chunks: RwLock<BTreeMap<String, Chunk>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn nearest(&self, embedding: &[f32], k: usize) -> Result<Vec<(String, f32)>, StoreError> {
        let chunks = self.chunks.read().await;
        rank_by_similarity(
            embedding,
            chunks
                .values()
                .map(|c| (c.id.as_str(), c.embedding.as_slice())),
            k,
        )
    }

    async fn chunks(&self, ids: &[String]) -> Result<Vec<Chunk>, StoreError> {
        let chunks = self.chunks.read().await;
        Ok(ids.iter().filter_map(|id| chunks.get(id).cloned()).collect())
    }

    async fn upsert_chunk(&self, chunk: &Chunk) -> Result<(), StoreError> {
        let mut chunks = self.chunks.write().await;
        // Replacing the only chunk may change the dimension.
        let expected = chunks
            .values()
            .find(|c| c.id != chunk.id)
            .map(|c| c.embedding.len());
        check_chunk_dimension(expected, chunk)?;
        chunks.insert(chunk.id.clone(), chunk.clone());
        Ok(())
    }

    async fn dimension(&self) -> Result<Option<usize>, StoreError> {
        Ok(self.chunks.read().await.values().next().map(|c| c.embedding.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EntityType;

    #[tokio::test]
    async fn test_relationship_requires_endpoints() {
        let store = InMemoryGraphStore::new();
        store
            .upsert_entity(&Entity::new("a", "A", EntityType::Drug))
            .await
            .unwrap();
        let err = store
            .upsert_relationship(&Relationship::new("a", "TREATS", "missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownEntity(id) if id == "missing"));
    }

    #[tokio::test]
    async fn test_multigraph_keeps_distinct_types() {
        let store = InMemoryGraphStore::new();
        for id in ["a", "b"] {
            store
                .upsert_entity(&Entity::new(id, id, EntityType::Other))
                .await
                .unwrap();
        }
        store.upsert_relationship(&Relationship::new("a", "TREATS", "b")).await.unwrap();
        store.upsert_relationship(&Relationship::new("a", "CAUSES", "b")).await.unwrap();
        store
            .upsert_relationship(&Relationship::new("a", "TREATS", "b").with_attribute("confidence", "0.5"))
            .await
            .unwrap();

        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot.relationships.len(), 2);
    }

    #[tokio::test]
    async fn test_assignment_is_replaced_wholesale() {
        let store = InMemoryGraphStore::new();
        let first = BTreeMap::from([("a".to_string(), "c1".to_string()), ("b".to_string(), "c1".to_string())]);
        let second = BTreeMap::from([("a".to_string(), "c2".to_string())]);
        store.write_community_assignment(&first).await.unwrap();
        store.write_community_assignment(&second).await.unwrap();
        assert_eq!(store.community_assignment().await, second);
    }

    #[tokio::test]
    async fn test_vector_nearest() {
        let index = InMemoryVectorIndex::new();
        for (id, emb) in [("x", vec![1.0, 0.0]), ("y", vec![0.0, 1.0])] {
            index
                .upsert_chunk(&Chunk {
                    id: id.into(),
                    document_id: "d".into(),
                    section_path: vec![],
                    text: id.into(),
                    embedding: emb,
                })
                .await
                .unwrap();
        }
        let hits = index.nearest(&[0.9, 0.1], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "x");

        let fetched = index.chunks(&["y".into(), "nope".into()]).await.unwrap();
        assert_eq!(fetched.len(), 1);
    }

    fn chunk(id: &str, embedding: Vec<f32>) -> Chunk {
        Chunk {
            id: id.into(),
            document_id: "d".into(),
            section_path: vec![],
            text: id.into(),
            embedding,
        }
    }

    #[tokio::test]
    async fn test_vector_dimension_is_fixed_by_first_chunk() {
        let index = InMemoryVectorIndex::new();
        assert_eq!(index.dimension().await.unwrap(), None);
        index.upsert_chunk(&chunk("x", vec![1.0, 0.0])).await.unwrap();
        assert_eq!(index.dimension().await.unwrap(), Some(2));

        let err = index.upsert_chunk(&chunk("y", vec![1.0, 0.0, 5.0, 5.0])).await.unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 2, actual: 4 }));
        assert!(index.upsert_chunk(&chunk("z", vec![])).await.is_err());

        let err = index.nearest(&[1.0, 0.0, 5.0, 5.0], 1).await.unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 2, actual: 4 }));
    }
}
