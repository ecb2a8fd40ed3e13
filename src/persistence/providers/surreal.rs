use crate::domain::{Chunk, Entity, EntityType, GraphSnapshot, Relationship};
use crate::error::StoreError;
use crate::persistence::{
    GraphStore, Neighbor, VectorIndex, bfs_neighborhood, check_chunk_dimension, rank_by_similarity,
};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect};

const ENTITIES: &str = "entities";
const RELATIONSHIPS: &str = "relationships";
const CHUNKS: &str = "chunks";
const ASSIGNMENTS: &str = "community_assignments";

/// Replaces the whole assignment table atomically.
const REPLACE_ASSIGNMENTS: &str = "BEGIN TRANSACTION; \
     DELETE community_assignments; \
     INSERT INTO community_assignments $rows; \
     COMMIT TRANSACTION;";

const CLEAR_ASSIGNMENTS: &str = "DELETE community_assignments;";

/// SurrealDB-backed graph store and vector index sharing one connection.
#[derive(Debug)]
pub struct SurrealStore {
    db: Surreal<Any>,
}

impl SurrealStore {
    /// Connect to `mem://`, `surrealkv://path` or `ws://host`.
    pub async fn new(connection_string: &str) -> Result<Self> {
        let db = connect(connection_string).await?;

        db.use_ns("medgraph").use_db("medgraph").await?;

        Ok(Self { db })
    }
}

// Record shapes. Surreal owns the `id` field, so domain ids live under their own names.

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntityRecord {
    entity_id: String,
    name: String,
    entity_type: EntityType,
    #[serde(default)]
    aliases: BTreeSet<String>,
}

impl From<&Entity> for EntityRecord {
    fn from(e: &Entity) -> Self {
        Self {
            entity_id: e.id.clone(),
            name: e.name.clone(),
            entity_type: e.entity_type,
            aliases: e.aliases.clone(),
        }
    }
}

impl From<EntityRecord> for Entity {
    fn from(r: EntityRecord) -> Self {
        Self {
            id: r.entity_id,
            name: r.name,
            entity_type: r.entity_type,
            aliases: r.aliases,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RelationshipRecord {
    source_id: String,
    target_id: String,
    relation_type: String,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

impl RelationshipRecord {
    fn key(&self) -> String {
        format!("{}|{}|{}", self.source_id, self.relation_type, self.target_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChunkRecord {
    chunk_id: String,
    document_id: String,
    #[serde(default)]
    section_path: Vec<String>,
    text: String,
    #[serde(default)]
    embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AssignmentRecord {
    entity_id: String,
    community_id: String,
}

impl SurrealStore {
    async fn load_entities(&self) -> Result<Vec<Entity>, StoreError> {
        let records: Vec<EntityRecord> = self.db.select(ENTITIES).await?;
        Ok(records.into_iter().map(Entity::from).collect())
    }

    /// Current Entity→Community assignment.
    pub async fn community_assignment(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let records: Vec<AssignmentRecord> = self.db.select(ASSIGNMENTS).await?;
        Ok(records
            .into_iter()
            .map(|r| (r.entity_id, r.community_id))
            .collect())
    }

    /// Embedding length of one stored chunk other than `except`.
    async fn stored_dimension(&self, except: Option<&str>) -> Result<Option<usize>, StoreError> {
        let mut response = self
            .db
            .query("SELECT VALUE array::len(embedding) FROM chunks WHERE chunk_id != $except LIMIT 1")
            .bind(("except", except.unwrap_or_default().to_string()))
            .await?;
        let lengths: Vec<i64> = response.take(0)?;
        Ok(lengths.first().map(|&n| usize::try_from(n).unwrap_or_default()))
    }

    async fn load_relationships(&self) -> Result<Vec<Relationship>, StoreError> {
        let records: Vec<RelationshipRecord> = self.db.select(RELATIONSHIPS).await?;
        let mut rels: Vec<Relationship> = records
            .into_iter()
            .map(|r| Relationship {
                source_id: r.source_id,
                target_id: r.target_id,
                relation_type: r.relation_type,
                attributes: r.attributes,
            })
            .collect();
        rels.sort_by(|a, b| {
            (&a.source_id, &a.relation_type, &a.target_id).cmp(&(
                &b.source_id,
                &b.relation_type,
                &b.target_id,
            ))
        });
        Ok(rels)
    }
}

#[async_trait]
impl GraphStore for SurrealStore {
    async fn neighborhood(
        &self,
        entity_id: &str,
        max_hops: usize,
    ) -> Result<Vec<Neighbor>, StoreError> {
        // Fetch all, traverse in memory.
        let entities = self.load_entities().await?;
        let relationships = self.load_relationships().await?;
        let by_id: HashMap<&str, &Entity> = entities.iter().map(|e| (e.id.as_str(), e)).collect();
        bfs_neighborhood(&by_id, &relationships, entity_id, max_hops)
    }

    async fn snapshot(&self) -> Result<GraphSnapshot, StoreError> {
        let mut entities = self.load_entities().await?;
        entities.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(GraphSnapshot {
            entities,
            relationships: self.load_relationships().await?,
        })
    }

    async fn write_community_assignment(
        &self,
        mapping: &BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let rows: Vec<AssignmentRecord> = mapping
            .iter()
            .map(|(entity_id, community_id)| AssignmentRecord {
                entity_id: entity_id.clone(),
                community_id: community_id.clone(),
            })
            .collect();
        let query = if rows.is_empty() {
            CLEAR_ASSIGNMENTS
        } else {
            REPLACE_ASSIGNMENTS
        };
        self.db.query(query).bind(("rows", rows)).await?.check()?;
        tracing::debug!(entities = mapping.len(), "Community assignment written");
        Ok(())
    }

    async fn upsert_entity(&self, entity: &Entity) -> Result<(), StoreError> {
        let _: Option<EntityRecord> = self
            .db
            .upsert((ENTITIES, entity.id.clone()))
            .content(EntityRecord::from(entity))
            .await?;
        Ok(())
    }

    async fn upsert_relationship(&self, relationship: &Relationship) -> Result<(), StoreError> {
        for endpoint in [&relationship.source_id, &relationship.target_id] {
            let existing: Option<EntityRecord> = self.db.select((ENTITIES, endpoint.as_str())).await?;
            if existing.is_none() {
                return Err(StoreError::UnknownEntity(endpoint.clone()));
            }
        }

        let record = RelationshipRecord {
            source_id: relationship.source_id.clone(),
            target_id: relationship.target_id.clone(),
            relation_type: relationship.relation_type.clone(),
            attributes: relationship.attributes.clone(),
        };
        let _: Option<RelationshipRecord> = self
            .db
            .upsert((RELATIONSHIPS, record.key()))
            .content(record)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for SurrealStore {
    async fn nearest(&self, embedding: &[f32], k: usize) -> Result<Vec<(String, f32)>, StoreError> {
        // Fallback: Fetch all, compute cosine similarity in memory
        let records: Vec<ChunkRecord> = self.db.select(CHUNKS).await?;
        rank_by_similarity(
            embedding,
            records
                .iter()
                .map(|r| (r.chunk_id.as_str(), r.embedding.as_slice())),
            k,
        )
    }

    async fn chunks(&self, ids: &[String]) -> Result<Vec<Chunk>, StoreError> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let record: Option<ChunkRecord> = self.db.select((CHUNKS, id.as_str())).await?;
            if let Some(r) = record {
                out.push(Chunk {
                    id: r.chunk_id,
                    document_id: r.document_id,
                    section_path: r.section_path,
                    text: r.text,
                    embedding: r.embedding,
                });
            }
        }
        Ok(out)
    }

    async fn upsert_chunk(&self, chunk: &Chunk) -> Result<(), StoreError> {
        check_chunk_dimension(self.stored_dimension(Some(&chunk.id)).await?, chunk)?;
        let record = ChunkRecord {
            chunk_id: chunk.id.clone(),
            document_id: chunk.document_id.clone(),
            section_path: chunk.section_path.clone(),
            text: chunk.text.clone(),
            embedding: chunk.embedding.clone(),
        };
        let _: Option<ChunkRecord> = self
            .db
            .upsert((CHUNKS, chunk.id.clone()))
            .content(record)
            .await?;
        Ok(())
    }

    async fn dimension(&self) -> Result<Option<usize>, StoreError> {
        self.stored_dimension(None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_surreal_roundtrip_in_memory() {
        let store = SurrealStore::new("mem://").await.unwrap();
        store
            .upsert_entity(&Entity::new("drug_x", "Drug X", EntityType::Drug))
            .await
            .unwrap();
        store
            .upsert_entity(&Entity::new("gene_y", "Gene Y", EntityType::GeneProtein))
            .await
            .unwrap();
        store
            .upsert_relationship(&Relationship::new("drug_x", "INHIBITS", "gene_y"))
            .await
            .unwrap();

        let around = store.neighborhood("drug_x", 2).await.unwrap();
        assert_eq!(around.len(), 1);
        assert_eq!(around[0].entity.id, "gene_y");

        let err = store
            .upsert_relationship(&Relationship::new("drug_x", "TREATS", "nobody"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownEntity(_)));
    }

    #[tokio::test]
    async fn test_surreal_assignment_replaced_in_one_write() {
        let store = SurrealStore::new("mem://").await.unwrap();
        let first = BTreeMap::from([
            ("a".to_string(), "c1".to_string()),
            ("b".to_string(), "c1".to_string()),
        ]);
        let second = BTreeMap::from([("a".to_string(), "c2".to_string())]);

        store.write_community_assignment(&first).await.unwrap();
        assert_eq!(store.community_assignment().await.unwrap(), first);
        store.write_community_assignment(&second).await.unwrap();
        assert_eq!(store.community_assignment().await.unwrap(), second);
        store.write_community_assignment(&BTreeMap::new()).await.unwrap();
        assert!(store.community_assignment().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_surreal_rejects_mismatched_embedding() {
        let store = SurrealStore::new("mem://").await.unwrap();
        let chunk = |id: &str, embedding: Vec<f32>| Chunk {
            id: id.into(),
            document_id: "d".into(),
            section_path: vec![],
            text: id.into(),
            embedding,
        };
        store.upsert_chunk(&chunk("x", vec![1.0, 0.0])).await.unwrap();
        assert_eq!(store.dimension().await.unwrap(), Some(2));
        // Re-upserting the same chunk is fine.
        store.upsert_chunk(&chunk("x", vec![0.0, 1.0])).await.unwrap();

        let err = store.upsert_chunk(&chunk("y", vec![1.0, 0.0, 5.0])).await.unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 2, actual: 3 }));
        let err = store.nearest(&[1.0, 0.0, 5.0], 1).await.unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { .. }));
    }
}
