//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use medgraph_rag::Engine;
use medgraph_rag::config::AppConfig;
use medgraph_rag::domain::{Chunk, Entity, EntityType, GraphSnapshot, Relationship};
use medgraph_rag::error::StoreError;
use medgraph_rag::llm::{LanguageModel, Prompt, PromptPurpose};
use medgraph_rag::persistence::providers::{InMemoryGraphStore, InMemoryVectorIndex};
use medgraph_rag::persistence::{GraphStore, Neighbor, VectorIndex};
use medgraph_rag::rag::embedding::Embedder;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

// =============================================================================
// Language Model
// =============================================================================

/// Replies keyed by prompt purpose; unscripted purposes fail like an outage.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: HashMap<PromptPurpose, String>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, purpose: PromptPurpose, text: &str) -> Self {
        self.replies.insert(purpose, text.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &Prompt) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .get(&prompt.purpose)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("model unavailable for {:?}", prompt.purpose))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// =============================================================================
// Embedder
// =============================================================================

/// Unsigned bag-of-words counts; shared words always give positive similarity.
#[derive(Debug, Clone, Copy)]
pub struct BagOfWords;

impl BagOfWords {
    pub const DIMENSION: usize = 256;

    fn bucket(word: &str) -> usize {
        word.bytes()
            .fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(usize::from(b)))
            % Self::DIMENSION
    }
}

#[async_trait]
impl Embedder for BagOfWords {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut v = vec![0.0; Self::DIMENSION];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            v[Self::bucket(&word.to_lowercase())] += 1.0;
        }
        Ok(v)
    }

    fn dimension(&self) -> usize {
        Self::DIMENSION
    }
}

// =============================================================================
// Store Wrappers
// =============================================================================

/// How a wrapped backend misbehaves on its query path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Healthy,
    Down,
    Slow(Duration),
}

/// Graph store that counts neighborhood queries and can fail them.
/// Snapshots and writes always pass through.
#[derive(Debug)]
pub struct TestGraph {
    pub inner: Arc<InMemoryGraphStore>,
    pub mode: Mode,
    pub queries: AtomicUsize,
}

#[async_trait]
impl GraphStore for TestGraph {
    async fn neighborhood(&self, entity_id: &str, max_hops: usize) -> Result<Vec<Neighbor>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            Mode::Healthy => {}
            Mode::Down => return Err(StoreError::Unavailable("graph store is down".into())),
            Mode::Slow(delay) => tokio::time::sleep(delay).await,
        }
        self.inner.neighborhood(entity_id, max_hops).await
    }

    async fn snapshot(&self) -> Result<GraphSnapshot, StoreError> {
        self.inner.snapshot().await
    }

    async fn write_community_assignment(&self, mapping: &BTreeMap<String, String>) -> Result<(), StoreError> {
        self.inner.write_community_assignment(mapping).await
    }

    async fn upsert_entity(&self, entity: &Entity) -> Result<(), StoreError> {
        self.inner.upsert_entity(entity).await
    }

    async fn upsert_relationship(&self, relationship: &Relationship) -> Result<(), StoreError> {
        self.inner.upsert_relationship(relationship).await
    }
}

/// Vector index that counts similarity queries and can fail them.
#[derive(Debug)]
pub struct TestVectors {
    pub inner: Arc<InMemoryVectorIndex>,
    pub mode: Mode,
    pub queries: AtomicUsize,
}

#[async_trait]
impl VectorIndex for TestVectors {
    async fn nearest(&self, embedding: &[f32], k: usize) -> Result<Vec<(String, f32)>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            Mode::Healthy => {}
            Mode::Down => return Err(StoreError::Unavailable("vector index is down".into())),
            Mode::Slow(delay) => tokio::time::sleep(delay).await,
        }
        self.inner.nearest(embedding, k).await
    }

    async fn chunks(&self, ids: &[String]) -> Result<Vec<Chunk>, StoreError> {
        self.inner.chunks(ids).await
    }

    async fn upsert_chunk(&self, chunk: &Chunk) -> Result<(), StoreError> {
        self.inner.upsert_chunk(chunk).await
    }

    async fn dimension(&self) -> Result<Option<usize>, StoreError> {
        self.inner.dimension().await
    }
}

// =============================================================================
// Fixture Graph
// =============================================================================

pub const QUESTION: &str = "What gene is inhibited by Drug X?";

/// Drug X -INHIBITS-> Gene Y -ASSOCIATED_WITH-> Condition Z, plus two chunks.
pub async fn fixture(graph_mode: Mode, vector_mode: Mode) -> (Arc<TestGraph>, Arc<TestVectors>) {
    let graph = Arc::new(InMemoryGraphStore::new());
    let vectors = Arc::new(InMemoryVectorIndex::new());

    for entity in [
        Entity::new("drug_x", "Drug X", EntityType::Drug).with_alias("DX-1"),
        Entity::new("gene_y", "Gene Y", EntityType::GeneProtein),
        Entity::new("cond_z", "Condition Z", EntityType::Condition),
    ] {
        graph.upsert_entity(&entity).await.unwrap();
    }
    graph
        .upsert_relationship(
            &Relationship::new("drug_x", "INHIBITS", "gene_y")
                .with_attribute(Relationship::SOURCE_DOC, "pmid-1")
                .with_attribute(Relationship::SECTION, "Results"),
        )
        .await
        .unwrap();
    graph
        .upsert_relationship(&Relationship::new("gene_y", "ASSOCIATED_WITH", "cond_z"))
        .await
        .unwrap();

    for (id, section, text) in [
        ("c1", "Results", "Drug X inhibits Gene Y in vitro."),
        ("c2", "Discussion", "Gene Y expression is associated with Condition Z."),
    ] {
        vectors
            .upsert_chunk(&Chunk {
                id: id.into(),
                document_id: "pmid-1".into(),
                section_path: vec![section.into()],
                text: text.into(),
                embedding: BagOfWords.embed(text).await.unwrap(),
            })
            .await
            .unwrap();
    }

    (
        Arc::new(TestGraph {
            inner: graph,
            mode: graph_mode,
            queries: AtomicUsize::new(0),
        }),
        Arc::new(TestVectors {
            inner: vectors,
            mode: vector_mode,
            queries: AtomicUsize::new(0),
        }),
    )
}

/// Config with short backend timeouts so slow-backend tests stay fast.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.resilience.backend_timeout_ms = 200;
    config.resilience.llm_timeout_ms = 1_000;
    config.reasoning.top_k = 8;
    config
}

pub async fn engine(
    config: AppConfig,
    graph: Arc<TestGraph>,
    vectors: Arc<TestVectors>,
    model: Arc<ScriptedModel>,
) -> Engine {
    Engine::build(config, graph, vectors, Arc::new(BagOfWords), model)
        .await
        .unwrap()
}
