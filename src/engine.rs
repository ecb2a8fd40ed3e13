//! Engine assembly.
//!
//! Builds the entity index and community table from the stores, then wires
//! the hybrid retriever and the reasoning controller around them. All state
//! shared between queries is read-only except the community table, which is
//! swapped wholesale on refresh.

use crate::config::AppConfig;
use crate::domain::{Community, ReasoningOutcome};
use crate::error::{CommunityError, ReasoningError};
use crate::llm::LanguageModel;
use crate::persistence::{GraphStore, VectorIndex};
use crate::rag::community::{CommunityDetector, CommunityTable, LexicalSummarizer, LlmSummarizer, Summarizer};
use crate::rag::embedding::Embedder;
use crate::rag::entity_index::EntityIndex;
use crate::rag::extraction::LlmKeywordExtractor;
use crate::rag::retrieval::HybridRetriever;
use crate::reasoning::ReasoningController;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct Engine {
    config: AppConfig,
    graph: Arc<dyn GraphStore>,
    model: Arc<dyn LanguageModel>,
    communities: Arc<CommunityTable>,
    detector: CommunityDetector,
    controller: ReasoningController,
}

impl Engine {
    /// Index the graph, optionally run community detection, and assemble the
    /// reasoning pipeline.
    pub async fn build(
        config: AppConfig,
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn LanguageModel>,
    ) -> Result<Self> {
        match vectors.dimension().await {
            Ok(Some(stored)) if stored != embedder.dimension() => anyhow::bail!(
                "embedder produces {} dimensions but the vector index holds {stored}",
                embedder.dimension()
            ),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Could not read vector index dimension"),
        }

        let snapshot = graph.snapshot().await.context("snapshotting graph for the entity index")?;
        let entities = EntityIndex::from_snapshot(&snapshot)?;
        tracing::info!(
            entities = entities.len(),
            relationships = snapshot.relationships.len(),
            "Entity index built"
        );

        let communities = Arc::new(CommunityTable::new());
        let extractor = Arc::new(LlmKeywordExtractor::new(model.clone(), config.llm_timeout()));
        let retriever = Arc::new(HybridRetriever::new(
            config.retriever_config(),
            graph.clone(),
            vectors,
            embedder,
            communities.clone(),
            Arc::new(entities),
            extractor,
        ));
        let controller = ReasoningController::new(config.reasoning_config(), retriever, model.clone());

        let engine = Self {
            detector: CommunityDetector::with_config(config.louvain_config()),
            config,
            graph,
            model,
            communities,
            controller,
        };

        if engine.config.community.detect_on_startup {
            // The community branch stays empty until a later refresh succeeds.
            if let Err(e) = engine.refresh_communities(engine.config.community.summarize).await {
                tracing::warn!(error = %e, "Community detection on startup failed");
            }
        }
        Ok(engine)
    }

    /// Answer one question.
    pub async fn ask(&self, query: &str, cancel: &CancellationToken) -> Result<ReasoningOutcome, ReasoningError> {
        self.controller.run(query, cancel).await
    }

    /// Re-run detection and install the new table. Returns the number of
    /// communities.
    pub async fn refresh_communities(&self, summarize: bool) -> Result<usize> {
        let summarizer: Box<dyn Summarizer> = if summarize {
            Box::new(LlmSummarizer::new(self.model.clone(), self.config.llm_timeout()))
        } else {
            Box::new(LexicalSummarizer)
        };
        let count = self
            .communities
            .refresh(self.graph.as_ref(), &self.detector, summarizer.as_ref())
            .await
            .context("refreshing communities")?;
        tracing::info!(communities = count, summarize, "Communities refreshed");
        Ok(count)
    }

    pub async fn communities(&self) -> Result<Vec<Community>, CommunityError> {
        self.communities.communities().await
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Entity, EntityType, Relationship};
    use crate::llm::Prompt;
    use crate::persistence::providers::{InMemoryGraphStore, InMemoryVectorIndex};
    use crate::rag::embedding::HashingEmbedder;

    #[derive(Debug)]
    struct Offline;

    #[async_trait::async_trait]
    impl LanguageModel for Offline {
        async fn complete(&self, _prompt: &Prompt) -> anyhow::Result<String> {
            anyhow::bail!("offline")
        }

        fn name(&self) -> &str {
            "offline"
        }
    }

    async fn graph() -> Arc<InMemoryGraphStore> {
        let graph = Arc::new(InMemoryGraphStore::new());
        graph
            .upsert_entity(&Entity::new("drug_x", "Drug X", EntityType::Drug))
            .await
            .unwrap();
        graph
            .upsert_entity(&Entity::new("gene_y", "Gene Y", EntityType::GeneProtein))
            .await
            .unwrap();
        graph
            .upsert_relationship(&Relationship::new("drug_x", "INHIBITS", "gene_y"))
            .await
            .unwrap();
        graph
    }

    #[tokio::test]
    async fn test_build_detects_on_startup() {
        let graph = graph().await;
        let engine = Engine::build(
            AppConfig::default(),
            graph.clone(),
            Arc::new(InMemoryVectorIndex::new()),
            Arc::new(HashingEmbedder::new(64)),
            Arc::new(Offline),
        )
        .await
        .unwrap();

        let communities = engine.communities().await.unwrap();
        assert_eq!(communities.len(), 1);
        assert_eq!(graph.community_assignment().await.len(), 2);
    }

    #[tokio::test]
    async fn test_build_rejects_embedder_dimension_mismatch() {
        use crate::domain::Chunk;

        let vectors = Arc::new(InMemoryVectorIndex::new());
        vectors
            .upsert_chunk(&Chunk {
                id: "c1".into(),
                document_id: "d".into(),
                section_path: vec![],
                text: "Drug X inhibits Gene Y.".into(),
                embedding: vec![0.5; 384],
            })
            .await
            .unwrap();

        let err = Engine::build(
            AppConfig::default(),
            graph().await,
            vectors,
            Arc::new(HashingEmbedder::new(64)),
            Arc::new(Offline),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("384"));
    }

    #[tokio::test]
    async fn test_stale_until_refreshed() {
        let mut config = AppConfig::default();
        config.community.detect_on_startup = false;
        let engine = Engine::build(
            config,
            graph().await,
            Arc::new(InMemoryVectorIndex::new()),
            Arc::new(HashingEmbedder::new(64)),
            Arc::new(Offline),
        )
        .await
        .unwrap();

        assert_eq!(engine.communities().await, Err(CommunityError::CommunityDetectionStale));
        // Offline model: summaries fall back to the lexical form.
        assert_eq!(engine.refresh_communities(true).await.unwrap(), 1);
        assert!(engine.communities().await.unwrap()[0].summary.contains("Drug X"));
    }
}
