//! Reasoning Controller
//!
//! Explicit state machine driving plan → retrieve → reflect → synthesize.
//! One controller invocation owns its [`ReasoningState`]; nothing in it is
//! shared, so the loop needs no locks. The cancellation token is checked at
//! every phase transition and the hop counter bounds the cycle.

use super::planner::Planner;
use super::reflection::{ReflectionPolicy, Requirement, Requirements, reflect};
use super::synthesis::Synthesizer;
use crate::domain::{Phase, ReasoningOutcome, ReasoningState, TraceEventKind, Verdict};
use crate::error::ReasoningError;
use crate::llm::LanguageModel;
use crate::rag::retrieval::HybridRetriever;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

// =============================================================================
// Configuration
// =============================================================================

/// Tunable reasoning policy.
#[derive(Debug, Clone)]
pub struct ReasoningConfig {
    /// Upper bound on retrieval hops per query (at least 1)
    pub max_hops: usize,
    /// Matched evidence items needed before the answer may be written
    pub min_evidence: usize,
    /// Evidence items kept per retrieval hop
    pub top_k: usize,
    /// Steps kept from the model's plan
    pub max_plan_steps: usize,
    /// Extra synthesis attempts after an uncited answer
    pub synthesis_retries: usize,
    /// Bound on each language-model call
    pub llm_timeout: Duration,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            max_hops: 3,
            min_evidence: 2,
            top_k: 5,
            max_plan_steps: 3,
            synthesis_retries: 1,
            llm_timeout: Duration::from_millis(30_000),
        }
    }
}

// =============================================================================
// Controller
// =============================================================================

#[derive(Debug, Clone)]
pub struct ReasoningController {
    config: ReasoningConfig,
    retriever: Arc<HybridRetriever>,
    planner: Planner,
    synthesizer: Synthesizer,
}

impl ReasoningController {
    pub fn new(config: ReasoningConfig, retriever: Arc<HybridRetriever>, model: Arc<dyn LanguageModel>) -> Self {
        let planner = Planner::new(model.clone(), config.llm_timeout, config.max_plan_steps);
        let synthesizer = Synthesizer::new(model, config.llm_timeout, config.synthesis_retries);
        Self {
            config,
            retriever,
            planner,
            synthesizer,
        }
    }

    pub fn config(&self) -> &ReasoningConfig {
        &self.config
    }

    /// Answer `query`, or fail with the partial trace.
    ///
    /// # Errors
    ///
    /// - [`ReasoningError::ReasoningFailed`] when retrieval is unavailable
    /// - [`ReasoningError::SynthesisCitationMissing`] when there is nothing to cite
    /// - [`ReasoningError::Cancelled`] when `cancel` fires
    #[instrument(skip(self, cancel), fields(run_id = tracing::field::Empty))]
    pub async fn run(&self, query: &str, cancel: &CancellationToken) -> Result<ReasoningOutcome, ReasoningError> {
        tracing::Span::current().record("run_id", Uuid::new_v4().to_string());

        let max_hops = self.config.max_hops.max(1);
        let policy = ReflectionPolicy {
            min_evidence: self.config.min_evidence,
            max_hops,
        };

        let mut state = ReasoningState::new(query);
        let mut requirements = Requirements::default();
        let mut missing: Vec<Requirement> = Vec::new();
        let mut answer = None;
        let mut phase = Phase::Planning;

        loop {
            // A written answer is never discarded.
            if phase != Phase::Done && cancel.is_cancelled() {
                tracing::info!(?phase, hops = state.hop_count, "Reasoning cancelled");
                state.record(phase, TraceEventKind::Cancelled);
                return Err(ReasoningError::Cancelled { trace: state.trace });
            }

            phase = match phase {
                Phase::Planning => {
                    if state.plan.is_empty() {
                        self.initial_plan(&mut state).await;
                        let texts = std::iter::once(state.query.as_str()).chain(state.plan.iter().map(String::as_str));
                        requirements = Requirements::derive(texts, self.retriever.entities().relation_types());
                        tracing::debug!(
                            requirements = ?requirements.iter().map(Requirement::label).collect::<Vec<_>>(),
                            "Requirements derived"
                        );
                    } else {
                        let step = self.planner.refine(&state.query, &state.plan, &missing).await;
                        tracing::info!(subquery = %step, "Plan refined");
                        state.record(
                            Phase::Planning,
                            TraceEventKind::PlanRefined {
                                subquery: step.clone(),
                                missing: missing.iter().map(Requirement::label).collect(),
                            },
                        );
                        state.plan.push(step);
                    }
                    Phase::Retrieving
                }

                Phase::Retrieving => {
                    self.retrieve_hop(&mut state).await?;
                    Phase::Reflecting
                }

                Phase::Reflecting => {
                    let (verdict, still_missing) = reflect(&requirements, &state.evidence, state.hop_count, policy);
                    tracing::info!(
                        ?verdict,
                        hops = state.hop_count,
                        evidence = state.evidence.len(),
                        missing = still_missing.len(),
                        "Reflected"
                    );
                    state.record(
                        Phase::Reflecting,
                        TraceEventKind::Reflected {
                            verdict,
                            evidence: state.evidence.len(),
                            missing: still_missing.iter().map(Requirement::label).collect(),
                        },
                    );
                    state.verdict = verdict;
                    missing = still_missing;

                    match verdict {
                        Verdict::Continue if state.next_subquery().is_some() => Phase::Retrieving,
                        Verdict::Continue => Phase::Planning,
                        Verdict::Sufficient | Verdict::BudgetExhausted => Phase::Synthesizing,
                    }
                }

                Phase::Synthesizing => match self.synthesizer.synthesize(&mut state).await {
                    Ok(written) => {
                        tracing::info!(
                            confidence = ?written.confidence,
                            citations = written.citations.len(),
                            hops = state.hop_count,
                            "Answer synthesized"
                        );
                        answer = Some(written);
                        Phase::Done
                    }
                    Err(_) => {
                        tracing::warn!("No evidence to cite, no answer produced");
                        return Err(ReasoningError::SynthesisCitationMissing { trace: state.trace });
                    }
                },

                Phase::Done => {
                    let Some(answer) = answer.take() else {
                        return Err(ReasoningError::SynthesisCitationMissing { trace: state.trace });
                    };
                    let verdict = state.verdict;
                    return Ok(ReasoningOutcome { answer, verdict, state });
                }
            };
        }
    }

    async fn initial_plan(&self, state: &mut ReasoningState) {
        let plan = self.planner.plan(&state.query).await;
        if let Some(reason) = plan.fallback_reason {
            state.record(Phase::Planning, TraceEventKind::PlanFallback { reason });
        }
        tracing::info!(steps = plan.steps.len(), "Plan created");
        state.record(
            Phase::Planning,
            TraceEventKind::PlanCreated {
                steps: plan.steps.clone(),
            },
        );
        state.plan = plan.steps;
    }

    /// Run one retrieval hop for the current plan step.
    async fn retrieve_hop(&self, state: &mut ReasoningState) -> Result<(), ReasoningError> {
        let subquery = state.next_subquery().unwrap_or(&state.query).to_string();
        let hop = state.hop_count + 1;
        tracing::info!(hop, subquery = %subquery, "Hop started");
        state.record(
            Phase::Retrieving,
            TraceEventKind::HopStarted {
                hop,
                subquery: subquery.clone(),
            },
        );

        let prior = state.seen_refs();
        match self.retriever.retrieve(&subquery, self.config.top_k, &prior).await {
            Ok(retrieval) => {
                for degraded in &retrieval.degraded {
                    tracing::warn!(hop, error = %degraded, "Retrieval degraded");
                    state.record(
                        Phase::Retrieving,
                        TraceEventKind::BackendDegraded {
                            backend: degraded.backend().map(|b| b.to_string()).unwrap_or_default(),
                            reason: degraded.to_string(),
                        },
                    );
                }
                let added = retrieval.items.len();
                state.evidence.extend(retrieval.items);
                state.record(
                    Phase::Retrieving,
                    TraceEventKind::EvidenceAdded {
                        hop,
                        added,
                        total: state.evidence.len(),
                    },
                );
            }
            Err(cause) if cause.is_fatal() => {
                state.record(
                    Phase::Retrieving,
                    TraceEventKind::RetrievalFailed {
                        hop,
                        reason: cause.to_string(),
                    },
                );
                tracing::error!(hop, error = %cause, "Retrieval unavailable, aborting");
                return Err(ReasoningError::ReasoningFailed {
                    cause,
                    trace: std::mem::take(&mut state.trace),
                });
            }
            Err(e) => {
                tracing::warn!(hop, error = %e, "Retrieval failed, hop yields no evidence");
                state.record(
                    Phase::Retrieving,
                    TraceEventKind::RetrievalFailed {
                        hop,
                        reason: e.to_string(),
                    },
                );
            }
        }

        state.hop_count = hop;
        state.cursor += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Chunk, Confidence, Entity, EntityType, Relationship};
    use crate::llm::{Prompt, PromptPurpose};
    use crate::persistence::providers::{InMemoryGraphStore, InMemoryVectorIndex};
    use crate::persistence::{GraphStore, VectorIndex};
    use crate::rag::community::{CommunityDetector, CommunityTable, LexicalSummarizer};
    use crate::rag::embedding::{Embedder, HashingEmbedder};
    use crate::rag::entity_index::EntityIndex;
    use crate::rag::extraction::LexicalKeywordExtractor;
    use crate::rag::retrieval::HybridRetrieverConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const QUERY: &str = "What gene is inhibited by Drug X?";

    /// Replies per prompt purpose; unscripted purposes fail.
    #[derive(Debug, Default)]
    struct Scripted {
        replies: Vec<(PromptPurpose, &'static str)>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn with(mut self, purpose: PromptPurpose, reply: &'static str) -> Self {
            self.replies.push((purpose, reply));
            self
        }
    }

    #[async_trait::async_trait]
    impl LanguageModel for Scripted {
        async fn complete(&self, prompt: &Prompt) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .iter()
                .find(|(purpose, _)| *purpose == prompt.purpose)
                .map(|(_, reply)| reply.to_string())
                .ok_or_else(|| anyhow::anyhow!("no reply scripted for {:?}", prompt.purpose))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    async fn retriever() -> Arc<HybridRetriever> {
        let embedder = Arc::new(HashingEmbedder::new(128));
        let graph = Arc::new(InMemoryGraphStore::new());
        let vectors = Arc::new(InMemoryVectorIndex::new());

        for e in [
            Entity::new("drug_x", "Drug X", EntityType::Drug),
            Entity::new("gene_y", "Gene Y", EntityType::GeneProtein),
            Entity::new("cond_z", "Condition Z", EntityType::Condition),
        ] {
            graph.upsert_entity(&e).await.unwrap();
        }
        graph
            .upsert_relationship(&Relationship::new("drug_x", "INHIBITS", "gene_y"))
            .await
            .unwrap();
        graph
            .upsert_relationship(&Relationship::new("gene_y", "ASSOCIATED_WITH", "cond_z"))
            .await
            .unwrap();
        let text = "Drug X inhibits Gene Y in vitro.";
        vectors
            .upsert_chunk(&Chunk {
                id: "c1".into(),
                document_id: "pmid-1".into(),
                section_path: vec!["Results".into()],
                text: text.into(),
                embedding: embedder.embed(text).await.unwrap(),
            })
            .await
            .unwrap();

        let snapshot = graph.snapshot().await.unwrap();
        let table = Arc::new(CommunityTable::new());
        table
            .refresh(graph.as_ref(), &CommunityDetector::new(), &LexicalSummarizer)
            .await
            .unwrap();

        Arc::new(HybridRetriever::new(
            HybridRetrieverConfig::default(),
            graph,
            vectors,
            embedder,
            table,
            Arc::new(EntityIndex::from_snapshot(&snapshot).unwrap()),
            Arc::new(LexicalKeywordExtractor::new()),
        ))
    }

    fn controller(config: ReasoningConfig, retriever: Arc<HybridRetriever>, model: Scripted) -> ReasoningController {
        ReasoningController::new(config, retriever, Arc::new(model))
    }

    #[tokio::test]
    async fn test_sufficient_after_one_hop() {
        let model = Scripted::default()
            .with(PromptPurpose::Plan, QUERY)
            .with(PromptPurpose::Synthesize, "Drug X inhibits Gene Y [gene_y].");
        let controller = controller(ReasoningConfig::default(), retriever().await, model);

        let outcome = controller.run(QUERY, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.verdict, Verdict::Sufficient);
        assert_eq!(outcome.state.hop_count, 1);
        assert_eq!(outcome.answer.confidence, Confidence::Grounded);
        assert_eq!(outcome.answer.citations[0].source_refs, vec!["gene_y"]);
        assert!(matches!(
            outcome.trace().first().map(|e| &e.kind),
            Some(TraceEventKind::PlanCreated { .. })
        ));
    }

    #[tokio::test]
    async fn test_unmatched_query_exhausts_budget() {
        let config = ReasoningConfig {
            max_hops: 2,
            ..ReasoningConfig::default()
        };
        let controller = controller(config, retriever().await, Scripted::default());

        let outcome = controller
            .run("zebrafish telomeres", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.verdict, Verdict::BudgetExhausted);
        assert_eq!(outcome.state.hop_count, 2);
        assert_eq!(outcome.answer.confidence, Confidence::Degraded);

        let kinds: Vec<_> = outcome.trace().iter().map(|e| &e.kind).collect();
        assert!(kinds.iter().any(|k| matches!(k, TraceEventKind::PlanFallback { .. })));
        assert!(kinds.iter().any(|k| matches!(k, TraceEventKind::PlanRefined { .. })));
    }

    #[tokio::test]
    async fn test_hops_never_exceed_budget() {
        for max_hops in [0, 1, 3] {
            let config = ReasoningConfig {
                max_hops,
                min_evidence: 100,
                ..ReasoningConfig::default()
            };
            let controller = controller(config, retriever().await, Scripted::default());
            let outcome = controller.run(QUERY, &CancellationToken::new()).await.unwrap();
            assert_eq!(outcome.state.hop_count, max_hops.max(1));
            let hops = outcome
                .trace()
                .iter()
                .filter(|e| matches!(e.kind, TraceEventKind::HopStarted { .. }))
                .count();
            assert_eq!(hops, max_hops.max(1));
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let model = Arc::new(Scripted::default());
        let controller = ReasoningController::new(ReasoningConfig::default(), retriever().await, model.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = controller.run(QUERY, &cancel).await.unwrap_err();
        assert_eq!(err.code(), "CANCELLED");
        assert_eq!(err.trace().len(), 1);
        assert_eq!(err.trace()[0].phase, Phase::Planning);
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_evidence_is_never_duplicated() {
        let config = ReasoningConfig {
            min_evidence: 100,
            ..ReasoningConfig::default()
        };
        let controller = controller(config, retriever().await, Scripted::default());
        let outcome = controller.run(QUERY, &CancellationToken::new()).await.unwrap();

        let refs = outcome.state.seen_refs();
        assert_eq!(refs.len(), outcome.state.evidence.len());
    }
}
