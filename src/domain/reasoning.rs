//! Per-query reasoning state, trace events and final answers.

use super::evidence::EvidenceItem;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// =============================================================================
// Phases & Verdicts
// =============================================================================

/// Phase of the reasoning state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Retrieving,
    Reflecting,
    Synthesizing,
    Done,
}

/// Outcome of a reflection step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Continue,
    Sufficient,
    BudgetExhausted,
}

// =============================================================================
// Trace
// =============================================================================

/// What happened at one point of a reasoning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEventKind {
    PlanCreated { steps: Vec<String> },
    PlanFallback { reason: String },
    PlanRefined { subquery: String, missing: Vec<String> },
    HopStarted { hop: usize, subquery: String },
    EvidenceAdded { hop: usize, added: usize, total: usize },
    BackendDegraded { backend: String, reason: String },
    RetrievalFailed { hop: usize, reason: String },
    Reflected { verdict: Verdict, evidence: usize, missing: Vec<String> },
    SynthesisRejected { attempt: usize, uncited_sentences: usize },
    SynthesisDegraded { reason: String },
    Cancelled,
}

/// A timestamped trace record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub at: chrono::DateTime<chrono::Utc>,
    pub phase: Phase,
    #[serde(flatten)]
    pub kind: TraceEventKind,
}

// =============================================================================
// Reasoning State
// =============================================================================

/// Mutable state owned by exactly one controller invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningState {
    pub query: String,
    pub plan: Vec<String>,
    /// Insertion order is retrieval order
    pub evidence: Vec<EvidenceItem>,
    pub hop_count: usize,
    pub verdict: Verdict,
    pub trace: Vec<TraceEvent>,
    /// Index of the plan step the next hop will run
    #[serde(skip)]
    pub cursor: usize,
}

impl ReasoningState {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            plan: Vec::new(),
            evidence: Vec::new(),
            hop_count: 0,
            verdict: Verdict::Continue,
            trace: Vec::new(),
            cursor: 0,
        }
    }

    pub fn record(&mut self, phase: Phase, kind: TraceEventKind) {
        self.trace.push(TraceEvent {
            at: chrono::Utc::now(),
            phase,
            kind,
        });
    }

    /// Source refs already gathered, for retrieval deduplication.
    pub fn seen_refs(&self) -> HashSet<String> {
        self.evidence.iter().map(|e| e.source_ref.clone()).collect()
    }

    /// Plan step for the next hop, if any remain.
    pub fn next_subquery(&self) -> Option<&str> {
        self.plan.get(self.cursor).map(String::as_str)
    }
}

// =============================================================================
// Answer
// =============================================================================

/// How far the answer can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Every sentence of the model's answer carried valid citations
    Grounded,
    /// Uncited sentences were dropped or the answer was built extractively
    Degraded,
}

/// Citation of one answer sentence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub sentence: String,
    pub source_refs: Vec<String>,
}

/// A synthesized, cited answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
    pub confidence: Confidence,
}

/// Everything a completed run returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningOutcome {
    pub answer: Answer,
    pub verdict: Verdict,
    pub state: ReasoningState,
}

impl ReasoningOutcome {
    pub fn trace(&self) -> &[TraceEvent] {
        &self.state.trace
    }

    /// Record consumable by the answer-quality evaluation collaborator.
    pub fn evaluation_record(&self) -> EvaluationRecord {
        EvaluationRecord {
            question: self.state.query.clone(),
            answer: self.answer.text.clone(),
            contexts: self
                .state
                .evidence
                .iter()
                .map(|e| e.payload_text.clone())
                .collect(),
        }
    }
}

/// `{question, answer, contexts}` row for answer-quality evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub question: String,
    pub answer: String,
    pub contexts: Vec<String>,
}
