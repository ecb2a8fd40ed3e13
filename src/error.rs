//! Error taxonomy.
//!
//! Single-backend failures are reported through [`RetrievalError`] values that
//! the retriever degrades locally. Only [`ReasoningError`] reaches callers,
//! always carrying the partial trace of the run.

use crate::domain::TraceEvent;
use serde::Serialize;
use thiserror::Error;

/// External backends the engine talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Vector,
    Graph,
    Community,
    Embedding,
    LanguageModel,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Vector => "vector_index",
            Self::Graph => "graph_store",
            Self::Community => "community_table",
            Self::Embedding => "embedding",
            Self::LanguageModel => "language_model",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Store Errors
// =============================================================================

/// Errors raised by graph/vector store adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The backend answered but the query failed.
    #[error("store query failed: {0}")]
    Query(String),

    /// A referenced entity does not exist.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// An embedding does not match the dimension of the stored chunks.
    #[error("embedding has {actual} dimensions, index holds {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl From<surrealdb::Error> for StoreError {
    fn from(err: surrealdb::Error) -> Self {
        Self::Query(err.to_string())
    }
}

// =============================================================================
// Retrieval Errors
// =============================================================================

/// Errors from the hybrid retriever and its branches.
#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    /// One backend failed or timed out; retrieval degrades to the others.
    #[error("{backend} unavailable: {reason}")]
    BackendUnavailable { backend: Backend, reason: String },

    /// The query embedding could not be computed; the vector branch is lost.
    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    /// Both the vector index and the graph store are down.
    #[error("retrieval unavailable (vector: {vector}; graph: {graph})")]
    RetrievalUnavailable { vector: String, graph: String },
}

impl RetrievalError {
    /// Whether this error must abort the current query.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RetrievalUnavailable { .. })
    }

    /// The backend a non-fatal error is attributed to.
    pub fn backend(&self) -> Option<Backend> {
        match self {
            Self::BackendUnavailable { backend, .. } => Some(*backend),
            Self::EmbeddingFailed(_) => Some(Backend::Embedding),
            Self::RetrievalUnavailable { .. } => None,
        }
    }
}

// =============================================================================
// Community / Entity Index Errors
// =============================================================================

/// Errors from the community table.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommunityError {
    /// Detection has never run; the community branch yields nothing.
    #[error("community detection has not run yet")]
    CommunityDetectionStale,
}

/// Errors raised while building the entity index.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntityIndexError {
    #[error("alias '{alias}' already resolves to '{existing}', cannot map it to '{incoming}'")]
    AliasConflict {
        alias: String,
        existing: String,
        incoming: String,
    },

    #[error("entity id must not be empty")]
    EmptyId,
}

// =============================================================================
// Reasoning Errors
// =============================================================================

/// User-visible failures of a reasoning run. No answer is produced.
#[derive(Debug, Error)]
pub enum ReasoningError {
    /// All retrieval backends were unavailable.
    #[error("reasoning failed: {cause}")]
    ReasoningFailed {
        #[source]
        cause: RetrievalError,
        trace: Vec<TraceEvent>,
    },

    /// No evidence existed that an answer could cite.
    #[error("synthesis produced no citable answer")]
    SynthesisCitationMissing { trace: Vec<TraceEvent> },

    /// The run was cancelled at a state boundary.
    #[error("reasoning cancelled")]
    Cancelled { trace: Vec<TraceEvent> },
}

impl ReasoningError {
    /// Partial trace of what was attempted before the failure.
    pub fn trace(&self) -> &[TraceEvent] {
        match self {
            Self::ReasoningFailed { trace, .. }
            | Self::SynthesisCitationMissing { trace }
            | Self::Cancelled { trace } => trace,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ReasoningFailed { .. } => "RETRIEVAL_UNAVAILABLE",
            Self::SynthesisCitationMissing { .. } => "SYNTHESIS_CITATION_MISSING",
            Self::Cancelled { .. } => "CANCELLED",
        }
    }

    /// Structured report for callers that render failures.
    pub fn report(&self) -> FailureReport {
        FailureReport {
            code: self.code().to_string(),
            message: self.to_string(),
            trace: self.trace().to_vec(),
        }
    }
}

/// Serializable form of a [`ReasoningError`].
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub code: String,
    pub message: String,
    pub trace: Vec<TraceEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_total_outage_is_fatal() {
        let partial = RetrievalError::BackendUnavailable {
            backend: Backend::Graph,
            reason: "timeout".into(),
        };
        assert!(!partial.is_fatal());
        assert_eq!(partial.backend(), Some(Backend::Graph));

        let total = RetrievalError::RetrievalUnavailable {
            vector: "down".into(),
            graph: "down".into(),
        };
        assert!(total.is_fatal());
        assert_eq!(total.backend(), None);
    }

    #[test]
    fn test_failure_report_carries_code() {
        let err = ReasoningError::Cancelled { trace: Vec::new() };
        let report = err.report();
        assert_eq!(report.code, "CANCELLED");
        assert!(report.trace.is_empty());
    }
}
