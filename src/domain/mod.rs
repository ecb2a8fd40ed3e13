//! Domain models shared by retrieval and reasoning.

pub mod evidence;
pub mod graph;
pub mod reasoning;

pub use evidence::{EvidenceFacets, EvidenceItem, EvidenceKind};
pub use graph::{Chunk, Community, Entity, EntityType, GraphSnapshot, Relationship};
pub use reasoning::{
    Answer, Citation, Confidence, EvaluationRecord, Phase, ReasoningOutcome, ReasoningState,
    TraceEvent, TraceEventKind, Verdict,
};
