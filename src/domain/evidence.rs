//! Evidence produced by hybrid retrieval.
//!
//! Vector, graph and community hits share one tagged representation so a
//! single merge/sort routine can rank all of them.

use super::graph::EntityType;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Which retrieval branch produced an evidence item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    VectorHit,
    GraphHit,
    CommunityHit,
}

impl EvidenceKind {
    /// Cross-kind tie-break priority; lower ranks first.
    pub fn priority(self) -> u8 {
        match self {
            Self::VectorHit => 0,
            Self::GraphHit => 1,
            Self::CommunityHit => 2,
        }
    }
}

/// Structured annotations attached to an evidence item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceFacets {
    /// Entity types this item is about or mentions
    #[serde(default)]
    pub entity_types: BTreeSet<EntityType>,
    /// Relationship types traversed or summarised
    #[serde(default)]
    pub relation_types: BTreeSet<String>,
    /// Source document (vector hits and provenance-tagged graph hits)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    /// Section path inside the source document
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub section_path: Vec<String>,
    /// Selected by a fallback rule rather than by matching the query
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,
}

/// A single retrieved piece of evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub kind: EvidenceKind,
    /// Chunk id, entity id or community id depending on `kind`
    pub source_ref: String,
    /// Relevance in `[0, 1]`
    pub score: f32,
    pub payload_text: String,
    #[serde(default)]
    pub facets: EvidenceFacets,
}

impl EvidenceItem {
    pub fn new(
        kind: EvidenceKind,
        source_ref: impl Into<String>,
        score: f32,
        payload_text: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            source_ref: source_ref.into(),
            score: clamp_score(score),
            payload_text: payload_text.into(),
            facets: EvidenceFacets::default(),
        }
    }

    #[must_use]
    pub fn with_facets(mut self, facets: EvidenceFacets) -> Self {
        self.facets = facets;
        self
    }

    /// Ranking order: score descending, then kind priority.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .partial_cmp(&self.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.kind.priority().cmp(&other.kind.priority()))
    }
}

/// Clamp a raw score into `[0, 1]`, mapping NaN to 0.
pub fn clamp_score(score: f32) -> f32 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scores_are_clamped() {
        assert!((EvidenceItem::new(EvidenceKind::VectorHit, "c", 1.7, "").score - 1.0).abs() < f32::EPSILON);
        assert!(EvidenceItem::new(EvidenceKind::VectorHit, "c", -0.3, "").score.abs() < f32::EPSILON);
        assert!(EvidenceItem::new(EvidenceKind::VectorHit, "c", f32::NAN, "").score.abs() < f32::EPSILON);
    }

    #[test]
    fn test_rank_cmp_breaks_ties_by_kind() {
        let mut items = vec![
            EvidenceItem::new(EvidenceKind::CommunityHit, "k", 0.5, ""),
            EvidenceItem::new(EvidenceKind::GraphHit, "g", 0.5, ""),
            EvidenceItem::new(EvidenceKind::VectorHit, "v", 0.5, ""),
            EvidenceItem::new(EvidenceKind::CommunityHit, "top", 0.9, ""),
        ];
        items.sort_by(EvidenceItem::rank_cmp);
        let refs: Vec<_> = items.iter().map(|i| i.source_ref.as_str()).collect();
        assert_eq!(refs, vec!["top", "v", "g", "k"]);
    }
}
