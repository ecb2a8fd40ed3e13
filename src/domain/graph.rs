//! Knowledge Graph Domain Models
//!
//! Entity, relationship, chunk and community structures shared by the
//! retrieval and reasoning layers. All of them are produced by external
//! collaborators (ingestion, extraction, detection) and are read-only here.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// Entity Types
// =============================================================================

/// Biomedical entity classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Disease or clinical condition
    Condition,
    /// Drug, compound or medication
    Drug,
    /// Gene or protein
    GeneProtein,
    /// Adverse event or side effect
    SideEffect,
    /// Study, trial or publication
    Study,
    /// Anything else (pathways, processes, ...)
    Other,
}

impl EntityType {
    /// Parse a free-form label emitted by the extraction collaborator.
    ///
    /// Unknown labels map to [`EntityType::Other`] rather than failing.
    pub fn parse_label(label: &str) -> Self {
        let lower = label.trim().to_lowercase();
        match lower.as_str() {
            "condition" | "disease" | "disorder" => Self::Condition,
            "drug" | "medication" | "compound" => Self::Drug,
            "gene" | "protein" | "protein/gene" | "gene/protein" | "gene_protein"
            | "geneprotein" => Self::GeneProtein,
            "side effect" | "side_effect" | "sideeffect" | "adverse event" => Self::SideEffect,
            "study" | "trial" | "clinical trial" => Self::Study,
            _ => Self::Other,
        }
    }

    /// Words in a question that imply this entity type is being asked about.
    pub fn cue_words(self) -> &'static [&'static str] {
        match self {
            Self::Condition => &["disease", "diseases", "condition", "conditions", "disorder"],
            Self::Drug => &["drug", "drugs", "medication", "medications", "compound"],
            Self::GeneProtein => &["gene", "genes", "protein", "proteins"],
            Self::SideEffect => &["side effect", "side effects", "adverse"],
            Self::Study => &["study", "studies", "trial", "trials"],
            Self::Other => &[],
        }
    }

    /// All concrete types, in declaration order.
    pub const ALL: [EntityType; 6] = [
        Self::Condition,
        Self::Drug,
        Self::GeneProtein,
        Self::SideEffect,
        Self::Study,
        Self::Other,
    ];
}

impl Default for EntityType {
    fn default() -> Self {
        Self::Other
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Condition => "condition",
            Self::Drug => "drug",
            Self::GeneProtein => "gene/protein",
            Self::SideEffect => "side effect",
            Self::Study => "study",
            Self::Other => "other",
        };
        f.write_str(label)
    }
}

// =============================================================================
// Entity
// =============================================================================

/// A canonical entity node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable canonical identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Entity type classification
    #[serde(rename = "type", default)]
    pub entity_type: EntityType,
    /// Alternative surface forms resolving to this entity
    #[serde(default)]
    pub aliases: BTreeSet<String>,
}

impl Entity {
    pub fn new(id: impl Into<String>, name: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            entity_type,
            aliases: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.insert(alias.into());
        self
    }
}

// =============================================================================
// Relationship
// =============================================================================

/// A directed, typed relationship between two entities.
///
/// Several relationships of different types may connect the same pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    /// Source entity ID
    pub source_id: String,
    /// Target entity ID
    pub target_id: String,
    /// Relationship type (e.g., "INHIBITS", "TREATS")
    #[serde(rename = "type")]
    pub relation_type: String,
    /// Free-form attributes (`confidence`, `timestamp`, `source_doc_id`, `section`)
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Relationship {
    pub const CONFIDENCE: &'static str = "confidence";
    pub const TIMESTAMP: &'static str = "timestamp";
    pub const SOURCE_DOC: &'static str = "source_doc_id";
    pub const SECTION: &'static str = "section";

    pub fn new(
        source_id: impl Into<String>,
        relation_type: impl Into<String>,
        target_id: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            relation_type: relation_type.into(),
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Edge weight for community detection (`confidence`, default 1.0).
    pub fn weight(&self) -> f64 {
        self.attributes
            .get(Self::CONFIDENCE)
            .and_then(|c| c.parse::<f64>().ok())
            .filter(|w| w.is_finite() && *w > 0.0)
            .unwrap_or(1.0)
    }

    /// Recency of the relationship, when a parseable timestamp is attached.
    pub fn timestamp(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.attributes
            .get(Self::TIMESTAMP)
            .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&chrono::Utc))
    }

    /// The endpoint opposite to `entity_id`, if `entity_id` is an endpoint.
    pub fn other_end(&self, entity_id: &str) -> Option<&str> {
        if self.source_id == entity_id {
            Some(&self.target_id)
        } else if self.target_id == entity_id {
            Some(&self.source_id)
        } else {
            None
        }
    }
}

// =============================================================================
// Chunk
// =============================================================================

/// A unit of source text with its embedding and citation path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    /// Section headings from the document root down to this chunk
    #[serde(default)]
    pub section_path: Vec<String>,
    pub text: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

impl Chunk {
    /// Human-readable citation path: `doc › Section › Subsection`.
    pub fn citation_path(&self) -> String {
        std::iter::once(self.document_id.as_str())
            .chain(self.section_path.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" › ")
    }
}

// =============================================================================
// Community
// =============================================================================

/// A cluster of densely connected entities, used for global context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Community {
    pub id: String,
    pub member_entity_ids: BTreeSet<String>,
    pub summary: String,
    pub size: usize,
}

// =============================================================================
// Graph Snapshot
// =============================================================================

/// Point-in-time copy of the whole relationship graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl GraphSnapshot {
    /// Relationship types present in the graph, sorted.
    pub fn relation_types(&self) -> BTreeSet<String> {
        self.relationships
            .iter()
            .map(|r| r.relation_type.clone())
            .collect()
    }
}
