//! Sufficiency judgement.
//!
//! A query implies requirements: the entity types it asks about and the
//! relationship types it names. Evidence covers a requirement when one of
//! its items carries the matching facet. Reflection is purely structural,
//! no model call is involved.

use crate::domain::{EntityType, EvidenceItem, Verdict};
use crate::rag::entity_index::normalize;
use crate::rag::extraction::is_stopword;
use std::collections::BTreeSet;

/// One thing the evidence must cover before the answer can be written.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Requirement {
    Entity(EntityType),
    Relation(String),
}

impl Requirement {
    /// Label used in trace events.
    pub fn label(&self) -> String {
        match self {
            Self::Entity(t) => t.to_string(),
            Self::Relation(r) => r.clone(),
        }
    }

    /// Search words that target this requirement.
    pub fn cue(&self) -> String {
        match self {
            Self::Entity(t) => t.cue_words().first().copied().unwrap_or_default().to_string(),
            Self::Relation(r) => normalize(r),
        }
    }

    fn covered_by(&self, item: &EvidenceItem) -> bool {
        match self {
            Self::Entity(t) => item.facets.entity_types.contains(t),
            Self::Relation(r) => item.facets.relation_types.contains(r),
        }
    }
}

/// Strip a common English suffix, then a silent trailing `e`, keeping at
/// least four characters. `cause`, `causes` and `caused` share one stem.
pub fn stem(word: &str) -> &str {
    let long_enough = |base: &&str| base.chars().count() >= 4;
    let base = ["ing", "ed", "es", "s"]
        .iter()
        .find_map(|suffix| word.strip_suffix(suffix).filter(long_enough))
        .unwrap_or(word);
    base.strip_suffix('e').filter(long_enough).unwrap_or(base)
}

/// Evidence that counts toward sufficiency: matched rather than picked by a
/// fallback rule, with a positive score. A chunk with zero similarity to the
/// query supports nothing.
fn supports(item: &EvidenceItem) -> bool {
    !item.facets.fallback && item.score > 0.0
}

/// Requirements implied by a set of texts (query plus plan steps).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requirements {
    items: BTreeSet<Requirement>,
}

impl Requirements {
    /// Entity-type cue words, and relation types from `vocabulary` whose
    /// word stems all occur among the text's stems.
    pub fn derive<'a, T, V>(texts: T, vocabulary: V) -> Self
    where
        T: IntoIterator<Item = &'a str>,
        V: IntoIterator<Item = &'a str>,
    {
        let normalized: Vec<String> = texts.into_iter().map(normalize).collect();
        let padded: Vec<String> = normalized.iter().map(|t| format!(" {t} ")).collect();
        let stems: BTreeSet<&str> = normalized
            .iter()
            .flat_map(|t| t.split(' '))
            .filter(|w| !w.is_empty())
            .map(stem)
            .collect();

        let mut items = BTreeSet::new();
        for entity_type in EntityType::ALL {
            let cued = entity_type
                .cue_words()
                .iter()
                .any(|cue| padded.iter().any(|t| t.contains(&format!(" {cue} "))));
            if cued {
                items.insert(Requirement::Entity(entity_type));
            }
        }

        for relation in vocabulary {
            let words = normalize(relation);
            let mut relation_stems = words
                .split(' ')
                .filter(|w| !w.is_empty() && !is_stopword(w))
                .map(stem)
                .peekable();
            if relation_stems.peek().is_none() {
                continue;
            }
            if relation_stems.all(|s| stems.contains(s)) {
                items.insert(Requirement::Relation(relation.to_string()));
            }
        }
        Self { items }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Requirement> {
        self.items.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Requirements no supporting evidence item covers.
    pub fn missing(&self, evidence: &[EvidenceItem]) -> Vec<Requirement> {
        self.items
            .iter()
            .filter(|req| !evidence.iter().filter(|e| supports(e)).any(|e| req.covered_by(e)))
            .cloned()
            .collect()
    }
}

/// Reflection policy knobs.
#[derive(Debug, Clone, Copy)]
pub struct ReflectionPolicy {
    pub min_evidence: usize,
    pub max_hops: usize,
}

/// Decide whether to keep retrieving.
///
/// Sufficient needs every requirement covered and at least `min_evidence`
/// supporting items (matched, not fallback, score above zero). Otherwise
/// the hop budget decides between Continue and BudgetExhausted.
pub fn reflect(
    requirements: &Requirements,
    evidence: &[EvidenceItem],
    hop_count: usize,
    policy: ReflectionPolicy,
) -> (Verdict, Vec<Requirement>) {
    let missing = requirements.missing(evidence);
    let supporting = evidence.iter().filter(|e| supports(e)).count();

    let verdict = if missing.is_empty() && supporting >= policy.min_evidence {
        Verdict::Sufficient
    } else if hop_count >= policy.max_hops {
        Verdict::BudgetExhausted
    } else {
        Verdict::Continue
    };
    (verdict, missing)
}
