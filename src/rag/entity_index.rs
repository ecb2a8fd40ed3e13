//! Entity Index
//!
//! Normalized registry mapping entity surface forms (names and aliases) to
//! canonical entity ids, plus the relationship-type vocabulary of the graph.

use crate::domain::{Entity, GraphSnapshot};
use crate::error::EntityIndexError;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Normalize a surface form: lowercase, punctuation to spaces, collapsed whitespace.
///
/// `"Amyloid-beta"` and `"amyloid  beta"` both normalize to `"amyloid beta"`.
pub fn normalize(surface: &str) -> String {
    surface
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Surface form → canonical id registry.
#[derive(Debug, Clone, Default)]
pub struct EntityIndex {
    entities: HashMap<String, Entity>,
    surfaces: HashMap<String, String>,
    relation_types: BTreeSet<String>,
    longest_surface: usize,
}

impl EntityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a graph snapshot, registering every entity and relation type.
    pub fn from_snapshot(snapshot: &GraphSnapshot) -> Result<Self, EntityIndexError> {
        let mut index = Self::new();
        for entity in &snapshot.entities {
            index.register(entity.clone())?;
        }
        for rel in &snapshot.relationships {
            index.register_relation_type(&rel.relation_type);
        }
        tracing::debug!(
            entities = index.len(),
            surfaces = index.surfaces.len(),
            relation_types = index.relation_types.len(),
            "Entity index built"
        );
        Ok(index)
    }

    /// Register an entity under its name and aliases.
    ///
    /// Re-registering the same id replaces it. A surface form that already
    /// resolves to a different id is rejected and nothing is changed.
    pub fn register(&mut self, entity: Entity) -> Result<(), EntityIndexError> {
        if entity.id.trim().is_empty() {
            return Err(EntityIndexError::EmptyId);
        }

        let surfaces: HashSet<String> = std::iter::once(entity.name.as_str())
            .chain(entity.aliases.iter().map(String::as_str))
            .map(normalize)
            .filter(|s| !s.is_empty())
            .collect();

        for surface in &surfaces {
            if let Some(existing) = self.surfaces.get(surface) {
                if existing != &entity.id {
                    return Err(EntityIndexError::AliasConflict {
                        alias: surface.clone(),
                        existing: existing.clone(),
                        incoming: entity.id.clone(),
                    });
                }
            }
        }

        // Drop surfaces of a previous version of this entity.
        self.surfaces.retain(|_, id| id != &entity.id);
        for surface in surfaces {
            self.longest_surface = self.longest_surface.max(surface.split(' ').count());
            self.surfaces.insert(surface, entity.id.clone());
        }
        self.entities.insert(entity.id.clone(), entity);
        Ok(())
    }

    pub fn register_relation_type(&mut self, relation_type: &str) {
        if !relation_type.trim().is_empty() {
            self.relation_types.insert(relation_type.to_string());
        }
    }

    /// Entity a surface form resolves to.
    pub fn resolve(&self, surface: &str) -> Option<&Entity> {
        self.surfaces
            .get(&normalize(surface))
            .and_then(|id| self.entities.get(id))
    }

    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Entities mentioned in free text, in order of first appearance.
    ///
    /// Greedy longest match over normalized tokens, so "drug x" wins over "x".
    pub fn find_mentions(&self, text: &str) -> Vec<&Entity> {
        let normalized = normalize(text);
        let tokens: Vec<&str> = normalized.split(' ').filter(|t| !t.is_empty()).collect();
        let mut seen = HashSet::new();
        let mut found = Vec::new();

        let mut i = 0;
        while i < tokens.len() {
            let longest = self.longest_surface.min(tokens.len() - i);
            let mut matched = 0;
            for n in (1..=longest).rev() {
                let phrase = tokens[i..i + n].join(" ");
                if let Some(entity) = self.surfaces.get(&phrase).and_then(|id| self.entities.get(id)) {
                    if seen.insert(entity.id.as_str()) {
                        found.push(entity);
                    }
                    matched = n;
                    break;
                }
            }
            i += matched.max(1);
        }
        found
    }

    /// Relationship types present in the graph.
    pub fn relation_types(&self) -> impl Iterator<Item = &str> {
        self.relation_types.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntityType, Relationship};

    fn index() -> EntityIndex {
        let snapshot = GraphSnapshot {
            entities: vec![
                Entity::new("drug_x", "Drug X", EntityType::Drug).with_alias("DX-101"),
                Entity::new("x", "X", EntityType::Other),
                Entity::new("abeta", "Amyloid-beta", EntityType::GeneProtein).with_alias("Aβ"),
            ],
            relationships: vec![Relationship::new("drug_x", "INHIBITS", "abeta")],
        };
        EntityIndex::from_snapshot(&snapshot).unwrap()
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Amyloid-beta "), "amyloid beta");
        assert_eq!(normalize("IL_6"), "il 6");
        assert_eq!(normalize("?!"), "");
    }

    #[test]
    fn test_resolve_aliases() {
        let idx = index();
        assert_eq!(idx.resolve("dx 101").map(|e| e.id.as_str()), Some("drug_x"));
        assert_eq!(idx.resolve("AMYLOID BETA").map(|e| e.id.as_str()), Some("abeta"));
        assert_eq!(idx.resolve("aβ").map(|e| e.id.as_str()), Some("abeta"));
        assert!(idx.resolve("aspirin").is_none());
    }

    #[test]
    fn test_find_mentions_prefers_longest() {
        let idx = index();
        let found: Vec<_> = idx
            .find_mentions("What does Drug X do to amyloid-beta?")
            .iter()
            .map(|e| e.id.clone())
            .collect();
        assert_eq!(found, vec!["drug_x".to_string(), "abeta".to_string()]);
    }

    #[test]
    fn test_alias_conflict_is_rejected() {
        let mut idx = index();
        let err = idx
            .register(Entity::new("other", "Other", EntityType::Drug).with_alias("Drug X"))
            .unwrap_err();
        assert!(matches!(err, EntityIndexError::AliasConflict { ref existing, .. } if existing == "drug_x"));
        assert!(idx.get("other").is_none());
    }

    #[test]
    fn test_reregister_replaces_surfaces() {
        let mut idx = index();
        idx.register(Entity::new("drug_x", "Drug X Prime", EntityType::Drug))
            .unwrap();
        assert!(idx.resolve("DX-101").is_none());
        assert_eq!(idx.resolve("drug x prime").map(|e| e.id.as_str()), Some("drug_x"));
    }

    #[test]
    fn test_relation_vocabulary() {
        let idx = index();
        assert_eq!(idx.relation_types().collect::<Vec<_>>(), vec!["INHIBITS"]);
    }
}
