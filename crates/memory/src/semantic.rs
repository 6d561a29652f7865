//! C7 — semantic store: concepts and relationships extracted from batches
//! of episodes (spec §3 "Semantic concept", §4.10 semantic strength decay).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::embedding::Embedding;

const STRENGTH_FLOOR: f32 = 0.2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticConcept {
    pub name: String,
    pub definition: String,
    /// `[0.2, 1]` floor-enforced strength.
    pub strength: f32,
    pub decay_resistance: f32,
    pub access_count: u64,
    pub last_accessed_at: DateTime<Utc>,
    pub embedding: Embedding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticRelationship {
    pub from: String,
    pub to: String,
    pub kind: String,
}

pub struct SemanticStore {
    concepts: HashMap<String, SemanticConcept>,
    relationships: Vec<SemanticRelationship>,
}

impl Default for SemanticStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SemanticStore {
    pub fn new() -> Self {
        Self { concepts: HashMap::new(), relationships: Vec::new() }
    }

    /// Creates a new concept or merges into an existing one by name —
    /// batch consolidation's write path (spec §4.1 C7, §3 invariant).
    pub fn upsert(&mut self, name: impl Into<String>, definition: impl Into<String>, strength: f32, decay_resistance: f32, embedding: Embedding) {
        let name = name.into();
        match self.concepts.get_mut(&name) {
            Some(existing) => {
                existing.strength = (existing.strength + strength).clamp(STRENGTH_FLOOR, 1.0);
                existing.decay_resistance = decay_resistance;
                if !embedding.is_empty() {
                    existing.embedding = embedding;
                }
                existing.definition = definition.into();
            }
            None => {
                self.concepts.insert(
                    name.clone(),
                    SemanticConcept {
                        name,
                        definition: definition.into(),
                        strength: strength.clamp(STRENGTH_FLOOR, 1.0),
                        decay_resistance,
                        access_count: 0,
                        last_accessed_at: Utc::now(),
                        embedding,
                    },
                );
            }
        }
    }

    pub fn link(&mut self, from: impl Into<String>, to: impl Into<String>, kind: impl Into<String>) {
        self.relationships.push(SemanticRelationship { from: from.into(), to: to.into(), kind: kind.into() });
    }

    pub fn touch(&mut self, name: &str) {
        if let Some(c) = self.concepts.get_mut(name) {
            c.access_count += 1;
            c.last_accessed_at = Utc::now();
        }
    }

    pub fn get(&self, name: &str) -> Option<&SemanticConcept> {
        self.concepts.get(name)
    }

    pub fn all(&self) -> Vec<&SemanticConcept> {
        self.concepts.values().collect()
    }

    pub fn relationships_for(&self, name: &str) -> Vec<&SemanticRelationship> {
        self.relationships.iter().filter(|r| r.from == name || r.to == name).collect()
    }

    /// Linear strength decay with a 0.2 floor (spec §4.10).
    pub fn decay_pass(&mut self, rate: f32, now: DateTime<Utc>, stale_after_hours: i64) {
        for concept in self.concepts.values_mut() {
            let idle_hours = (now - concept.last_accessed_at).num_hours();
            if idle_hours < stale_after_hours {
                continue;
            }
            concept.strength = (concept.strength - rate * (1.0 - concept.decay_resistance)).max(STRENGTH_FLOOR);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strength_never_drops_below_floor() {
        let mut store = SemanticStore::new();
        store.upsert("coffee", "a beverage", 0.21, 0.0, vec![]);
        let old = Utc::now() + chrono::Duration::days(3650);
        for _ in 0..50 {
            store.decay_pass(0.03, old, 0);
        }
        assert!(store.get("coffee").unwrap().strength >= STRENGTH_FLOOR);
    }

    #[test]
    fn upsert_merges_existing_concept() {
        let mut store = SemanticStore::new();
        store.upsert("coffee", "a beverage", 0.5, 0.1, vec![]);
        store.upsert("coffee", "dark roast beverage", 0.3, 0.1, vec![]);
        let concept = store.get("coffee").unwrap();
        assert_eq!(concept.definition, "dark roast beverage");
        assert!(concept.strength <= 1.0);
    }
}
