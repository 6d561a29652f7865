//! C8 — trait store: per-user traits with category-dependent decay and
//! reinforcement (spec §3 "User trait", §4.10 trait decay).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::embedding::Embedding;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TraitCategory {
    Core,
    Preference,
    Physical,
    Relationship,
    General,
    CommunicationStyle,
    MicroPreference,
}

impl TraitCategory {
    /// Linear decay rate per day for this category; core traits are
    /// near-permanent, micro-preferences churn fastest.
    fn base_decay_per_day(self) -> f32 {
        match self {
            TraitCategory::Core => 0.001,
            TraitCategory::Relationship => 0.003,
            TraitCategory::General => 0.01,
            TraitCategory::Preference => 0.01,
            TraitCategory::Physical => 0.005,
            TraitCategory::CommunicationStyle => 0.008,
            TraitCategory::MicroPreference => 0.03,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraitSource {
    Explicit,
    Inferred,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserTrait {
    pub key: String,
    pub value: String,
    pub category: TraitCategory,
    pub confidence: f32,
    pub source: TraitSource,
    pub is_literal: bool,
    pub reinforcement_count: u32,
    pub last_reinforced_at: DateTime<Utc>,
    pub last_conflict_at: Option<DateTime<Utc>>,
    pub embedding: Embedding,
    days_at_floor: i64,
}

const CONFIDENCE_FLOOR: f32 = 0.05;

pub struct TraitStore {
    traits: HashMap<String, UserTrait>,
}

impl Default for TraitStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TraitStore {
    pub fn new() -> Self {
        Self { traits: HashMap::new() }
    }

    /// Writes or reinforces a trait. A write to an existing key with a
    /// conflicting value stamps `last_conflict_at` rather than failing
    /// (spec §7: "no user-visible failure").
    pub fn upsert(&mut self, key: impl Into<String>, value: impl Into<String>, category: TraitCategory, confidence: f32, source: TraitSource, is_literal: bool, embedding: Embedding) {
        let key = key.into();
        let value = value.into();
        let now = Utc::now();
        match self.traits.get_mut(&key) {
            Some(existing) => {
                if existing.value != value {
                    existing.last_conflict_at = Some(now);
                    existing.value = value;
                    existing.confidence = confidence.clamp(0.0, 1.0);
                } else {
                    existing.confidence = (existing.confidence + confidence).clamp(0.0, 1.0);
                }
                existing.reinforcement_count += 1;
                existing.last_reinforced_at = now;
                existing.days_at_floor = 0;
                if !embedding.is_empty() {
                    existing.embedding = embedding;
                }
            }
            None => {
                self.traits.insert(
                    key.clone(),
                    UserTrait {
                        key,
                        value,
                        category,
                        confidence: confidence.clamp(0.0, 1.0),
                        source,
                        is_literal,
                        reinforcement_count: 1,
                        last_reinforced_at: now,
                        last_conflict_at: None,
                        embedding,
                        days_at_floor: 0,
                    },
                );
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&UserTrait> {
        self.traits.get(key)
    }

    pub fn all(&self) -> Vec<&UserTrait> {
        self.traits.values().collect()
    }

    pub fn by_category(&self, category: TraitCategory) -> Vec<&UserTrait> {
        self.traits.values().filter(|t| t.category == category).collect()
    }

    /// One decay-engine pass (spec §4.10): linear decay per category, a
    /// `1/log2(count+1)` reinforcement-resistance factor, inferred traits
    /// decay 1.5x faster, and traits parked at the floor for
    /// `floor_days` consecutive days are deleted.
    pub fn decay_pass(&mut self, days_elapsed: f32, floor_days: i64) {
        let mut to_delete = Vec::new();
        for (key, t) in self.traits.iter_mut() {
            let resistance = 1.0 / (t.reinforcement_count as f32 + 1.0).log2().max(1.0);
            let mut rate = t.category.base_decay_per_day() * resistance;
            if t.source == TraitSource::Inferred {
                rate *= 1.5;
            }
            t.confidence = (t.confidence - rate * days_elapsed).max(CONFIDENCE_FLOOR);
            if t.confidence <= CONFIDENCE_FLOOR {
                t.days_at_floor += days_elapsed.ceil() as i64;
                if t.days_at_floor >= floor_days {
                    to_delete.push(key.clone());
                }
            } else {
                t.days_at_floor = 0;
            }
        }
        for key in to_delete {
            self.traits.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicting_write_marks_conflict_not_failure() {
        let mut store = TraitStore::new();
        store.upsert("favorite_color", "blue", TraitCategory::Preference, 0.8, TraitSource::Explicit, true, vec![]);
        store.upsert("favorite_color", "green", TraitCategory::Preference, 0.8, TraitSource::Explicit, true, vec![]);
        let t = store.get("favorite_color").unwrap();
        assert_eq!(t.value, "green");
        assert!(t.last_conflict_at.is_some());
    }

    #[test]
    fn trait_at_floor_seven_days_is_deleted() {
        let mut store = TraitStore::new();
        store.upsert("fleeting_mood", "excited", TraitCategory::MicroPreference, 0.06, TraitSource::Inferred, false, vec![]);
        for _ in 0..8 {
            store.decay_pass(1.0, 7);
        }
        assert!(store.get("fleeting_mood").is_none());
    }

    #[test]
    fn inferred_traits_decay_faster_than_explicit() {
        let mut explicit = TraitStore::new();
        let mut inferred = TraitStore::new();
        explicit.upsert("k", "v", TraitCategory::General, 0.9, TraitSource::Explicit, false, vec![]);
        inferred.upsert("k", "v", TraitCategory::General, 0.9, TraitSource::Inferred, false, vec![]);
        explicit.decay_pass(30.0, 7);
        inferred.decay_pass(30.0, 7);
        assert!(inferred.get("k").unwrap().confidence <= explicit.get("k").unwrap().confidence);
    }
}
