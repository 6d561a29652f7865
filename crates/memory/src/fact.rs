//! C5 — fact store: TTL'd key/value facts per topic with confidence.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub key: String,
    pub value: String,
    pub confidence: f32,
    pub source: String,
    pub created_at: DateTime<Utc>,
    /// Facts sourced from outside the conversation get a shorter,
    /// divide-by-1.5'd TTL under the decay engine (spec §4.10).
    pub external: bool,
    expires_at: DateTime<Utc>,
}

pub struct FactStore {
    default_ttl: Duration,
    topics: HashMap<String, HashMap<String, Fact>>,
}

impl FactStore {
    pub fn new(default_ttl_secs: u64) -> Self {
        Self { default_ttl: Duration::seconds(default_ttl_secs as i64), topics: HashMap::new() }
    }

    /// Overwrite replaces value (spec §4.3: "overwrite replaces value").
    pub fn set(&mut self, topic: &str, key: impl Into<String>, value: impl Into<String>, confidence: f32, source: impl Into<String>, external: bool) {
        let fact = Fact {
            key: key.into(),
            value: value.into(),
            confidence: confidence.clamp(0.0, 1.0),
            source: source.into(),
            created_at: Utc::now(),
            external,
            expires_at: Utc::now() + self.default_ttl,
        };
        self.topics.entry(topic.to_string()).or_default().insert(fact.key.clone(), fact);
    }

    pub fn get(&self, topic: &str, key: &str) -> Option<&Fact> {
        self.topics.get(topic).and_then(|t| t.get(key))
    }

    pub fn all(&self, topic: &str) -> Vec<&Fact> {
        self.topics.get(topic).map(|t| t.values().collect()).unwrap_or_default()
    }

    /// Formatted "K: V (confidence)" projection for prompt assembly
    /// (spec §4.3).
    pub fn formatted(&self, topic: &str) -> Vec<String> {
        self.all(topic)
            .into_iter()
            .map(|f| format!("{}: {} ({:.2})", f.key, f.value, f.confidence))
            .collect()
    }

    /// Divides external-tagged facts' remaining TTL by `divisor`, floored
    /// at `floor_secs` — the decay engine's external-knowledge TTL rule.
    pub fn apply_external_ttl_decay(&mut self, divisor: f32, floor_secs: u64, now: DateTime<Utc>) {
        let floor = Duration::seconds(floor_secs as i64);
        for facts in self.topics.values_mut() {
            for fact in facts.values_mut() {
                if !fact.external {
                    continue;
                }
                let remaining = fact.expires_at - now;
                let scaled = Duration::milliseconds((remaining.num_milliseconds() as f32 / divisor) as i64);
                fact.expires_at = now + scaled.max(floor);
            }
        }
    }

    pub fn prune_expired(&mut self, now: DateTime<Utc>) {
        for facts in self.topics.values_mut() {
            facts.retain(|_, f| f.expires_at > now);
        }
        self.topics.retain(|_, t| !t.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrite_replaces_value() {
        let mut store = FactStore::new(86_400);
        store.set("general", "favorite_color", "blue", 0.9, "chunker", false);
        store.set("general", "favorite_color", "green", 0.9, "chunker", false);
        assert_eq!(store.get("general", "favorite_color").unwrap().value, "green");
    }

    #[test]
    fn formatted_projection_matches_spec_shape() {
        let mut store = FactStore::new(86_400);
        store.set("general", "timezone", "UTC", 0.8, "user", false);
        let lines = store.formatted("general");
        assert_eq!(lines, vec!["timezone: UTC (0.80)".to_string()]);
    }

    #[test]
    fn external_ttl_divides_and_floors() {
        let mut store = FactStore::new(1000);
        store.set("general", "weather", "sunny", 0.5, "api", true);
        let now = Utc::now();
        store.apply_external_ttl_decay(1.5, 60, now);
        let remaining = store.get("general", "weather").unwrap().expires_at - now;
        assert!(remaining.num_seconds() >= 60);
    }
}
