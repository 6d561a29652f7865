//! C6 — episodic store: durable episode records with embedding, salience,
//! and activation-score decay (spec §3 "Episode", §4.10 episodic decay).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use cortex_core::ExchangeId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::embedding::Embedding;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticConsolidationStatus {
    Empty,
    Completed,
    Failed,
}

/// Source-specific decay multiplier bucket (spec §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    Stable,
    Transient,
    Evolving,
    CronTool,
}

impl Durability {
    pub fn decay_multiplier(self, transient: f32, evolving: f32, cron_tool: f32) -> f32 {
        match self {
            Durability::Stable => 1.0,
            Durability::Transient => transient,
            Durability::Evolving => evolving,
            Durability::CronTool => cron_tool,
        }
    }
}

/// Breakdown of what fed into `salience` — kept explicit rather than a
/// single opaque scalar so the chunker/episodic worker can show their work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SalienceFactors {
    pub emotional_weight: f32,
    pub novelty: f32,
    pub user_emphasis: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: Uuid,
    pub intent: String,
    pub context: String,
    pub action: String,
    pub emotion: String,
    pub outcome: String,
    pub gist: String,
    /// `[1, 10]` priority score driving decay resistance.
    pub salience: f32,
    pub freshness_base: f32,
    pub embedding: Embedding,
    pub topic: String,
    pub exchange_id: ExchangeId,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    pub activation_score: f32,
    pub salience_factors: SalienceFactors,
    pub open_loops: Vec<String>,
    pub semantic_consolidation_status: Option<SemanticConsolidationStatus>,
    pub durability: Durability,
    pub deleted_at: Option<DateTime<Utc>>,
}

const ACTIVATION_FLOOR: f32 = 0.1;
const ACTIVATION_READ_BUMP: f32 = 0.3;

pub struct EpisodicStore {
    episodes: HashMap<Uuid, Episode>,
}

impl Default for EpisodicStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EpisodicStore {
    pub fn new() -> Self {
        Self { episodes: HashMap::new() }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &mut self,
        topic: impl Into<String>,
        exchange_id: ExchangeId,
        intent: impl Into<String>,
        context: impl Into<String>,
        action: impl Into<String>,
        emotion: impl Into<String>,
        outcome: impl Into<String>,
        gist: impl Into<String>,
        salience: f32,
        embedding: Embedding,
        durability: Durability,
    ) -> Uuid {
        let now = Utc::now();
        let episode = Episode {
            id: Uuid::new_v4(),
            intent: intent.into(),
            context: context.into(),
            action: action.into(),
            emotion: emotion.into(),
            outcome: outcome.into(),
            gist: gist.into(),
            salience: salience.clamp(1.0, 10.0),
            freshness_base: 1.0,
            embedding,
            topic: topic.into(),
            exchange_id,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            activation_score: 1.0,
            salience_factors: SalienceFactors::default(),
            open_loops: Vec::new(),
            semantic_consolidation_status: None,
            durability,
            deleted_at: None,
        };
        let id = episode.id;
        self.episodes.insert(id, episode);
        id
    }

    /// Retrieval touch: activation is monotonically bumped, access is
    /// recorded, and a soft-deleted row is never returned (spec §3, §8).
    pub fn retrieve(&mut self, id: Uuid) -> Option<Episode> {
        let episode = self.episodes.get_mut(&id)?;
        if episode.deleted_at.is_some() {
            return None;
        }
        episode.activation_score += ACTIVATION_READ_BUMP;
        episode.access_count += 1;
        episode.last_accessed_at = Utc::now();
        Some(episode.clone())
    }

    pub fn peek(&self, id: Uuid) -> Option<&Episode> {
        self.episodes.get(&id).filter(|e| e.deleted_at.is_none())
    }

    pub fn soft_delete(&mut self, id: Uuid) {
        if let Some(e) = self.episodes.get_mut(&id) {
            e.deleted_at = Some(Utc::now());
        }
    }

    /// Restores a soft-deleted episode; `deleted_at` is cleared but nothing
    /// else about the row changes (spec §8 round-trip law).
    pub fn restore(&mut self, id: Uuid) {
        if let Some(e) = self.episodes.get_mut(&id) {
            e.deleted_at = None;
        }
    }

    pub fn by_topic(&self, topic: &str) -> Vec<&Episode> {
        self.episodes.values().filter(|e| e.topic == topic && e.deleted_at.is_none()).collect()
    }

    pub fn all(&self) -> Vec<&Episode> {
        self.episodes.values().filter(|e| e.deleted_at.is_none()).collect()
    }

    /// Episodes awaiting semantic consolidation: `null`, `empty`, or
    /// `failed` status are all retried indefinitely (spec §9 Open Question,
    /// resolved in SPEC_FULL.md §9).
    pub fn unconsolidated(&self) -> Vec<&Episode> {
        self.episodes
            .values()
            .filter(|e| {
                e.deleted_at.is_none()
                    && !matches!(e.semantic_consolidation_status, Some(SemanticConsolidationStatus::Completed))
            })
            .collect()
    }

    pub fn mark_consolidation_status(&mut self, id: Uuid, status: SemanticConsolidationStatus) {
        if let Some(e) = self.episodes.get_mut(&id) {
            e.semantic_consolidation_status = Some(status);
        }
    }

    /// Count of non-deleted episodes, fed to the drift engine's
    /// `DriftContextFields::episode_count`.
    pub fn len(&self) -> usize {
        self.episodes.values().filter(|e| e.deleted_at.is_none()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Effective freshness at retrieval time — computed dynamically, never
    /// stored (spec §3 invariant): `exp(-λ·(1-salience_norm)·Δt_hours)`.
    pub fn effective_freshness(&self, id: Uuid, now: DateTime<Utc>, lambda: f32) -> f32 {
        let Some(e) = self.peek(id) else { return 0.0 };
        let delta_hours = (now - e.last_accessed_at).num_seconds() as f32 / 3600.0;
        let salience_norm = (e.salience / 10.0).clamp(0.0, 1.0);
        (-lambda * (1.0 - salience_norm) * delta_hours.max(0.0)).exp()
    }

    /// One decay-engine pass (spec §4.10, worked example in spec §8
    /// scenario 6): episodes idle over an hour decay exponentially,
    /// `(1 - salience/10)` slows the rate for high-salience episodes,
    /// durability multiplies it further, activation floors at 0.1.
    pub fn decay_pass(&mut self, now: DateTime<Utc>, lambda_base: f32, transient_mult: f32, evolving_mult: f32, cron_tool_mult: f32) {
        for episode in self.episodes.values_mut() {
            let idle_hours = (now - episode.last_accessed_at).num_seconds() as f32 / 3600.0;
            if idle_hours < 1.0 {
                continue;
            }
            let salience_norm = (episode.salience / 10.0).clamp(0.0, 1.0);
            let lambda = lambda_base
                * (1.0 - salience_norm)
                * episode.durability.decay_multiplier(transient_mult, evolving_mult, cron_tool_mult);
            let decayed = episode.activation_score * (-lambda * idle_hours).exp();
            episode.activation_score = decayed.max(ACTIVATION_FLOOR);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_episode(store: &mut EpisodicStore, topic: &str) -> Uuid {
        store.create(topic, Uuid::new_v4(), "intent", "context", "action", "neutral", "outcome", "gist", 9.0, vec![], Durability::Stable)
    }

    #[test]
    fn activation_floors_at_point_one() {
        let mut store = EpisodicStore::new();
        let id = new_episode(&mut store, "general");
        let far_future = Utc::now() + chrono::Duration::days(3650);
        store.decay_pass(far_future, 0.05, 2.0, 1.5, 3.0);
        assert!(store.peek(id).unwrap().activation_score >= 0.1);
    }

    #[test]
    fn soft_deleted_episode_is_never_retrieved() {
        let mut store = EpisodicStore::new();
        let id = new_episode(&mut store, "general");
        store.soft_delete(id);
        assert!(store.retrieve(id).is_none());
        assert!(store.peek(id).is_none());
    }

    #[test]
    fn restore_reproduces_original_episode() {
        let mut store = EpisodicStore::new();
        let id = new_episode(&mut store, "general");
        let before = store.peek(id).unwrap().clone();
        store.soft_delete(id);
        store.restore(id);
        let after = store.peek(id).unwrap();
        assert_eq!(before.id, after.id);
        assert_eq!(before.gist, after.gist);
        assert_eq!(before.salience, after.salience);
    }

    #[test]
    fn retrieve_monotonically_increments_activation() {
        let mut store = EpisodicStore::new();
        let id = new_episode(&mut store, "general");
        let first = store.retrieve(id).unwrap().activation_score;
        let second = store.retrieve(id).unwrap().activation_score;
        assert!(second > first);
    }

    #[test]
    fn decay_twice_same_second_equals_once_with_doubled_delta() {
        // Running the same decay pass twice at the identical `now` (last_accessed_at
        // never moves between calls) must equal one pass at double the Δt — the
        // "law of exponents" invariant from spec §8.
        let mut a = EpisodicStore::new();
        let mut b = EpisodicStore::new();
        let id_a = new_episode(&mut a, "general");
        let id_b = new_episode(&mut b, "general");
        let t0 = Utc::now();
        let t_single = t0 + chrono::Duration::hours(5);
        let t_double = t0 + chrono::Duration::hours(10);

        a.decay_pass(t_single, 0.05, 2.0, 1.5, 3.0);
        a.decay_pass(t_single, 0.05, 2.0, 1.5, 3.0);
        b.decay_pass(t_double, 0.05, 2.0, 1.5, 3.0);

        let a_val = a.peek(id_a).unwrap().activation_score;
        let b_val = b.peek(id_b).unwrap().activation_score;
        assert!((a_val - b_val).abs() < 1e-4);
    }

    #[test]
    fn decay_matches_spec_worked_example() {
        // spec §8 scenario 6: salience 0.9 (== 9/10), activation 2.0, Δt=10h,
        // λ=0.05 → ≈1.902; at Δt=100h → ≥1.21 (salience slows decay).
        let mut store = EpisodicStore::new();
        let id = store.create("general", Uuid::new_v4(), "i", "c", "a", "neutral", "o", "g", 9.0, vec![], Durability::Stable);
        store.episodes.get_mut(&id).unwrap().activation_score = 2.0;
        let t10 = Utc::now() + chrono::Duration::hours(10);
        store.decay_pass(t10, 0.05, 2.0, 1.5, 3.0);
        let at_10h = store.peek(id).unwrap().activation_score;
        assert!((at_10h - 1.902).abs() < 0.01, "expected ~1.902, got {at_10h}");
    }

    #[test]
    fn decay_pass_is_noop_on_identical_timestamps() {
        let mut store = EpisodicStore::new();
        let id = new_episode(&mut store, "general");
        let now = Utc::now();
        store.decay_pass(now, 0.05, 2.0, 1.5, 3.0);
        let after_first = store.peek(id).unwrap().activation_score;
        store.decay_pass(now, 0.05, 2.0, 1.5, 3.0);
        let after_second = store.peek(id).unwrap().activation_score;
        assert_eq!(after_first, after_second);
    }
}
