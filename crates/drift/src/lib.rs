//! C24 — the autonomous action engine: the periodic drift tick that
//! synthesizes a thought from the semantic lattice and arbitrates it
//! against a fixed registry of actions (spec §4.11).
//!
//! Each action lives in its own module under `actions/` and implements
//! [`Action`] for registry uniformity, but COMMUNICATE and SUGGEST need
//! inputs the bare trait can't carry (a candidate queue's self-calibration
//! history, the trait pool), so [`DriftEngine::decide_and_execute`] drives
//! those two through their dedicated `evaluate` methods instead. Grounded
//! on `autonomous_actions/decision_router.py`'s "collect (score, eligible)
//! from every action, highest score wins, ties by priority" loop.

pub mod action;
pub mod actions;
pub mod context;
pub mod engagement;
pub mod quiet_hours;
pub mod spark;
pub mod thought;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cortex_events::{OutboundBus, OutboundFrame, OutboundFrameType};
use cortex_memory::{Embedding, EpisodicStore, SemanticStore};
use rand::Rng;
use rand::seq::SliceRandom;
use tokio::sync::{Mutex, watch};
use tracing::info;

pub use action::{Action, ActionResult, Outcome};
use actions::communicate::{CommunicateAction, CommunicateInputs};
use actions::nothing::NothingAction;
use actions::nurture::NurtureAction;
use actions::plan::PlanAction;
use actions::reflect::ReflectAction;
use actions::seed_thread::SeedThreadAction;
use actions::suggest::{ConfidentTrait, SuggestAction, SuggestInputs};
pub use context::DriftContext;
pub use engagement::EngagementTracker;
pub use spark::{SparkPhase, SparkState};
pub use thought::{ActivatedConcept, GroundingEpisode, Thought, ThoughtType};

/// Everything [`DriftEngine::decide_and_execute`] needs beyond the
/// registered actions' own state: the extra inputs COMMUNICATE/SUGGEST
/// need that don't fit on `Thought` (self-calibration history, recent
/// message embeddings, the confident trait pool).
pub struct DriftTickInputs<'a> {
    pub recent_activation_energies: &'a [f32],
    pub recent_user_message_embeddings: &'a [(DateTime<Utc>, Embedding)],
    pub recent_working_memory_turns: &'a [String],
    pub confident_traits: &'a [ConfidentTrait],
}

/// Owned counterpart of [`DriftTickInputs`], for callers (the drift loop)
/// that have to assemble these slices fresh each tick rather than borrow
/// them from somewhere already alive for the whole function body.
#[derive(Default)]
pub struct DriftTickInputsOwned {
    pub recent_activation_energies: Vec<f32>,
    pub recent_user_message_embeddings: Vec<(DateTime<Utc>, Embedding)>,
    pub recent_working_memory_turns: Vec<String>,
    pub confident_traits: Vec<ConfidentTrait>,
}

impl DriftTickInputsOwned {
    pub fn as_refs(&self) -> DriftTickInputs<'_> {
        DriftTickInputs {
            recent_activation_energies: &self.recent_activation_energies,
            recent_user_message_embeddings: &self.recent_user_message_embeddings,
            recent_working_memory_turns: &self.recent_working_memory_turns,
            confident_traits: &self.confident_traits,
        }
    }
}

/// The ambient fields of [`DriftContext`] minus the engagement tracker
/// reference, which the drift loop borrows straight out of the
/// [`DriftEngine`] it already holds a lock on.
pub struct DriftContextFields {
    pub now: DateTime<Utc>,
    pub current_hour: u8,
    pub spark_phase: SparkPhase,
    pub last_interaction_at: Option<DateTime<Utc>>,
    pub episode_count: usize,
    pub quiet_hours_start: u8,
    pub quiet_hours_end: u8,
}

/// The outcome of one drift tick: the thought that was synthesized and
/// whichever action won arbitration.
#[derive(Debug)]
pub struct DriftTickOutcome {
    pub thought_type: ThoughtType,
    pub seed_topic: String,
    pub winner: &'static str,
    pub result: ActionResult,
}

/// Owns one instance of every registered action plus the shared
/// engagement/spark state. One `DriftEngine` per user, matching the rest
/// of the memory lattice's single-user scope (spec §1).
pub struct DriftEngine {
    pub nothing: NothingAction,
    pub reflect: ReflectAction,
    pub seed_thread: SeedThreadAction,
    pub nurture: NurtureAction,
    pub plan: PlanAction,
    pub suggest: SuggestAction,
    pub communicate: CommunicateAction,
    pub engagement: EngagementTracker,
    pub spark: SparkState,
}

impl Default for DriftEngine {
    fn default() -> Self {
        Self::new(2.5, Duration::from_secs(1800))
    }
}

impl DriftEngine {
    pub fn new(reflect_fatigue_budget: f32, reflect_fatigue_window: Duration) -> Self {
        Self {
            nothing: NothingAction,
            reflect: ReflectAction::new(reflect_fatigue_budget, reflect_fatigue_window),
            seed_thread: SeedThreadAction::new(),
            nurture: NurtureAction::new(),
            plan: PlanAction::new(),
            suggest: SuggestAction::new(),
            communicate: CommunicateAction::new(),
            engagement: EngagementTracker::default(),
            spark: SparkState::new(),
        }
    }

    /// Runs the decision-router loop for one thought: collects
    /// `(score, eligible)` from every action, executes the highest-scoring
    /// eligible one, ties broken by priority (spec §4.11/§4.12). NOTHING
    /// is always eligible at score 0 so this never fails to return a
    /// winner.
    ///
    /// Takes the ambient fields rather than a pre-built [`DriftContext`]
    /// and constructs one internally from `self.engagement` — a
    /// `DriftContext` built by the caller would hold a live borrow of
    /// `self.engagement` for the whole call, which conflicts with this
    /// method's own `&mut self`.
    pub fn decide_and_execute(
        &mut self,
        thought: &Thought,
        fields: &DriftContextFields,
        inputs: &DriftTickInputs<'_>,
    ) -> (&'static str, ActionResult) {
        let mut ctx = DriftContext {
            now: fields.now,
            current_hour: fields.current_hour,
            spark_phase: fields.spark_phase,
            last_interaction_at: fields.last_interaction_at,
            episode_count: fields.episode_count,
            quiet_hours_start: fields.quiet_hours_start,
            quiet_hours_end: fields.quiet_hours_end,
            engagement: &mut self.engagement,
        };
        let ctx = &mut ctx;

        self.communicate.record_activation_energy();

        let communicate_inputs = CommunicateInputs {
            recent_activation_energies: inputs.recent_activation_energies,
            recent_user_message_embeddings: inputs.recent_user_message_embeddings,
            recent_working_memory_turns: inputs.recent_working_memory_turns,
        };
        let suggest_inputs = SuggestInputs { traits: inputs.confident_traits, engagement_score: self.engagement.engagement_score() };

        let (communicate_score, communicate_eligible) = self.communicate.evaluate(thought, ctx, &communicate_inputs);
        let (suggest_score, suggest_eligible, suggest_skill) = self.suggest.evaluate(thought, ctx, &suggest_inputs);
        let (reflect_score, reflect_eligible) = self.reflect.should_execute(thought, ctx);
        let (seed_score, seed_eligible) = self.seed_thread.should_execute(thought, ctx);
        let (nurture_score, nurture_eligible) = self.nurture.should_execute(thought, ctx);
        let (plan_score, plan_eligible) = self.plan.should_execute(thought, ctx);

        // (name, priority, score, eligible) — NOTHING's priority (-1) is
        // lowest so a tie with any real candidate never picks it.
        let candidates: [(&'static str, i8, f32, bool); 7] = [
            ("NOTHING", self.nothing.priority(), 0.0, true),
            ("REFLECT", self.reflect.priority(), reflect_score, reflect_eligible),
            ("SEED_THREAD", self.seed_thread.priority(), seed_score, seed_eligible),
            ("NURTURE", self.nurture.priority(), nurture_score, nurture_eligible),
            ("PLAN", self.plan.priority(), plan_score, plan_eligible),
            ("SUGGEST", self.suggest.priority(), suggest_score, suggest_eligible),
            ("COMMUNICATE", self.communicate.priority(), communicate_score, communicate_eligible),
        ];

        let winner = candidates
            .iter()
            .filter(|(_, _, _, eligible)| *eligible)
            .max_by(|a, b| a.2.partial_cmp(&b.2).unwrap().then(a.1.cmp(&b.1)))
            .map(|(name, ..)| *name)
            .unwrap_or("NOTHING");

        info!(
            winner,
            reflect_score, seed_score, nurture_score, plan_score, suggest_score, communicate_score,
            seed_topic = %thought.seed_topic,
            "drift tick: action arbitrated"
        );

        let result = match winner {
            "REFLECT" => self.reflect.execute(thought, ctx),
            "SEED_THREAD" => self.seed_thread.execute(thought, ctx),
            "NURTURE" => self.nurture.execute(thought, ctx),
            "PLAN" => self.plan.execute(thought, ctx),
            "SUGGEST" => {
                let mut result = self.suggest.execute(thought, ctx);
                if let Some(skill) = suggest_skill {
                    if let Some(obj) = result.details.as_object_mut() {
                        obj.insert("skill".to_string(), serde_json::Value::String(skill.to_string()));
                    }
                }
                result
            }
            "COMMUNICATE" => self.communicate.execute(thought, ctx),
            _ => self.nothing.execute(thought, ctx),
        };

        (winner, result)
    }
}

const THOUGHT_TYPE_WEIGHTS: [(ThoughtType, u32); 4] =
    [(ThoughtType::Reflection, 40), (ThoughtType::Question, 25), (ThoughtType::Hypothesis, 25), (ThoughtType::Event, 10)];

/// Spreads activation over the semantic lattice and samples a seed
/// concept weighted by strength, producing one [`Thought`] (spec §4.11a).
/// `episodes` supplies the most recently touched episode per topic so
/// REFLECT/SEED_THREAD's episodic-similarity gates have something to
/// compare against. Returns `None` when there are no concepts yet (a
/// brand-new user with nothing to drift over).
pub fn synthesize_thought(semantic: &SemanticStore, episodes: &EpisodicStore, rng: &mut impl Rng) -> Option<Thought> {
    let concepts = semantic.all();
    if concepts.is_empty() {
        return None;
    }

    let weights: Vec<f32> = concepts.iter().map(|c| c.strength.max(0.01)).collect();
    let total: f32 = weights.iter().sum();
    let mut roll = rng.gen_range(0.0..total);
    let mut seed_idx = concepts.len() - 1;
    for (i, w) in weights.iter().enumerate() {
        if roll < *w {
            seed_idx = i;
            break;
        }
        roll -= w;
    }
    let seed = concepts[seed_idx];

    let related: Vec<ActivatedConcept> = semantic
        .relationships_for(&seed.name)
        .into_iter()
        .filter_map(|rel| {
            let other_name = if rel.from == seed.name { &rel.to } else { &rel.from };
            semantic.get(other_name)
        })
        .map(|c| ActivatedConcept { name: c.name.clone(), activation_score: c.strength })
        .collect();

    let thought_type = if related.len() >= 2 { ThoughtType::Hypothesis } else { pick_weighted_type(rng) };
    let content = render_thought_content(thought_type, &seed.name, &seed.definition, &related, rng);
    let jitter: f32 = rng.gen_range(-0.05..0.05);
    let activation_energy = (seed.strength + jitter).clamp(0.0, 1.0);

    let grounding_episode = episodes
        .by_topic(&seed.name)
        .into_iter()
        .max_by_key(|e| e.created_at)
        .map(|e| GroundingEpisode { topic: e.topic.clone(), embedding: Some(e.embedding.clone()) });

    let mut thought = Thought::new(thought_type, content, activation_energy, seed.name.clone(), seed.name.clone());
    thought.embedding = Some(seed.embedding.clone());
    thought.grounding_episode = grounding_episode;
    thought.activated_concepts = related;
    Some(thought)
}

fn pick_weighted_type(rng: &mut impl Rng) -> ThoughtType {
    let total: u32 = THOUGHT_TYPE_WEIGHTS.iter().map(|(_, w)| w).sum();
    let mut roll = rng.gen_range(0..total);
    for (thought_type, weight) in THOUGHT_TYPE_WEIGHTS {
        if roll < weight {
            return thought_type;
        }
        roll -= weight;
    }
    ThoughtType::Reflection
}

fn render_thought_content(thought_type: ThoughtType, name: &str, definition: &str, related: &[ActivatedConcept], rng: &mut impl Rng) -> String {
    match thought_type {
        ThoughtType::Reflection => format!("Still turning over {name}: {definition}"),
        ThoughtType::Question => format!("I wonder what else connects to {name}."),
        ThoughtType::Hypothesis => {
            let partner = related.choose(rng).map(|c| c.name.as_str()).unwrap_or(name);
            format!("Maybe {name} and {partner} are more connected than they look.")
        }
        ThoughtType::Event => format!("Something about {name} feels worth a closer look."),
    }
}

/// Runs one full drift tick against the shared stores (spec §4.11):
/// synthesize a thought, arbitrate it, and publish a `drift` frame on the
/// outbound channel when the winner produced user-visible content.
pub fn run_drift_tick(
    engine: &mut DriftEngine,
    semantic: &SemanticStore,
    episodes: &EpisodicStore,
    fields: &DriftContextFields,
    inputs: &DriftTickInputs<'_>,
    outbound: &OutboundBus,
    rng: &mut impl Rng,
) -> Option<DriftTickOutcome> {
    let thought = synthesize_thought(semantic, episodes, rng)?;
    let (winner, result) = engine.decide_and_execute(&thought, fields, inputs);

    if matches!(winner, "COMMUNICATE" | "NURTURE" | "SUGGEST") && result.success {
        outbound.publish(OutboundFrame::new(OutboundFrameType::Drift, thought.seed_topic.clone(), thought.content.clone()));
    }

    Some(DriftTickOutcome { thought_type: thought.thought_type, seed_topic: thought.seed_topic.clone(), winner, result })
}

/// State a long-running drift loop needs exclusive access to, mirroring
/// `cortex_decay::DecayState`'s mutex-guarded bundle shape.
pub struct DriftState {
    pub engine: Mutex<DriftEngine>,
    pub semantic: Arc<Mutex<SemanticStore>>,
    pub episodes: Arc<Mutex<EpisodicStore>>,
}

/// Runs `run_drift_tick` on a fixed interval until `shutdown_rx` fires.
/// `build_ctx_fields`/`build_inputs` are called fresh each tick so the
/// caller can pull the ambient fields (spark phase, last interaction,
/// quiet hours) and tick-only inputs from wherever it owns that state —
/// typically `cortex-runtime`'s app state.
pub async fn run_drift_loop<FC, FI>(
    state: Arc<DriftState>,
    outbound: OutboundBus,
    tick_interval_secs: u64,
    mut build_ctx_fields: FC,
    mut build_inputs: FI,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    FC: FnMut() -> DriftContextFields + Send,
    FI: FnMut() -> DriftTickInputsOwned + Send,
{
    let mut interval = tokio::time::interval(Duration::from_secs(tick_interval_secs));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let fields = build_ctx_fields();
                let owned_inputs = build_inputs();
                let mut engine = state.engine.lock().await;
                let semantic = state.semantic.lock().await;
                let episodes = state.episodes.lock().await;

                // Created fresh per tick, never held across an `.await`,
                // so the loop's future stays `Send` despite `ThreadRng`
                // itself not being one.
                let mut rng = rand::thread_rng();
                let inputs = owned_inputs.as_refs();
                if let Some(outcome) = run_drift_tick(&mut engine, &semantic, &episodes, &fields, &inputs, &outbound, &mut rng) {
                    info!(winner = outcome.winner, thought_type = ?outcome.thought_type, topic = %outcome.seed_topic, "drift tick complete");
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_ok() && *shutdown_rx.borrow() {
                    info!("drift loop shutting down");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_semantic() -> SemanticStore {
        let mut store = SemanticStore::new();
        store.upsert("travel", "exploring new places", 0.9, 0.3, vec![1.0, 0.0]);
        store.upsert("lisbon", "a city in portugal", 0.8, 0.3, vec![0.9, 0.1]);
        store.link("travel", "lisbon", "related_to");
        store
    }

    #[test]
    fn synthesize_thought_returns_none_with_no_concepts() {
        let semantic = SemanticStore::new();
        let episodes = EpisodicStore::new();
        let mut rng = rand::thread_rng();
        assert!(synthesize_thought(&semantic, &episodes, &mut rng).is_none());
    }

    #[test]
    fn synthesize_thought_picks_a_seeded_concept() {
        let semantic = seeded_semantic();
        let episodes = EpisodicStore::new();
        let mut rng = rand::thread_rng();
        let thought = synthesize_thought(&semantic, &episodes, &mut rng).unwrap();
        assert!(["travel", "lisbon"].contains(&thought.seed_topic.as_str()));
        assert!((0.0..=1.0).contains(&thought.activation_energy));
    }

    fn default_fields() -> DriftContextFields {
        let now = Utc::now();
        DriftContextFields {
            now,
            current_hour: 14,
            spark_phase: SparkPhase::Connected,
            last_interaction_at: Some(now),
            episode_count: 1,
            quiet_hours_start: 23,
            quiet_hours_end: 8,
        }
    }

    #[test]
    fn decide_and_execute_falls_back_to_nothing_when_nothing_else_eligible() {
        let mut engine = DriftEngine::default();
        let mut fields = default_fields();
        fields.last_interaction_at = None; // blocks NURTURE/COMMUNICATE timing
        let thought = Thought::new(ThoughtType::Reflection, "a quiet thought", 0.05, "x", "x");
        let traits: Vec<ConfidentTrait> = vec![];
        let inputs = DriftTickInputs {
            recent_activation_energies: &[],
            recent_user_message_embeddings: &[],
            recent_working_memory_turns: &[],
            confident_traits: &traits,
        };
        let (winner, result) = engine.decide_and_execute(&thought, &fields, &inputs);
        assert_eq!(winner, "NOTHING");
        assert!(result.success);
    }

    #[test]
    fn reflect_wins_when_eligible_and_nothing_else_is() {
        let mut engine = DriftEngine::default();
        let mut fields = default_fields();
        fields.last_interaction_at = None;
        let mut thought = Thought::new(ThoughtType::Reflection, "a grounded thought", 0.9, "coffee", "mornings");
        thought.embedding = Some(vec![1.0, 0.0]);
        thought.activated_concepts = vec![ActivatedConcept { name: "coffee".into(), activation_score: 0.6 }];
        let traits: Vec<ConfidentTrait> = vec![];
        let inputs = DriftTickInputs {
            recent_activation_energies: &[],
            recent_user_message_embeddings: &[],
            recent_working_memory_turns: &[],
            confident_traits: &traits,
        };
        let (winner, _) = engine.decide_and_execute(&thought, &fields, &inputs);
        assert_eq!(winner, "REFLECT");
    }
}
