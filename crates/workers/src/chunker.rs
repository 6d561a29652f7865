//! C17 — memory chunker: one structured-JSON LLM call per exchange, writing
//! gists/facts/traits/communication-style/identity-reinforcement signals,
//! plus two pure-regex side effects that never touch the LLM (spec §4.8).

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use std::time::Duration;

use chrono::Utc;
use cortex_core::{ExchangeId, ThreadId};
use cortex_llm::{LlmError, LlmFormat, LlmProvider};
use cortex_memory::{
    FactStore, Gist, GistStore, GistType, IdentityDimension, IdentityVectors, TraitCategory, TraitSource, TraitStore,
};
use regex::Regex;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

/// Hard ceiling on the chunker's single LLM call (spec §4.8).
pub const HARD_TIMEOUT_SECS: u64 = 300;

// ── Structured-JSON contract ─────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct GistExtract {
    pub content: String,
    #[serde(rename = "type")]
    pub gist_type: GistType,
    pub confidence: f32,
}

fn default_fact_confidence() -> f32 {
    0.5
}

#[derive(Debug, Clone, Deserialize)]
pub struct FactExtract {
    pub key: String,
    pub value: String,
    #[serde(default = "default_fact_confidence")]
    pub confidence: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserTraitExtract {
    pub key: String,
    pub value: String,
    pub category: TraitCategory,
    pub confidence: f32,
    pub source: TraitSource,
    #[serde(default)]
    pub is_literal: bool,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct EmotionScores {
    #[serde(default)]
    pub joy: f32,
    #[serde(default)]
    pub surprise: f32,
    #[serde(default)]
    pub anger: f32,
    #[serde(default)]
    pub disgust: f32,
}

/// Whose turn the chunker's "scope" block is describing, and how confident
/// it is that the emotion read is attributable to that speaker at all.
#[derive(Debug, Clone, Deserialize)]
pub struct EmotionScope {
    #[serde(default)]
    pub intent: String,
    #[serde(default = "default_scope_confidence")]
    pub confidence: f32,
    #[serde(default)]
    pub emotion: String,
}

fn default_scope_confidence() -> f32 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmotionExtract {
    #[serde(default)]
    pub user: EmotionScores,
    #[serde(default)]
    pub assistant: EmotionScores,
    pub scope: EmotionScope,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkerOutput {
    #[serde(default)]
    pub gists: Vec<GistExtract>,
    #[serde(default)]
    pub facts: Vec<FactExtract>,
    #[serde(default)]
    pub user_traits: Vec<UserTraitExtract>,
    pub communication_style: Option<HashMap<String, f32>>,
    pub emotion: Option<EmotionExtract>,
}

/// The nine named communication-style dimensions the chunker is prompted
/// for (spec §4.8) — used only to build the prompt; `ChunkerOutput` accepts
/// whatever keys the LLM actually returns.
pub const COMMUNICATION_STYLE_DIMENSIONS: [&str; 9] =
    ["formality", "verbosity", "directness", "humor", "warmth", "technicality", "patience", "curiosity", "assertiveness"];

// ── Staging: assembles the two EncodeEvent halves into one exchange ────────

struct PendingHalf {
    topic: String,
    thread_id: ThreadId,
    prompt_message: String,
    response_message: String,
}

/// One memory_chunk row per exchange (spec §5 delivery-ordering note): the
/// chunker receives a user-half event (prompt only) and an assistant-half
/// event (response only) for the same `exchange_id`; extraction only runs
/// once both halves have arrived, and a stray third observation is dropped.
#[derive(Default)]
pub struct ChunkerStaging {
    pending: HashMap<ExchangeId, PendingHalf>,
    completed: HashSet<ExchangeId>,
}

pub struct AssembledExchange {
    pub topic: String,
    pub thread_id: ThreadId,
    pub prompt_message: String,
    pub response_message: String,
}

impl ChunkerStaging {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(
        &mut self,
        exchange_id: ExchangeId,
        thread_id: ThreadId,
        topic: &str,
        prompt_message: &str,
        response_message: &str,
    ) -> Option<AssembledExchange> {
        if self.completed.contains(&exchange_id) {
            return None;
        }

        let entry = self.pending.entry(exchange_id).or_insert_with(|| PendingHalf {
            topic: topic.to_string(),
            thread_id,
            prompt_message: String::new(),
            response_message: String::new(),
        });
        if !prompt_message.is_empty() {
            entry.prompt_message = prompt_message.to_string();
        }
        if !response_message.is_empty() {
            entry.response_message = response_message.to_string();
        }

        if entry.prompt_message.is_empty() || entry.response_message.is_empty() {
            return None;
        }

        let assembled = AssembledExchange {
            topic: entry.topic.clone(),
            thread_id: entry.thread_id,
            prompt_message: entry.prompt_message.clone(),
            response_message: entry.response_message.clone(),
        };
        self.pending.remove(&exchange_id);
        self.completed.insert(exchange_id);
        Some(assembled)
    }
}

// ── LLM call ─────────────────────────────────────────────────────────────────

pub struct ChunkerInput<'a> {
    pub topic: &'a str,
    pub prompt_text: &'a str,
    pub response_text: &'a str,
}

fn build_chunker_system_prompt(input: &ChunkerInput<'_>) -> String {
    format!(
        "You are the memory-chunker for a personal assistant. Extract durable memory \
         from one conversational exchange.\n\
         Respond with JSON only, shaped as:\n\
         {{\"gists\": [{{\"content\", \"type\", \"confidence\"}}], \
         \"facts\": [{{\"key\", \"value\", \"confidence\"}}], \
         \"user_traits\": [{{\"key\", \"value\", \"category\", \"confidence\", \"source\", \"is_literal\"}}], \
         \"communication_style\": {{{dims}}}, \
         \"emotion\": {{\"user\": {{\"joy\",\"surprise\",\"anger\",\"disgust\"}}, \
         \"assistant\": {{...}}, \"scope\": {{\"intent\", \"confidence\", \"emotion\"}}}}}}\n\
         Every top-level field is optional — omit whatever does not apply to this exchange.\n\n\
         Topic: {topic}",
        dims = COMMUNICATION_STYLE_DIMENSIONS.join(", "),
        topic = input.topic,
    )
}

/// Runs the single chunker LLM call, hard-timed at [`HARD_TIMEOUT_SECS`].
/// Returns `None` on timeout, provider error, or a parse failure — the
/// chunker degrades to a no-op rather than surfacing a failure to the user
/// (spec §7: background writes are fire-and-forget).
pub async fn run_memory_chunker(llm: &dyn LlmProvider, input: ChunkerInput<'_>) -> Option<ChunkerOutput> {
    let system_prompt = build_chunker_system_prompt(&input);
    let user_message = format!("User: {}\nAssistant: {}", input.prompt_text, input.response_text);

    let call = llm.send_message(&system_prompt, &user_message, LlmFormat::Json);
    let response = match tokio::time::timeout(Duration::from_secs(HARD_TIMEOUT_SECS), call).await {
        Ok(Ok(response)) => response,
        Ok(Err(LlmError::RateLimited { retry_after })) => {
            warn!(?retry_after, "memory chunker: rate limited, skipping this exchange");
            return None;
        }
        Ok(Err(err)) => {
            warn!(?err, "memory chunker: LLM call failed");
            return None;
        }
        Err(_) => {
            warn!(timeout_secs = HARD_TIMEOUT_SECS, "memory chunker: hard timeout exceeded");
            return None;
        }
    };

    match serde_json::from_str::<ChunkerOutput>(&response.text) {
        Ok(output) => Some(output),
        Err(err) => {
            warn!(?err, "memory chunker: could not parse structured output, skipping");
            None
        }
    }
}

// ── Applying the structured output to the memory lattice ───────────────────

pub struct ChunkerStoreContext<'a> {
    pub gists: &'a mut GistStore,
    pub facts: &'a mut FactStore,
    pub traits: &'a mut TraitStore,
    pub min_fact_confidence: f32,
}

/// Writes `output.gists` through `GistStore::store_gists` — the store owns
/// the dedup/cap/TTL policy from spec §4.3.
pub fn apply_gists(ctx: &mut ChunkerStoreContext<'_>, topic: &str, output: &ChunkerOutput) {
    if output.gists.is_empty() {
        return;
    }
    let batch: Vec<Gist> = output.gists.iter().map(|g| Gist::new(g.content.clone(), g.gist_type, g.confidence)).collect();
    ctx.gists.store_gists(topic, batch);
}

/// Writes `output.facts` gated on `confidence >= min_fact_confidence`
/// (spec §4.8).
pub fn apply_facts(ctx: &mut ChunkerStoreContext<'_>, topic: &str, output: &ChunkerOutput) {
    for fact in &output.facts {
        if fact.confidence < ctx.min_fact_confidence {
            continue;
        }
        ctx.facts.set(topic, fact.key.clone(), fact.value.clone(), fact.confidence, "memory_chunker", false);
    }
}

/// Writes `output.user_traits`, penalising confidence for an inferred
/// source and for a low-confidence speaker-attribution scope (spec §4.8:
/// "penalised for inferred source and low speaker confidence").
pub fn apply_user_traits(ctx: &mut ChunkerStoreContext<'_>, output: &ChunkerOutput) {
    let speaker_confidence = output.emotion.as_ref().map(|e| e.scope.confidence).unwrap_or(1.0).clamp(0.0, 1.0);
    for t in &output.user_traits {
        let mut confidence = t.confidence;
        if t.source == TraitSource::Inferred {
            confidence *= 0.8;
        }
        confidence *= speaker_confidence;
        ctx.traits.upsert(t.key.clone(), t.value.clone(), t.category, confidence, t.source, t.is_literal, vec![]);
    }
}

const COMMUNICATION_STYLE_TRAIT_KEY: &str = "communication_style";
const OBSERVATIONS_FIELD: &str = "__observations";

/// EMA-merges `output.communication_style` into a single JSON-valued trait
/// (spec §4.8): weight 0.5 for each of the first five observations, 0.3
/// thereafter. The observation count travels inside the stored JSON value
/// since `TraitStore` has no side-channel for per-trait metadata.
pub fn apply_communication_style(ctx: &mut ChunkerStoreContext<'_>, output: &ChunkerOutput) {
    let Some(style) = &output.communication_style else { return };

    let prior_value = ctx.traits.get(COMMUNICATION_STYLE_TRAIT_KEY).and_then(|t| serde_json::from_str::<serde_json::Value>(&t.value).ok());
    let prior_obj = prior_value.as_ref().and_then(|v| v.as_object());
    let observations = prior_obj.and_then(|o| o.get(OBSERVATIONS_FIELD)).and_then(|v| v.as_u64()).unwrap_or(0);
    let weight = if observations < 5 { 0.5 } else { 0.3 };

    let mut merged = serde_json::Map::new();
    for (dim, value) in style {
        let prior = prior_obj.and_then(|o| o.get(dim)).and_then(|v| v.as_f64()).map(|v| v as f32);
        let updated = match prior {
            Some(p) => p * (1.0 - weight) + value * weight,
            None => *value,
        };
        merged.insert(dim.clone(), serde_json::json!(updated));
    }
    merged.insert(OBSERVATIONS_FIELD.to_string(), serde_json::json!(observations + 1));

    let stored = serde_json::Value::Object(merged).to_string();
    ctx.traits.upsert(COMMUNICATION_STYLE_TRAIT_KEY, stored, TraitCategory::CommunicationStyle, 1.0, TraitSource::Inferred, false, vec![]);
}

/// Maps the chunker's `emotion` block onto per-dimension `(emotion_signal,
/// reward_signal)` reinforcement — joy/anger drive warmth, anger drives
/// assertiveness, disgust drives skepticism, surprise drives curiosity, and
/// the loudest of the four drives emotional intensity. `reward_signal`
/// comes from the Phase A behaviour-reward cache (`BehaviourRewardCache`),
/// read non-consumingly by the caller before this is invoked.
pub fn apply_emotion_to_identity(output: &ChunkerOutput, reward_signal: f32, identity: &mut IdentityVectors) {
    let Some(emotion) = &output.emotion else { return };

    let joy = (emotion.user.joy + emotion.assistant.joy) / 2.0;
    let anger = (emotion.user.anger + emotion.assistant.anger) / 2.0;
    let disgust = (emotion.user.disgust + emotion.assistant.disgust) / 2.0;
    let surprise = (emotion.user.surprise + emotion.assistant.surprise) / 2.0;

    identity.get_mut(IdentityDimension::Warmth).reinforce(joy - anger, reward_signal);
    identity.get_mut(IdentityDimension::Playfulness).reinforce(joy - disgust, reward_signal);
    identity.get_mut(IdentityDimension::Assertiveness).reinforce(anger, reward_signal);
    identity.get_mut(IdentityDimension::Skepticism).reinforce(disgust, reward_signal);
    identity.get_mut(IdentityDimension::Curiosity).reinforce(surprise, reward_signal);
    identity
        .get_mut(IdentityDimension::EmotionalIntensity)
        .reinforce(joy.max(anger).max(disgust).max(surprise), reward_signal);
}

/// Applies every structured-output field to the memory lattice. Callers
/// typically run this, then the two regex side effects below, then enqueue
/// an episodic-memory job.
pub fn apply_chunker_output(ctx: &mut ChunkerStoreContext<'_>, topic: &str, output: &ChunkerOutput) {
    apply_gists(ctx, topic, output);
    apply_facts(ctx, topic, output);
    apply_user_traits(ctx, output);
    apply_communication_style(ctx, output);
}

// ── Regex side effects (no LLM call; spec §4.8) ─────────────────────────────

struct MicroPatterns {
    bullet: Regex,
    brief: Regex,
    depth: Regex,
    challenge: Regex,
}

fn micro_patterns() -> &'static MicroPatterns {
    static PATTERNS: OnceLock<MicroPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| MicroPatterns {
        bullet: Regex::new(r"(?i)\b(bullets?|in a list|list (it|them) out)\b").expect("valid regex"),
        brief: Regex::new(r"(?i)\b(short|brief|concise|tl;?dr)\b").expect("valid regex"),
        depth: Regex::new(r"(?i)\b(elaborate|in.depth|go deeper|more detail)\b").expect("valid regex"),
        challenge: Regex::new(r"(?i)\b(push back|challenge me|disagree with me|devil'?s advocate)\b").expect("valid regex"),
    })
}

/// Fixed confidence for every micro-preference trait (spec §4.8).
pub const MICRO_PREFERENCE_CONFIDENCE: f32 = 0.7;

/// Pure-regex side effect on the user's message alone: bullet/brevity/depth/
/// challenge requests become `prefers_*` micro-preference traits at a fixed
/// confidence, independent of the LLM call (spec §4.8).
pub fn apply_micro_preferences(user_message: &str, traits: &mut TraitStore) {
    let patterns = micro_patterns();
    let mut write = |key: &str| {
        traits.upsert(key, "true", TraitCategory::MicroPreference, MICRO_PREFERENCE_CONFIDENCE, TraitSource::Inferred, false, vec![]);
    };
    if patterns.bullet.is_match(user_message) {
        write("prefers_bullet_lists");
    }
    if patterns.brief.is_match(user_message) {
        write("prefers_brief_responses");
    }
    if patterns.depth.is_match(user_message) {
        write("prefers_depth");
    }
    if patterns.challenge.is_match(user_message) {
        write("prefers_challenge");
    }
}

const CHALLENGE_TOLERANCE_KEY: &str = "challenge_tolerance";
const CHALLENGE_REACTION_EMA_WEIGHT: f32 = 0.2;

fn previous_response_was_challenging(previous_assistant_response: &str) -> bool {
    micro_patterns().challenge.is_match(previous_assistant_response) || previous_assistant_response.to_lowercase().contains("pushing back")
}

/// Pure-regex side effect: if the previous assistant turn carried challenge
/// indicators, classifies the user's reply as positive/negative/neutral and
/// EMA-moves `challenge_tolerance` toward that signal with weight 0.2
/// (spec §4.8). A no-op when the previous response wasn't challenging.
pub fn apply_challenge_reaction(previous_assistant_response: &str, user_reply: &str, traits: &mut TraitStore) {
    if !previous_response_was_challenging(previous_assistant_response) {
        return;
    }

    const POSITIVE_MARKERS: [&str; 5] = ["thanks", "good point", "fair", "you're right", "makes sense"];
    const NEGATIVE_MARKERS: [&str; 4] = ["stop", "don't", "no need", "back off"];

    let lowered = user_reply.to_lowercase();
    let signal = if NEGATIVE_MARKERS.iter().any(|m| lowered.contains(m)) {
        0.0
    } else if POSITIVE_MARKERS.iter().any(|m| lowered.contains(m)) {
        1.0
    } else {
        0.5
    };

    let prior = traits.get(CHALLENGE_TOLERANCE_KEY).and_then(|t| t.value.parse::<f32>().ok()).unwrap_or(0.5);
    let updated = prior * (1.0 - CHALLENGE_REACTION_EMA_WEIGHT) + signal * CHALLENGE_REACTION_EMA_WEIGHT;
    traits.upsert(
        CHALLENGE_TOLERANCE_KEY,
        format!("{updated:.3}"),
        TraitCategory::Preference,
        0.6,
        TraitSource::Inferred,
        false,
        vec![],
    );
}

// ── Episodic follow-up (spec §4.8: "emits an episodic-memory job") ─────────

pub async fn enqueue_episodic_job(episodic_queue: &std::sync::Arc<cortex_queue::NamedQueue>, topic: &str, exchange_id: Uuid, thread_id: Uuid) -> Uuid {
    let payload = serde_json::json!({
        "topic": topic,
        "exchange_id": exchange_id,
        "thread_id": thread_id,
        "enqueued_at": Utc::now(),
    });
    episodic_queue.push(payload).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_memory::{FactStore, GistStore, TraitStore};

    #[test]
    fn staging_waits_for_both_halves() {
        let mut staging = ChunkerStaging::new();
        let exchange_id = Uuid::new_v4();
        let thread_id = Uuid::new_v4();
        assert!(staging.observe(exchange_id, thread_id, "general", "hello", "").is_none());
        let assembled = staging.observe(exchange_id, thread_id, "general", "", "hi there").unwrap();
        assert_eq!(assembled.prompt_message, "hello");
        assert_eq!(assembled.response_message, "hi there");
    }

    #[test]
    fn staging_drops_a_third_observation() {
        let mut staging = ChunkerStaging::new();
        let exchange_id = Uuid::new_v4();
        let thread_id = Uuid::new_v4();
        staging.observe(exchange_id, thread_id, "general", "hello", "");
        staging.observe(exchange_id, thread_id, "general", "", "hi there");
        assert!(staging.observe(exchange_id, thread_id, "general", "", "hi again").is_none());
    }

    #[test]
    fn micro_preferences_detects_bullet_request() {
        let mut traits = TraitStore::new();
        apply_micro_preferences("can you put that in a list with bullets please", &mut traits);
        assert!(traits.get("prefers_bullet_lists").is_some());
    }

    #[test]
    fn micro_preferences_ignores_unrelated_text() {
        let mut traits = TraitStore::new();
        apply_micro_preferences("what's the weather like today", &mut traits);
        assert!(traits.get("prefers_bullet_lists").is_none());
        assert!(traits.get("prefers_brief_responses").is_none());
    }

    #[test]
    fn challenge_reaction_is_noop_without_prior_challenge() {
        let mut traits = TraitStore::new();
        apply_challenge_reaction("here's a straightforward summary", "thanks", &mut traits);
        assert!(traits.get(CHALLENGE_TOLERANCE_KEY).is_none());
    }

    #[test]
    fn challenge_reaction_moves_tolerance_toward_positive_signal() {
        let mut traits = TraitStore::new();
        apply_challenge_reaction("I want to push back on that a little", "fair, you're right", &mut traits);
        let tolerance: f32 = traits.get(CHALLENGE_TOLERANCE_KEY).unwrap().value.parse().unwrap();
        assert!(tolerance > 0.5, "positive reaction should move tolerance up from the 0.5 prior");
    }

    #[test]
    fn challenge_reaction_moves_tolerance_toward_negative_signal() {
        let mut traits = TraitStore::new();
        apply_challenge_reaction("let me challenge me a bit here", "stop, don't do that", &mut traits);
        let tolerance: f32 = traits.get(CHALLENGE_TOLERANCE_KEY).unwrap().value.parse().unwrap();
        assert!(tolerance < 0.5, "negative reaction should move tolerance down from the 0.5 prior");
    }

    #[test]
    fn facts_below_min_confidence_are_dropped() {
        let mut gists = GistStore::new(8, 2, 0.7, 0.0, 86_400);
        let mut facts = FactStore::new(86_400);
        let mut traits = TraitStore::new();
        let mut ctx = ChunkerStoreContext { gists: &mut gists, facts: &mut facts, traits: &mut traits, min_fact_confidence: 0.5 };
        let output = ChunkerOutput {
            facts: vec![FactExtract { key: "timezone".into(), value: "UTC".into(), confidence: 0.2 }],
            ..Default::default()
        };
        apply_facts(&mut ctx, "general", &output);
        assert!(ctx.facts.get("general", "timezone").is_none());
    }

    #[test]
    fn communication_style_first_merge_uses_raw_values() {
        let mut gists = GistStore::new(8, 2, 0.7, 0.0, 86_400);
        let mut facts = FactStore::new(86_400);
        let mut traits = TraitStore::new();
        let mut ctx = ChunkerStoreContext { gists: &mut gists, facts: &mut facts, traits: &mut traits, min_fact_confidence: 0.3 };
        let mut style = HashMap::new();
        style.insert("formality".to_string(), 0.8);
        let output = ChunkerOutput { communication_style: Some(style), ..Default::default() };
        apply_communication_style(&mut ctx, &output);
        let stored = ctx.traits.get(COMMUNICATION_STYLE_TRAIT_KEY).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&stored.value).unwrap();
        assert_eq!(parsed["formality"].as_f64().unwrap() as f32, 0.8);
        assert_eq!(parsed[OBSERVATIONS_FIELD], 1);
    }

    #[test]
    fn emotion_reinforces_identity_vectors() {
        let mut identity = IdentityVectors::default();
        let emotion = EmotionExtract {
            user: EmotionScores { joy: 1.0, surprise: 0.0, anger: 0.0, disgust: 0.0 },
            assistant: EmotionScores::default(),
            scope: EmotionScope { intent: "celebrate".into(), confidence: 1.0, emotion: "joy".into() },
        };
        let output = ChunkerOutput { emotion: Some(emotion), ..Default::default() };
        let before = identity.warmth.activation;
        apply_emotion_to_identity(&output, 0.5, &mut identity);
        assert!(identity.warmth.activation > before);
    }
}
