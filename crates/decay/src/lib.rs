//! C21 — decay engine: a periodic background pass applying exponential
//! and linear decay across the memory lattice (spec §4.10).
//!
//! Grounded on `original_source/backend/services/decay_engine_service.py`'s
//! `run_decay_cycle`: one pass touches episodic activation, semantic
//! strength, identity inertia, external-knowledge fact TTLs, and user
//! trait confidence, in that order, and never fails the whole cycle for
//! one store's error (each step is independent and swallows nothing
//! worse than logging — spec §7: scheduler/autonomous loops isolate
//! per-tick failures).
//!
//! Every per-store decay law (exponential floor, linear-with-resistance,
//! inertia pull) already lives on the store itself in `cortex-memory`;
//! this crate is the orchestrator that calls them in the right order with
//! the right elapsed time, on the configured interval.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cortex_config::DecayConfig;
use cortex_memory::{EpisodicStore, FactStore, IdentityVectors, SemanticStore, TraitStore};
use tokio::sync::{Mutex, watch};
use tracing::info;

/// Everything one decay pass touches, borrowed from whichever service owns
/// the memory lattice for the (single) user. `semantic_stale_after_hours`
/// and `episodic` use the spec's fixed "idle over an hour" staleness rule.
pub struct DecayCycleContext<'a> {
    pub episodes: &'a mut EpisodicStore,
    pub semantic: &'a mut SemanticStore,
    pub traits: &'a mut TraitStore,
    pub facts: &'a mut FactStore,
    pub identity: &'a mut IdentityVectors,
    pub config: &'a DecayConfig,
}

/// Counts for one cycle, surfaced for logging — mirrors the teacher
/// service's "Cycle complete: episodic=N updated, semantic=N updated, ..."
/// summary line.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecayCycleReport {
    pub episodes_seen: usize,
    pub semantic_concepts_seen: usize,
    pub traits_seen: usize,
    pub traits_remaining: usize,
}

const STALE_AFTER_HOURS: i64 = 1;

/// Runs one full decay cycle (spec §4.10). `days_elapsed` is the wall time
/// since the previous cycle, expressed in days, for the linear trait decay
/// law; everything else reads its own `last_accessed_at`/`last_reinforced_at`
/// timestamps against `now` and is idempotent when called twice at the same
/// `now` (spec §8: "a batch decay pass is a no-op on a stream of identical
/// timestamps").
pub fn run_decay_cycle(ctx: DecayCycleContext<'_>, now: DateTime<Utc>, days_elapsed: f32) -> DecayCycleReport {
    let episodes_seen = ctx.episodes.unconsolidated().len(); // touched below regardless of status
    ctx.episodes.decay_pass(
        now,
        ctx.config.episodic_decay_rate,
        ctx.config.transient_multiplier,
        ctx.config.evolving_multiplier,
        ctx.config.cron_tool_multiplier,
    );

    ctx.semantic.decay_pass(ctx.config.semantic_decay_rate, now, STALE_AFTER_HOURS);
    let semantic_concepts_seen = ctx.semantic.all().len();

    ctx.identity.apply_inertia_all();
    ctx.identity.apply_coherence();

    ctx.facts.apply_external_ttl_decay(ctx.config.external_ttl_divisor, ctx.config.external_ttl_floor_secs, now);
    ctx.facts.prune_expired(now);

    let traits_seen = ctx.traits.all().len();
    ctx.traits.decay_pass(days_elapsed, ctx.config.trait_floor_days);
    let traits_remaining = ctx.traits.all().len();

    let report = DecayCycleReport { episodes_seen, semantic_concepts_seen, traits_seen, traits_remaining };
    info!(
        episodes_seen = report.episodes_seen,
        semantic_concepts_seen = report.semantic_concepts_seen,
        traits_decayed = report.traits_seen,
        traits_deleted = report.traits_seen.saturating_sub(report.traits_remaining),
        "decay cycle complete"
    );
    report
}

/// A mutex-guarded bundle of the stores a decay loop needs exclusive
/// access to, for callers that want a spawnable background task rather
/// than calling `run_decay_cycle` by hand (the CLI harness does the
/// latter; `cortex-runtime`'s daemon uses this). Each field is the same
/// `Arc<Mutex<_>>` the rest of the runtime's app state holds, so the decay
/// loop, the idle-consolidation scheduler, and the request path all see
/// one store instead of silently diverging copies.
pub struct DecayState {
    pub episodes: Arc<Mutex<EpisodicStore>>,
    pub semantic: Arc<Mutex<SemanticStore>>,
    pub traits: Arc<Mutex<TraitStore>>,
    pub facts: Arc<Mutex<FactStore>>,
    pub identity: Arc<Mutex<IdentityVectors>>,
}

/// Runs `run_decay_cycle` on a fixed interval until `shutdown_rx` fires,
/// the same `watch`-channel idiom `cortex_queue::run_worker` uses. Errors
/// in one tick never abort the loop (spec §7): there is nothing fallible
/// left once a lock is held, so isolation here is structural rather than
/// a catch-and-sleep like the Python service's outer `except Exception`.
pub async fn run_decay_loop(state: Arc<DecayState>, config: DecayConfig, mut shutdown_rx: watch::Receiver<bool>) {
    let mut last_tick = Utc::now();
    let mut interval = tokio::time::interval(Duration::from_secs(config.interval_secs));
    interval.tick().await; // first tick fires immediately; skip it, we just started

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = Utc::now();
                let days_elapsed = (now - last_tick).num_milliseconds() as f32 / 86_400_000.0;
                last_tick = now;

                let mut episodes = state.episodes.lock().await;
                let mut semantic = state.semantic.lock().await;
                let mut traits = state.traits.lock().await;
                let mut facts = state.facts.lock().await;
                let mut identity = state.identity.lock().await;

                run_decay_cycle(
                    DecayCycleContext {
                        episodes: &mut episodes,
                        semantic: &mut semantic,
                        traits: &mut traits,
                        facts: &mut facts,
                        identity: &mut identity,
                        config: &config,
                    },
                    now,
                    days_elapsed.max(0.0),
                );
            }
            changed = shutdown_rx.changed() => {
                if changed.is_ok() && *shutdown_rx.borrow() {
                    info!("decay loop shutting down");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_memory::{TraitCategory, TraitSource};

    fn fixtures() -> (EpisodicStore, SemanticStore, TraitStore, FactStore, IdentityVectors) {
        (EpisodicStore::new(), SemanticStore::new(), TraitStore::new(), FactStore::new(86_400), IdentityVectors::default())
    }

    #[test]
    fn cycle_is_idempotent_on_identical_timestamps() {
        let (mut episodes, mut semantic, mut traits, mut facts, mut identity) = fixtures();
        traits.upsert("k", "v", TraitCategory::General, 0.9, TraitSource::Explicit, false, vec![]);
        let config = DecayConfig::default();
        let now = Utc::now();

        run_decay_cycle(
            DecayCycleContext { episodes: &mut episodes, semantic: &mut semantic, traits: &mut traits, facts: &mut facts, identity: &mut identity, config: &config },
            now,
            0.0,
        );
        let after_first = traits.get("k").unwrap().confidence;
        run_decay_cycle(
            DecayCycleContext { episodes: &mut episodes, semantic: &mut semantic, traits: &mut traits, facts: &mut facts, identity: &mut identity, config: &config },
            now,
            0.0,
        );
        let after_second = traits.get("k").unwrap().confidence;
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn cycle_touches_every_store_without_panicking() {
        let (mut episodes, mut semantic, mut traits, mut facts, mut identity) = fixtures();
        semantic.upsert("coffee", "a beverage", 0.9, 0.2, vec![]);
        traits.upsert("k", "v", TraitCategory::MicroPreference, 0.5, TraitSource::Inferred, false, vec![]);
        facts.set("general", "city", "nyc", 0.8, "external_specialist:weather", true);
        let config = DecayConfig::default();
        let report = run_decay_cycle(
            DecayCycleContext { episodes: &mut episodes, semantic: &mut semantic, traits: &mut traits, facts: &mut facts, identity: &mut identity, config: &config },
            Utc::now() + chrono::Duration::hours(10),
            10.0 / 24.0,
        );
        assert_eq!(report.traits_seen, 1);
    }
}
