//! Top-level wiring: spawns every background loop (C19-C24) on top of one
//! `AppState`, all sharing the same `watch::Sender<bool>` shutdown signal
//! the rest of the codebase's loops already use. `Daemon::spawn` is the
//! single place that turns the request-path/store plumbing in `state.rs`
//! into a running process.

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Timelike, Utc};
use cortex_decay::{run_decay_loop, DecayState};
use cortex_drift::actions::suggest::ConfidentTrait;
use cortex_drift::{run_drift_loop, DriftContextFields, DriftEngine, DriftState, DriftTickInputsOwned, SparkPhase};
use cortex_memory::Embedding;
use cortex_scheduler::idle_consolidation::run_idle_consolidation_loop;
use cortex_scheduler::thread_expiry::run_thread_expiry_loop;
use tokio::sync::watch;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::queues;
use crate::state::AppState;

/// Bound on the rolling history `build_inputs` draws from — long enough
/// to give COMMUNICATE's novelty/self-calibration checks something to
/// work with, short enough that one stale tick's `try_lock` miss barely
/// matters.
const HISTORY_CAP: usize = 50;

/// The one piece of drift-tick input that genuinely has nowhere else to
/// live: a timestamped trail of recent user-message embeddings, fed by
/// `submit_message` on the request path. Held behind `std::sync::Mutex`
/// rather than a tokio one, since `run_drift_loop`'s `build_inputs`
/// closure is synchronous and cannot `.await` a lock.
#[derive(Default)]
pub struct DriftHistory {
    recent_user_message_embeddings: std::sync::Mutex<VecDeque<(DateTime<Utc>, Embedding)>>,
}

impl DriftHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_user_message(&self, embedding: Embedding) {
        let mut guard = self.recent_user_message_embeddings.lock().unwrap();
        guard.push_back((Utc::now(), embedding));
        while guard.len() > HISTORY_CAP {
            guard.pop_front();
        }
    }
}

/// Handle to every spawned background task plus the shutdown switch.
/// Dropping this without calling `shutdown` leaves the tasks running
/// detached — callers that care about a clean stop must call it.
pub struct DaemonHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl DaemonHandle {
    /// Flips the shared shutdown flag and waits for every loop to notice
    /// and return, the same `watch`-channel idiom every loop already uses.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(?err, "background task panicked during shutdown");
            }
        }
    }
}

pub struct Daemon;

impl Daemon {
    /// Spawns the encode bridge, the four queue workers, and the four
    /// scheduled loops (decay, drift, idle consolidation, thread expiry)
    /// against `state`, returning a handle that can shut all of them down
    /// together.
    pub fn spawn(state: Arc<AppState>) -> DaemonHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        tasks.push(queues::spawn_encode_bridge(state.clone(), shutdown_rx.clone()));
        tasks.push(queues::spawn_memory_chunker_worker(state.clone(), shutdown_rx.clone()));
        tasks.push(queues::spawn_episodic_worker(state.clone(), shutdown_rx.clone()));
        tasks.push(queues::spawn_semantic_worker(state.clone(), shutdown_rx.clone()));
        tasks.push(queues::spawn_tool_worker(state.clone(), shutdown_rx.clone()));

        tasks.push(Self::spawn_decay_loop(state.clone(), shutdown_rx.clone()));
        tasks.push(Self::spawn_drift_loop(state.clone(), shutdown_rx.clone()));
        tasks.push(Self::spawn_idle_consolidation_loop(state.clone(), shutdown_rx.clone()));
        tasks.push(Self::spawn_thread_expiry_loop(state, shutdown_rx));

        info!(task_count = tasks.len(), "daemon: all background loops spawned");
        DaemonHandle { shutdown_tx, tasks }
    }

    fn spawn_decay_loop(state: Arc<AppState>, shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let decay_state = Arc::new(DecayState {
            episodes: state.episodes.clone(),
            semantic: state.semantic.clone(),
            traits: state.traits.clone(),
            facts: state.facts.clone(),
            identity: state.identity.clone(),
        });
        let config = state.config.decay.clone();
        tokio::spawn(run_decay_loop(decay_state, config, shutdown_rx))
    }

    fn spawn_idle_consolidation_loop(state: Arc<AppState>, shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let queues = vec![state.memory_chunker_queue.clone(), state.episodic_queue.clone(), state.semantic_queue.clone(), state.tool_queue.clone()];
        let episodes = state.episodes.clone();
        let semantic_queue = state.semantic_queue.clone();
        let poll_secs = state.config.scheduler.idle_poll_secs;
        let min_episodes = state.config.scheduler.idle_consolidation_min_episodes;
        tokio::spawn(run_idle_consolidation_loop(queues, episodes, semantic_queue, poll_secs, min_episodes, shutdown_rx))
    }

    fn spawn_thread_expiry_loop(state: Arc<AppState>, shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let threads = state.threads.clone();
        let episodic_queue = state.episodic_queue.clone();
        let poll_secs = state.config.scheduler.idle_poll_secs;
        let idle_secs = state.config.scheduler.thread_expiry_idle_secs;
        tokio::spawn(run_thread_expiry_loop(threads, episodic_queue, poll_secs, idle_secs, shutdown_rx))
    }

    /// Builds the `DriftState` (its own engine lock, separate from
    /// `AppState`'s stores) and wires the two synchronous closures
    /// `run_drift_loop` calls each tick to pull ambient fields and inputs
    /// out of `state`/`history`.
    fn spawn_drift_loop(state: Arc<AppState>, shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let drift_state = Arc::new(DriftState {
            engine: AsyncMutex::new(DriftEngine::default()),
            semantic: state.semantic.clone(),
            episodes: state.episodes.clone(),
        });
        let outbound = state.outbound_bus.clone();
        let tick_interval_secs = state.config.drift.tick_interval_secs;

        let fields_state = state.clone();
        let fields_drift_state = drift_state.clone();
        let build_ctx_fields = move || build_drift_context_fields(&fields_state, &fields_drift_state);

        let inputs_state = state;
        let build_inputs = move || build_drift_inputs(&inputs_state);

        tokio::spawn(run_drift_loop(drift_state, outbound, tick_interval_secs, build_ctx_fields, build_inputs, shutdown_rx))
    }
}

/// Synchronous snapshot of the ambient drift fields. `try_lock` misses
/// (another task mid-digest, or the drift loop's own upcoming lock of
/// the same engine) fall back to a sensible default rather than blocking
/// a tick — a single stale spark phase is harmless at a 15-minute-default
/// cadence.
fn build_drift_context_fields(state: &Arc<AppState>, drift_state: &Arc<DriftState>) -> DriftContextFields {
    let now = Utc::now();
    let current_hour = current_hour_in_tz(&state.config.drift.timezone, now);

    let spark_phase = drift_state.engine.try_lock().map(|engine| engine.spark.phase).unwrap_or(SparkPhase::FirstContact);

    let last_interaction_at = state.last_interaction_at.try_lock().ok().and_then(|g| *g);

    let episode_count = state.episodes.try_lock().map(|e| e.len()).unwrap_or(0);

    DriftContextFields {
        now,
        current_hour,
        spark_phase,
        last_interaction_at,
        episode_count,
        quiet_hours_start: state.config.drift.quiet_hours_start,
        quiet_hours_end: state.config.drift.quiet_hours_end,
    }
}

fn current_hour_in_tz(timezone: &str, now: DateTime<Utc>) -> u8 {
    match chrono_tz::Tz::from_str(timezone) {
        Ok(tz) => tz.from_utc_datetime(&now.naive_utc()).hour() as u8,
        Err(_) => {
            warn!(timezone, "drift: unrecognized timezone, falling back to UTC");
            now.hour() as u8
        }
    }
}

/// Synchronous snapshot of everything COMMUNICATE/SUGGEST need beyond
/// `Thought`/`DriftContext`. Recent activation energies come from the
/// episodic store's own `activation_score`s rather than a second rolling
/// history — the store already tracks per-episode activation decay, so
/// reusing it keeps the self-calibration window honest against what's
/// actually been retrieved recently.
fn build_drift_inputs(state: &Arc<AppState>) -> DriftTickInputsOwned {
    let history = &state.drift_history;
    let recent_activation_energies: Vec<f32> = state
        .episodes
        .try_lock()
        .map(|episodes| {
            let mut episodes = episodes.all();
            episodes.sort_by_key(|e| std::cmp::Reverse(e.last_accessed_at));
            episodes.into_iter().take(HISTORY_CAP).map(|e| e.activation_score).collect()
        })
        .unwrap_or_default();

    let recent_user_message_embeddings: Vec<(DateTime<Utc>, Embedding)> =
        history.recent_user_message_embeddings.lock().unwrap().iter().cloned().collect();

    let recent_working_memory_turns = state
        .threads
        .try_lock()
        .ok()
        .zip(state.working_memory.try_lock().ok())
        .map(|(threads, working_memory)| {
            let mut turns: Vec<String> = threads.values().flat_map(|t| working_memory.turns(t.id)).map(|t| t.content).collect();
            turns.truncate(HISTORY_CAP);
            turns
        })
        .unwrap_or_default();

    let confident_traits: Vec<ConfidentTrait> = state
        .traits
        .try_lock()
        .map(|traits| {
            traits
                .all()
                .into_iter()
                .map(|t| ConfidentTrait { key: t.key.clone(), value: t.value.clone(), confidence: t.confidence, embedding: Some(t.embedding.clone()) })
                .collect()
        })
        .unwrap_or_default();

    DriftTickInputsOwned { recent_activation_energies, recent_user_message_embeddings, recent_working_memory_turns, confident_traits }
}
