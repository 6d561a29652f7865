//! Thread and exchange bookkeeping: selecting/creating the active thread
//! for a channel, recording each exchange, and tracking how many turns
//! have passed since the last episode so `is_ready_for_episode` (spec
//! §4.9) has something real to check against. None of this lives in
//! `cortex-core` itself since the teacher keeps storage concerns out of
//! its domain types too — `Thread`/`Exchange` are plain data, ownership
//! and indexing is the wiring layer's job.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use cortex_core::{Exchange, ExchangeId, Thread, ThreadId};
use tokio::sync::Mutex;

/// Per-thread counters the episodic worker needs that don't belong on
/// `Thread` itself — reset each time an episode is actually queued.
#[derive(Default, Clone, Copy)]
pub struct EpisodeReadiness {
    pub turns_since_last_episode: u32,
}

pub struct ExchangeRegistry {
    threads: Arc<Mutex<HashMap<ThreadId, Thread>>>,
    exchanges: Mutex<HashMap<ExchangeId, Exchange>>,
    readiness: Mutex<HashMap<ThreadId, EpisodeReadiness>>,
}

impl ExchangeRegistry {
    pub fn new(threads: Arc<Mutex<HashMap<ThreadId, Thread>>>) -> Self {
        Self { threads, exchanges: Mutex::new(HashMap::new()), readiness: Mutex::new(HashMap::new()) }
    }

    /// Finds the active thread for `(user, channel, platform)` or opens a
    /// new one — at most one active thread per channel (spec §3.1).
    pub async fn select_or_create_thread(&self, user: &str, channel: &str, platform: &str) -> ThreadId {
        let mut threads = self.threads.lock().await;
        if let Some(existing) = threads.values().find(|t| {
            t.user == user && t.channel == channel && t.platform == platform && matches!(t.state, cortex_core::ThreadState::Active)
        }) {
            return existing.id;
        }
        let thread = Thread::new(user, channel, platform);
        let id = thread.id;
        threads.insert(id, thread);
        id
    }

    /// Stores the already-built exchange (`run_digest` owns construction
    /// and topic bookkeeping) and bumps the episode-readiness counter.
    pub async fn register_completed(&self, exchange: Exchange) {
        let thread_id = exchange.thread_id;
        self.exchanges.lock().await.insert(exchange.id, exchange);
        self.readiness.lock().await.entry(thread_id).or_default().turns_since_last_episode += 1;
    }

    pub async fn set_memory_chunk(&self, exchange_id: ExchangeId, chunk: serde_json::Value) -> bool {
        match self.exchanges.lock().await.get_mut(&exchange_id) {
            Some(exchange) => exchange.set_memory_chunk(chunk),
            None => false,
        }
    }

    pub async fn get(&self, exchange_id: ExchangeId) -> Option<Exchange> {
        self.exchanges.lock().await.get(&exchange_id).cloned()
    }

    /// Most recently created exchange on `thread_id` — used by the forced
    /// thread-expiry path, which has a thread to close out but no specific
    /// `exchange_id` (spec §4.2 C23).
    pub async fn latest_for_thread(&self, thread_id: ThreadId) -> Option<Exchange> {
        self.exchanges.lock().await.values().filter(|e| e.thread_id == thread_id).max_by_key(|e| e.created_at).cloned()
    }

    /// Seconds since the thread's `last_activity`, for the idle half of
    /// `is_ready_for_episode`'s readiness OR.
    pub async fn idle_secs(&self, thread_id: ThreadId) -> i64 {
        let threads = self.threads.lock().await;
        threads.get(&thread_id).map(|t| (Utc::now() - t.last_activity).num_seconds()).unwrap_or(0)
    }

    pub async fn turns_since_last_episode(&self, thread_id: ThreadId) -> u32 {
        self.readiness.lock().await.get(&thread_id).copied().unwrap_or_default().turns_since_last_episode
    }

    /// Called once an episode has actually been queued for `thread_id`.
    pub async fn mark_episode_queued(&self, thread_id: ThreadId) {
        self.readiness.lock().await.entry(thread_id).or_default().turns_since_last_episode = 0;
    }
}
