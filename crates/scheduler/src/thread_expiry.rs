//! C23 — thread-expiry scheduler: ages out idle threads and forces
//! episode generation for whatever conversation was left in them (spec
//! §4.2 table entry C23).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cortex_core::{Thread, ThreadId, ThreadState};
use cortex_queue::NamedQueue;
use tokio::sync::{Mutex, watch};
use tracing::info;

pub fn is_idle(thread: &Thread, now: DateTime<Utc>, idle_secs: i64) -> bool {
    thread.state == ThreadState::Active && (now - thread.last_activity).num_seconds() >= idle_secs
}

/// Expires every thread idle past `idle_secs`, returning the ids that were
/// just expired (callers force episode generation for each — a thread with
/// zero exchanges has nothing to consolidate and is skipped).
pub fn expire_idle_threads(threads: &mut HashMap<ThreadId, Thread>, now: DateTime<Utc>, idle_secs: i64) -> Vec<ThreadId> {
    let mut expired = Vec::new();
    for (id, thread) in threads.iter_mut() {
        if is_idle(thread, now, idle_secs) {
            thread.expire();
            if thread.exchange_count > 0 {
                expired.push(*id);
            }
        }
    }
    expired
}

/// Polls on a fixed interval, expiring idle threads and pushing one
/// forced episodic-worker job per expired thread (spec §4.9 readiness
/// gate is bypassed for these — the episodic worker treats a `forced`
/// payload as always-ready).
pub async fn run_thread_expiry_loop(
    threads: Arc<Mutex<HashMap<ThreadId, Thread>>>,
    episodic_queue: Arc<NamedQueue>,
    poll_secs: u64,
    idle_secs: i64,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(poll_secs));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let (expired, topics): (Vec<ThreadId>, Vec<String>) = {
                    let mut guard = threads.lock().await;
                    let now = Utc::now();
                    let expired = expire_idle_threads(&mut guard, now, idle_secs);
                    let topics = expired.iter().filter_map(|id| guard.get(id).map(|t| t.current_topic.clone())).collect();
                    (expired, topics)
                };
                for (thread_id, topic) in expired.into_iter().zip(topics) {
                    episodic_queue.push(serde_json::json!({
                        "thread_id": thread_id,
                        "topic": topic,
                        "forced": true,
                    })).await;
                    info!(%thread_id, topic, "thread expired: forced episode generation");
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_ok() && *shutdown_rx.borrow() {
                    info!("thread expiry scheduler shutting down");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_thread_past_threshold_is_expired() {
        let mut threads = HashMap::new();
        let mut thread = Thread::new("u1", "web", "test");
        thread.record_topic("general");
        thread.last_activity = Utc::now() - chrono::Duration::seconds(7200);
        let id = thread.id;
        threads.insert(id, thread);

        let expired = expire_idle_threads(&mut threads, Utc::now(), 3600);
        assert_eq!(expired, vec![id]);
        assert_eq!(threads[&id].state, ThreadState::Expired);
    }

    #[test]
    fn fresh_thread_is_not_expired() {
        let mut threads = HashMap::new();
        let mut thread = Thread::new("u1", "web", "test");
        thread.record_topic("general");
        let id = thread.id;
        threads.insert(id, thread);

        let expired = expire_idle_threads(&mut threads, Utc::now(), 3600);
        assert!(expired.is_empty());
    }

    #[test]
    fn thread_with_no_exchanges_is_not_forced() {
        let mut threads = HashMap::new();
        let mut thread = Thread::new("u1", "web", "test");
        thread.last_activity = Utc::now() - chrono::Duration::seconds(7200);
        let id = thread.id;
        threads.insert(id, thread);

        let expired = expire_idle_threads(&mut threads, Utc::now(), 3600);
        assert!(expired.is_empty());
        assert_eq!(threads[&id].state, ThreadState::Expired);
    }
}
