//! C1 — queue runtime: named FIFO queues with at-least-once delivery, a
//! per-queue default timeout, and a per-worker `{idle → busy → idle | off}`
//! state machine (spec §4.1). One worker owns one queue, blocks on pop,
//! and on abnormal exit its in-flight job is re-queued; at startup each
//! worker reaps jobs left in the in-progress registry by a previous crash.
//!
//! The worker loop's shutdown handshake is grounded in the teacher's
//! background-task pattern: a `watch::Sender<bool>` fanned out to every
//! spawned task, `tokio::select!` between the task's own wakeup and
//! `shutdown_rx.changed()`.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify, watch};
use tracing::{info, warn};
use uuid::Uuid;

/// One unit of work. `payload` is queue-specific JSON — the memory-chunker,
/// episodic, semantic-consolidation, and tool queues each define their own
/// payload shape in `cortex-workers`/`cortex-act`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub payload: serde_json::Value,
    pub retry_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl Job {
    pub fn new(payload: serde_json::Value) -> Self {
        Self { id: Uuid::new_v4(), payload, retry_count: 0, enqueued_at: Utc::now() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Busy,
    Off,
}

/// Backoff used by `NamedQueue::requeue_with_backoff` and reused directly by
/// the episodic worker (spec §4.1: "retry counter; requeue with exponential
/// backoff min(max, 2^n) seconds is provided as a library call").
pub fn exponential_backoff_secs(retry_count: u32, max_secs: u64) -> u64 {
    let pow = 2u64.saturating_pow(retry_count.min(62));
    pow.min(max_secs)
}

struct QueueInner {
    pending: VecDeque<Job>,
    in_progress: HashMap<Uuid, Job>,
}

/// A single named FIFO queue (e.g. "prompt", "memory-chunker", "episodic",
/// "semantic-consolidation", "tool", "output").
pub struct NamedQueue {
    pub name: String,
    pub default_timeout: Duration,
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl NamedQueue {
    pub fn new(name: impl Into<String>, default_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            default_timeout,
            inner: Mutex::new(QueueInner { pending: VecDeque::new(), in_progress: HashMap::new() }),
            notify: Notify::new(),
        })
    }

    pub async fn push(&self, payload: serde_json::Value) -> Uuid {
        let job = Job::new(payload);
        let id = job.id;
        self.inner.lock().await.pending.push_back(job);
        self.notify.notify_one();
        id
    }

    fn requeue_job(inner: &mut QueueInner, job: Job) {
        inner.pending.push_back(job);
    }

    /// Blocks until a job is available, then atomically moves it from
    /// `pending` into `in_progress`. Ownership of the job stays with the
    /// caller until `ack`/`requeue_with_backoff`/`fail` is called.
    pub async fn pop(&self) -> Job {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some(job) = inner.pending.pop_front() {
                    inner.in_progress.insert(job.id, job.clone());
                    return job;
                }
            }
            self.notify.notified().await;
        }
    }

    pub async fn ack(&self, id: Uuid) {
        self.inner.lock().await.in_progress.remove(&id);
    }

    /// Increments `retry_count`, computes `min(max_secs, 2^retry_count)`, and
    /// re-enqueues after that delay on a detached task so the worker itself
    /// returns to `idle` immediately instead of blocking on the backoff.
    pub fn requeue_with_backoff(self: &Arc<Self>, mut job: Job, max_secs: u64) {
        job.retry_count += 1;
        let delay = exponential_backoff_secs(job.retry_count, max_secs);
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            {
                let mut inner = queue.inner.lock().await;
                inner.in_progress.remove(&job.id);
            }
            tokio::time::sleep(Duration::from_secs(delay)).await;
            let mut inner = queue.inner.lock().await;
            Self::requeue_job(&mut inner, job);
            drop(inner);
            queue.notify.notify_one();
        });
    }

    pub async fn fail(&self, id: Uuid) {
        self.inner.lock().await.in_progress.remove(&id);
    }

    /// Run at startup: any job left in `in_progress` belonged to a worker
    /// that crashed mid-execution. Move all of them back onto `pending`
    /// (at-least-once — the job may run again).
    pub async fn reap_in_progress(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let stale: Vec<Job> = inner.in_progress.drain().map(|(_, job)| job).collect();
        let count = stale.len();
        for job in stale {
            inner.pending.push_back(job);
        }
        if count > 0 {
            self.notify.notify_one();
        }
        count
    }

    pub async fn pending_len(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    pub async fn in_progress_len(&self) -> usize {
        self.inner.lock().await.in_progress.len()
    }

    pub async fn is_drained(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.pending.is_empty() && inner.in_progress.is_empty()
    }
}

pub enum JobOutcome {
    Success,
    Retry,
    /// Terminal failure — the job is dropped, not requeued.
    Fail,
}

/// Runs the idle/busy/off worker loop against one queue, grounded in the
/// teacher's `watch`-channel background-task idiom. `handler` is given each
/// job's payload in turn, sequentially — a worker owns exactly one queue.
pub async fn run_worker<F, Fut>(queue: Arc<NamedQueue>, max_backoff_secs: u64, mut shutdown_rx: watch::Receiver<bool>, handler: F)
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobOutcome> + Send,
{
    let (state_tx, _state_rx) = watch::channel(WorkerState::Idle);
    loop {
        let job = tokio::select! {
            job = queue.pop() => job,
            changed = shutdown_rx.changed() => {
                if changed.is_ok() && *shutdown_rx.borrow() {
                    let _ = state_tx.send(WorkerState::Off);
                    info!(queue = %queue.name, "worker shutting down");
                    return;
                }
                continue;
            }
        };

        let _ = state_tx.send(WorkerState::Busy);
        let outcome = tokio::time::timeout(queue.default_timeout, handler(job.clone())).await;

        match outcome {
            Ok(JobOutcome::Success) => queue.ack(job.id).await,
            Ok(JobOutcome::Retry) => queue.requeue_with_backoff(job, max_backoff_secs),
            Ok(JobOutcome::Fail) => {
                warn!(queue = %queue.name, job_id = %job.id, "job failed terminally");
                queue.fail(job.id).await;
            }
            Err(_) => {
                warn!(queue = %queue.name, job_id = %job.id, timeout = ?queue.default_timeout, "job timed out");
                queue.requeue_with_backoff(job, max_backoff_secs);
            }
        }
        let _ = state_tx.send(WorkerState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_cap() {
        assert_eq!(exponential_backoff_secs(0, 600), 1);
        assert_eq!(exponential_backoff_secs(1, 600), 2);
        assert_eq!(exponential_backoff_secs(4, 600), 16);
        assert_eq!(exponential_backoff_secs(20, 600), 600);
    }

    #[tokio::test]
    async fn push_then_pop_is_fifo() {
        let queue = NamedQueue::new("test", Duration::from_secs(60));
        queue.push(serde_json::json!({"n": 1})).await;
        queue.push(serde_json::json!({"n": 2})).await;
        let first = queue.pop().await;
        let second = queue.pop().await;
        assert_eq!(first.payload["n"], 1);
        assert_eq!(second.payload["n"], 2);
    }

    #[tokio::test]
    async fn pop_moves_job_to_in_progress_until_ack() {
        let queue = NamedQueue::new("test", Duration::from_secs(60));
        queue.push(serde_json::json!({})).await;
        let job = queue.pop().await;
        assert_eq!(queue.in_progress_len().await, 1);
        queue.ack(job.id).await;
        assert_eq!(queue.in_progress_len().await, 0);
    }

    #[tokio::test]
    async fn reap_in_progress_restores_pending_jobs() {
        let queue = NamedQueue::new("test", Duration::from_secs(60));
        queue.push(serde_json::json!({})).await;
        let _job = queue.pop().await;
        assert_eq!(queue.in_progress_len().await, 1);
        let reaped = queue.reap_in_progress().await;
        assert_eq!(reaped, 1);
        assert_eq!(queue.pending_len().await, 1);
        assert_eq!(queue.in_progress_len().await, 0);
    }

    #[tokio::test]
    async fn is_drained_reflects_both_sets() {
        let queue = NamedQueue::new("test", Duration::from_secs(60));
        assert!(queue.is_drained().await);
        queue.push(serde_json::json!({})).await;
        assert!(!queue.is_drained().await);
    }
}
