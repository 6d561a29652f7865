//! The catch-up buffer: a bounded ring of notifications the background
//! workers produced while nobody was listening (spec §4.12's "output"
//! side). Tool-container lifecycle and web-push delivery are explicit
//! non-goals, so this stays an in-memory ring rather than a literal
//! `NamedQueue` with a real dispatch transport — a client reconnecting
//! within the TTL just asks for what it missed.

use std::collections::VecDeque;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cortex_workers::tool_worker::DeliveryDecision;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Ring capacity (spec §4.12 supplement).
const MAX_ENTRIES: usize = 200;
/// How long a buffered notification stays eligible for catch-up delivery.
const TTL_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct Notification {
    pub id: Uuid,
    pub topic: String,
    pub message: String,
    pub decision: DeliveryDecision,
    pub created_at: DateTime<Utc>,
}

pub struct NotificationBuffer {
    entries: Mutex<VecDeque<Notification>>,
}

impl NotificationBuffer {
    pub fn new() -> Self {
        Self { entries: Mutex::new(VecDeque::new()) }
    }

    /// Buffers a notification regardless of `decision` — `Suppressed`
    /// entries are kept too, so a caller inspecting history can see that a
    /// follow-up was deliberately dropped rather than simply missing.
    pub async fn push(&self, topic: String, message: String, decision: DeliveryDecision) -> Uuid {
        let notification = Notification { id: Uuid::new_v4(), topic, message, decision, created_at: Utc::now() };
        let id = notification.id;
        let mut entries = self.entries.lock().await;
        entries.push_back(notification);
        while entries.len() > MAX_ENTRIES {
            entries.pop_front();
        }
        id
    }

    /// Everything still inside the TTL window, oldest first, excluding
    /// anything suppressed — a reconnecting client wants what it missed,
    /// not what was deliberately held back.
    pub async fn catch_up(&self) -> Vec<Notification> {
        let cutoff = Utc::now() - ChronoDuration::hours(TTL_HOURS);
        self.entries
            .lock()
            .await
            .iter()
            .filter(|n| n.created_at >= cutoff && n.decision != DeliveryDecision::Suppressed)
            .cloned()
            .collect()
    }
}

impl Default for NotificationBuffer {
    fn default() -> Self {
        Self::new()
    }
}
