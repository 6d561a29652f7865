use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ThreadId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadState {
    Active,
    Expired,
}

/// A per-channel conversational session. Selected or created by
/// `(user, channel, platform)`; only one thread per channel may be active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub user: String,
    pub channel: String,
    pub platform: String,
    pub current_topic: String,
    pub topic_history: Vec<String>,
    pub exchange_count: u64,
    pub state: ThreadState,
    pub last_activity: DateTime<Utc>,
}

impl Thread {
    pub fn new(user: impl Into<String>, channel: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user: user.into(),
            channel: channel.into(),
            platform: platform.into(),
            current_topic: String::new(),
            topic_history: Vec::new(),
            exchange_count: 0,
            state: ThreadState::Active,
            last_activity: Utc::now(),
        }
    }

    pub fn record_topic(&mut self, topic: impl Into<String>) {
        let topic = topic.into();
        if self.current_topic != topic {
            if !self.current_topic.is_empty() {
                self.topic_history.push(self.current_topic.clone());
            }
            self.current_topic = topic;
        }
        self.exchange_count += 1;
        self.last_activity = Utc::now();
    }

    pub fn expire(&mut self) {
        self.state = ThreadState::Expired;
    }
}
