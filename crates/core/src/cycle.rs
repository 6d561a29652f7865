use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type CycleId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleType {
    UserInput,
    FastResponse,
    ToolWork,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Processing,
    Completed,
    Cancelled,
    Failed,
}

/// A correlation record for one reasoning operation: user input, the fast
/// acknowledgement it may spawn, and the tool-worker job behind it all
/// share a root so they can be traced and cancelled together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cycle {
    pub cycle_id: CycleId,
    pub parent_cycle_id: Option<CycleId>,
    pub root_cycle_id: CycleId,
    pub kind: CycleType,
    pub topic: String,
    pub status: CycleStatus,
    pub created_at: DateTime<Utc>,
}

impl Cycle {
    pub fn root(kind: CycleType, topic: impl Into<String>) -> Self {
        let id = Uuid::new_v4();
        Self {
            cycle_id: id,
            parent_cycle_id: None,
            root_cycle_id: id,
            kind,
            topic: topic.into(),
            status: CycleStatus::Processing,
            created_at: Utc::now(),
        }
    }

    pub fn child(&self, kind: CycleType) -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            parent_cycle_id: Some(self.cycle_id),
            root_cycle_id: self.root_cycle_id,
            kind,
            topic: self.topic.clone(),
            status: CycleStatus::Processing,
            created_at: Utc::now(),
        }
    }
}
