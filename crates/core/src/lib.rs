//! Shared domain types used across the cognitive core.
//!
//! Kept deliberately small and free of behaviour: every other crate depends
//! on this one, so it carries only the data shapes from the data model
//! (exchanges, threads, cycles, the inbound chat contract) and none of the
//! logic that operates on them.

mod chat_request;
mod cycle;
mod exchange;
mod thread;

pub use chat_request::{ChatRequest, MessageSource};
pub use cycle::{Cycle, CycleId, CycleStatus, CycleType};
pub use exchange::{Exchange, ExchangeId};
pub use thread::{Thread, ThreadId, ThreadState};

use uuid::Uuid;

/// Stable identifier for a user message turn's correlating thread +
/// channel + platform triple; threads are looked up by this, not by id.
pub type UserId = String;

pub fn new_id() -> Uuid {
    Uuid::new_v4()
}
