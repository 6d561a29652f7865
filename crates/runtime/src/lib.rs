//! Wiring crate: constructs every service in the cognitive core, owns the
//! queue workers and background loops, and drives graceful shutdown.
//!
//! None of the reasoning lives here — `cortex-digest`, `cortex-act`,
//! `cortex-drift`, `cortex-decay`, and `cortex-scheduler` own that. This
//! crate is the single place that knows how all of it fits together for
//! one running process, the same role `crates/runtime/src/server.rs`
//! played in the teacher.

mod daemon;
mod embed;
mod exchanges;
mod notifications;
mod pipeline;
mod queues;
mod state;

pub use daemon::{Daemon, DaemonHandle};
pub use embed::make_ollama_embed_fn;
pub use pipeline::{submit_message, SubmitOutcome};
pub use state::AppState;
