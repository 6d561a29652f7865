//! The background worker pack: C17 memory chunker, C18 episodic worker,
//! C19 semantic consolidation, C20 tool worker (spec §4.8, §4.10, §4.12).
//!
//! Every module here is a set of pure or near-pure functions plus small
//! in-memory bookkeeping structs (staging, heartbeats, deferrals) — the
//! actual queue loop (`cortex_queue::run_worker`) and store ownership live
//! in `cortex-runtime`, which wires these functions into job handlers the
//! same way `crates/memory/src/manager/sleep_logic.rs` wired its structured
//! insight mapping into the teacher's sleep cycle.

pub mod chunker;
pub mod episodic;
pub mod semantic;
pub mod tool_worker;

use futures::future::BoxFuture;
use std::sync::Arc;

use cortex_memory::Embedding;

/// Shared embedding hook, mirroring `cortex_digest::EmbedFn` — duplicated
/// rather than imported since workers and digest are peer crates with no
/// dependency between them.
pub type EmbedFn = Arc<dyn Fn(&str) -> BoxFuture<'static, Option<Embedding>> + Send + Sync>;
