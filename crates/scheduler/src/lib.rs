//! C22/C23 — idle consolidation and thread-expiry schedulers: the two
//! periodic background timers that sit between the digest pipeline and
//! the memory-consolidation workers (spec §4.2).

pub mod idle_consolidation;
pub mod thread_expiry;

pub use idle_consolidation::{queues_drained, run_idle_consolidation_loop, should_trigger, topics_needing_consolidation, unconsolidated_counts_by_topic};
pub use thread_expiry::{expire_idle_threads, is_idle, run_thread_expiry_loop};
