//! C16 — the digest pipeline: the single entry point every inbound
//! message passes through (spec §4.4). Ties together the memory lattice,
//! classifiers, and mode router crates into the five-phase flow; owns no
//! state of its own beyond the per-topic caches in [`cycles`] and
//! [`reward`].

pub mod context;
pub mod cycles;
pub mod fast_path;
pub mod pipeline;
pub mod proactive;
pub mod prompt;
pub mod reward;

pub use context::{NullWorldState, WorldStateSource, context_warmth, world_state_nonempty};
pub use cycles::CycleTracker;
pub use pipeline::{DigestContext, DigestOutcome, EmbedFn, inactivity_episode_trigger, run_digest};
pub use proactive::{NullProactiveFeedback, ProactiveCorrelationOutcome, ProactiveFeedback};
pub use reward::{BehaviourRewardCache, estimate_behaviour_reward};
