//! One module per registered autonomous action (spec §4.11), each
//! implementing [`crate::action::Action`] for registry uniformity.

pub mod communicate;
pub mod nothing;
pub mod nurture;
pub mod plan;
pub mod reflect;
pub mod seed_thread;
pub mod suggest;
