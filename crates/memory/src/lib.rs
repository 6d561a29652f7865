//! The memory lattice (spec §3–§4.3, §4.9, §4.10): working memory, gists,
//! facts, episodes, semantic concepts, user traits, and identity vectors.
//!
//! Persistence (Redis/Postgres) is explicitly out of scope (spec §1) —
//! every store here models the write path, caps, TTL, dedup, and decay
//! logic a real backend would enforce, behind plain in-memory structures a
//! storage adapter can later back with a real keyspace. Each store owns a
//! stable conceptual prefix the way the spec's Redis keyspace is divided
//! (`working_memory:*`, `gist:*`, `fact:*`, ...).

pub mod embedding;
pub mod episode;
pub mod fact;
pub mod gist;
pub mod identity;
pub mod semantic;
pub mod user_trait;
pub mod working_memory;

pub use embedding::{Embedding, cosine_similarity, jaccard_similarity};
pub use episode::{Episode, EpisodicStore, SalienceFactors, SemanticConsolidationStatus};
pub use fact::{Fact, FactStore};
pub use gist::{Gist, GistStore, GistType};
pub use identity::{IdentityDimension, IdentityVector, IdentityVectors};
pub use semantic::{SemanticConcept, SemanticRelationship, SemanticStore};
pub use user_trait::{TraitCategory, TraitSource, TraitStore, UserTrait};
pub use working_memory::{Turn, TurnRole, WorkingMemoryStore};
