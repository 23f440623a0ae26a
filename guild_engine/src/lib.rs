#![forbid(unsafe_code)]

/// Persisted document schema. Bumped on any incompatible document change.
pub const SCHEMA_VERSION: u32 = 1;

pub mod domain;
pub mod error;
pub mod permissions;
pub mod registry;
pub mod claims;
pub mod actions;
pub mod transitions;
pub mod observers;
pub mod access;
pub mod snapshot;
pub mod invariants;
pub mod integrity;
pub mod hashing;
pub mod engine;

pub use actions::{ActionTag, Broadcast, GuildAction};
pub use engine::{Accepted, GuildEngine};
pub use error::{ErrorKind, GuildError, ReplicaError};
