#![forbid(unsafe_code)]

//! Guild Runtime
//!
//! Wraps `guild_engine` with the pieces a host needs: the authoritative
//! server hub, the client replica, the wire protocol, persistence and
//! configuration.
//!
//! No domain logic lives here; every transition, permission check and
//! invariant is delegated to the engine.

pub mod error;
pub mod config;
pub mod logging;
pub mod proto_types;
pub mod proto_bridge;
pub mod codec;
pub mod persistence;
pub mod server;
pub mod client;

pub use client::{ClientReplica, SyncState};
pub use config::{load_config_from_env, ServerConfig};
pub use persistence::{JsonFileGateway, MemoryGateway, PersistenceGateway};
pub use server::{ConnState, ConnectionId, GuildServer, SharedServer};
