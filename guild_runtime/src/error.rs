//! Runtime error types.
//!
//! None of these cross the server/client boundary: wire errors drop the
//! frame, persistence errors fall back to an empty store, config errors
//! fall back to the built-in defaults.

use std::io;
use std::path::PathBuf;

use guild_engine::GuildError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame length {len} exceeds limit {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("empty frame")]
    EmptyFrame,
    #[error("protobuf decode failed: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("unknown action tag {0}")]
    UnknownTag(i32),
    #[error("message is missing field {0}")]
    MissingField(&'static str),
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("document rejected: {0}")]
    Rejected(#[from] GuildError),
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse guild server config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read guild server config from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
