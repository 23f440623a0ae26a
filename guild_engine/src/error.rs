/// Guild Engine — Rejection taxonomy
///
/// Every rejected operation maps to exactly one variant. Rejections never
/// leave partial state behind: checks run before any mutation.

use thiserror::Error;

use crate::claims::GridPos2d;
use crate::domain::{GuildId, GuildPerms, RoleId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input or reference to something that does not exist.
    Validation,
    /// Well-formed request the actor is not allowed to perform.
    Authorization,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuildError {
    #[error("invalid name {0:?}")]
    InvalidName(String),
    #[error("guild name {0:?} is already taken")]
    NameTaken(String),
    #[error("player is already in {0} guilds")]
    TooManyGuilds(usize),
    #[error("guild {0} not found")]
    GuildNotFound(GuildId),
    #[error("role {0} not found")]
    RoleNotFound(RoleId),
    #[error("unknown player {0:?}")]
    UnknownPlayer(String),
    #[error("player {0:?} is not a member")]
    NotAMember(String),
    #[error("player {0:?} is already a member")]
    AlreadyMember(String),
    #[error("player {0:?} is already invited")]
    AlreadyInvited(String),
    #[error("player {0:?} has no pending invite")]
    NotInvited(String),
    #[error("cell {0} is already claimed")]
    ClaimExists(GridPos2d),
    #[error("cell {0} is not claimed")]
    ClaimNotFound(GridPos2d),
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("guild id {0} already in use")]
    DuplicateGuild(GuildId),
    #[error("unsupported document schema version {0}")]
    UnsupportedSchema(u32),

    #[error("missing permission {0:?}")]
    MissingPermission(GuildPerms),
    #[error("insufficient authority")]
    InsufficientAuthority,
    #[error("role {0} is protected")]
    ProtectedRole(RoleId),
    #[error("the founder cannot leave the guild")]
    FounderCannotLeave,
    #[error("only the founder may do this")]
    NotFounder,
    #[error("cell {0} belongs to another guild")]
    ClaimNotOwned(GridPos2d),
}

impl GuildError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GuildError::MissingPermission(_)
            | GuildError::InsufficientAuthority
            | GuildError::ProtectedRole(_)
            | GuildError::FounderCannotLeave
            | GuildError::NotFounder
            | GuildError::ClaimNotOwned(_) => ErrorKind::Authorization,
            _ => ErrorKind::Validation,
        }
    }
}

/// Why a replica could not apply a broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplicaError {
    /// One or more broadcasts were missed; the replica must resync.
    #[error("sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },
    /// Already applied (or covered by the last snapshot).
    #[error("stale broadcast {got}, already at {current}")]
    Stale { current: u64, got: u64 },
    /// The broadcast does not fit the replica's state; it has diverged.
    #[error("broadcast {sequence} does not apply: {source}")]
    Diverged { sequence: u64, source: GuildError },
}

impl ReplicaError {
    /// Whether the replica should request a fresh snapshot.
    pub fn needs_resync(&self) -> bool {
        !matches!(self, ReplicaError::Stale { .. })
    }
}
