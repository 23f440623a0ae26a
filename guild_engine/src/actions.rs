/// Guild Engine — Action Definitions
///
/// Actions are pure data: intent plus the minimum identifying fields.
/// They contain ZERO transition logic; `transitions` interprets them.
///
/// A request from a client and the broadcast the server re-emits carry
/// the same `GuildAction`; the broadcast version is *resolved* (assigned
/// guild ids filled in, role authority clamped).

use crate::claims::GridPos2d;
use crate::domain::{GuildId, GuildPerms, PlayerId, Rgb, RoleId};

/// Closed set of action kinds. Wire tags are derived from this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionTag {
    Create,
    Invite,
    CancelInvite,
    AcceptInvite,
    Kick,
    Promote,
    AddRole,
    RemoveRole,
    UpdateRole,
    UpdateInfo,
    Disband,
    Leave,
    RepresentGuild,
    AddClaim,
    RemoveClaim,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuildAction {
    /// `guild` is empty on requests and carries the assigned id on broadcasts.
    Create { name: String, guild: Option<GuildId> },
    Invite { guild: GuildId, target: PlayerId },
    CancelInvite { guild: GuildId, target: PlayerId },
    AcceptInvite { guild: GuildId },
    Kick { guild: GuildId, target: PlayerId },
    Promote { guild: GuildId, target: PlayerId, role: RoleId },
    AddRole { guild: GuildId },
    RemoveRole { guild: GuildId, role: RoleId },
    UpdateRole {
        guild: GuildId,
        role: RoleId,
        name: String,
        authority: i32,
        permissions: GuildPerms,
    },
    UpdateInfo { guild: GuildId, name: String, color: Rgb },
    Disband { guild: GuildId },
    Leave { guild: GuildId },
    /// `None` stops representing any guild.
    RepresentGuild { guild: Option<GuildId> },
    /// `guild` falls back to the actor's represented guild when empty.
    AddClaim { guild: Option<GuildId>, position: GridPos2d },
    RemoveClaim { guild: Option<GuildId>, position: GridPos2d },
}

impl GuildAction {
    pub fn tag(&self) -> ActionTag {
        match self {
            GuildAction::Create { .. } => ActionTag::Create,
            GuildAction::Invite { .. } => ActionTag::Invite,
            GuildAction::CancelInvite { .. } => ActionTag::CancelInvite,
            GuildAction::AcceptInvite { .. } => ActionTag::AcceptInvite,
            GuildAction::Kick { .. } => ActionTag::Kick,
            GuildAction::Promote { .. } => ActionTag::Promote,
            GuildAction::AddRole { .. } => ActionTag::AddRole,
            GuildAction::RemoveRole { .. } => ActionTag::RemoveRole,
            GuildAction::UpdateRole { .. } => ActionTag::UpdateRole,
            GuildAction::UpdateInfo { .. } => ActionTag::UpdateInfo,
            GuildAction::Disband { .. } => ActionTag::Disband,
            GuildAction::Leave { .. } => ActionTag::Leave,
            GuildAction::RepresentGuild { .. } => ActionTag::RepresentGuild,
            GuildAction::AddClaim { .. } => ActionTag::AddClaim,
            GuildAction::RemoveClaim { .. } => ActionTag::RemoveClaim,
        }
    }

    /// Guild the action refers to, when it names one.
    pub fn guild(&self) -> Option<GuildId> {
        match self {
            GuildAction::Create { guild, .. }
            | GuildAction::RepresentGuild { guild }
            | GuildAction::AddClaim { guild, .. }
            | GuildAction::RemoveClaim { guild, .. } => *guild,
            GuildAction::Invite { guild, .. }
            | GuildAction::CancelInvite { guild, .. }
            | GuildAction::AcceptInvite { guild }
            | GuildAction::Kick { guild, .. }
            | GuildAction::Promote { guild, .. }
            | GuildAction::AddRole { guild }
            | GuildAction::RemoveRole { guild, .. }
            | GuildAction::UpdateRole { guild, .. }
            | GuildAction::UpdateInfo { guild, .. }
            | GuildAction::Disband { guild }
            | GuildAction::Leave { guild } => Some(*guild),
        }
    }
}

/// A server-confirmed action, annotated with the acting player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broadcast {
    /// Strictly increasing per server; replicas detect gaps with it.
    pub sequence: u64,
    pub actor: PlayerId,
    pub action: GuildAction,
}
