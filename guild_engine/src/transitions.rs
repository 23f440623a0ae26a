/// Guild Engine — Centralized Transition Logic
///
/// ALL guild/claim mutation driven by actions lives here.
///
/// `Mode::Authoritative` runs every permission and precondition check,
/// resolves the action (assigned ids, clamped authority) and only then
/// mutates. `Mode::Replica` trusts the action as already confirmed and
/// applies it directly. Both paths share the same mutators, so a replica
/// applying a broadcast ends in the same state as the server.

use crate::actions::GuildAction;
use crate::claims::{ClaimGrid, GridPos2d};
use crate::domain::GuildId;
use crate::error::GuildError;
use crate::observers::UpdateKind;
use crate::registry::GuildRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Authoritative,
    Replica,
}

/// Structured outcome of an applied action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// The resolved action, as it should be broadcast.
    pub action: GuildAction,
    pub update: UpdateKind,
    pub guild: Option<GuildId>,
    /// Claims dropped by a disband cascade.
    pub removed_claims: Vec<GridPos2d>,
}

impl Applied {
    fn new(action: GuildAction, update: UpdateKind) -> Self {
        let guild = action.guild();
        Self {
            action,
            update,
            guild,
            removed_claims: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Public dispatcher
// ---------------------------------------------------------------------------

/// Apply `action` performed by `actor`. On `Err` nothing was mutated.
pub fn apply_action(
    registry: &mut GuildRegistry,
    claims: &mut ClaimGrid,
    actor: &str,
    action: &GuildAction,
    mode: Mode,
) -> Result<Applied, GuildError> {
    let resolved = match mode {
        Mode::Authoritative => authorize(registry, claims, actor, action)?,
        Mode::Replica => action.clone(),
    };
    mutate(registry, claims, actor, resolved)
}

// ---------------------------------------------------------------------------
// Authorization + resolution (read-only)
// ---------------------------------------------------------------------------

fn authorize(
    registry: &GuildRegistry,
    claims: &ClaimGrid,
    actor: &str,
    action: &GuildAction,
) -> Result<GuildAction, GuildError> {
    let mut resolved = action.clone();

    match &mut resolved {
        GuildAction::Create { name, guild } => {
            registry.authorize_create(name, actor)?;
            *guild = Some(registry.next_guild_id());
        }
        GuildAction::Invite { guild, target } => {
            registry.authorize_invite(actor, *guild, target)?;
        }
        GuildAction::CancelInvite { guild, target } => {
            registry.authorize_cancel_invite(actor, *guild, target)?;
        }
        GuildAction::AcceptInvite { guild } => {
            registry.authorize_accept_invite(actor, *guild)?;
        }
        GuildAction::Kick { guild, target } => {
            registry.authorize_kick(actor, *guild, target)?;
        }
        GuildAction::Promote { guild, target, role } => {
            registry.authorize_change_role(actor, *guild, target, *role)?;
        }
        GuildAction::AddRole { guild } => {
            registry.authorize_add_role(actor, *guild)?;
        }
        GuildAction::RemoveRole { guild, role } => {
            registry.authorize_remove_role(actor, *guild, *role)?;
        }
        GuildAction::UpdateRole {
            guild,
            role,
            name,
            authority,
            ..
        } => {
            *authority = registry.authorize_update_role(actor, *guild, *role, name, *authority)?;
        }
        GuildAction::UpdateInfo { guild, name, .. } => {
            registry.authorize_update_info(actor, *guild, name)?;
        }
        GuildAction::Disband { guild } => {
            registry.authorize_disband(actor, *guild)?;
        }
        GuildAction::Leave { guild } => {
            registry.authorize_leave(actor, *guild)?;
        }
        GuildAction::RepresentGuild { guild } => {
            registry.authorize_represent(actor, *guild)?;
        }
        GuildAction::AddClaim { guild, position } => {
            let owner = resolve_claim_guild(registry, actor, *guild)?;
            registry.authorize_manage_claims(actor, owner)?;
            if claims.try_get_claim(*position).is_some() {
                return Err(GuildError::ClaimExists(*position));
            }
            *guild = Some(owner);
        }
        GuildAction::RemoveClaim { guild, position } => {
            let owner = resolve_claim_guild(registry, actor, *guild)?;
            registry.authorize_manage_claims(actor, owner)?;
            let claim = claims
                .try_get_claim(*position)
                .ok_or(GuildError::ClaimNotFound(*position))?;
            if claim.guild_id != owner {
                return Err(GuildError::ClaimNotOwned(*position));
            }
            *guild = Some(owner);
        }
    }

    Ok(resolved)
}

/// Explicit guild id, else the actor's represented guild.
fn resolve_claim_guild(
    registry: &GuildRegistry,
    actor: &str,
    guild: Option<GuildId>,
) -> Result<GuildId, GuildError> {
    guild
        .or_else(|| registry.represented_guild(actor))
        .ok_or(GuildError::MissingField("guild_id"))
}

// ---------------------------------------------------------------------------
// Mutation
// ---------------------------------------------------------------------------

fn mutate(
    registry: &mut GuildRegistry,
    claims: &mut ClaimGrid,
    actor: &str,
    action: GuildAction,
) -> Result<Applied, GuildError> {
    let update = match &action {
        GuildAction::Create { name, guild } => {
            let id = guild.ok_or(GuildError::MissingField("guild_id"))?;
            registry.insert_guild(id, name, actor)?;
            UpdateKind::GUILD_ADDED
        }
        GuildAction::Invite { guild, target } => {
            registry.add_invite(*guild, target)?;
            UpdateKind::MEMBERS_CHANGED
        }
        GuildAction::CancelInvite { guild, target } => {
            registry.remove_invite(*guild, target)?;
            UpdateKind::MEMBERS_CHANGED
        }
        GuildAction::AcceptInvite { guild } => {
            registry.add_player_to_guild(actor, *guild)?;
            UpdateKind::MEMBERS_CHANGED
        }
        GuildAction::Kick { guild, target } => {
            registry.remove_player_from_guild(target, *guild)?;
            UpdateKind::MEMBERS_CHANGED
        }
        GuildAction::Leave { guild } => {
            registry.remove_player_from_guild(actor, *guild)?;
            UpdateKind::MEMBERS_CHANGED
        }
        GuildAction::Promote { guild, target, role } => {
            registry.set_member_role(*guild, target, *role)?;
            UpdateKind::ROLES_CHANGED
        }
        GuildAction::AddRole { guild } => {
            registry.push_role(*guild)?;
            UpdateKind::ROLES_CHANGED
        }
        GuildAction::RemoveRole { guild, role } => {
            registry.remove_role_at(*guild, *role)?;
            UpdateKind::ROLES_CHANGED
        }
        GuildAction::UpdateRole {
            guild,
            role,
            name,
            authority,
            permissions,
        } => {
            registry.overwrite_role(*guild, *role, name, *authority, *permissions)?;
            UpdateKind::ROLES_CHANGED
        }
        GuildAction::UpdateInfo { guild, name, color } => {
            registry.set_guild_info(*guild, name, *color)?;
            UpdateKind::INFO_CHANGED
        }
        GuildAction::Disband { guild } => {
            registry.remove_guild(*guild)?;
            let removed = claims.remove_guild_claims(*guild);
            let mut update = UpdateKind::GUILD_REMOVED;
            if !removed.is_empty() {
                update |= UpdateKind::CLAIMS_CHANGED;
            }
            let mut applied = Applied::new(action, update);
            applied.removed_claims = removed;
            return Ok(applied);
        }
        GuildAction::RepresentGuild { guild } => {
            registry.set_represented(actor, *guild);
            UpdateKind::METRICS_CHANGED
        }
        GuildAction::AddClaim { guild, position } => {
            let owner = guild.ok_or(GuildError::MissingField("guild_id"))?;
            claims.add_claim(*position, owner)?;
            UpdateKind::CLAIMS_CHANGED
        }
        GuildAction::RemoveClaim { position, .. } => {
            claims.remove_claim(*position)?;
            UpdateKind::CLAIMS_CHANGED
        }
    };

    Ok(Applied::new(action, update))
}
