/// Guild Engine — Invariant Checks
///
/// Hard validation of a registry + claim grid. Returns the first failure
/// as a message. Used after a document load (once the integrity pass has
/// repaired what it can) and after every authoritative mutation in debug
/// builds.

use std::collections::{BTreeMap, BTreeSet};

use crate::claims::ClaimGrid;
use crate::domain::{GuildId, PlayerId, FOUNDER_AUTHORITY, FOUNDER_ROLE_ID};
use crate::registry::{validate_guild_name, GuildRegistry};

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run every check. `Err(message)` on the first failure.
pub fn try_validate_invariants(registry: &GuildRegistry, claims: &ClaimGrid) -> Result<(), String> {
    try_check_guild_ids(registry)?;
    try_check_names(registry)?;
    try_check_role_tables(registry)?;
    try_check_member_roles(registry)?;
    try_check_invites_disjoint(registry)?;
    try_check_indices(registry)?;
    try_check_represented(registry)?;
    try_check_claim_owners(registry, claims)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Individual checks
// ---------------------------------------------------------------------------

fn try_check_guild_ids(registry: &GuildRegistry) -> Result<(), String> {
    for (key, guild) in &registry.guilds {
        if *key != guild.id {
            return Err(format!(
                "[INVARIANT:guild_key] Guild {} stored under key {}",
                guild.id, key
            ));
        }
        if guild.id >= registry.next_guild_id {
            return Err(format!(
                "[INVARIANT:guild_counter] Guild id {} is not below next_guild_id {}",
                guild.id, registry.next_guild_id
            ));
        }
    }
    Ok(())
}

fn try_check_names(registry: &GuildRegistry) -> Result<(), String> {
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    for guild in registry.guilds.values() {
        if validate_guild_name(&guild.name).is_err() {
            return Err(format!(
                "[INVARIANT:guild_name] Guild {} has invalid name {:?}",
                guild.id, guild.name
            ));
        }
        if !seen.insert(guild.name.as_str()) {
            return Err(format!(
                "[INVARIANT:unique_name] Guild name {:?} used more than once",
                guild.name
            ));
        }
    }
    Ok(())
}

/// Dense role ids, protected roles present, founder role at full authority.
fn try_check_role_tables(registry: &GuildRegistry) -> Result<(), String> {
    for guild in registry.guilds.values() {
        let roles = guild.roles();
        if roles.len() < 2 {
            return Err(format!(
                "[INVARIANT:protected_roles] Guild {} has only {} roles",
                guild.id,
                roles.len()
            ));
        }
        for (idx, role) in roles.iter().enumerate() {
            if role.id as usize != idx {
                return Err(format!(
                    "[INVARIANT:dense_roles] Guild {} role at index {} has id {}",
                    guild.id, idx, role.id
                ));
            }
        }
        if roles[FOUNDER_ROLE_ID as usize].authority != FOUNDER_AUTHORITY {
            return Err(format!(
                "[INVARIANT:founder_authority] Guild {} founder role authority is {}",
                guild.id, roles[FOUNDER_ROLE_ID as usize].authority
            ));
        }
    }
    Ok(())
}

fn try_check_member_roles(registry: &GuildRegistry) -> Result<(), String> {
    for guild in registry.guilds.values() {
        for membership in guild.members() {
            if guild.role(membership.role_id).is_none() {
                return Err(format!(
                    "[INVARIANT:member_role] Player {:?} in guild {} holds missing role {}",
                    membership.player_id, guild.id, membership.role_id
                ));
            }
        }
    }
    Ok(())
}

fn try_check_invites_disjoint(registry: &GuildRegistry) -> Result<(), String> {
    for guild in registry.guilds.values() {
        if let Some(p) = guild.invites().find(|p| guild.has_member(p)) {
            return Err(format!(
                "[INVARIANT:invite_member] Player {:?} is both member of and invited to guild {}",
                p, guild.id
            ));
        }
    }
    Ok(())
}

/// Secondary indices equal what the guilds themselves say, with no empty sets.
fn try_check_indices(registry: &GuildRegistry) -> Result<(), String> {
    let (members, invites) = derive_indices(registry);
    if registry.player_guilds != members {
        return Err("[INVARIANT:player_guilds] Player-guild index disagrees with memberships"
            .to_string());
    }
    if registry.player_invites != invites {
        return Err("[INVARIANT:player_invites] Player-invite index disagrees with invites"
            .to_string());
    }
    Ok(())
}

fn try_check_represented(registry: &GuildRegistry) -> Result<(), String> {
    for (key, metrics) in &registry.metrics {
        if *key != metrics.player_id {
            return Err(format!(
                "[INVARIANT:metrics_key] Metrics for {:?} stored under {:?}",
                metrics.player_id, key
            ));
        }
        if let Some(g) = metrics.represented_guild {
            if !registry.is_player_in_guild(key, g) {
                return Err(format!(
                    "[INVARIANT:represented_guild] Player {:?} represents guild {} without membership",
                    key, g
                ));
            }
        }
    }
    Ok(())
}

fn try_check_claim_owners(registry: &GuildRegistry, claims: &ClaimGrid) -> Result<(), String> {
    for claim in claims.claims() {
        if !registry.guilds.contains_key(&claim.guild_id) {
            return Err(format!(
                "[INVARIANT:claim_owner] Claim at {} references missing guild {}",
                claim.position, claim.guild_id
            ));
        }
    }
    Ok(())
}

/// Player → guild-set indices as implied by the guilds' own member maps
/// and invite sets.
pub(crate) fn derive_indices(
    registry: &GuildRegistry,
) -> (
    BTreeMap<PlayerId, BTreeSet<GuildId>>,
    BTreeMap<PlayerId, BTreeSet<GuildId>>,
) {
    let mut members: BTreeMap<PlayerId, BTreeSet<GuildId>> = BTreeMap::new();
    let mut invites: BTreeMap<PlayerId, BTreeSet<GuildId>> = BTreeMap::new();
    for guild in registry.guilds.values() {
        for membership in guild.members() {
            members
                .entry(membership.player_id.clone())
                .or_default()
                .insert(guild.id);
        }
        for invited in guild.invites() {
            invites.entry(invited.clone()).or_default().insert(guild.id);
        }
    }
    (members, invites)
}
