/// Guild Engine — Guild Registry
///
/// Primary store: guilds by id. Secondary indices: player → guilds and
/// player → pending invites, maintained alongside every membership and
/// invite mutation. Per-player metrics live here too.
///
/// Two layers:
///   - `authorize_*` — read-only checks for authoritative requests.
///   - structural mutators — apply a (server-confirmed) change; they only
///     refuse changes that would corrupt the store.
/// The public checked operations are `authorize_*` followed by the
/// matching mutator.

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{
    EngineLimits, Guild, GuildId, GuildPerms, PlayerId, PlayerMetrics, Rgb, Role, RoleId,
    FOUNDER_ROLE_ID, GUILD_NAME_MAX, GUILD_NAME_MIN, ROLE_NAME_MAX,
};
use crate::error::GuildError;
use crate::permissions::{
    clamp_authority, is_protected_role, require_authority_over, require_permission,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuildRegistry {
    pub(crate) guilds: BTreeMap<GuildId, Guild>,
    pub(crate) player_guilds: BTreeMap<PlayerId, BTreeSet<GuildId>>,
    pub(crate) player_invites: BTreeMap<PlayerId, BTreeSet<GuildId>>,
    pub(crate) metrics: BTreeMap<PlayerId, PlayerMetrics>,
    pub(crate) next_guild_id: GuildId,
    pub(crate) limits: EngineLimits,
}

/// Validate a guild name: 3–32 characters.
pub fn validate_guild_name(name: &str) -> Result<(), GuildError> {
    let len = name.chars().count();
    if (GUILD_NAME_MIN..=GUILD_NAME_MAX).contains(&len) {
        Ok(())
    } else {
        Err(GuildError::InvalidName(name.to_string()))
    }
}

pub fn validate_role_name(name: &str) -> Result<(), GuildError> {
    let len = name.chars().count();
    if len == 0 || len > ROLE_NAME_MAX {
        return Err(GuildError::InvalidName(name.to_string()));
    }
    Ok(())
}

impl GuildRegistry {
    pub fn new(limits: EngineLimits) -> Self {
        Self {
            limits,
            ..Default::default()
        }
    }

    pub fn limits(&self) -> EngineLimits {
        self.limits
    }

    // ── Queries ────────────────────────────────────────────────────

    pub fn get_guild(&self, guild_id: GuildId) -> Option<&Guild> {
        self.guilds.get(&guild_id)
    }

    pub fn guilds(&self) -> impl Iterator<Item = &Guild> {
        self.guilds.values()
    }

    pub fn guild_by_name(&self, name: &str) -> Option<&Guild> {
        self.guilds.values().find(|g| g.name == name)
    }

    pub fn next_guild_id(&self) -> GuildId {
        self.next_guild_id
    }

    /// Guild ids `player_id` belongs to (secondary index).
    pub fn player_guilds(&self, player_id: &str) -> impl Iterator<Item = GuildId> + '_ {
        self.player_guilds
            .get(player_id)
            .into_iter()
            .flat_map(|s| s.iter().copied())
    }

    /// Guild ids `player_id` is currently invited to (secondary index).
    pub fn player_invites(&self, player_id: &str) -> impl Iterator<Item = GuildId> + '_ {
        self.player_invites
            .get(player_id)
            .into_iter()
            .flat_map(|s| s.iter().copied())
    }

    pub fn is_player_in_guild(&self, player_id: &str, guild_id: GuildId) -> bool {
        self.player_guilds
            .get(player_id)
            .is_some_and(|s| s.contains(&guild_id))
    }

    pub fn players_role(&self, guild_id: GuildId, player_id: &str) -> Option<&Role> {
        self.guilds.get(&guild_id)?.role_of(player_id)
    }

    pub fn metrics(&self, player_id: &str) -> Option<&PlayerMetrics> {
        self.metrics.get(player_id)
    }

    pub fn all_metrics(&self) -> impl Iterator<Item = &PlayerMetrics> {
        self.metrics.values()
    }

    /// A player id is known once the server has seen it.
    pub fn is_known_player(&self, player_id: &str) -> bool {
        self.metrics.contains_key(player_id)
    }

    pub fn represented_guild(&self, player_id: &str) -> Option<GuildId> {
        self.metrics.get(player_id)?.represented_guild
    }

    fn guild(&self, guild_id: GuildId) -> Result<&Guild, GuildError> {
        self.guilds
            .get(&guild_id)
            .ok_or(GuildError::GuildNotFound(guild_id))
    }

    fn guild_mut(&mut self, guild_id: GuildId) -> Result<&mut Guild, GuildError> {
        self.guilds
            .get_mut(&guild_id)
            .ok_or(GuildError::GuildNotFound(guild_id))
    }

    fn actor_role(&self, guild_id: GuildId, actor: &str) -> Result<&Role, GuildError> {
        self.guild(guild_id)?
            .role_of(actor)
            .ok_or_else(|| GuildError::NotAMember(actor.to_string()))
    }

    fn require_known(&self, player_id: &str) -> Result<(), GuildError> {
        if self.is_known_player(player_id) {
            Ok(())
        } else {
            Err(GuildError::UnknownPlayer(player_id.to_string()))
        }
    }

    fn name_in_use(&self, name: &str, except: Option<GuildId>) -> bool {
        self.guilds
            .values()
            .any(|g| g.name == name && Some(g.id) != except)
    }

    // ── Authorization (read-only) ──────────────────────────────────

    pub fn authorize_create(&self, name: &str, founder: &str) -> Result<(), GuildError> {
        validate_guild_name(name)?;
        if self.name_in_use(name, None) {
            return Err(GuildError::NameTaken(name.to_string()));
        }
        let active = self.player_guilds(founder).count();
        if active >= self.limits.max_guilds_per_player {
            return Err(GuildError::TooManyGuilds(active));
        }
        Ok(())
    }

    pub fn authorize_disband(&self, actor: &str, guild_id: GuildId) -> Result<(), GuildError> {
        let role = self.actor_role(guild_id, actor)?;
        if role.id != FOUNDER_ROLE_ID {
            return Err(GuildError::NotFounder);
        }
        Ok(())
    }

    pub fn authorize_invite(
        &self,
        actor: &str,
        guild_id: GuildId,
        target: &str,
    ) -> Result<(), GuildError> {
        let role = self.actor_role(guild_id, actor)?;
        require_permission(role, GuildPerms::INVITE)?;
        self.require_known(target)?;
        let guild = self.guild(guild_id)?;
        if guild.has_member(target) {
            return Err(GuildError::AlreadyMember(target.to_string()));
        }
        if guild.is_invited(target) {
            return Err(GuildError::AlreadyInvited(target.to_string()));
        }
        Ok(())
    }

    /// Cancelling one's own invite needs no permission.
    pub fn authorize_cancel_invite(
        &self,
        actor: &str,
        guild_id: GuildId,
        target: &str,
    ) -> Result<(), GuildError> {
        let guild = self.guild(guild_id)?;
        if actor != target {
            let role = self.actor_role(guild_id, actor)?;
            require_permission(role, GuildPerms::INVITE)?;
        }
        if !guild.is_invited(target) {
            return Err(GuildError::NotInvited(target.to_string()));
        }
        Ok(())
    }

    pub fn authorize_accept_invite(&self, player: &str, guild_id: GuildId) -> Result<(), GuildError> {
        let guild = self.guild(guild_id)?;
        if !guild.is_invited(player) {
            return Err(GuildError::NotInvited(player.to_string()));
        }
        if guild.has_member(player) {
            return Err(GuildError::AlreadyMember(player.to_string()));
        }
        Ok(())
    }

    pub fn authorize_leave(&self, player: &str, guild_id: GuildId) -> Result<(), GuildError> {
        let role = self.actor_role(guild_id, player)?;
        if role.id == FOUNDER_ROLE_ID {
            return Err(GuildError::FounderCannotLeave);
        }
        Ok(())
    }

    pub fn authorize_kick(
        &self,
        actor: &str,
        guild_id: GuildId,
        target: &str,
    ) -> Result<(), GuildError> {
        let acting = self.actor_role(guild_id, actor)?;
        let target_role = self.actor_role(guild_id, target)?;
        require_permission(acting, GuildPerms::KICK)?;
        require_authority_over(acting, target_role)
    }

    pub fn authorize_change_role(
        &self,
        actor: &str,
        guild_id: GuildId,
        target: &str,
        role_id: RoleId,
    ) -> Result<(), GuildError> {
        let guild = self.guild(guild_id)?;
        let acting = self.actor_role(guild_id, actor)?;
        let current = self.actor_role(guild_id, target)?;
        let new_role = guild.role(role_id).ok_or(GuildError::RoleNotFound(role_id))?;
        require_permission(acting, GuildPerms::PROMOTE)?;
        require_authority_over(acting, current)?;
        require_authority_over(acting, new_role)
    }

    pub fn authorize_add_role(&self, actor: &str, guild_id: GuildId) -> Result<(), GuildError> {
        let acting = self.actor_role(guild_id, actor)?;
        require_permission(acting, GuildPerms::MANAGE_ROLES)
    }

    pub fn authorize_remove_role(
        &self,
        actor: &str,
        guild_id: GuildId,
        role_id: RoleId,
    ) -> Result<(), GuildError> {
        let guild = self.guild(guild_id)?;
        let acting = self.actor_role(guild_id, actor)?;
        require_permission(acting, GuildPerms::MANAGE_ROLES)?;
        if is_protected_role(role_id) {
            return Err(GuildError::ProtectedRole(role_id));
        }
        let target = guild.role(role_id).ok_or(GuildError::RoleNotFound(role_id))?;
        require_authority_over(acting, target)
    }

    /// Returns the authority that will actually be stored.
    pub fn authorize_update_role(
        &self,
        actor: &str,
        guild_id: GuildId,
        role_id: RoleId,
        name: &str,
        authority: i32,
    ) -> Result<i32, GuildError> {
        let guild = self.guild(guild_id)?;
        let acting = self.actor_role(guild_id, actor)?;
        require_permission(acting, GuildPerms::MANAGE_ROLES)?;
        validate_role_name(name)?;
        let target = guild.role(role_id).ok_or(GuildError::RoleNotFound(role_id))?;
        require_authority_over(acting, target)?;
        Ok(clamp_authority(acting, authority))
    }

    pub fn authorize_update_info(
        &self,
        actor: &str,
        guild_id: GuildId,
        name: &str,
    ) -> Result<(), GuildError> {
        let acting = self.actor_role(guild_id, actor)?;
        require_permission(acting, GuildPerms::MANAGE_GUILD_INFO)?;
        validate_guild_name(name)?;
        if self.name_in_use(name, Some(guild_id)) {
            return Err(GuildError::NameTaken(name.to_string()));
        }
        Ok(())
    }

    pub fn authorize_represent(
        &self,
        player: &str,
        guild_id: Option<GuildId>,
    ) -> Result<(), GuildError> {
        match guild_id {
            None => Ok(()),
            Some(id) => self.actor_role(id, player).map(|_| ()),
        }
    }

    /// Claim edits need membership plus `MANAGE_CLAIMS`.
    pub fn authorize_manage_claims(&self, actor: &str, guild_id: GuildId) -> Result<(), GuildError> {
        let acting = self.actor_role(guild_id, actor)?;
        require_permission(acting, GuildPerms::MANAGE_CLAIMS)
    }

    // ── Structural mutators ────────────────────────────────────────

    /// Insert a guild under a known id (server-assigned or replayed).
    pub fn insert_guild(
        &mut self,
        guild_id: GuildId,
        name: &str,
        founder: &str,
    ) -> Result<(), GuildError> {
        if self.guilds.contains_key(&guild_id) {
            return Err(GuildError::DuplicateGuild(guild_id));
        }
        self.guilds.insert(guild_id, Guild::new(guild_id, name, founder));
        self.player_guilds
            .entry(founder.to_string())
            .or_default()
            .insert(guild_id);
        self.next_guild_id = self.next_guild_id.max(guild_id.saturating_add(1));
        Ok(())
    }

    /// Remove a guild and every membership, invite and represented-guild
    /// reference to it. Claims are handled by the caller.
    pub fn remove_guild(&mut self, guild_id: GuildId) -> Result<Guild, GuildError> {
        let guild = self
            .guilds
            .remove(&guild_id)
            .ok_or(GuildError::GuildNotFound(guild_id))?;

        for membership in guild.members() {
            remove_from_index(&mut self.player_guilds, &membership.player_id, guild_id);
            self.clear_represented(&membership.player_id, guild_id);
        }
        for invited in guild.invites() {
            remove_from_index(&mut self.player_invites, invited, guild_id);
        }
        Ok(guild)
    }

    /// AddPlayerToGuild. Consumes a pending invite to the same guild.
    pub fn add_player_to_guild(&mut self, player: &str, guild_id: GuildId) -> Result<(), GuildError> {
        let guild = self.guild_mut(guild_id)?;
        if guild.has_member(player) {
            return Err(GuildError::AlreadyMember(player.to_string()));
        }
        guild.insert_member(player);
        guild.take_invite(player);
        remove_from_index(&mut self.player_invites, player, guild_id);
        self.player_guilds
            .entry(player.to_string())
            .or_default()
            .insert(guild_id);
        Ok(())
    }

    /// RemovePlayerFromGuild. The founder is never removed this way.
    pub fn remove_player_from_guild(
        &mut self,
        player: &str,
        guild_id: GuildId,
    ) -> Result<(), GuildError> {
        let guild = self.guild_mut(guild_id)?;
        match guild.membership(player) {
            None => return Err(GuildError::NotAMember(player.to_string())),
            Some(m) if m.role_id == FOUNDER_ROLE_ID => return Err(GuildError::FounderCannotLeave),
            Some(_) => {}
        }
        guild.take_member(player);
        remove_from_index(&mut self.player_guilds, player, guild_id);
        self.clear_represented(player, guild_id);
        Ok(())
    }

    pub fn set_member_role(
        &mut self,
        guild_id: GuildId,
        player: &str,
        role_id: RoleId,
    ) -> Result<(), GuildError> {
        let guild = self.guild_mut(guild_id)?;
        if guild.role(role_id).is_none() {
            return Err(GuildError::RoleNotFound(role_id));
        }
        if !guild.set_member_role(player, role_id) {
            return Err(GuildError::NotAMember(player.to_string()));
        }
        Ok(())
    }

    pub fn add_invite(&mut self, guild_id: GuildId, player: &str) -> Result<(), GuildError> {
        let guild = self.guild_mut(guild_id)?;
        if guild.has_member(player) {
            return Err(GuildError::AlreadyMember(player.to_string()));
        }
        if !guild.insert_invite(player) {
            return Err(GuildError::AlreadyInvited(player.to_string()));
        }
        self.player_invites
            .entry(player.to_string())
            .or_default()
            .insert(guild_id);
        Ok(())
    }

    pub fn remove_invite(&mut self, guild_id: GuildId, player: &str) -> Result<(), GuildError> {
        let guild = self.guild_mut(guild_id)?;
        let had = guild.take_invite(player);
        let indexed = remove_from_index(&mut self.player_invites, player, guild_id);
        if had || indexed {
            Ok(())
        } else {
            Err(GuildError::NotInvited(player.to_string()))
        }
    }

    pub fn push_role(&mut self, guild_id: GuildId) -> Result<RoleId, GuildError> {
        Ok(self.guild_mut(guild_id)?.push_role())
    }

    pub fn remove_role_at(&mut self, guild_id: GuildId, role_id: RoleId) -> Result<(), GuildError> {
        if is_protected_role(role_id) {
            return Err(GuildError::ProtectedRole(role_id));
        }
        if self.guild_mut(guild_id)?.remove_role(role_id) {
            Ok(())
        } else {
            Err(GuildError::RoleNotFound(role_id))
        }
    }

    pub fn overwrite_role(
        &mut self,
        guild_id: GuildId,
        role_id: RoleId,
        name: &str,
        authority: i32,
        permissions: GuildPerms,
    ) -> Result<(), GuildError> {
        let role = self
            .guild_mut(guild_id)?
            .role_mut(role_id)
            .ok_or(GuildError::RoleNotFound(role_id))?;
        role.name = name.to_string();
        role.authority = authority;
        role.permissions = permissions;
        Ok(())
    }

    pub fn set_guild_info(&mut self, guild_id: GuildId, name: &str, color: Rgb) -> Result<(), GuildError> {
        let guild = self.guild_mut(guild_id)?;
        guild.name = name.to_string();
        guild.color = color;
        Ok(())
    }

    /// Set or clear the represented guild; metrics are created lazily.
    pub fn set_represented(&mut self, player: &str, guild_id: Option<GuildId>) {
        let metrics = self
            .metrics
            .entry(player.to_string())
            .or_insert_with(|| PlayerMetrics::new(player, player, 0));
        metrics.represented_guild = guild_id;
    }

    fn clear_represented(&mut self, player: &str, guild_id: GuildId) {
        if let Some(m) = self.metrics.get_mut(player) {
            if m.represented_guild == Some(guild_id) {
                m.represented_guild = None;
            }
        }
    }

    // ── Presence ───────────────────────────────────────────────────

    /// Record a player connecting. Returns the updated metrics.
    pub fn player_joined(&mut self, player: &str, display_name: &str, now: u64) -> &PlayerMetrics {
        let metrics = self
            .metrics
            .entry(player.to_string())
            .or_insert_with(|| PlayerMetrics::new(player, display_name, now));
        metrics.last_display_name = display_name.to_string();
        metrics.last_online = now;
        metrics.is_online = true;
        metrics
    }

    pub fn player_left(&mut self, player: &str, now: u64) -> Option<&PlayerMetrics> {
        let metrics = self.metrics.get_mut(player)?;
        metrics.last_online = now;
        metrics.is_online = false;
        Some(metrics)
    }

    /// Replace a player's metrics wholesale (replica side).
    pub fn upsert_metrics(&mut self, metrics: PlayerMetrics) {
        self.metrics.insert(metrics.player_id.clone(), metrics);
    }

    // ── Checked operations ─────────────────────────────────────────

    /// CreateGuild. Returns the assigned id.
    pub fn create_guild(&mut self, name: &str, founder: &str) -> Result<GuildId, GuildError> {
        self.authorize_create(name, founder)?;
        let id = self.next_guild_id;
        self.insert_guild(id, name, founder)?;
        Ok(id)
    }

    /// DisbandGuild, registry half. Callers holding a `ClaimGrid` should
    /// go through `GuildEngine` so the claim cascade runs too.
    pub fn disband_guild(&mut self, actor: &str, guild_id: GuildId) -> Result<Guild, GuildError> {
        self.authorize_disband(actor, guild_id)?;
        self.remove_guild(guild_id)
    }

    pub fn invite(&mut self, actor: &str, guild_id: GuildId, target: &str) -> Result<(), GuildError> {
        self.authorize_invite(actor, guild_id, target)?;
        self.add_invite(guild_id, target)
    }

    pub fn cancel_invite(&mut self, actor: &str, guild_id: GuildId, target: &str) -> Result<(), GuildError> {
        self.authorize_cancel_invite(actor, guild_id, target)?;
        self.remove_invite(guild_id, target)
    }

    pub fn accept_invite(&mut self, player: &str, guild_id: GuildId) -> Result<(), GuildError> {
        self.authorize_accept_invite(player, guild_id)?;
        self.add_player_to_guild(player, guild_id)
    }

    pub fn leave(&mut self, player: &str, guild_id: GuildId) -> Result<(), GuildError> {
        self.authorize_leave(player, guild_id)?;
        self.remove_player_from_guild(player, guild_id)
    }

    pub fn kick(&mut self, actor: &str, guild_id: GuildId, target: &str) -> Result<(), GuildError> {
        self.authorize_kick(actor, guild_id, target)?;
        self.remove_player_from_guild(target, guild_id)
    }

    pub fn change_role(
        &mut self,
        actor: &str,
        guild_id: GuildId,
        target: &str,
        role_id: RoleId,
    ) -> Result<(), GuildError> {
        self.authorize_change_role(actor, guild_id, target, role_id)?;
        self.set_member_role(guild_id, target, role_id)
    }

    pub fn add_role(&mut self, actor: &str, guild_id: GuildId) -> Result<RoleId, GuildError> {
        self.authorize_add_role(actor, guild_id)?;
        self.push_role(guild_id)
    }

    pub fn remove_role(&mut self, actor: &str, guild_id: GuildId, role_id: RoleId) -> Result<(), GuildError> {
        self.authorize_remove_role(actor, guild_id, role_id)?;
        self.remove_role_at(guild_id, role_id)
    }

    /// UpdateRole. Returns the authority actually stored.
    pub fn update_role(
        &mut self,
        actor: &str,
        guild_id: GuildId,
        role_id: RoleId,
        name: &str,
        authority: i32,
        permissions: GuildPerms,
    ) -> Result<i32, GuildError> {
        let authority = self.authorize_update_role(actor, guild_id, role_id, name, authority)?;
        self.overwrite_role(guild_id, role_id, name, authority, permissions)?;
        Ok(authority)
    }

    pub fn update_guild_info(
        &mut self,
        actor: &str,
        guild_id: GuildId,
        name: &str,
        color: Rgb,
    ) -> Result<(), GuildError> {
        self.authorize_update_info(actor, guild_id, name)?;
        self.set_guild_info(guild_id, name, color)
    }

    pub fn represent_guild(&mut self, player: &str, guild_id: Option<GuildId>) -> Result<(), GuildError> {
        self.authorize_represent(player, guild_id)?;
        self.set_represented(player, guild_id);
        Ok(())
    }
}

/// Remove `guild_id` from a player's index set, dropping the set when it
/// empties. Returns whether anything was removed.
fn remove_from_index(
    index: &mut BTreeMap<PlayerId, BTreeSet<GuildId>>,
    player: &str,
    guild_id: GuildId,
) -> bool {
    let Some(set) = index.get_mut(player) else {
        return false;
    };
    let removed = set.remove(&guild_id);
    if set.is_empty() {
        index.remove(player);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MEMBER_ROLE_ID;

    fn registry_with_players(players: &[&str]) -> GuildRegistry {
        let mut reg = GuildRegistry::new(EngineLimits::default());
        for p in players {
            reg.player_joined(p, p, 100);
        }
        reg
    }

    #[test]
    fn create_assigns_monotonic_ids() {
        let mut reg = registry_with_players(&["p1"]);
        assert_eq!(reg.create_guild("Alpha", "p1"), Ok(0));
        assert_eq!(reg.create_guild("Beta", "p1"), Ok(1));
        assert_eq!(reg.players_role(0, "p1").unwrap().id, FOUNDER_ROLE_ID);
        assert_eq!(reg.player_guilds("p1").collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn create_rejects_bad_names() {
        let mut reg = registry_with_players(&["p1"]);
        assert!(matches!(reg.create_guild("ab", "p1"), Err(GuildError::InvalidName(_))));
        let long = "x".repeat(33);
        assert!(matches!(reg.create_guild(&long, "p1"), Err(GuildError::InvalidName(_))));
        reg.create_guild("Alpha", "p1").unwrap();
        assert_eq!(
            reg.create_guild("Alpha", "p1"),
            Err(GuildError::NameTaken("Alpha".to_string()))
        );
        assert_eq!(reg.guilds().count(), 1);
    }

    #[test]
    fn create_caps_guilds_per_player() {
        let mut reg = registry_with_players(&["p1"]);
        for i in 0..10 {
            reg.create_guild(&format!("Guild{}", i), "p1").unwrap();
        }
        assert_eq!(reg.create_guild("Guild10", "p1"), Err(GuildError::TooManyGuilds(10)));
    }

    #[test]
    fn invite_accept_flow_updates_indices() {
        let mut reg = registry_with_players(&["p1", "p2"]);
        let g = reg.create_guild("Alpha", "p1").unwrap();
        reg.invite("p1", g, "p2").unwrap();
        assert_eq!(reg.player_invites("p2").collect::<Vec<_>>(), vec![g]);
        assert_eq!(reg.invite("p1", g, "p2"), Err(GuildError::AlreadyInvited("p2".to_string())));

        reg.accept_invite("p2", g).unwrap();
        assert_eq!(reg.players_role(g, "p2").unwrap().id, MEMBER_ROLE_ID);
        assert_eq!(reg.player_invites("p2").count(), 0);
        assert!(!reg.get_guild(g).unwrap().is_invited("p2"));
        assert!(reg.is_player_in_guild("p2", g));
    }

    #[test]
    fn invite_unknown_player_rejected() {
        let mut reg = registry_with_players(&["p1"]);
        let g = reg.create_guild("Alpha", "p1").unwrap();
        assert_eq!(reg.invite("p1", g, "ghost"), Err(GuildError::UnknownPlayer("ghost".to_string())));
    }

    #[test]
    fn self_cancel_needs_no_permission() {
        let mut reg = registry_with_players(&["p1", "p2", "p3"]);
        let g = reg.create_guild("Alpha", "p1").unwrap();
        reg.invite("p1", g, "p2").unwrap();
        reg.invite("p1", g, "p3").unwrap();
        reg.accept_invite("p3", g).unwrap();

        // p3 is a plain member: cannot cancel someone else's invite.
        assert_eq!(
            reg.cancel_invite("p3", g, "p2"),
            Err(GuildError::MissingPermission(GuildPerms::INVITE))
        );
        reg.cancel_invite("p2", g, "p2").unwrap();
        assert_eq!(reg.player_invites("p2").count(), 0);
    }

    #[test]
    fn founder_cannot_leave_or_be_kicked() {
        let mut reg = registry_with_players(&["p1", "p2"]);
        let g = reg.create_guild("Alpha", "p1").unwrap();
        reg.invite("p1", g, "p2").unwrap();
        reg.accept_invite("p2", g).unwrap();

        assert_eq!(reg.leave("p1", g), Err(GuildError::FounderCannotLeave));
        assert_eq!(
            reg.kick("p2", g, "p1"),
            Err(GuildError::MissingPermission(GuildPerms::KICK))
        );
        reg.kick("p1", g, "p2").unwrap();
        assert!(!reg.is_player_in_guild("p2", g));
    }

    #[test]
    fn leaving_clears_represented_guild() {
        let mut reg = registry_with_players(&["p1", "p2"]);
        let g = reg.create_guild("Alpha", "p1").unwrap();
        reg.invite("p1", g, "p2").unwrap();
        reg.accept_invite("p2", g).unwrap();
        reg.represent_guild("p2", Some(g)).unwrap();
        assert_eq!(reg.represented_guild("p2"), Some(g));
        reg.leave("p2", g).unwrap();
        assert_eq!(reg.represented_guild("p2"), None);
    }

    #[test]
    fn represent_requires_membership() {
        let mut reg = registry_with_players(&["p1", "p2"]);
        let g = reg.create_guild("Alpha", "p1").unwrap();
        assert_eq!(
            reg.represent_guild("p2", Some(g)),
            Err(GuildError::NotAMember("p2".to_string()))
        );
        reg.represent_guild("p2", None).unwrap();
    }

    #[test]
    fn update_role_clamps_authority() {
        let mut reg = registry_with_players(&["p1", "p2", "p3"]);
        let g = reg.create_guild("Alpha", "p1").unwrap();
        let officer = reg.add_role("p1", g).unwrap();
        reg.update_role("p1", g, officer, "Officer", 50, GuildPerms::MANAGE_ROLES)
            .unwrap();
        let grunt = reg.add_role("p1", g).unwrap();

        for p in ["p2", "p3"] {
            reg.invite("p1", g, p).unwrap();
            reg.accept_invite(p, g).unwrap();
        }
        reg.change_role("p1", g, "p2", officer).unwrap();

        // Officer tries to lift a role to its own level: clamped to 49.
        let stored = reg
            .update_role("p2", g, grunt, "Grunt", 50, GuildPerms::USE_BLOCKS)
            .unwrap();
        assert_eq!(stored, 49);
        assert_eq!(reg.get_guild(g).unwrap().role(grunt).unwrap().authority, 49);

        // Officer cannot edit its own role or the founder role.
        assert_eq!(
            reg.update_role("p2", g, officer, "Boss", 10, GuildPerms::all()),
            Err(GuildError::InsufficientAuthority)
        );
        assert_eq!(
            reg.update_role("p2", g, FOUNDER_ROLE_ID, "X", 0, GuildPerms::empty()),
            Err(GuildError::InsufficientAuthority)
        );
    }

    #[test]
    fn remove_role_respects_protection_and_authority() {
        let mut reg = registry_with_players(&["p1"]);
        let g = reg.create_guild("Alpha", "p1").unwrap();
        let extra = reg.add_role("p1", g).unwrap();
        assert_eq!(reg.remove_role("p1", g, 0), Err(GuildError::ProtectedRole(0)));
        assert_eq!(reg.remove_role("p1", g, 1), Err(GuildError::ProtectedRole(1)));
        assert_eq!(reg.remove_role("p1", g, 9), Err(GuildError::RoleNotFound(9)));
        reg.remove_role("p1", g, extra).unwrap();
        assert_eq!(reg.get_guild(g).unwrap().roles().len(), 2);
    }

    #[test]
    fn disband_cascades_indices() {
        let mut reg = registry_with_players(&["p1", "p2", "p3"]);
        let g = reg.create_guild("Alpha", "p1").unwrap();
        reg.invite("p1", g, "p2").unwrap();
        reg.accept_invite("p2", g).unwrap();
        reg.invite("p1", g, "p3").unwrap();
        reg.represent_guild("p2", Some(g)).unwrap();

        assert_eq!(reg.disband_guild("p2", g).unwrap_err(), GuildError::NotFounder);
        reg.disband_guild("p1", g).unwrap();

        assert!(reg.get_guild(g).is_none());
        assert_eq!(reg.player_guilds("p1").count(), 0);
        assert_eq!(reg.player_guilds("p2").count(), 0);
        assert_eq!(reg.player_invites("p3").count(), 0);
        assert_eq!(reg.represented_guild("p2"), None);
    }

    #[test]
    fn rename_must_stay_unique() {
        let mut reg = registry_with_players(&["p1"]);
        let a = reg.create_guild("Alpha", "p1").unwrap();
        reg.create_guild("Beta", "p1").unwrap();
        assert_eq!(
            reg.update_guild_info("p1", a, "Beta", Rgb::WHITE),
            Err(GuildError::NameTaken("Beta".to_string()))
        );
        reg.update_guild_info("p1", a, "Alpha", Rgb::new(1, 2, 3)).unwrap();
        assert_eq!(reg.get_guild(a).unwrap().color, Rgb::new(1, 2, 3));
    }
}
