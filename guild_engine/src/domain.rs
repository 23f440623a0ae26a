/// Guild Engine — Core Domain Types
///
/// Guilds, roles, memberships and per-player metrics. Pure data plus the
/// small amount of bookkeeping each type owns (dense role indices, the
/// member map, the invite set). Permission decisions live in
/// `permissions`, cross-guild indices in `registry`.

use std::collections::{BTreeMap, BTreeSet};

use bitflags::bitflags;

pub type GuildId = u32;
pub type RoleId = u32;
pub type PlayerId = String;

/// Role every new member receives. Never removable.
pub const MEMBER_ROLE_ID: RoleId = 0;
/// Role held by the founding player. Never removable.
pub const FOUNDER_ROLE_ID: RoleId = 1;

pub const FOUNDER_AUTHORITY: i32 = i32::MAX;
pub const DEFAULT_ROLE_NAME: &str = "New Role";

pub const GUILD_NAME_MIN: usize = 3;
pub const GUILD_NAME_MAX: usize = 32;
pub const ROLE_NAME_MAX: usize = 32;

/// 180 days.
pub const DEFAULT_STALE_METRICS_SECS: u64 = 15_552_000;
pub const DEFAULT_MAX_GUILDS_PER_PLAYER: usize = 10;

bitflags! {
    /// Independent permission bits held by a role.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct GuildPerms: u32 {
        const INVITE = 1 << 0;
        const KICK = 1 << 1;
        const PROMOTE = 1 << 2;
        const MANAGE_ROLES = 1 << 3;
        const MANAGE_CLAIMS = 1 << 4;
        const MANAGE_GUILD_INFO = 1 << 5;
        const BREAK_BLOCKS = 1 << 6;
        const USE_BLOCKS = 1 << 7;
    }
}

/// Limits the kernel enforces on authoritative operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineLimits {
    pub max_guilds_per_player: usize,
    pub stale_metrics_after_secs: u64,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_guilds_per_player: DEFAULT_MAX_GUILDS_PER_PLAYER,
            stale_metrics_after_secs: DEFAULT_STALE_METRICS_SECS,
        }
    }
}

// ── Core Domain Types ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb { r: 255, g: 255, b: 255 };

    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Packed `0xRRGGBB`.
    pub fn to_packed(self) -> u32 {
        (u32::from(self.r) << 16) | (u32::from(self.g) << 8) | u32::from(self.b)
    }

    pub fn from_packed(packed: u32) -> Self {
        Self {
            r: ((packed >> 16) & 0xff) as u8,
            g: ((packed >> 8) & 0xff) as u8,
            b: (packed & 0xff) as u8,
        }
    }
}

impl Default for Rgb {
    fn default() -> Self {
        Rgb::WHITE
    }
}

/// A named permission/authority bundle. `id` always equals the role's
/// index inside its guild's role sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub authority: i32,
    pub permissions: GuildPerms,
}

impl Role {
    pub fn new(id: RoleId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            authority: 0,
            permissions: GuildPerms::empty(),
        }
    }

    pub fn founder() -> Self {
        Self {
            id: FOUNDER_ROLE_ID,
            name: "Founder".to_string(),
            authority: FOUNDER_AUTHORITY,
            permissions: GuildPerms::all(),
        }
    }

    pub fn member() -> Self {
        Role::new(MEMBER_ROLE_ID, "Member")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub player_id: PlayerId,
    pub role_id: RoleId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerMetrics {
    pub player_id: PlayerId,
    pub last_display_name: String,
    /// Unix seconds.
    pub last_online: u64,
    pub is_online: bool,
    pub represented_guild: Option<GuildId>,
}

impl PlayerMetrics {
    pub fn new(player_id: &str, display_name: &str, now: u64) -> Self {
        Self {
            player_id: player_id.to_string(),
            last_display_name: display_name.to_string(),
            last_online: now,
            is_online: false,
            represented_guild: None,
        }
    }
}

/// A named player organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guild {
    pub id: GuildId,
    pub name: String,
    pub color: Rgb,
    roles: Vec<Role>,
    members: BTreeMap<PlayerId, Membership>,
    invites: BTreeSet<PlayerId>,
}

impl Guild {
    /// New guild with the default Member/Founder roles and the founder
    /// seated in role 1.
    pub fn new(id: GuildId, name: &str, founder: &str) -> Self {
        let mut members = BTreeMap::new();
        members.insert(
            founder.to_string(),
            Membership {
                player_id: founder.to_string(),
                role_id: FOUNDER_ROLE_ID,
            },
        );
        Self {
            id,
            name: name.to_string(),
            color: Rgb::default(),
            roles: vec![Role::member(), Role::founder()],
            members,
            invites: BTreeSet::new(),
        }
    }

    /// Rebuild a guild from persisted or wire parts. Role ids are
    /// re-derived from their position.
    pub fn from_parts(
        id: GuildId,
        name: String,
        color: Rgb,
        mut roles: Vec<Role>,
        members: impl IntoIterator<Item = Membership>,
        invites: impl IntoIterator<Item = PlayerId>,
    ) -> Self {
        for (idx, role) in roles.iter_mut().enumerate() {
            role.id = idx as RoleId;
        }
        Self {
            id,
            name,
            color,
            roles,
            members: members
                .into_iter()
                .map(|m| (m.player_id.clone(), m))
                .collect(),
            invites: invites.into_iter().collect(),
        }
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn role(&self, role_id: RoleId) -> Option<&Role> {
        self.roles.get(role_id as usize)
    }

    pub(crate) fn role_mut(&mut self, role_id: RoleId) -> Option<&mut Role> {
        self.roles.get_mut(role_id as usize)
    }

    /// Role currently held by `player_id`, if a member.
    pub fn role_of(&self, player_id: &str) -> Option<&Role> {
        let membership = self.members.get(player_id)?;
        self.role(membership.role_id)
    }

    pub fn membership(&self, player_id: &str) -> Option<&Membership> {
        self.members.get(player_id)
    }

    pub fn members(&self) -> impl Iterator<Item = &Membership> {
        self.members.values()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn has_member(&self, player_id: &str) -> bool {
        self.members.contains_key(player_id)
    }

    pub fn invites(&self) -> impl Iterator<Item = &PlayerId> {
        self.invites.iter()
    }

    pub fn is_invited(&self, player_id: &str) -> bool {
        self.invites.contains(player_id)
    }

    pub(crate) fn insert_member(&mut self, player_id: &str) {
        self.members.insert(
            player_id.to_string(),
            Membership {
                player_id: player_id.to_string(),
                role_id: MEMBER_ROLE_ID,
            },
        );
    }

    pub(crate) fn take_member(&mut self, player_id: &str) -> Option<Membership> {
        self.members.remove(player_id)
    }

    pub(crate) fn set_member_role(&mut self, player_id: &str, role_id: RoleId) -> bool {
        match self.members.get_mut(player_id) {
            Some(m) => {
                m.role_id = role_id;
                true
            }
            None => false,
        }
    }

    pub(crate) fn insert_invite(&mut self, player_id: &str) -> bool {
        self.invites.insert(player_id.to_string())
    }

    pub(crate) fn take_invite(&mut self, player_id: &str) -> bool {
        self.invites.remove(player_id)
    }

    /// Append a default role and return its id.
    pub(crate) fn push_role(&mut self) -> RoleId {
        let id = self.roles.len() as RoleId;
        self.roles.push(Role::new(id, DEFAULT_ROLE_NAME));
        id
    }

    /// Remove a role, re-index all following roles and move members onto
    /// the re-indexed ids. Holders of the removed role fall back to role 0.
    /// Returns false for protected or unknown roles.
    pub(crate) fn remove_role(&mut self, role_id: RoleId) -> bool {
        if role_id == MEMBER_ROLE_ID || role_id == FOUNDER_ROLE_ID {
            return false;
        }
        if role_id as usize >= self.roles.len() {
            return false;
        }

        self.roles.remove(role_id as usize);
        for (idx, role) in self.roles.iter_mut().enumerate() {
            role.id = idx as RoleId;
        }

        for membership in self.members.values_mut() {
            if membership.role_id == role_id {
                membership.role_id = MEMBER_ROLE_ID;
            } else if membership.role_id > role_id {
                membership.role_id -= 1;
            }
        }
        true
    }

    /// Members whose role id points past the role table are reset to 0.
    /// Returns how many were reset.
    pub(crate) fn clamp_member_roles(&mut self) -> usize {
        let count = self.roles.len() as RoleId;
        let mut fixed = 0;
        for membership in self.members.values_mut() {
            if membership.role_id >= count {
                membership.role_id = MEMBER_ROLE_ID;
                fixed += 1;
            }
        }
        fixed
    }

    pub(crate) fn retain_invites(&mut self, mut keep: impl FnMut(&str) -> bool) -> usize {
        let before = self.invites.len();
        self.invites.retain(|p| keep(p));
        before - self.invites.len()
    }
}
