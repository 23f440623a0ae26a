/// Guild Engine — Access decisions
///
/// Answers "may this actor touch this block" for the hosting world. The
/// host calls `decide` explicitly; nothing here hooks into the host.

use crate::claims::{ClaimGrid, GridPos2d};
use crate::domain::GuildPerms;
use crate::registry::GuildRegistry;

/// A world block coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn cell(self) -> GridPos2d {
        GridPos2d::from_block(self.x, self.z)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    /// Interacting with a block (doors, containers, ...).
    Use,
    /// Placing or breaking a block.
    Build,
}

impl AccessKind {
    pub fn required_permission(self) -> GuildPerms {
        match self {
            AccessKind::Use => GuildPerms::USE_BLOCKS,
            AccessKind::Build => GuildPerms::BREAK_BLOCKS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny(String),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow)
    }
}

pub trait AccessDecisionPoint {
    fn decide(&self, actor: &str, pos: BlockPos, kind: AccessKind) -> AccessDecision;
}

/// Decision point over a registry + claim grid pair.
pub struct ClaimAccessPolicy<'a> {
    pub registry: &'a GuildRegistry,
    pub claims: &'a ClaimGrid,
}

impl<'a> ClaimAccessPolicy<'a> {
    pub fn new(registry: &'a GuildRegistry, claims: &'a ClaimGrid) -> Self {
        Self { registry, claims }
    }
}

impl AccessDecisionPoint for ClaimAccessPolicy<'_> {
    fn decide(&self, actor: &str, pos: BlockPos, kind: AccessKind) -> AccessDecision {
        let Some(claim) = self.claims.try_get_claim(pos.cell()) else {
            return AccessDecision::Allow;
        };

        // A claim outliving its guild only happens transiently; nobody owns it.
        let Some(guild) = self.registry.get_guild(claim.guild_id) else {
            return AccessDecision::Allow;
        };

        let Some(role) = guild.role_of(actor) else {
            return AccessDecision::Deny(format!("claimed by guild {}", guild.name));
        };

        if role.permissions.contains(kind.required_permission()) {
            AccessDecision::Allow
        } else {
            let action = match kind {
                AccessKind::Use => "use blocks",
                AccessKind::Build => "build",
            };
            AccessDecision::Deny(format!(
                "your role {} in guild {} may not {} here",
                role.name, guild.name, action
            ))
        }
    }
}
