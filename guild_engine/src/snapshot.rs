/// Guild Engine — Persisted documents
///
/// Two independent documents: the guild document (guilds, metrics, the id
/// counter) and the claim document (a flat list of claims). These are the
/// only serde types in the kernel; domain types stay free of wire/storage
/// concerns. Bitmasks are stored as their raw bits.
///
/// Capture is deterministic: guilds by id, members and invites by player
/// id, metrics by player id, claims by (x, z).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::claims::{BorderFlags, Claim, ClaimGrid, GridPos2d};
use crate::domain::{
    EngineLimits, Guild, GuildId, GuildPerms, Membership, PlayerId, PlayerMetrics, Rgb, Role,
    RoleId,
};
use crate::error::GuildError;
use crate::registry::GuildRegistry;
use crate::SCHEMA_VERSION;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleRecord {
    pub id: RoleId,
    pub name: String,
    pub authority: i32,
    pub permission_bits: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemberRecord {
    pub player_id: PlayerId,
    pub role_id: RoleId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GuildRecord {
    pub id: GuildId,
    pub name: String,
    /// Packed `0xRRGGBB`.
    pub color: u32,
    pub roles: Vec<RoleRecord>,
    pub members: Vec<MemberRecord>,
    #[serde(default)]
    pub invites: Vec<PlayerId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsRecord {
    pub player_id: PlayerId,
    pub last_display_name: String,
    pub last_online: u64,
    pub is_online: bool,
    #[serde(default)]
    pub represented_guild: Option<GuildId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GuildDocument {
    pub schema_version: u32,
    pub next_guild_id: GuildId,
    pub guilds: Vec<GuildRecord>,
    #[serde(default)]
    pub metrics: Vec<MetricsRecord>,
}

impl Default for GuildDocument {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            next_guild_id: 0,
            guilds: Vec::new(),
            metrics: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClaimRecord {
    pub guild_id: GuildId,
    pub x: i32,
    pub z: i32,
    pub border_flags: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimDocument {
    pub claims: Vec<ClaimRecord>,
}

// ── Capture ────────────────────────────────────────────────────────

pub fn capture_guilds(registry: &GuildRegistry) -> GuildDocument {
    GuildDocument {
        schema_version: SCHEMA_VERSION,
        next_guild_id: registry.next_guild_id(),
        guilds: registry.guilds().map(guild_record).collect(),
        metrics: registry.all_metrics().map(metrics_record).collect(),
    }
}

pub fn capture_claims(claims: &ClaimGrid) -> ClaimDocument {
    ClaimDocument {
        claims: claims.claims().map(claim_record).collect(),
    }
}

pub fn guild_record(guild: &Guild) -> GuildRecord {
    GuildRecord {
        id: guild.id,
        name: guild.name.clone(),
        color: guild.color.to_packed(),
        roles: guild
            .roles()
            .iter()
            .map(|r| RoleRecord {
                id: r.id,
                name: r.name.clone(),
                authority: r.authority,
                permission_bits: r.permissions.bits(),
            })
            .collect(),
        members: guild
            .members()
            .map(|m| MemberRecord {
                player_id: m.player_id.clone(),
                role_id: m.role_id,
            })
            .collect(),
        invites: guild.invites().cloned().collect(),
    }
}

pub fn metrics_record(metrics: &PlayerMetrics) -> MetricsRecord {
    MetricsRecord {
        player_id: metrics.player_id.clone(),
        last_display_name: metrics.last_display_name.clone(),
        last_online: metrics.last_online,
        is_online: metrics.is_online,
        represented_guild: metrics.represented_guild,
    }
}

pub fn claim_record(claim: &Claim) -> ClaimRecord {
    ClaimRecord {
        guild_id: claim.guild_id,
        x: claim.position.x,
        z: claim.position.z,
        border_flags: claim.border_flags.bits(),
    }
}

// ── Restore ────────────────────────────────────────────────────────

/// Rebuild a registry from a guild document. Secondary indices are
/// derived from the memberships and invites; nothing in the document is
/// trusted for them. Fails on structural problems only (duplicate ids,
/// unsupported schema); repairable drift is left for the integrity pass.
pub fn restore_registry(
    doc: &GuildDocument,
    limits: EngineLimits,
) -> Result<GuildRegistry, GuildError> {
    if doc.schema_version != SCHEMA_VERSION {
        return Err(GuildError::UnsupportedSchema(doc.schema_version));
    }

    let mut registry = GuildRegistry::new(limits);
    let mut highest: Option<GuildId> = None;

    for record in &doc.guilds {
        if registry.guilds.contains_key(&record.id) {
            return Err(GuildError::DuplicateGuild(record.id));
        }
        let guild = guild_from_record(record);
        for membership in guild.members() {
            registry
                .player_guilds
                .entry(membership.player_id.clone())
                .or_default()
                .insert(guild.id);
        }
        for invited in guild.invites() {
            registry
                .player_invites
                .entry(invited.clone())
                .or_default()
                .insert(guild.id);
        }
        highest = highest.max(Some(record.id));
        registry.guilds.insert(record.id, guild);
    }

    for record in &doc.metrics {
        registry
            .metrics
            .insert(record.player_id.clone(), metrics_from_record(record));
    }

    // Never hand out an id that is already taken, whatever the counter says.
    let floor = highest.map_or(0, |id| id.saturating_add(1));
    registry.next_guild_id = doc.next_guild_id.max(floor);
    Ok(registry)
}

/// Rebuild a grid from a claim document, keeping the stored flags.
pub fn restore_claims(doc: &ClaimDocument) -> Result<ClaimGrid, GuildError> {
    ClaimGrid::from_claims(doc.claims.iter().map(claim_from_record))
}

pub fn guild_from_record(record: &GuildRecord) -> Guild {
    let roles = record
        .roles
        .iter()
        .map(|r| Role {
            id: r.id,
            name: r.name.clone(),
            authority: r.authority,
            permissions: GuildPerms::from_bits_truncate(r.permission_bits),
        })
        .collect();
    Guild::from_parts(
        record.id,
        record.name.clone(),
        Rgb::from_packed(record.color),
        roles,
        record.members.iter().map(|m| Membership {
            player_id: m.player_id.clone(),
            role_id: m.role_id,
        }),
        record.invites.iter().cloned(),
    )
}

pub fn metrics_from_record(record: &MetricsRecord) -> PlayerMetrics {
    PlayerMetrics {
        player_id: record.player_id.clone(),
        last_display_name: record.last_display_name.clone(),
        last_online: record.last_online,
        is_online: record.is_online,
        represented_guild: record.represented_guild,
    }
}

pub fn claim_from_record(record: &ClaimRecord) -> Claim {
    Claim {
        position: GridPos2d::new(record.x, record.z),
        guild_id: record.guild_id,
        border_flags: BorderFlags::from_bits_truncate(record.border_flags),
    }
}

/// Claim counts per guild id, in id order.
pub fn claims_per_guild(doc: &ClaimDocument) -> BTreeMap<GuildId, usize> {
    let mut counts = BTreeMap::new();
    for claim in &doc.claims {
        *counts.entry(claim.guild_id).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_registry() -> GuildRegistry {
        let mut reg = GuildRegistry::new(EngineLimits::default());
        reg.player_joined("p1", "Pat", 10);
        reg.player_joined("p2", "Sam", 20);
        reg.player_joined("p3", "Lee", 30);
        let g = reg.create_guild("Alpha", "p1").unwrap();
        let officer = reg.add_role("p1", g).unwrap();
        reg.update_role("p1", g, officer, "Officer", 40, GuildPerms::KICK | GuildPerms::INVITE)
            .unwrap();
        reg.invite("p1", g, "p2").unwrap();
        reg.accept_invite("p2", g).unwrap();
        reg.change_role("p1", g, "p2", officer).unwrap();
        reg.invite("p1", g, "p3").unwrap();
        reg.represent_guild("p2", Some(g)).unwrap();
        reg.create_guild("Beta", "p3").unwrap();
        reg
    }

    #[test]
    fn registry_survives_document_roundtrip() {
        let reg = sample_registry();
        let doc = capture_guilds(&reg);
        let restored = restore_registry(&doc, EngineLimits::default()).unwrap();
        assert_eq!(restored, reg);
        assert_eq!(capture_guilds(&restored), doc);
    }

    #[test]
    fn restore_ignores_stale_counter() {
        let reg = sample_registry();
        let mut doc = capture_guilds(&reg);
        doc.next_guild_id = 0;
        let restored = restore_registry(&doc, EngineLimits::default()).unwrap();
        assert_eq!(restored.next_guild_id(), 2);
    }

    #[test]
    fn duplicate_guild_ids_rejected() {
        let reg = sample_registry();
        let mut doc = capture_guilds(&reg);
        let copy = doc.guilds[0].clone();
        doc.guilds.push(copy);
        assert_eq!(
            restore_registry(&doc, EngineLimits::default()),
            Err(GuildError::DuplicateGuild(0))
        );
    }

    #[test]
    fn unknown_fields_rejected() {
        let json = r#"{"schema_version":1,"next_guild_id":0,"guilds":[],"bogus":1}"#;
        assert!(serde_json::from_str::<GuildDocument>(json).is_err());
    }

    #[test]
    fn claim_document_is_a_plain_list() {
        let mut grid = ClaimGrid::new();
        grid.add_claim(GridPos2d::new(0, 0), 1).unwrap();
        grid.add_claim(GridPos2d::new(1, 0), 1).unwrap();
        let doc = capture_claims(&grid);
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["border_flags"], 0b1101);
        assert_eq!(restore_claims(&doc).unwrap(), grid);
        assert_eq!(claims_per_guild(&doc).get(&1), Some(&2));
    }
}
