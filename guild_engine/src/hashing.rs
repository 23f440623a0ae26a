/// Guild Engine — Canonical Hashing
///
/// Deterministic canonical serialization + SHA-256 hashing of the full
/// world (guild document + claim document). Server and replica compare
/// this hash after a full sync.
///
/// Rules:
///   - schema_version is the first field
///   - documents are captured in key order (see `snapshot`)
///   - UTF-8 JSON, no whitespace, no float

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::snapshot::{ClaimDocument, GuildDocument};
use crate::SCHEMA_VERSION;

/// Canonical serialization of both documents to UTF-8 JSON bytes.
pub fn canonical_serialize(guilds: &GuildDocument, claims: &ClaimDocument) -> Vec<u8> {
    build_canonical_value(guilds, claims).to_string().into_bytes()
}

/// SHA-256 of the canonical serialization. Lowercase hex string.
pub fn canonical_hash(guilds: &GuildDocument, claims: &ClaimDocument) -> String {
    let digest = Sha256::digest(canonical_serialize(guilds, claims));
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn build_canonical_value(guilds: &GuildDocument, claims: &ClaimDocument) -> Value {
    let guild_list = guilds
        .guilds
        .iter()
        .map(|g| {
            let roles = g
                .roles
                .iter()
                .map(|r| {
                    let mut role = Map::new();
                    role.insert("id".to_string(), Value::from(r.id));
                    role.insert("name".to_string(), Value::from(r.name.clone()));
                    role.insert("authority".to_string(), Value::from(r.authority));
                    role.insert("permission_bits".to_string(), Value::from(r.permission_bits));
                    Value::Object(role)
                })
                .collect();

            let mut members: Vec<_> = g.members.iter().collect();
            members.sort_by(|a, b| a.player_id.cmp(&b.player_id));
            let members = members
                .into_iter()
                .map(|m| {
                    let mut member = Map::new();
                    member.insert("player_id".to_string(), Value::from(m.player_id.clone()));
                    member.insert("role_id".to_string(), Value::from(m.role_id));
                    Value::Object(member)
                })
                .collect();

            let mut invites = g.invites.clone();
            invites.sort();

            let mut guild = Map::new();
            guild.insert("id".to_string(), Value::from(g.id));
            guild.insert("name".to_string(), Value::from(g.name.clone()));
            guild.insert("color".to_string(), Value::from(g.color));
            guild.insert("roles".to_string(), Value::Array(roles));
            guild.insert("members".to_string(), Value::Array(members));
            guild.insert(
                "invites".to_string(),
                Value::Array(invites.into_iter().map(Value::String).collect()),
            );
            (g.id, Value::Object(guild))
        });
    let mut guild_list: Vec<(u32, Value)> = guild_list.collect();
    guild_list.sort_by_key(|(id, _)| *id);

    let mut metrics: Vec<_> = guilds.metrics.iter().collect();
    metrics.sort_by(|a, b| a.player_id.cmp(&b.player_id));
    let metrics_list = metrics
        .into_iter()
        .map(|m| {
            let mut metric = Map::new();
            metric.insert("player_id".to_string(), Value::from(m.player_id.clone()));
            metric.insert(
                "last_display_name".to_string(),
                Value::from(m.last_display_name.clone()),
            );
            metric.insert("last_online".to_string(), Value::from(m.last_online));
            metric.insert("is_online".to_string(), Value::Bool(m.is_online));
            metric.insert(
                "represented_guild".to_string(),
                m.represented_guild.map_or(Value::Null, Value::from),
            );
            Value::Object(metric)
        })
        .collect();

    let mut claim_list: Vec<_> = claims.claims.iter().collect();
    claim_list.sort_by_key(|c| (c.x, c.z));
    let claim_list = claim_list
        .into_iter()
        .map(|c| {
            let mut claim = Map::new();
            claim.insert("guild_id".to_string(), Value::from(c.guild_id));
            claim.insert("x".to_string(), Value::from(c.x));
            claim.insert("z".to_string(), Value::from(c.z));
            claim.insert("border_flags".to_string(), Value::from(c.border_flags));
            Value::Object(claim)
        })
        .collect();

    // schema_version MUST be first.
    let mut root = Map::new();
    root.insert("schema_version".to_string(), Value::from(SCHEMA_VERSION));
    root.insert("next_guild_id".to_string(), Value::from(guilds.next_guild_id));
    root.insert(
        "guilds".to_string(),
        Value::Array(guild_list.into_iter().map(|(_, v)| v).collect()),
    );
    root.insert("metrics".to_string(), Value::Array(metrics_list));
    root.insert("claims".to_string(), Value::Array(claim_list));
    Value::Object(root)
}
