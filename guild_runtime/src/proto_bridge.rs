//! Proto ↔ Kernel conversion bridge.
//!
//! Static encode/decode table between the wire types (proto_types.rs)
//! and the kernel's `GuildAction` / snapshot documents. Decoding never
//! panics: anything malformed comes back as a `WireError`.

use prost::Message;

use guild_engine::actions::{ActionTag, Broadcast, GuildAction};
use guild_engine::claims::{BorderFlags, GridPos2d};
use guild_engine::domain::{GuildPerms, PlayerMetrics, Rgb};
use guild_engine::snapshot::{
    ClaimDocument, ClaimRecord, GuildDocument, GuildRecord, MemberRecord, MetricsRecord,
    RoleRecord,
};
use guild_engine::SCHEMA_VERSION;

use crate::error::WireError;
use crate::proto_types::*;

// ── Tags ───────────────────────────────────────────────────────

pub fn tag_to_proto(tag: ActionTag) -> ProtoActionTag {
    match tag {
        ActionTag::Create => ProtoActionTag::Create,
        ActionTag::Invite => ProtoActionTag::Invite,
        ActionTag::CancelInvite => ProtoActionTag::CancelInvite,
        ActionTag::AcceptInvite => ProtoActionTag::AcceptInvite,
        ActionTag::Kick => ProtoActionTag::Kick,
        ActionTag::Promote => ProtoActionTag::Promote,
        ActionTag::AddRole => ProtoActionTag::AddRole,
        ActionTag::RemoveRole => ProtoActionTag::RemoveRole,
        ActionTag::UpdateRole => ProtoActionTag::UpdateRole,
        ActionTag::UpdateInfo => ProtoActionTag::UpdateInfo,
        ActionTag::Disband => ProtoActionTag::Disband,
        ActionTag::Leave => ProtoActionTag::Leave,
        ActionTag::RepresentGuild => ProtoActionTag::RepresentGuild,
        ActionTag::AddClaim => ProtoActionTag::AddClaim,
        ActionTag::RemoveClaim => ProtoActionTag::RemoveClaim,
    }
}

pub fn tag_from_proto(raw: i32) -> Result<ActionTag, WireError> {
    let tag = ProtoActionTag::try_from(raw).map_err(|_| WireError::UnknownTag(raw))?;
    Ok(match tag {
        ProtoActionTag::Unspecified => return Err(WireError::UnknownTag(raw)),
        ProtoActionTag::Create => ActionTag::Create,
        ProtoActionTag::Invite => ActionTag::Invite,
        ProtoActionTag::CancelInvite => ActionTag::CancelInvite,
        ProtoActionTag::AcceptInvite => ActionTag::AcceptInvite,
        ProtoActionTag::Kick => ActionTag::Kick,
        ProtoActionTag::Promote => ActionTag::Promote,
        ProtoActionTag::AddRole => ActionTag::AddRole,
        ProtoActionTag::RemoveRole => ActionTag::RemoveRole,
        ProtoActionTag::UpdateRole => ActionTag::UpdateRole,
        ProtoActionTag::UpdateInfo => ActionTag::UpdateInfo,
        ProtoActionTag::Disband => ActionTag::Disband,
        ProtoActionTag::Leave => ActionTag::Leave,
        ProtoActionTag::RepresentGuild => ActionTag::RepresentGuild,
        ProtoActionTag::AddClaim => ActionTag::AddClaim,
        ProtoActionTag::RemoveClaim => ActionTag::RemoveClaim,
    })
}

// ── Actions ────────────────────────────────────────────────────

pub fn action_to_proto(action: &GuildAction) -> ProtoAction {
    let mut proto = ProtoAction {
        tag: tag_to_proto(action.tag()) as i32,
        guild_id: action.guild(),
        target_player: None,
        role_id: None,
        payload: Vec::new(),
    };

    match action {
        GuildAction::Create { name, .. } => {
            proto.payload = CreatePayload { name: name.clone() }.encode_to_vec();
        }
        GuildAction::Invite { target, .. }
        | GuildAction::CancelInvite { target, .. }
        | GuildAction::Kick { target, .. } => {
            proto.target_player = Some(target.clone());
        }
        GuildAction::Promote { target, role, .. } => {
            proto.target_player = Some(target.clone());
            proto.role_id = Some(*role);
        }
        GuildAction::RemoveRole { role, .. } => {
            proto.role_id = Some(*role);
        }
        GuildAction::UpdateRole {
            role,
            name,
            authority,
            permissions,
            ..
        } => {
            proto.role_id = Some(*role);
            proto.payload = RoleUpdatePayload {
                name: name.clone(),
                authority: *authority,
                permissions: permissions.bits(),
            }
            .encode_to_vec();
        }
        GuildAction::UpdateInfo { name, color, .. } => {
            proto.payload = GuildInfoPayload {
                name: name.clone(),
                color: color.to_packed(),
            }
            .encode_to_vec();
        }
        GuildAction::AddClaim { position, .. } | GuildAction::RemoveClaim { position, .. } => {
            proto.payload = ClaimPayload {
                x: position.x,
                z: position.z,
            }
            .encode_to_vec();
        }
        GuildAction::AcceptInvite { .. }
        | GuildAction::AddRole { .. }
        | GuildAction::Disband { .. }
        | GuildAction::Leave { .. }
        | GuildAction::RepresentGuild { .. } => {}
    }

    proto
}

pub fn action_from_proto(proto: &ProtoAction) -> Result<GuildAction, WireError> {
    let tag = tag_from_proto(proto.tag)?;
    let guild = || proto.guild_id.ok_or(WireError::MissingField("guild_id"));
    let target = || {
        proto
            .target_player
            .clone()
            .ok_or(WireError::MissingField("target_player"))
    };
    let role = || proto.role_id.ok_or(WireError::MissingField("role_id"));

    let action = match tag {
        ActionTag::Create => {
            let payload = CreatePayload::decode(proto.payload.as_slice())?;
            GuildAction::Create {
                name: payload.name,
                guild: proto.guild_id,
            }
        }
        ActionTag::Invite => GuildAction::Invite {
            guild: guild()?,
            target: target()?,
        },
        ActionTag::CancelInvite => GuildAction::CancelInvite {
            guild: guild()?,
            target: target()?,
        },
        ActionTag::AcceptInvite => GuildAction::AcceptInvite { guild: guild()? },
        ActionTag::Kick => GuildAction::Kick {
            guild: guild()?,
            target: target()?,
        },
        ActionTag::Promote => GuildAction::Promote {
            guild: guild()?,
            target: target()?,
            role: role()?,
        },
        ActionTag::AddRole => GuildAction::AddRole { guild: guild()? },
        ActionTag::RemoveRole => GuildAction::RemoveRole {
            guild: guild()?,
            role: role()?,
        },
        ActionTag::UpdateRole => {
            let payload = RoleUpdatePayload::decode(proto.payload.as_slice())?;
            GuildAction::UpdateRole {
                guild: guild()?,
                role: role()?,
                name: payload.name,
                authority: payload.authority,
                permissions: GuildPerms::from_bits_truncate(payload.permissions),
            }
        }
        ActionTag::UpdateInfo => {
            let payload = GuildInfoPayload::decode(proto.payload.as_slice())?;
            GuildAction::UpdateInfo {
                guild: guild()?,
                name: payload.name,
                color: Rgb::from_packed(payload.color),
            }
        }
        ActionTag::Disband => GuildAction::Disband { guild: guild()? },
        ActionTag::Leave => GuildAction::Leave { guild: guild()? },
        ActionTag::RepresentGuild => GuildAction::RepresentGuild {
            guild: proto.guild_id,
        },
        ActionTag::AddClaim => GuildAction::AddClaim {
            guild: proto.guild_id,
            position: claim_position(&proto.payload)?,
        },
        ActionTag::RemoveClaim => GuildAction::RemoveClaim {
            guild: proto.guild_id,
            position: claim_position(&proto.payload)?,
        },
    };
    Ok(action)
}

fn claim_position(payload: &[u8]) -> Result<GridPos2d, WireError> {
    if payload.is_empty() {
        return Err(WireError::MissingField("payload"));
    }
    let p = ClaimPayload::decode(payload)?;
    Ok(GridPos2d::new(p.x, p.z))
}

pub fn broadcast_to_proto(broadcast: &Broadcast) -> ProtoBroadcast {
    ProtoBroadcast {
        sequence: broadcast.sequence,
        actor: broadcast.actor.clone(),
        action: Some(action_to_proto(&broadcast.action)),
    }
}

pub fn broadcast_from_proto(proto: &ProtoBroadcast) -> Result<Broadcast, WireError> {
    let action = proto.action.as_ref().ok_or(WireError::MissingField("action"))?;
    Ok(Broadcast {
        sequence: proto.sequence,
        actor: proto.actor.clone(),
        action: action_from_proto(action)?,
    })
}

// ── Snapshots ──────────────────────────────────────────────────

pub fn metrics_to_proto(metrics: &MetricsRecord) -> ProtoMetrics {
    ProtoMetrics {
        player_id: metrics.player_id.clone(),
        last_display_name: metrics.last_display_name.clone(),
        last_online: metrics.last_online,
        is_online: metrics.is_online,
        represented_guild: metrics.represented_guild,
    }
}

pub fn metrics_from_proto(proto: &ProtoMetrics) -> MetricsRecord {
    MetricsRecord {
        player_id: proto.player_id.clone(),
        last_display_name: proto.last_display_name.clone(),
        last_online: proto.last_online,
        is_online: proto.is_online,
        represented_guild: proto.represented_guild,
    }
}

pub fn player_metrics_to_proto(metrics: &PlayerMetrics) -> ProtoMetrics {
    metrics_to_proto(&guild_engine::snapshot::metrics_record(metrics))
}

pub fn guild_sync_to_proto(doc: &GuildDocument, sequence: u64) -> ProtoGuildSync {
    ProtoGuildSync {
        sequence,
        next_guild_id: doc.next_guild_id,
        guilds: doc
            .guilds
            .iter()
            .map(|g| ProtoGuild {
                id: g.id,
                name: g.name.clone(),
                color: g.color,
                roles: g
                    .roles
                    .iter()
                    .map(|r| ProtoRole {
                        id: r.id,
                        name: r.name.clone(),
                        authority: r.authority,
                        permissions: r.permission_bits,
                    })
                    .collect(),
                members: g
                    .members
                    .iter()
                    .map(|m| ProtoMember {
                        player_id: m.player_id.clone(),
                        role_id: m.role_id,
                    })
                    .collect(),
                invites: g.invites.clone(),
            })
            .collect(),
        metrics: doc.metrics.iter().map(metrics_to_proto).collect(),
    }
}

pub fn guild_sync_from_proto(proto: &ProtoGuildSync) -> GuildDocument {
    GuildDocument {
        schema_version: SCHEMA_VERSION,
        next_guild_id: proto.next_guild_id,
        guilds: proto
            .guilds
            .iter()
            .map(|g| GuildRecord {
                id: g.id,
                name: g.name.clone(),
                color: g.color,
                roles: g
                    .roles
                    .iter()
                    .map(|r| RoleRecord {
                        id: r.id,
                        name: r.name.clone(),
                        authority: r.authority,
                        permission_bits: r.permissions,
                    })
                    .collect(),
                members: g
                    .members
                    .iter()
                    .map(|m| MemberRecord {
                        player_id: m.player_id.clone(),
                        role_id: m.role_id,
                    })
                    .collect(),
                invites: g.invites.clone(),
            })
            .collect(),
        metrics: proto.metrics.iter().map(metrics_from_proto).collect(),
    }
}

pub fn claim_sync_to_proto(doc: &ClaimDocument, sequence: u64, state_hash: String) -> ProtoClaimSync {
    ProtoClaimSync {
        sequence,
        claims: doc
            .claims
            .iter()
            .map(|c| ProtoClaim {
                guild_id: c.guild_id,
                x: c.x,
                z: c.z,
                border_flags: u32::from(c.border_flags),
            })
            .collect(),
        state_hash,
    }
}

pub fn claim_sync_from_proto(proto: &ProtoClaimSync) -> Result<ClaimDocument, WireError> {
    let claims = proto
        .claims
        .iter()
        .map(|c| {
            let border_flags = u8::try_from(c.border_flags)
                .ok()
                .and_then(BorderFlags::from_bits)
                .ok_or_else(|| WireError::InvalidField {
                    field: "border_flags",
                    reason: format!("{} does not fit in 4 edge bits", c.border_flags),
                })?
                .bits();
            Ok(ClaimRecord {
                guild_id: c.guild_id,
                x: c.x,
                z: c.z,
                border_flags,
            })
        })
        .collect::<Result<Vec<_>, WireError>>()?;
    Ok(ClaimDocument { claims })
}

// ── Top-level messages ─────────────────────────────────────────

pub fn encode_server(message: &ServerMessage) -> Vec<u8> {
    message.encode_to_vec()
}

pub fn decode_server(bytes: &[u8]) -> Result<ServerKind, WireError> {
    ServerMessage::decode(bytes)?
        .kind
        .ok_or(WireError::MissingField("kind"))
}

pub fn encode_client(message: &ClientMessage) -> Vec<u8> {
    message.encode_to_vec()
}

pub fn decode_client(bytes: &[u8]) -> Result<ClientKind, WireError> {
    ClientMessage::decode(bytes)?
        .kind
        .ok_or(WireError::MissingField("kind"))
}

pub fn server_message(kind: ServerKind) -> ServerMessage {
    ServerMessage { kind: Some(kind) }
}

pub fn client_message(kind: ClientKind) -> ClientMessage {
    ClientMessage { kind: Some(kind) }
}

/// A client request carrying `action`.
pub fn request(action: &GuildAction) -> ClientMessage {
    client_message(ClientKind::Request(action_to_proto(action)))
}
