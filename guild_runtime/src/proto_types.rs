//! Hand-written protobuf types for the guild sync protocol.
//!
//! Uses prost derive macros for encode/decode without prost-build.
//! Two top-level messages travel on a connection: `ClientMessage`
//! (client → server) and `ServerMessage` (server → client). Each is a
//! closed oneof; there is no runtime message registration.

use prost::Message;

// ── Action tags ────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ProtoActionTag {
    Unspecified = 0,
    Create = 1,
    Invite = 2,
    CancelInvite = 3,
    AcceptInvite = 4,
    Kick = 5,
    Promote = 6,
    AddRole = 7,
    RemoveRole = 8,
    UpdateRole = 9,
    UpdateInfo = 10,
    Disband = 11,
    Leave = 12,
    RepresentGuild = 13,
    AddClaim = 14,
    RemoveClaim = 15,
}

// ── Action envelope ────────────────────────────────────────────

/// Generic request/broadcast envelope. Only the fields an action needs
/// are set; action-specific data rides in `payload`.
#[derive(Clone, PartialEq, Message)]
pub struct ProtoAction {
    #[prost(enumeration = "ProtoActionTag", tag = "1")]
    pub tag: i32,
    #[prost(uint32, optional, tag = "2")]
    pub guild_id: Option<u32>,
    #[prost(string, optional, tag = "3")]
    pub target_player: Option<String>,
    #[prost(uint32, optional, tag = "4")]
    pub role_id: Option<u32>,
    #[prost(bytes = "vec", tag = "5")]
    pub payload: Vec<u8>,
}

// ── Payloads ───────────────────────────────────────────────────

#[derive(Clone, PartialEq, Message)]
pub struct CreatePayload {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct RoleUpdatePayload {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int32, tag = "2")]
    pub authority: i32,
    #[prost(uint32, tag = "3")]
    pub permissions: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct GuildInfoPayload {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(uint32, tag = "2")]
    pub color: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClaimPayload {
    #[prost(sint32, tag = "1")]
    pub x: i32,
    #[prost(sint32, tag = "2")]
    pub z: i32,
}

// ── State records ──────────────────────────────────────────────

#[derive(Clone, PartialEq, Message)]
pub struct ProtoRole {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(int32, tag = "3")]
    pub authority: i32,
    #[prost(uint32, tag = "4")]
    pub permissions: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProtoMember {
    #[prost(string, tag = "1")]
    pub player_id: String,
    #[prost(uint32, tag = "2")]
    pub role_id: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProtoGuild {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(uint32, tag = "3")]
    pub color: u32,
    #[prost(message, repeated, tag = "4")]
    pub roles: Vec<ProtoRole>,
    #[prost(message, repeated, tag = "5")]
    pub members: Vec<ProtoMember>,
    #[prost(string, repeated, tag = "6")]
    pub invites: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProtoMetrics {
    #[prost(string, tag = "1")]
    pub player_id: String,
    #[prost(string, tag = "2")]
    pub last_display_name: String,
    #[prost(uint64, tag = "3")]
    pub last_online: u64,
    #[prost(bool, tag = "4")]
    pub is_online: bool,
    #[prost(uint32, optional, tag = "5")]
    pub represented_guild: Option<u32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProtoClaim {
    #[prost(uint32, tag = "1")]
    pub guild_id: u32,
    #[prost(sint32, tag = "2")]
    pub x: i32,
    #[prost(sint32, tag = "3")]
    pub z: i32,
    #[prost(uint32, tag = "4")]
    pub border_flags: u32,
}

// ── Server → client ────────────────────────────────────────────

#[derive(Clone, PartialEq, Message)]
pub struct ProtoBroadcast {
    #[prost(uint64, tag = "1")]
    pub sequence: u64,
    #[prost(string, tag = "2")]
    pub actor: String,
    #[prost(message, optional, tag = "3")]
    pub action: Option<ProtoAction>,
}

/// Full guild-registry snapshot, taken at `sequence`.
#[derive(Clone, PartialEq, Message)]
pub struct ProtoGuildSync {
    #[prost(uint64, tag = "1")]
    pub sequence: u64,
    #[prost(uint32, tag = "2")]
    pub next_guild_id: u32,
    #[prost(message, repeated, tag = "3")]
    pub guilds: Vec<ProtoGuild>,
    #[prost(message, repeated, tag = "4")]
    pub metrics: Vec<ProtoMetrics>,
}

/// Full claim-grid snapshot. Always sent right after a `ProtoGuildSync`;
/// `state_hash` covers both.
#[derive(Clone, PartialEq, Message)]
pub struct ProtoClaimSync {
    #[prost(uint64, tag = "1")]
    pub sequence: u64,
    #[prost(message, repeated, tag = "2")]
    pub claims: Vec<ProtoClaim>,
    #[prost(string, tag = "3")]
    pub state_hash: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProtoMetricsUpdate {
    #[prost(message, optional, tag = "1")]
    pub metrics: Option<ProtoMetrics>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProtoRejected {
    #[prost(enumeration = "ProtoActionTag", tag = "1")]
    pub tag: i32,
    #[prost(string, tag = "2")]
    pub reason: String,
}

/// Echo sent only to the originating connection.
#[derive(Clone, PartialEq, Message)]
pub struct ProtoAcknowledged {
    #[prost(uint64, tag = "1")]
    pub sequence: u64,
    #[prost(message, optional, tag = "2")]
    pub action: Option<ProtoAction>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ServerMessage {
    #[prost(oneof = "ServerKind", tags = "1, 2, 3, 4, 5, 6")]
    pub kind: Option<ServerKind>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum ServerKind {
    #[prost(message, tag = "1")]
    Broadcast(ProtoBroadcast),
    #[prost(message, tag = "2")]
    GuildSync(ProtoGuildSync),
    #[prost(message, tag = "3")]
    ClaimSync(ProtoClaimSync),
    #[prost(message, tag = "4")]
    MetricsUpdate(ProtoMetricsUpdate),
    #[prost(message, tag = "5")]
    Rejected(ProtoRejected),
    #[prost(message, tag = "6")]
    Acknowledged(ProtoAcknowledged),
}

// ── Client → server ────────────────────────────────────────────

/// Ask for fresh full snapshots (sent after a sequence gap).
#[derive(Clone, PartialEq, Message)]
pub struct ProtoResync {
    #[prost(uint64, tag = "1")]
    pub last_sequence: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientMessage {
    #[prost(oneof = "ClientKind", tags = "1, 2")]
    pub kind: Option<ClientKind>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum ClientKind {
    #[prost(message, tag = "1")]
    Request(ProtoAction),
    #[prost(message, tag = "2")]
    Resync(ProtoResync),
}
