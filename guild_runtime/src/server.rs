//! Authoritative guild server — one writer, many connections.
//!
//! The host feeds the server connection events and inbound frames; the
//! server queues outbound messages per connection. Every mutation goes
//! through `GuildEngine::submit` on the calling thread, so requests are
//! applied strictly in receipt order and never interleave.
//!
//! Join order for a connection:
//!   1. metrics update to every synced connection
//!   2. full guild snapshot, then full claim snapshot, to the joiner
//!   3. the connection is `FullySynced` and receives broadcasts

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use guild_engine::access::{AccessDecision, AccessDecisionPoint, AccessKind, BlockPos};
use guild_engine::actions::{ActionTag, GuildAction};
use guild_engine::claims::ClaimGrid;
use guild_engine::domain::{PlayerId, PlayerMetrics};
use guild_engine::integrity::IntegrityReport;
use guild_engine::registry::GuildRegistry;
use guild_engine::snapshot::{claims_per_guild, restore_claims, restore_registry};
use guild_engine::GuildEngine;

use crate::codec::encode_frame;
use crate::config::ServerConfig;
use crate::error::{PersistenceError, WireError};
use crate::persistence::PersistenceGateway;
use crate::proto_bridge::{
    action_from_proto, action_to_proto, broadcast_to_proto, claim_sync_to_proto, decode_client,
    encode_server, guild_sync_to_proto, player_metrics_to_proto, server_message, tag_to_proto,
};
use crate::proto_types::{
    ClientKind, ProtoAcknowledged, ProtoAction, ProtoMetricsUpdate, ProtoRejected, ServerKind,
    ServerMessage,
};

pub type ConnectionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Joining,
    FullySynced,
}

#[derive(Debug, Clone)]
struct Connection {
    player: PlayerId,
    state: ConnState,
}

/// A message queued for one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub conn: ConnectionId,
    pub message: ServerMessage,
}

pub struct GuildServer {
    config: ServerConfig,
    engine: GuildEngine,
    gateway: Box<dyn PersistenceGateway>,
    connections: BTreeMap<ConnectionId, Connection>,
    outbox: Vec<Outbound>,
}

impl GuildServer {
    /// Load both documents and bring the store to a valid state.
    ///
    /// Never fails: a missing document starts empty, a corrupt or invalid
    /// one is logged and discarded.
    pub fn start(config: ServerConfig, gateway: impl PersistenceGateway + 'static, now: u64) -> Self {
        let engine = load_engine(&config, &gateway, now);
        tracing::info!(
            target: "guilds::server",
            guilds = engine.registry().guilds().count(),
            claims = engine.claims().len(),
            "server.started"
        );
        Self {
            config,
            engine,
            gateway: Box::new(gateway),
            connections: BTreeMap::new(),
            outbox: Vec::new(),
        }
    }

    pub fn engine(&self) -> &GuildEngine {
        &self.engine
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn connection_state(&self, conn: ConnectionId) -> ConnState {
        self.connections
            .get(&conn)
            .map_or(ConnState::Disconnected, |c| c.state)
    }

    pub fn is_player_connected(&self, player: &str) -> bool {
        self.connections.values().any(|c| c.player == player)
    }

    // ── Presence ───────────────────────────────────────────────────

    pub fn player_joined(&mut self, conn: ConnectionId, player: &str, display_name: &str, now: u64) {
        self.connections.insert(
            conn,
            Connection {
                player: player.to_string(),
                state: ConnState::Joining,
            },
        );
        let metrics = self.engine.player_joined(player, display_name, now);
        tracing::info!(target: "guilds::server", conn, player = %player, "player.joined");

        self.broadcast_metrics(&metrics);
        self.send_full_sync(conn);
    }

    pub fn player_left(&mut self, conn: ConnectionId, now: u64) {
        let Some(connection) = self.connections.remove(&conn) else {
            return;
        };
        tracing::info!(target: "guilds::server", conn, player = %connection.player, "player.left");

        // Another connection may still be logged in as the same player.
        if self.is_player_connected(&connection.player) {
            return;
        }
        if let Some(metrics) = self.engine.player_left(&connection.player, now) {
            self.broadcast_metrics(&metrics);
        }
    }

    // ── Inbound ────────────────────────────────────────────────────

    /// Decode and handle one inbound frame. Malformed frames are dropped.
    pub fn handle_frame(&mut self, conn: ConnectionId, frame: &[u8]) {
        match decode_client(frame) {
            Ok(kind) => self.handle_client_message(conn, kind),
            Err(err) => {
                tracing::debug!(target: "guilds::server", conn, error = %err, "frame.dropped");
            }
        }
    }

    pub fn handle_client_message(&mut self, conn: ConnectionId, kind: ClientKind) {
        let Some(connection) = self.connections.get(&conn) else {
            tracing::debug!(target: "guilds::server", conn, "message.unknown_connection");
            return;
        };
        let player = connection.player.clone();

        match kind {
            ClientKind::Request(proto) => {
                if connection.state != ConnState::FullySynced {
                    tracing::debug!(target: "guilds::server", conn, "request.not_synced");
                    return;
                }
                self.handle_request(conn, &player, &proto);
            }
            ClientKind::Resync(resync) => {
                tracing::info!(
                    target: "guilds::server",
                    conn,
                    player = %player,
                    last_sequence = resync.last_sequence,
                    "resync.requested"
                );
                self.send_full_sync(conn);
            }
        }
    }

    fn handle_request(&mut self, conn: ConnectionId, player: &str, proto: &ProtoAction) {
        let action = match action_from_proto(proto) {
            Ok(action) => action,
            Err(err) => {
                tracing::debug!(target: "guilds::server", conn, error = %err, "request.malformed");
                return;
            }
        };
        self.submit(conn, player, &action);
    }

    /// Apply an action for the player on `conn`. The actor always comes
    /// from the connection, never from the message.
    pub fn submit(&mut self, conn: ConnectionId, player: &str, action: &GuildAction) {
        let accepted = match self.engine.submit(player, action) {
            Ok(accepted) => accepted,
            Err(err) => {
                tracing::debug!(
                    target: "guilds::server",
                    player = %player,
                    action = ?action.tag(),
                    kind = ?err.kind(),
                    error = %err,
                    "request.rejected"
                );
                if self.config.notify_rejections {
                    self.send(
                        conn,
                        ServerKind::Rejected(ProtoRejected {
                            tag: tag_to_proto(action.tag()) as i32,
                            reason: err.to_string(),
                        }),
                    );
                }
                return;
            }
        };

        let broadcast = &accepted.broadcast;
        match broadcast.action.tag() {
            ActionTag::Create | ActionTag::Disband => {
                tracing::info!(
                    target: "guilds::server",
                    player = %player,
                    action = ?broadcast.action.tag(),
                    guild = ?accepted.guild,
                    claims_removed = accepted.removed_claims.len(),
                    "guild.lifecycle"
                );
            }
            _ => {}
        }

        let proto = broadcast_to_proto(broadcast);
        self.send_to_synced(ServerKind::Broadcast(proto));

        if broadcast.action.tag() == ActionTag::CancelInvite {
            self.send(
                conn,
                ServerKind::Acknowledged(ProtoAcknowledged {
                    sequence: broadcast.sequence,
                    action: Some(action_to_proto(&broadcast.action)),
                }),
            );
        }
    }

    // ── Outbound ───────────────────────────────────────────────────

    fn send(&mut self, conn: ConnectionId, kind: ServerKind) {
        self.outbox.push(Outbound {
            conn,
            message: server_message(kind),
        });
    }

    fn send_to_synced(&mut self, kind: ServerKind) {
        let targets: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, c)| c.state == ConnState::FullySynced)
            .map(|(id, _)| *id)
            .collect();
        for conn in targets {
            self.send(conn, kind.clone());
        }
    }

    fn broadcast_metrics(&mut self, metrics: &PlayerMetrics) {
        self.send_to_synced(ServerKind::MetricsUpdate(ProtoMetricsUpdate {
            metrics: Some(player_metrics_to_proto(metrics)),
        }));
    }

    fn resync_synced(&mut self) {
        let targets: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, c)| c.state == ConnState::FullySynced)
            .map(|(id, _)| *id)
            .collect();
        tracing::info!(target: "guilds::server", connections = targets.len(), "repairs.resync");
        for conn in targets {
            self.send_full_sync(conn);
        }
    }

    /// Push both snapshots to `conn` and mark it synced.
    fn send_full_sync(&mut self, conn: ConnectionId) {
        let Some(connection) = self.connections.get_mut(&conn) else {
            return;
        };
        connection.state = ConnState::Joining;

        let sequence = self.engine.sequence();
        let guilds = self.engine.guild_document();
        let claims = self.engine.claim_document();
        let hash = self.engine.state_hash();

        self.send(conn, ServerKind::GuildSync(guild_sync_to_proto(&guilds, sequence)));
        self.send(conn, ServerKind::ClaimSync(claim_sync_to_proto(&claims, sequence, hash)));

        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.state = ConnState::FullySynced;
        }
    }

    /// Take every queued message.
    pub fn drain_outbox(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    /// Take every queued message as a length-prefixed frame. Messages
    /// that do not fit in a frame are logged and dropped.
    pub fn drain_frames(&mut self) -> Vec<(ConnectionId, Vec<u8>)> {
        let max_len = self.config.max_frame_len;
        self.drain_outbox()
            .into_iter()
            .filter_map(|out| match frame_message(&out.message, max_len) {
                Ok(frame) => Some((out.conn, frame)),
                Err(err) => {
                    tracing::warn!(target: "guilds::server", conn = out.conn, error = %err, "frame.too_large");
                    None
                }
            })
            .collect()
    }

    // ── Persistence ────────────────────────────────────────────────

    /// Repair, then write both documents. Repairs are not sequenced, so
    /// when the pass changes anything every synced connection gets fresh
    /// snapshots.
    pub fn save(&mut self, now: u64) -> Result<IntegrityReport, PersistenceError> {
        let connected: Vec<PlayerId> = self.connections.values().map(|c| c.player.clone()).collect();
        let report = self
            .engine
            .verify_data_integrity(|player| connected.iter().any(|p| p == player), now);
        self.engine.validate().map_err(PersistenceError::InvariantViolation)?;
        if !report.is_clean() {
            self.resync_synced();
        }

        let guilds = self.engine.guild_document();
        let claims = self.engine.claim_document();
        if let Err(err) = self
            .gateway
            .save_guilds(&guilds)
            .and_then(|()| self.gateway.save_claims(&claims))
        {
            tracing::warn!(target: "guilds::persist", error = %err, "save.failed");
            return Err(err);
        }
        tracing::info!(
            target: "guilds::persist",
            guilds = guilds.guilds.len(),
            claims = claims.claims.len(),
            repairs = report.total(),
            "save.completed"
        );
        Ok(report)
    }
}

impl AccessDecisionPoint for GuildServer {
    fn decide(&self, actor: &str, pos: BlockPos, kind: AccessKind) -> AccessDecision {
        self.engine.decide(actor, pos, kind)
    }
}

fn frame_message(message: &ServerMessage, max_len: usize) -> Result<Vec<u8>, WireError> {
    encode_frame(&encode_server(message), max_len)
}

// ── Loading ────────────────────────────────────────────────────────

fn load_registry(
    config: &ServerConfig,
    gateway: &dyn PersistenceGateway,
) -> Result<GuildRegistry, PersistenceError> {
    match gateway.load_guilds()? {
        Some(doc) => Ok(restore_registry(&doc, config.limits())?),
        None => {
            tracing::info!(target: "guilds::persist", "guilds.loaded=empty");
            Ok(GuildRegistry::new(config.limits()))
        }
    }
}

fn load_claims(gateway: &dyn PersistenceGateway) -> Result<ClaimGrid, PersistenceError> {
    match gateway.load_claims()? {
        Some(doc) => {
            for (guild, count) in claims_per_guild(&doc) {
                tracing::info!(target: "guilds::persist", guild, claims = count, "claims.loaded");
            }
            Ok(restore_claims(&doc)?)
        }
        None => {
            tracing::info!(target: "guilds::persist", "claims.loaded=empty");
            Ok(ClaimGrid::new())
        }
    }
}

fn load_engine(config: &ServerConfig, gateway: &dyn PersistenceGateway, now: u64) -> GuildEngine {
    let registry = load_registry(config, gateway).unwrap_or_else(|err| {
        tracing::warn!(target: "guilds::persist", error = %err, "guilds.discarded");
        GuildRegistry::new(config.limits())
    });
    let claims = load_claims(gateway).unwrap_or_else(|err| {
        tracing::warn!(target: "guilds::persist", error = %err, "claims.discarded");
        ClaimGrid::new()
    });

    let mut engine = GuildEngine::from_parts(registry, claims, 0);
    // Nobody is connected yet.
    engine.verify_data_integrity(|_| false, now);
    if config.recompute_borders_on_load {
        let fixed = engine.recompute_borders();
        if fixed > 0 {
            tracing::info!(target: "guilds::persist", fixed, "claims.borders_recomputed");
        }
    }

    if let Err(violation) = engine.validate() {
        tracing::warn!(
            target: "guilds::persist",
            error = %violation,
            "store.discarded"
        );
        return GuildEngine::new(config.limits());
    }
    engine
}

// ── Shared handle ──────────────────────────────────────────────────

/// Thread-safe server handle. All calls serialize on one lock, which
/// keeps the single-writer order.
pub struct SharedServer {
    inner: Mutex<GuildServer>,
}

impl SharedServer {
    pub fn new(server: GuildServer) -> Self {
        Self {
            inner: Mutex::new(server),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GuildServer> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` with exclusive access to the server.
    pub fn with<R>(&self, f: impl FnOnce(&mut GuildServer) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn player_joined(&self, conn: ConnectionId, player: &str, display_name: &str, now: u64) {
        self.lock().player_joined(conn, player, display_name, now);
    }

    pub fn player_left(&self, conn: ConnectionId, now: u64) {
        self.lock().player_left(conn, now);
    }

    pub fn handle_frame(&self, conn: ConnectionId, frame: &[u8]) {
        self.lock().handle_frame(conn, frame);
    }

    pub fn drain_frames(&self) -> Vec<(ConnectionId, Vec<u8>)> {
        self.lock().drain_frames()
    }

    pub fn save(&self, now: u64) -> Result<IntegrityReport, PersistenceError> {
        self.lock().save(now)
    }

    pub fn state_hash(&self) -> String {
        self.lock().engine().state_hash()
    }

    pub fn decide(&self, actor: &str, pos: BlockPos, kind: AccessKind) -> AccessDecision {
        self.lock().decide(actor, pos, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryGateway;
    use crate::proto_bridge::request;

    fn server() -> GuildServer {
        GuildServer::start(ServerConfig::default(), MemoryGateway::new(), 0)
    }

    fn kinds(out: &[Outbound], conn: ConnectionId) -> Vec<&ServerKind> {
        out.iter()
            .filter(|o| o.conn == conn)
            .filter_map(|o| o.message.kind.as_ref())
            .collect()
    }

    #[test]
    fn join_sends_metrics_then_snapshots() {
        let mut server = server();
        server.player_joined(1, "p1", "P1", 10);
        server.drain_outbox();

        server.player_joined(2, "p2", "P2", 11);
        let out = server.drain_outbox();
        assert!(matches!(kinds(&out, 1).as_slice(), [ServerKind::MetricsUpdate(_)]));
        assert!(matches!(
            kinds(&out, 2).as_slice(),
            [ServerKind::GuildSync(_), ServerKind::ClaimSync(_)]
        ));
        assert_eq!(server.connection_state(2), ConnState::FullySynced);
    }

    #[test]
    fn rejection_goes_only_to_sender() {
        let mut server = server();
        server.player_joined(1, "p1", "P1", 0);
        server.player_joined(2, "p2", "P2", 0);
        server.drain_outbox();

        let action = GuildAction::Kick { guild: 9, target: "p1".to_string() };
        server.handle_client_message(2, ClientKind::Request(action_to_proto(&action)));
        let out = server.drain_outbox();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].conn, 2);
        assert!(matches!(out[0].message.kind, Some(ServerKind::Rejected(_))));
        assert_eq!(server.engine().sequence(), 0);
    }

    #[test]
    fn rejections_can_be_silenced() {
        let config = ServerConfig { notify_rejections: false, ..ServerConfig::default() };
        let mut server = GuildServer::start(config, MemoryGateway::new(), 0);
        server.player_joined(1, "p1", "P1", 0);
        server.drain_outbox();

        let action = GuildAction::Create { name: "x".to_string(), guild: None };
        server.handle_client_message(1, ClientKind::Request(action_to_proto(&action)));
        assert!(server.drain_outbox().is_empty());
    }

    #[test]
    fn cancel_invite_is_echoed_to_sender() {
        let mut server = server();
        server.player_joined(1, "p1", "P1", 0);
        server.player_joined(2, "p2", "P2", 0);
        let create = GuildAction::Create { name: "Alpha".to_string(), guild: None };
        server.submit(1, "p1", &create);
        server.submit(1, "p1", &GuildAction::Invite { guild: 0, target: "p2".to_string() });
        server.drain_outbox();

        let cancel = GuildAction::CancelInvite { guild: 0, target: "p2".to_string() };
        let frame = crate::proto_bridge::encode_client(&request(&cancel));
        server.handle_frame(1, &frame);
        let out = server.drain_outbox();

        assert!(matches!(
            kinds(&out, 1).as_slice(),
            [ServerKind::Broadcast(_), ServerKind::Acknowledged(_)]
        ));
        assert!(matches!(kinds(&out, 2).as_slice(), [ServerKind::Broadcast(_)]));
    }

    #[test]
    fn leaving_marks_player_offline() {
        let mut server = server();
        server.player_joined(1, "p1", "P1", 0);
        server.player_joined(2, "p2", "P2", 0);
        server.drain_outbox();

        server.player_left(2, 50);
        let out = server.drain_outbox();
        assert!(matches!(kinds(&out, 1).as_slice(), [ServerKind::MetricsUpdate(_)]));
        assert_eq!(server.connection_state(2), ConnState::Disconnected);
        let metrics = server.engine().registry().metrics("p2").unwrap();
        assert!(!metrics.is_online);
        assert_eq!(metrics.last_online, 50);
    }

    #[test]
    fn repairs_on_save_resync_connected_replicas() {
        let mut server = server();
        let stale_after = server.config().stale_metrics_after_secs;
        server.player_joined(2, "drifter", "D", 0);
        server.player_left(2, 0);
        server.player_joined(1, "p1", "P1", 0);
        server.drain_outbox();

        let report = server.save(stale_after + 1).unwrap();
        assert_eq!(report.stale_metrics, 1);
        assert!(server.engine().registry().metrics("drifter").is_none());
        let out = server.drain_outbox();
        assert!(matches!(
            kinds(&out, 1).as_slice(),
            [ServerKind::GuildSync(_), ServerKind::ClaimSync(_)]
        ));
        assert_eq!(server.connection_state(1), ConnState::FullySynced);

        // A clean pass sends nothing.
        server.save(stale_after + 2).unwrap();
        assert!(server.drain_outbox().is_empty());
    }

    #[test]
    fn garbage_frames_are_dropped() {
        let mut server = server();
        server.player_joined(1, "p1", "P1", 0);
        server.drain_outbox();
        server.handle_frame(1, &[0xde, 0xad, 0xbe, 0xef]);
        assert!(server.drain_outbox().is_empty());
    }
}
