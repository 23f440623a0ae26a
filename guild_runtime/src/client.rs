//! Client replica — a read-mostly copy of the server's store.
//!
//! Every visible change comes from the server: full snapshots overwrite
//! the replica, broadcasts patch it in sequence order. Requests go out
//! without touching local state. On a sequence gap or a broadcast that
//! does not apply, the replica drops back to `Joining` and asks for fresh
//! snapshots.

use guild_engine::actions::{ActionTag, GuildAction};
use guild_engine::domain::EngineLimits;
use guild_engine::observers::{GuildObserver, ObserverList, SubscriptionId, UpdateKind};
use guild_engine::snapshot::{metrics_from_record, GuildDocument};
use guild_engine::GuildEngine;

use crate::codec::encode_frame;
use crate::error::WireError;
use crate::proto_bridge::{
    action_from_proto, broadcast_from_proto, claim_sync_from_proto, client_message,
    decode_server, encode_client, guild_sync_from_proto, metrics_from_proto, request,
    tag_from_proto,
};
use crate::proto_types::{
    ClientKind, ClientMessage, ProtoBroadcast, ProtoClaimSync, ProtoResync, ServerKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Disconnected,
    Joining,
    FullySynced,
}

/// The server's answer to a rejected request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub tag: Option<ActionTag>,
    pub reason: String,
}

pub struct ClientReplica {
    player: String,
    limits: EngineLimits,
    engine: GuildEngine,
    state: SyncState,
    /// Guild snapshot waiting for its claim snapshot.
    pending_guilds: Option<(GuildDocument, u64)>,
    observers: ObserverList,
    outbox: Vec<ClientMessage>,
    rejections: Vec<Rejection>,
    acknowledged: Vec<GuildAction>,
    hash_mismatches: u64,
}

impl ClientReplica {
    pub fn new(player: &str, limits: EngineLimits) -> Self {
        Self {
            player: player.to_string(),
            limits,
            engine: GuildEngine::new(limits),
            state: SyncState::Disconnected,
            pending_guilds: None,
            observers: ObserverList::new(),
            outbox: Vec::new(),
            rejections: Vec::new(),
            acknowledged: Vec::new(),
            hash_mismatches: 0,
        }
    }

    pub fn player(&self) -> &str {
        &self.player
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Local view of the world. Read-only: the replica only changes
    /// through server messages.
    pub fn engine(&self) -> &GuildEngine {
        &self.engine
    }

    pub fn rejections(&self) -> &[Rejection] {
        &self.rejections
    }

    /// Take every rejection received since the last call.
    pub fn drain_rejections(&mut self) -> Vec<Rejection> {
        std::mem::take(&mut self.rejections)
    }

    pub fn acknowledged(&self) -> &[GuildAction] {
        &self.acknowledged
    }

    pub fn drain_acknowledged(&mut self) -> Vec<GuildAction> {
        std::mem::take(&mut self.acknowledged)
    }

    /// Snapshots whose hash did not match after loading.
    pub fn hash_mismatches(&self) -> u64 {
        self.hash_mismatches
    }

    pub fn connected(&mut self) {
        self.state = SyncState::Joining;
        self.pending_guilds = None;
    }

    pub fn disconnected(&mut self) {
        self.state = SyncState::Disconnected;
        self.pending_guilds = None;
    }

    // ── Observers ──────────────────────────────────────────────────

    pub fn subscribe(&mut self, observer: impl GuildObserver + 'static) -> SubscriptionId {
        self.observers.subscribe(observer)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    // ── Outbound ───────────────────────────────────────────────────

    /// Queue a request. Nothing changes locally until the server
    /// broadcasts the result.
    pub fn request(&mut self, action: &GuildAction) {
        self.outbox.push(request(action));
    }

    pub fn drain_outbox(&mut self) -> Vec<ClientMessage> {
        std::mem::take(&mut self.outbox)
    }

    pub fn drain_frames(&mut self, max_len: usize) -> Result<Vec<Vec<u8>>, WireError> {
        self.drain_outbox()
            .iter()
            .map(|message| encode_frame(&encode_client(message), max_len))
            .collect()
    }

    fn request_resync(&mut self) {
        self.state = SyncState::Joining;
        self.pending_guilds = None;
        self.outbox.push(client_message(ClientKind::Resync(ProtoResync {
            last_sequence: self.engine.sequence(),
        })));
    }

    // ── Inbound ────────────────────────────────────────────────────

    /// Decode and handle one frame payload. Malformed input is dropped.
    pub fn handle_frame(&mut self, frame: &[u8]) {
        match decode_server(frame) {
            Ok(kind) => self.handle_server_message(kind),
            Err(err) => {
                tracing::debug!(target: "guilds::replica", error = %err, "frame.dropped");
            }
        }
    }

    pub fn handle_server_message(&mut self, kind: ServerKind) {
        match kind {
            ServerKind::GuildSync(sync) => {
                let sequence = sync.sequence;
                self.pending_guilds = Some((guild_sync_from_proto(&sync), sequence));
            }
            ServerKind::ClaimSync(sync) => self.finish_sync(&sync),
            ServerKind::Broadcast(broadcast) => self.apply_broadcast(&broadcast),
            ServerKind::MetricsUpdate(update) => {
                if let Some(metrics) = update.metrics {
                    let metrics = metrics_from_record(&metrics_from_proto(&metrics));
                    self.engine.upsert_metrics(metrics);
                    self.observers.notify(UpdateKind::METRICS_CHANGED, None);
                }
            }
            ServerKind::Rejected(rejected) => {
                tracing::debug!(target: "guilds::replica", reason = %rejected.reason, "request.rejected");
                self.rejections.push(Rejection {
                    tag: tag_from_proto(rejected.tag).ok(),
                    reason: rejected.reason,
                });
            }
            ServerKind::Acknowledged(ack) => {
                match ack.action.as_ref().map(action_from_proto) {
                    Some(Ok(action)) => self.acknowledged.push(action),
                    Some(Err(err)) => {
                        tracing::debug!(target: "guilds::replica", error = %err, "ack.dropped");
                    }
                    None => {}
                }
            }
        }
    }

    fn finish_sync(&mut self, sync: &ProtoClaimSync) {
        let Some((guilds, sequence)) = self.pending_guilds.take() else {
            tracing::warn!(target: "guilds::replica", "claim_sync.without_guild_sync");
            self.request_resync();
            return;
        };
        if sequence != sync.sequence {
            tracing::warn!(
                target: "guilds::replica",
                guild_sequence = sequence,
                claim_sequence = sync.sequence,
                "snapshot.sequence_mismatch"
            );
            self.request_resync();
            return;
        }

        let restored = claim_sync_from_proto(sync)
            .map_err(|err| err.to_string())
            .and_then(|claims| {
                GuildEngine::restore(&guilds, &claims, self.limits, sequence)
                    .map_err(|err| err.to_string())
            });
        let engine = match restored {
            Ok(engine) => engine,
            Err(err) => {
                tracing::warn!(target: "guilds::replica", error = %err, "snapshot.rejected");
                self.request_resync();
                return;
            }
        };

        self.engine = engine;
        let local = self.engine.state_hash();
        if local != sync.state_hash {
            self.hash_mismatches += 1;
            tracing::warn!(
                target: "guilds::replica",
                expected = %sync.state_hash,
                actual = %local,
                "snapshot.hash_mismatch"
            );
        }

        self.state = SyncState::FullySynced;
        tracing::info!(target: "guilds::replica", sequence, "replica.synced");
        self.observers.notify(UpdateKind::FULL_SYNC, None);
    }

    fn apply_broadcast(&mut self, proto: &ProtoBroadcast) {
        if self.state != SyncState::FullySynced {
            tracing::debug!(target: "guilds::replica", sequence = proto.sequence, "broadcast.skipped");
            return;
        }
        let broadcast = match broadcast_from_proto(proto) {
            Ok(broadcast) => broadcast,
            Err(err) => {
                tracing::warn!(target: "guilds::replica", error = %err, "broadcast.malformed");
                self.request_resync();
                return;
            }
        };

        match self.engine.apply_broadcast(&broadcast) {
            Ok(applied) => self.observers.notify(applied.update, applied.guild),
            Err(err) if err.needs_resync() => {
                tracing::warn!(target: "guilds::replica", error = %err, "replica.resync");
                self.request_resync();
            }
            Err(err) => {
                tracing::debug!(target: "guilds::replica", error = %err, "broadcast.stale");
            }
        }
    }
}
