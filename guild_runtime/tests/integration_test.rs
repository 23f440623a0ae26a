//! Integration tests for guild_runtime.
//!
//! A server and its replicas talk through length-prefixed frames, the
//! same bytes a transport would carry. Persistence tests use temporary
//! directories for isolation.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use guild_engine::access::{AccessKind, BlockPos};
use guild_engine::claims::{BorderFlags, GridPos2d};
use guild_engine::domain::{EngineLimits, GuildPerms};
use guild_engine::{ActionTag, GuildAction};

use guild_runtime::codec::FrameDecoder;
use guild_runtime::{
    ClientReplica, ConnectionId, GuildServer, JsonFileGateway, MemoryGateway, PersistenceGateway,
    ServerConfig, SharedServer, SyncState,
};

/// Create a temp directory for a test.
fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("guild_runtime_tests").join(name);
    if dir.exists() {
        fs::remove_dir_all(&dir).ok();
    }
    fs::create_dir_all(&dir).expect("Failed to create temp dir");
    dir
}

fn config_in(dir: &Path) -> ServerConfig {
    ServerConfig {
        data_dir: dir.to_path_buf(),
        ..ServerConfig::default()
    }
}

/// In-process network: one server, one replica per connection.
struct World {
    server: GuildServer,
    clients: BTreeMap<ConnectionId, (ClientReplica, FrameDecoder)>,
    /// Connections whose next inbound frame is lost.
    drop_next: BTreeSet<ConnectionId>,
}

impl World {
    fn new(server: GuildServer) -> Self {
        Self {
            server,
            clients: BTreeMap::new(),
            drop_next: BTreeSet::new(),
        }
    }

    fn join(&mut self, conn: ConnectionId, player: &str) {
        let max = self.server.config().max_frame_len;
        let mut replica = ClientReplica::new(player, EngineLimits::default());
        replica.connected();
        self.clients.insert(conn, (replica, FrameDecoder::new(max)));
        self.server.player_joined(conn, player, player, 1_000);
        self.pump();
    }

    fn leave(&mut self, conn: ConnectionId) {
        if let Some((mut replica, _)) = self.clients.remove(&conn) {
            replica.disconnected();
        }
        self.server.player_left(conn, 2_000);
        self.pump();
    }

    fn request(&mut self, conn: ConnectionId, action: GuildAction) {
        self.client_mut(conn).request(&action);
        self.pump();
    }

    fn client(&self, conn: ConnectionId) -> &ClientReplica {
        &self.clients[&conn].0
    }

    fn client_mut(&mut self, conn: ConnectionId) -> &mut ClientReplica {
        &mut self.clients.get_mut(&conn).expect("unknown connection").0
    }

    /// Deliver frames both ways until nothing is in flight.
    fn pump(&mut self) {
        let max = self.server.config().max_frame_len;
        loop {
            let mut moved = false;

            for (conn, frame) in self.server.drain_frames() {
                moved = true;
                if self.drop_next.remove(&conn) {
                    continue;
                }
                let Some((replica, decoder)) = self.clients.get_mut(&conn) else {
                    continue;
                };
                decoder.push(&frame);
                while let Some(payload) = decoder.next_frame().expect("server frame") {
                    replica.handle_frame(&payload);
                }
            }

            let mut inbound = Vec::new();
            for (conn, (replica, _)) in self.clients.iter_mut() {
                for frame in replica.drain_frames(max).expect("client frame") {
                    inbound.push((*conn, frame));
                }
            }
            for (conn, frame) in inbound {
                moved = true;
                let mut decoder = FrameDecoder::new(max);
                decoder.push(&frame);
                while let Some(payload) = decoder.next_frame().expect("client frame") {
                    self.server.handle_frame(conn, &payload);
                }
            }

            if !moved {
                break;
            }
        }
    }

    fn assert_converged(&self) {
        let expected = self.server.engine().state_hash();
        for (conn, (replica, _)) in &self.clients {
            assert_eq!(replica.state(), SyncState::FullySynced, "conn {} not synced", conn);
            assert_eq!(
                replica.engine().state_hash(),
                expected,
                "conn {} diverged from the server",
                conn
            );
            assert_eq!(replica.hash_mismatches(), 0);
        }
    }
}

fn create(name: &str) -> GuildAction {
    GuildAction::Create {
        name: name.to_string(),
        guild: None,
    }
}

/// p1 founds Alpha, invites p2, p2 joins and gets claim rights.
fn alpha_with_two_members(world: &mut World) {
    world.join(1, "p1");
    world.join(2, "p2");
    world.request(1, create("Alpha"));
    world.request(1, GuildAction::Invite { guild: 0, target: "p2".to_string() });
    world.request(2, GuildAction::AcceptInvite { guild: 0 });
    world.request(
        1,
        GuildAction::UpdateRole {
            guild: 0,
            role: 0,
            name: "Member".to_string(),
            authority: 0,
            permissions: GuildPerms::MANAGE_CLAIMS | GuildPerms::USE_BLOCKS,
        },
    );
}

// ─────────────────────────────────────────────────────────────
// Sync
// ─────────────────────────────────────────────────────────────

#[test]
fn replicas_converge_on_server_state() {
    let mut world = World::new(GuildServer::start(ServerConfig::default(), MemoryGateway::new(), 0));
    alpha_with_two_members(&mut world);
    world.request(2, GuildAction::AddClaim { guild: Some(0), position: GridPos2d::new(3, 4) });

    world.assert_converged();
    for conn in [1, 2] {
        let claim = world
            .client(conn)
            .engine()
            .claims()
            .try_get_claim(GridPos2d::new(3, 4))
            .copied()
            .expect("claim replicated");
        assert_eq!(claim.guild_id, 0);
        assert_eq!(claim.border_flags, BorderFlags::all());
    }
    assert!(world.client(2).rejections().is_empty());
}

#[test]
fn late_joiner_receives_full_state() {
    let mut world = World::new(GuildServer::start(ServerConfig::default(), MemoryGateway::new(), 0));
    alpha_with_two_members(&mut world);
    world.request(2, GuildAction::AddClaim { guild: Some(0), position: GridPos2d::new(0, 0) });
    world.request(2, GuildAction::AddClaim { guild: Some(0), position: GridPos2d::new(1, 0) });

    world.join(3, "p3");
    world.assert_converged();
    assert_eq!(world.client(3).engine().claims().len(), 2);
    assert!(world.client(3).engine().registry().guild_by_name("Alpha").is_some());
}

#[test]
fn missed_broadcast_is_recovered_by_resync() {
    let mut world = World::new(GuildServer::start(ServerConfig::default(), MemoryGateway::new(), 0));
    world.join(1, "p1");
    world.join(2, "p2");

    world.drop_next.insert(2);
    world.request(1, create("Alpha"));
    assert!(world.client(2).engine().registry().get_guild(0).is_none());

    // The next broadcast exposes the gap; the replica resyncs during pump.
    world.request(1, create("Beta"));
    world.assert_converged();
    assert!(world.client(2).engine().registry().guild_by_name("Alpha").is_some());
    assert!(world.client(2).engine().registry().guild_by_name("Beta").is_some());
}

#[test]
fn disband_cascades_on_every_replica() {
    let mut world = World::new(GuildServer::start(ServerConfig::default(), MemoryGateway::new(), 0));
    alpha_with_two_members(&mut world);
    world.request(2, GuildAction::AddClaim { guild: Some(0), position: GridPos2d::new(5, 5) });
    world.request(2, GuildAction::RepresentGuild { guild: Some(0) });

    world.request(1, GuildAction::Disband { guild: 0 });
    world.assert_converged();
    let replica = world.client(2).engine();
    assert!(replica.registry().get_guild(0).is_none());
    assert!(replica.claims().is_empty());
    assert_eq!(replica.registry().represented_guild("p2"), None);
}

#[test]
fn rejected_request_reaches_only_its_sender() {
    let mut world = World::new(GuildServer::start(ServerConfig::default(), MemoryGateway::new(), 0));
    alpha_with_two_members(&mut world);

    let before = world.server.engine().state_hash();
    world.request(2, GuildAction::Kick { guild: 0, target: "p1".to_string() });

    assert_eq!(world.server.engine().state_hash(), before);
    assert!(world.client(1).rejections().is_empty());
    let rejections = world.client_mut(2).drain_rejections();
    assert_eq!(rejections.len(), 1);
    assert_eq!(rejections[0].tag, Some(ActionTag::Kick));
    assert!(world.client(2).rejections().is_empty());

    // A second rejection is reported on its own, not on top of the first.
    world.request(2, GuildAction::Kick { guild: 0, target: "p1".to_string() });
    assert_eq!(world.client_mut(2).drain_rejections().len(), 1);
    world.assert_converged();
}

#[test]
fn cancel_invite_echo_reaches_sender() {
    let mut world = World::new(GuildServer::start(ServerConfig::default(), MemoryGateway::new(), 0));
    world.join(1, "p1");
    world.join(2, "p2");
    world.request(1, create("Alpha"));
    world.request(1, GuildAction::Invite { guild: 0, target: "p2".to_string() });
    world.request(1, GuildAction::CancelInvite { guild: 0, target: "p2".to_string() });

    assert_eq!(
        world.client_mut(1).drain_acknowledged(),
        vec![GuildAction::CancelInvite { guild: 0, target: "p2".to_string() }]
    );
    assert!(world.client(1).acknowledged().is_empty());
    assert!(world.client(2).acknowledged().is_empty());
    world.assert_converged();
}

#[test]
fn metrics_follow_presence() {
    let mut world = World::new(GuildServer::start(ServerConfig::default(), MemoryGateway::new(), 0));
    world.join(1, "p1");
    world.join(2, "p2");
    world.leave(2);

    let metrics = world.client(1).engine().registry().metrics("p2").expect("metrics replicated");
    assert!(!metrics.is_online);
    assert_eq!(metrics.last_online, 2_000);
}

// ─────────────────────────────────────────────────────────────
// Persistence
// ─────────────────────────────────────────────────────────────

#[test]
fn saved_documents_reload_identically() {
    let dir = temp_dir("reload_identically");
    let config = config_in(&dir);

    let mut world = World::new(GuildServer::start(config.clone(), JsonFileGateway::from_config(&config), 0));
    alpha_with_two_members(&mut world);
    world.request(2, GuildAction::AddClaim { guild: Some(0), position: GridPos2d::new(3, 4) });
    world.request(2, GuildAction::AddClaim { guild: Some(0), position: GridPos2d::new(4, 4) });
    world.request(1, create("Beta"));
    world.server.save(3_000).expect("save");

    assert!(config.guilds_path().exists());
    assert!(config.claims_path().exists());

    let reloaded = GuildServer::start(config.clone(), JsonFileGateway::from_config(&config), 3_000);
    let before = world.server.engine();
    let after = reloaded.engine();
    assert_eq!(after.guild_document().guilds, before.guild_document().guilds);
    assert_eq!(after.guild_document().next_guild_id, before.guild_document().next_guild_id);
    assert_eq!(after.claim_document(), before.claim_document());
    assert_eq!(after.registry().represented_guild("p1"), before.registry().represented_guild("p1"));
}

#[test]
fn corrupt_guild_document_starts_empty() {
    let dir = temp_dir("corrupt_guilds");
    let config = config_in(&dir);

    let mut world = World::new(GuildServer::start(config.clone(), JsonFileGateway::from_config(&config), 0));
    alpha_with_two_members(&mut world);
    world.request(2, GuildAction::AddClaim { guild: Some(0), position: GridPos2d::new(1, 1) });
    world.server.save(100).expect("save");

    fs::write(config.guilds_path(), b"{\"schema_version\": 1, \"guilds\": [").expect("corrupt");

    let server = GuildServer::start(config.clone(), JsonFileGateway::from_config(&config), 200);
    assert_eq!(server.engine().registry().guilds().count(), 0);
    // Claims of guilds that no longer exist are dropped with them.
    assert!(server.engine().claims().is_empty());
    assert_eq!(server.engine().validate(), Ok(()));
}

#[test]
fn corrupt_claim_document_keeps_guilds() {
    let mut seeded = GuildServer::start(ServerConfig::default(), MemoryGateway::new(), 0);
    seeded.player_joined(1, "p1", "P1", 0);
    seeded.submit(1, "p1", &create("Alpha"));
    let guilds = seeded.engine().guild_document();

    let mut gateway = MemoryGateway::with_raw(None, Some("not json"));
    gateway.save_guilds(&guilds).expect("seed guilds");
    let server = GuildServer::start(ServerConfig::default(), gateway, 10);
    assert!(server.engine().registry().guild_by_name("Alpha").is_some());
    assert!(server.engine().claims().is_empty());
}

#[test]
fn missing_files_start_empty() {
    let dir = temp_dir("missing_files");
    let config = config_in(&dir);
    let server = GuildServer::start(config.clone(), JsonFileGateway::from_config(&config), 0);
    assert_eq!(server.engine().registry().guilds().count(), 0);
    assert_eq!(server.engine().sequence(), 0);
}

// ─────────────────────────────────────────────────────────────
// Shared access
// ─────────────────────────────────────────────────────────────

#[test]
fn shared_server_serializes_callers() {
    let shared = Arc::new(SharedServer::new(GuildServer::start(
        ServerConfig::default(),
        MemoryGateway::new(),
        0,
    )));

    let handles: Vec<_> = (0..4u64)
        .map(|i| {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                let player = format!("p{}", i);
                shared.player_joined(i, &player, &player, 0);
                shared.with(|server| server.submit(i, &player, &create(&format!("Guild {}", i))));
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("thread panicked");
    }

    shared.with(|server| {
        assert_eq!(server.engine().registry().guilds().count(), 4);
        assert_eq!(server.engine().sequence(), 4);
        assert_eq!(server.engine().validate(), Ok(()));
    });
    assert!(!shared.drain_frames().is_empty());
}

#[test]
fn access_checks_go_through_the_server() {
    let mut world = World::new(GuildServer::start(ServerConfig::default(), MemoryGateway::new(), 0));
    alpha_with_two_members(&mut world);
    world.join(3, "p3");
    world.request(2, GuildAction::AddClaim { guild: Some(0), position: GridPos2d::new(0, 0) });

    let shared = SharedServer::new(world.server);
    let inside = BlockPos::new(5, 64, 5);
    assert!(shared.decide("p2", inside, AccessKind::Use).is_allowed());
    assert!(!shared.decide("p2", inside, AccessKind::Build).is_allowed());
    assert!(shared.decide("p1", inside, AccessKind::Build).is_allowed());
    assert!(!shared.decide("p3", inside, AccessKind::Use).is_allowed());
}
