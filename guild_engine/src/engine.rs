/// Guild Engine — Engine
///
/// Top-level orchestrator owning one registry and one claim grid.
/// Delegates mutation to transitions, validates via invariants.
///
/// The authoritative side calls `submit`, which stamps every accepted
/// action with the next broadcast sequence. A replica calls
/// `apply_broadcast`, which enforces strict sequence order (no gaps, no
/// repeats) before applying.

use crate::access::{AccessDecision, AccessDecisionPoint, AccessKind, BlockPos, ClaimAccessPolicy};
use crate::actions::{Broadcast, GuildAction};
use crate::claims::{ClaimGrid, GridPos2d};
use crate::domain::{EngineLimits, GuildId, PlayerMetrics};
use crate::error::{GuildError, ReplicaError};
use crate::hashing::canonical_hash;
use crate::integrity::{verify_data_integrity, IntegrityReport};
use crate::invariants::try_validate_invariants;
use crate::observers::UpdateKind;
use crate::registry::GuildRegistry;
use crate::snapshot::{
    capture_claims, capture_guilds, restore_claims, restore_registry, ClaimDocument,
    GuildDocument,
};
use crate::transitions::{apply_action, Applied, Mode};

/// An accepted authoritative action, ready to broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub broadcast: Broadcast,
    pub update: UpdateKind,
    pub guild: Option<GuildId>,
    pub removed_claims: Vec<GridPos2d>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuildEngine {
    registry: GuildRegistry,
    claims: ClaimGrid,
    /// Sequence of the last broadcast issued (server) or applied (replica).
    sequence: u64,
}

impl GuildEngine {
    pub fn new(limits: EngineLimits) -> Self {
        Self {
            registry: GuildRegistry::new(limits),
            claims: ClaimGrid::new(),
            sequence: 0,
        }
    }

    pub fn from_parts(registry: GuildRegistry, claims: ClaimGrid, sequence: u64) -> Self {
        Self {
            registry,
            claims,
            sequence,
        }
    }

    /// Rebuild from both documents. Structural problems fail; drift is
    /// left for `verify_data_integrity`.
    pub fn restore(
        guilds: &GuildDocument,
        claims: &ClaimDocument,
        limits: EngineLimits,
        sequence: u64,
    ) -> Result<Self, GuildError> {
        Ok(Self {
            registry: restore_registry(guilds, limits)?,
            claims: restore_claims(claims)?,
            sequence,
        })
    }

    pub fn registry(&self) -> &GuildRegistry {
        &self.registry
    }

    pub fn claims(&self) -> &ClaimGrid {
        &self.claims
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn limits(&self) -> EngineLimits {
        self.registry.limits()
    }

    // ── Authoritative side ─────────────────────────────────────────

    /// Check and apply one request. On success the returned broadcast is
    /// what every replica must apply; on `Err` nothing changed and the
    /// sequence did not advance.
    pub fn submit(&mut self, actor: &str, action: &GuildAction) -> Result<Accepted, GuildError> {
        let applied = apply_action(
            &mut self.registry,
            &mut self.claims,
            actor,
            action,
            Mode::Authoritative,
        )?;
        debug_assert_eq!(try_validate_invariants(&self.registry, &self.claims), Ok(()));

        self.sequence += 1;
        let Applied {
            action,
            update,
            guild,
            removed_claims,
        } = applied;
        Ok(Accepted {
            broadcast: Broadcast {
                sequence: self.sequence,
                actor: actor.to_string(),
                action,
            },
            update,
            guild,
            removed_claims,
        })
    }

    // ── Replica side ───────────────────────────────────────────────

    pub fn apply_broadcast(&mut self, broadcast: &Broadcast) -> Result<Applied, ReplicaError> {
        let expected = self.sequence + 1;
        if broadcast.sequence <= self.sequence {
            return Err(ReplicaError::Stale {
                current: self.sequence,
                got: broadcast.sequence,
            });
        }
        if broadcast.sequence != expected {
            return Err(ReplicaError::SequenceGap {
                expected,
                got: broadcast.sequence,
            });
        }

        let applied = apply_action(
            &mut self.registry,
            &mut self.claims,
            &broadcast.actor,
            &broadcast.action,
            Mode::Replica,
        )
        .map_err(|source| ReplicaError::Diverged {
            sequence: broadcast.sequence,
            source,
        })?;
        self.sequence = broadcast.sequence;
        Ok(applied)
    }

    /// Replace the whole guild side from a full sync.
    pub fn load_guild_snapshot(&mut self, doc: &GuildDocument, sequence: u64) -> Result<(), GuildError> {
        self.registry = restore_registry(doc, self.registry.limits())?;
        self.sequence = sequence;
        Ok(())
    }

    /// Replace the whole claim side from a full sync.
    pub fn load_claim_snapshot(&mut self, doc: &ClaimDocument, sequence: u64) -> Result<(), GuildError> {
        self.claims = restore_claims(doc)?;
        self.sequence = sequence;
        Ok(())
    }

    // ── Presence ───────────────────────────────────────────────────

    pub fn player_joined(&mut self, player: &str, display_name: &str, now: u64) -> PlayerMetrics {
        self.registry.player_joined(player, display_name, now).clone()
    }

    pub fn player_left(&mut self, player: &str, now: u64) -> Option<PlayerMetrics> {
        self.registry.player_left(player, now).cloned()
    }

    pub fn upsert_metrics(&mut self, metrics: PlayerMetrics) {
        self.registry.upsert_metrics(metrics);
    }

    // ── Maintenance ────────────────────────────────────────────────

    pub fn verify_data_integrity(
        &mut self,
        is_connected: impl Fn(&str) -> bool,
        now: u64,
    ) -> IntegrityReport {
        verify_data_integrity(&mut self.registry, &mut self.claims, is_connected, now)
    }

    pub fn recompute_borders(&mut self) -> usize {
        self.claims.recompute_borders()
    }

    pub fn validate(&self) -> Result<(), String> {
        try_validate_invariants(&self.registry, &self.claims)
    }

    // ── Snapshots ──────────────────────────────────────────────────

    pub fn guild_document(&self) -> GuildDocument {
        capture_guilds(&self.registry)
    }

    pub fn claim_document(&self) -> ClaimDocument {
        capture_claims(&self.claims)
    }

    /// Canonical hash of the whole world.
    pub fn state_hash(&self) -> String {
        canonical_hash(&self.guild_document(), &self.claim_document())
    }

    pub fn access_policy(&self) -> ClaimAccessPolicy<'_> {
        ClaimAccessPolicy::new(&self.registry, &self.claims)
    }
}

impl AccessDecisionPoint for GuildEngine {
    fn decide(&self, actor: &str, pos: BlockPos, kind: AccessKind) -> AccessDecision {
        self.access_policy().decide(actor, pos, kind)
    }
}
