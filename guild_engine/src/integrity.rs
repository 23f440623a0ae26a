/// Guild Engine — Integrity repair
///
/// Best-effort reconciliation run by the server at load and at every save.
/// Never fails: whatever cannot be trusted is dropped or rebuilt, and the
/// report says what was touched.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::claims::ClaimGrid;
use crate::domain::GuildId;
use crate::invariants::derive_indices;
use crate::registry::GuildRegistry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Guilds without a single member, removed with their claims.
    pub empty_guilds: usize,
    /// Members pointing past their guild's role table, reset to role 0.
    pub member_roles_reset: usize,
    /// Invites held by players who are already members.
    pub redundant_invites: usize,
    /// Player-guild / player-invite index entries added or dropped.
    pub index_fixes: usize,
    /// Claims whose guild no longer exists.
    pub orphan_claims: usize,
    /// Claims whose border flags were re-derived.
    pub borders_fixed: usize,
    pub represented_cleared: usize,
    /// Metrics stored under a key other than their own player id.
    pub miskeyed_metrics: usize,
    pub marked_offline: usize,
    pub stale_metrics: usize,
}

impl IntegrityReport {
    pub fn total(&self) -> usize {
        self.empty_guilds
            + self.member_roles_reset
            + self.redundant_invites
            + self.index_fixes
            + self.orphan_claims
            + self.borders_fixed
            + self.represented_cleared
            + self.miskeyed_metrics
            + self.marked_offline
            + self.stale_metrics
    }

    pub fn is_clean(&self) -> bool {
        self.total() == 0
    }
}

/// Repair `registry` and `claims` in place.
///
/// `is_connected` tells which players currently hold a connection; anyone
/// else still flagged online is marked offline. Metrics of players with no
/// membership and no invite are dropped once older than the configured
/// staleness window.
pub fn verify_data_integrity(
    registry: &mut GuildRegistry,
    claims: &mut ClaimGrid,
    is_connected: impl Fn(&str) -> bool,
    now: u64,
) -> IntegrityReport {
    let mut report = IntegrityReport::default();

    // -- guild-local repairs --
    for guild in registry.guilds.values_mut() {
        report.member_roles_reset += guild.clamp_member_roles();
        let members: Vec<String> = guild.members().map(|m| m.player_id.clone()).collect();
        report.redundant_invites += guild.retain_invites(|p| !members.iter().any(|m| m == p));
    }

    let empty: Vec<GuildId> = registry
        .guilds
        .values()
        .filter(|g| g.member_count() == 0)
        .map(|g| g.id)
        .collect();
    for guild_id in empty {
        registry.guilds.remove(&guild_id);
        report.empty_guilds += 1;
        debug!(target: "guilds::integrity", guild = guild_id, "removing guild without members");
    }

    // -- secondary indices --
    let (members, invites) = derive_indices(registry);
    report.index_fixes += index_difference(&registry.player_guilds, &members);
    report.index_fixes += index_difference(&registry.player_invites, &invites);
    registry.player_guilds = members;
    registry.player_invites = invites;

    // -- claims --
    report.orphan_claims = claims.retain(|c| registry.guilds.contains_key(&c.guild_id));
    if report.orphan_claims > 0 {
        report.borders_fixed = claims.recompute_borders();
    }

    // -- metrics --
    let before = registry.metrics.len();
    registry.metrics.retain(|key, metric| *key == metric.player_id);
    report.miskeyed_metrics = before - registry.metrics.len();

    let stale_after = registry.limits.stale_metrics_after_secs;
    let mut stale = Vec::new();
    for (player, metric) in registry.metrics.iter_mut() {
        if let Some(g) = metric.represented_guild {
            let member = registry
                .player_guilds
                .get(player)
                .is_some_and(|s| s.contains(&g));
            if !member {
                metric.represented_guild = None;
                report.represented_cleared += 1;
            }
        }
        if metric.is_online && !is_connected(player) {
            metric.is_online = false;
            report.marked_offline += 1;
        }
        let unattached = !registry.player_guilds.contains_key(player)
            && !registry.player_invites.contains_key(player);
        if !metric.is_online && unattached && now.saturating_sub(metric.last_online) > stale_after {
            stale.push(player.clone());
        }
    }
    for player in stale {
        registry.metrics.remove(&player);
        report.stale_metrics += 1;
    }

    if !report.is_clean() {
        warn!(
            target: "guilds::integrity",
            repairs = report.total(),
            empty_guilds = report.empty_guilds,
            index_fixes = report.index_fixes,
            orphan_claims = report.orphan_claims,
            stale_metrics = report.stale_metrics,
            "integrity pass repaired state"
        );
    }
    report
}

/// Number of (player, guild) pairs present in exactly one of the two
/// indices, plus empty sets in `actual`.
fn index_difference(
    actual: &BTreeMap<String, BTreeSet<GuildId>>,
    expected: &BTreeMap<String, BTreeSet<GuildId>>,
) -> usize {
    let mut diff = 0;
    for (player, set) in actual {
        if set.is_empty() {
            diff += 1;
        }
        let other = expected.get(player);
        diff += set
            .iter()
            .filter(|g| !other.is_some_and(|o| o.contains(g)))
            .count();
    }
    for (player, set) in expected {
        let other = actual.get(player);
        diff += set
            .iter()
            .filter(|g| !other.is_some_and(|o| o.contains(g)))
            .count();
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::GridPos2d;
    use crate::domain::{EngineLimits, PlayerMetrics};
    use crate::invariants::try_validate_invariants;

    const DAY: u64 = 86_400;

    fn world() -> (GuildRegistry, ClaimGrid) {
        let mut reg = GuildRegistry::new(EngineLimits::default());
        reg.player_joined("p1", "P1", 1_000);
        reg.player_joined("p2", "P2", 1_000);
        let g = reg.create_guild("Alpha", "p1").unwrap();
        reg.invite("p1", g, "p2").unwrap();
        reg.accept_invite("p2", g).unwrap();
        let mut claims = ClaimGrid::new();
        claims.add_claim(GridPos2d::new(0, 0), g).unwrap();
        (reg, claims)
    }

    #[test]
    fn clean_world_needs_no_repair() {
        let (mut reg, mut claims) = world();
        let report = verify_data_integrity(&mut reg, &mut claims, |_| true, 2_000);
        assert!(report.is_clean(), "{:?}", report);
    }

    #[test]
    fn drifted_indices_are_rebuilt() {
        let (mut reg, mut claims) = world();
        reg.player_guilds.insert("ghost".to_string(), [0].into_iter().collect());
        reg.player_guilds.insert("nobody".to_string(), Default::default());
        reg.player_guilds.remove("p2");
        let report = verify_data_integrity(&mut reg, &mut claims, |_| true, 2_000);
        assert_eq!(report.index_fixes, 3);
        assert_eq!(try_validate_invariants(&reg, &claims), Ok(()));
    }

    #[test]
    fn disconnected_players_marked_offline() {
        let (mut reg, mut claims) = world();
        let report = verify_data_integrity(&mut reg, &mut claims, |p| p == "p1", 2_000);
        assert_eq!(report.marked_offline, 1);
        assert!(reg.metrics("p1").unwrap().is_online);
        assert!(!reg.metrics("p2").unwrap().is_online);
    }

    #[test]
    fn stale_unattached_metrics_dropped() {
        let (mut reg, mut claims) = world();
        reg.upsert_metrics(PlayerMetrics::new("drifter", "D", 0));
        reg.upsert_metrics(PlayerMetrics::new("recent", "R", 200 * DAY - 10));
        let now = 200 * DAY;
        let report = verify_data_integrity(&mut reg, &mut claims, |_| false, now);
        assert_eq!(report.stale_metrics, 1);
        assert!(reg.metrics("drifter").is_none());
        assert!(reg.metrics("recent").is_some());
        // Members are never dropped, however old.
        assert!(reg.metrics("p2").is_some());
    }

    #[test]
    fn miskeyed_metrics_dropped_without_touching_the_real_entry() {
        let (mut reg, mut claims) = world();
        reg.metrics
            .insert("zzz".to_string(), PlayerMetrics::new("p2", "Stale", 10));

        let report = verify_data_integrity(&mut reg, &mut claims, |_| true, 5_000);
        assert_eq!(report.miskeyed_metrics, 1);
        assert!(reg.metrics("zzz").is_none());
        assert_eq!(reg.metrics("p2").unwrap().last_display_name, "P2");
        assert_eq!(reg.metrics("p2").unwrap().last_online, 1_000);
        assert_eq!(try_validate_invariants(&reg, &claims), Ok(()));
    }

    #[test]
    fn memberless_guild_removed_with_claims() {
        let (mut reg, mut claims) = world();
        let g = reg.get_guild(0).unwrap().clone();
        let mut empty = g.clone();
        for m in g.members() {
            empty.take_member(&m.player_id);
        }
        reg.guilds.insert(0, empty);
        claims.add_claim(GridPos2d::new(1, 0), 0).unwrap();

        let report = verify_data_integrity(&mut reg, &mut claims, |_| true, 2_000);
        assert_eq!(report.empty_guilds, 1);
        assert_eq!(report.orphan_claims, 2);
        assert!(claims.is_empty());
        assert_eq!(reg.player_guilds("p1").count(), 0);
        assert_eq!(try_validate_invariants(&reg, &claims), Ok(()));
    }

    #[test]
    fn invalid_member_role_reset() {
        let (mut reg, mut claims) = world();
        reg.guilds.get_mut(&0).unwrap().set_member_role("p2", 9);
        let report = verify_data_integrity(&mut reg, &mut claims, |_| true, 2_000);
        assert_eq!(report.member_roles_reset, 1);
        assert_eq!(reg.players_role(0, "p2").unwrap().id, 0);
    }
}
