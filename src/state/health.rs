//! Server Health
//!
//! Derives a health record for every server from each snapshot and tracks
//! how long a server has held its current health status.
//!
//! Updates never modify the previous map. Each tick produces a new map
//! from the previous tick's records plus the new snapshot, so a failed tick
//! simply keeps the old map.

use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::AutopilotConfig;
use crate::state::{ClusterSnapshot, ServerId, ServerState};

/// Health map keyed by server id
pub type HealthMap = BTreeMap<ServerId, Health>;

/// Health of a single server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Health {
    /// Server identifier
    pub id: ServerId,
    /// Passed every health check on its last observation
    pub healthy: bool,
    /// When the server entered its current health status
    pub stable_since: Instant,
    /// Observation (successful snapshot) the server was last present in
    pub last_seen_tick: u64,
    /// Contact age at last observation
    pub last_contact_age: Duration,
    /// Log index at last observation
    pub last_log_index: u64,
    /// Log term at last observation
    pub last_term: u64,
}

impl Health {
    /// How long the server has held its current status
    pub fn stable_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.stable_since)
    }

    /// Healthy continuously for at least `stabilization`
    pub fn is_stable(&self, now: Instant, stabilization: Duration) -> bool {
        self.healthy && self.stable_for(now) >= stabilization
    }

    /// Unhealthy continuously for at least `timeout`
    pub fn is_dead(&self, now: Instant, timeout: Duration) -> bool {
        !self.healthy && self.stable_for(now) >= timeout
    }
}

/// Computes health updates from snapshots
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    last_contact_threshold: Duration,
    max_term_lag: u64,
    max_trailing_logs: u64,
    grace_ticks: u64,
}

impl HealthMonitor {
    /// Create a monitor from the autopilot thresholds
    pub fn new(config: &AutopilotConfig) -> Self {
        Self {
            last_contact_threshold: config.last_contact_threshold(),
            max_term_lag: config.max_term_lag,
            max_trailing_logs: config.max_trailing_logs,
            grace_ticks: config.health_grace_ticks,
        }
    }

    /// Produce the health map for observation `tick` from the snapshot and the
    /// previous map. `tick` counts successful snapshots only, so abandoned
    /// ticks never eat into the grace window.
    pub fn update(
        &self,
        snapshot: &ClusterSnapshot,
        previous: &HealthMap,
        now: Instant,
        tick: u64,
    ) -> HealthMap {
        let mut next = HealthMap::new();

        // Lag is measured against the leader, or the most advanced server when
        // the snapshot has no leader.
        let (ref_term, ref_index) = match snapshot.leader() {
            Some(leader) => (leader.last_term, leader.last_log_index),
            None => (
                snapshot.servers.iter().map(|s| s.last_term).max().unwrap_or(0),
                snapshot.servers.iter().map(|s| s.last_log_index).max().unwrap_or(0),
            ),
        };

        let bootstrap = snapshot.servers.len() == 1 && snapshot.servers[0].is_voter;

        for server in &snapshot.servers {
            let contact_age = if server.is_leader {
                Duration::ZERO
            } else {
                server.contact_age(now)
            };
            let healthy = bootstrap || self.check(server, contact_age, ref_term, ref_index);

            let stable_since = match previous.get(&server.id) {
                Some(prev) => {
                    let regressed = server.last_log_index < prev.last_log_index;
                    if prev.healthy != healthy {
                        tracing::info!(
                            "Server {} is now {}",
                            server.id,
                            if healthy { "healthy" } else { "unhealthy" }
                        );
                        now
                    } else if regressed {
                        tracing::warn!(
                            "Server {} log index regressed {} -> {}, resetting stability",
                            server.id,
                            prev.last_log_index,
                            server.last_log_index
                        );
                        now
                    } else {
                        prev.stable_since
                    }
                }
                None => {
                    tracing::debug!("Tracking health of new server {}", server.id);
                    now
                }
            };

            next.insert(
                server.id.clone(),
                Health {
                    id: server.id.clone(),
                    healthy,
                    stable_since,
                    last_seen_tick: tick,
                    last_contact_age: contact_age,
                    last_log_index: server.last_log_index,
                    last_term: server.last_term,
                },
            );
        }

        // Carry absent servers through the grace window
        for (id, prev) in previous {
            if next.contains_key(id) {
                continue;
            }
            if tick.saturating_sub(prev.last_seen_tick) <= self.grace_ticks {
                next.insert(id.clone(), prev.clone());
            } else {
                tracing::debug!("Evicting health record for departed server {}", id);
            }
        }

        next
    }

    /// Run every health check against one server
    fn check(&self, server: &ServerState, contact_age: Duration, ref_term: u64, ref_index: u64) -> bool {
        if contact_age > self.last_contact_threshold {
            return false;
        }

        if ref_term.saturating_sub(server.last_term) > self.max_term_lag {
            return false;
        }

        if self.max_trailing_logs > 0
            && ref_index.saturating_sub(server.last_log_index) > self.max_trailing_logs
        {
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> HealthMonitor {
        let config = AutopilotConfig {
            last_contact_threshold_ms: 500,
            max_trailing_logs: 100,
            health_grace_ticks: 2,
            ..AutopilotConfig::default()
        };
        HealthMonitor::new(&config)
    }

    fn leader(now: Instant) -> ServerState {
        ServerState::new("leader", "l:1")
            .with_voter(true)
            .with_leader(true)
            .with_log(1000, 5)
            .with_last_contact(now)
    }

    fn follower(id: &str, contact: Instant) -> ServerState {
        ServerState::new(id, format!("{}:1", id))
            .with_log(1000, 5)
            .with_last_contact(contact)
    }

    #[test]
    fn test_contact_threshold() {
        let now = Instant::now();
        let snapshot = ClusterSnapshot::new(
            1,
            vec![
                leader(now),
                follower("fresh", now),
                follower("edge", now - Duration::from_millis(500)),
                follower("stale", now - Duration::from_millis(501)),
            ],
        );

        let health = monitor().update(&snapshot, &HealthMap::new(), now, 1);
        assert!(health[&ServerId::from("leader")].healthy);
        assert!(health[&ServerId::from("fresh")].healthy);
        assert!(health[&ServerId::from("edge")].healthy);
        assert!(!health[&ServerId::from("stale")].healthy);
    }

    #[test]
    fn test_term_and_index_lag() {
        let now = Instant::now();
        let snapshot = ClusterSnapshot::new(
            1,
            vec![
                leader(now),
                follower("one-behind", now).with_log(1000, 4),
                follower("two-behind", now).with_log(1000, 3),
                follower("trailing", now).with_log(850, 5),
            ],
        );

        let health = monitor().update(&snapshot, &HealthMap::new(), now, 1);
        assert!(health[&ServerId::from("one-behind")].healthy);
        assert!(!health[&ServerId::from("two-behind")].healthy);
        assert!(!health[&ServerId::from("trailing")].healthy);
    }

    #[test]
    fn test_single_voter_bootstrap_is_healthy() {
        let now = Instant::now();
        let lonely = ServerState::new("only", "o:1")
            .with_voter(true)
            .with_last_contact(now - Duration::from_secs(60));
        let snapshot = ClusterSnapshot::new(1, vec![lonely]);

        let health = monitor().update(&snapshot, &HealthMap::new(), now, 1);
        assert!(health[&ServerId::from("only")].healthy);
    }

    #[test]
    fn test_stable_since_carried_and_reset() {
        let monitor = monitor();
        let t0 = Instant::now();
        let id = ServerId::from("s2");

        let snap = |now: Instant, contact: Instant, index: u64| {
            ClusterSnapshot::new(1, vec![leader(now), follower("s2", contact).with_log(index, 5)])
        };

        let h1 = monitor.update(&snap(t0, t0, 1000), &HealthMap::new(), t0, 1);
        assert_eq!(h1[&id].stable_since, t0);

        let t1 = t0 + Duration::from_secs(1);
        let h2 = monitor.update(&snap(t1, t1, 1000), &h1, t1, 2);
        assert_eq!(h2[&id].stable_since, t0);
        assert_eq!(h2[&id].stable_for(t1), Duration::from_secs(1));

        // Flip to unhealthy resets
        let t2 = t0 + Duration::from_secs(2);
        let h3 = monitor.update(&snap(t2, t0, 1000), &h2, t2, 3);
        assert!(!h3[&id].healthy);
        assert_eq!(h3[&id].stable_since, t2);

        // Flip back to healthy resets again
        let t3 = t0 + Duration::from_secs(3);
        let h4 = monitor.update(&snap(t3, t3, 1000), &h3, t3, 4);
        assert!(h4[&id].healthy);
        assert_eq!(h4[&id].stable_since, t3);

        // Index regression while healthy resets
        let t4 = t0 + Duration::from_secs(4);
        let h5 = monitor.update(&snap(t4, t4, 950), &h4, t4, 5);
        assert!(h5[&id].healthy);
        assert_eq!(h5[&id].stable_since, t4);

        // The previous map is untouched
        assert_eq!(h4[&id].stable_since, t3);
    }

    #[test]
    fn test_absent_server_grace_window() {
        let monitor = monitor();
        let t0 = Instant::now();
        let id = ServerId::from("gone");

        let full = ClusterSnapshot::new(1, vec![leader(t0), follower("gone", t0)]);
        let partial = ClusterSnapshot::new(1, vec![leader(t0)]);

        let mut health = monitor.update(&full, &HealthMap::new(), t0, 1);
        let recorded = health[&id].clone();

        for tick in 2..=3 {
            health = monitor.update(&partial, &health, t0, tick);
            assert_eq!(health.get(&id), Some(&recorded));
        }

        health = monitor.update(&partial, &health, t0, 4);
        assert!(health.get(&id).is_none());
    }

    #[test]
    fn test_stability_and_death_predicates() {
        let t0 = Instant::now();
        let health = Health {
            id: ServerId::from("s"),
            healthy: true,
            stable_since: t0,
            last_seen_tick: 1,
            last_contact_age: Duration::ZERO,
            last_log_index: 0,
            last_term: 0,
        };

        assert!(!health.is_stable(t0 + Duration::from_millis(9_999), Duration::from_secs(10)));
        assert!(health.is_stable(t0 + Duration::from_secs(10), Duration::from_secs(10)));
        assert!(!health.is_dead(t0 + Duration::from_secs(100), Duration::from_secs(10)));

        let dead = Health { healthy: false, ..health };
        assert!(dead.is_dead(t0 + Duration::from_secs(10), Duration::from_secs(10)));
    }
}
