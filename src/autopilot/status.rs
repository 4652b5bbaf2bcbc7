//! Autopilot Status
//!
//! Read-only view of the reconciliation loop for operator tooling. The tick
//! task publishes a fresh `Status` through a watch channel; readers only ever
//! see complete copies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::promoter::Decision;
use crate::state::{ClusterSnapshot, HealthMap};

/// Reconciliation loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopState {
    /// Waiting for the next tick, or standing by as a non-leader
    Idle,
    /// Reading state and computing a decision
    Ticking,
    /// Issuing membership commands
    Applying,
    /// Shut down
    Stopped,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopState::Idle => write!(f, "IDLE"),
            LoopState::Ticking => write!(f, "TICKING"),
            LoopState::Applying => write!(f, "APPLYING"),
            LoopState::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// Counters accumulated across ticks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    /// Ticks started
    pub ticks: u64,
    /// Ticks abandoned before a decision (snapshot, metadata, or timeout)
    pub ticks_abandoned: u64,
    /// Snapshot reads that failed
    pub snapshot_failures: u64,
    /// External calls that exceeded their deadline
    pub timeouts: u64,
    /// Membership commands that failed
    pub apply_failures: u64,
    /// Membership commands that succeeded
    pub commands_issued: u64,
    /// Operations dropped for violating an invariant, including quorum-blocked
    /// removals. Counted per tick, so a voter blocked for the length of an
    /// outage adds one on every tick rather than once.
    pub policy_violations: u64,
    /// Dead voters left in place to hold the quorum floor, counted per tick
    pub quorum_blocked: u64,
}

/// Server as seen in the last snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerReport {
    pub id: String,
    pub address: String,
    pub voter: bool,
    pub leader: bool,
    pub last_contact_ms: u64,
    pub last_log_index: u64,
    pub last_term: u64,
}

/// Health record as of the last tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub id: String,
    pub healthy: bool,
    /// Time spent in the current health status
    pub stable_for_ms: u64,
    pub last_seen_tick: u64,
}

/// Autopilot status
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    /// Servers from the last snapshot
    pub servers: Vec<ServerReport>,
    /// Health records from the last tick
    pub health: Vec<HealthReport>,
    /// Wall-clock time of the last completed tick
    pub last_tick_time: Option<DateTime<Utc>>,
    /// Membership commands are issued (not observe-only)
    pub enabled: bool,
    /// Loop state
    pub state: LoopState,
    /// This instance is the active (leader) reconciler
    pub leader: bool,
    /// Tick counter of the active reconciler
    pub tick: u64,
    /// Active promoter
    pub policy: String,
    /// Healthy voters that can fail before the voter majority is lost
    pub failure_tolerance: usize,
    /// Decision accepted on the last tick
    pub last_decision: Option<Decision>,
    /// Counters
    pub metrics: Metrics,
}

impl Status {
    /// Status before the first tick
    pub fn initial(policy: &str, enabled: bool) -> Self {
        Self {
            servers: Vec::new(),
            health: Vec::new(),
            last_tick_time: None,
            enabled,
            state: LoopState::Idle,
            leader: false,
            tick: 0,
            policy: policy.to_string(),
            failure_tolerance: 0,
            last_decision: None,
            metrics: Metrics::default(),
        }
    }

    /// Replace the cluster view with the one observed on a tick
    pub fn observe(&mut self, snapshot: &ClusterSnapshot, health: &HealthMap, now: Instant) {
        self.servers = snapshot
            .sorted()
            .into_iter()
            .map(|s| ServerReport {
                id: s.id.to_string(),
                address: s.address.clone(),
                voter: s.is_voter,
                leader: s.is_leader,
                last_contact_ms: duration_ms(s.contact_age(now)),
                last_log_index: s.last_log_index,
                last_term: s.last_term,
            })
            .collect();

        self.health = health
            .values()
            .map(|h| HealthReport {
                id: h.id.to_string(),
                healthy: h.healthy,
                stable_for_ms: duration_ms(h.stable_for(now)),
                last_seen_tick: h.last_seen_tick,
            })
            .collect();

        self.failure_tolerance = failure_tolerance(snapshot, health);
        self.last_tick_time = Some(Utc::now());
    }
}

/// Healthy voters beyond the majority of all voters
pub fn failure_tolerance(snapshot: &ClusterSnapshot, health: &HealthMap) -> usize {
    let voters = snapshot.voter_count();
    let healthy = snapshot
        .voters()
        .filter(|s| health.get(&s.id).map(|h| h.healthy).unwrap_or(false))
        .count();
    healthy.saturating_sub(voters / 2 + 1)
}

fn duration_ms(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
