//! Decision Validation
//!
//! Hard invariants enforced on every promoter decision before anything
//! reaches the consensus layer:
//!
//! - the voter count never drops below `min_quorum`, even if the apply
//!   sequence stops part-way (promotions are not counted toward the floor)
//! - the leader is never removed or demoted without a leadership transfer
//!   in the same decision
//!
//! Offending operations are dropped individually; the rest of the decision
//! stands.

use thiserror::Error;

use crate::config::AutopilotConfig;
use crate::promoter::Decision;
use crate::state::{ClusterSnapshot, HealthMap, ServerId};

/// A proposed operation rejected by validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rejected {operation} {id}: {reason}")]
pub struct PolicyViolation {
    /// Operation kind (promote, demote, remove, transfer)
    pub operation: &'static str,
    /// Target server
    pub id: ServerId,
    /// Why it was rejected
    pub reason: String,
}

impl PolicyViolation {
    fn new(operation: &'static str, id: &ServerId, reason: impl Into<String>) -> Self {
        Self {
            operation,
            id: id.clone(),
            reason: reason.into(),
        }
    }
}

/// Strip every invariant-violating operation from `proposed`
pub fn validate(
    proposed: &Decision,
    snapshot: &ClusterSnapshot,
    health: &HealthMap,
    config: &AutopilotConfig,
) -> (Decision, Vec<PolicyViolation>) {
    let mut accepted = Decision {
        quorum_blocked: proposed.quorum_blocked.clone(),
        ..Decision::default()
    };
    let mut violations = Vec::new();
    let leader = snapshot.leader().map(|s| s.id.clone());

    if let Some(target) = &proposed.transfer_leadership {
        match snapshot.get(target) {
            None => violations.push(PolicyViolation::new("transfer", target, "unknown server")),
            Some(s) if !s.is_voter => {
                violations.push(PolicyViolation::new("transfer", target, "target is not a voter"))
            }
            Some(s) if s.is_leader => {
                violations.push(PolicyViolation::new("transfer", target, "target already leads"))
            }
            Some(_) if !health.get(target).map(|h| h.healthy).unwrap_or(false) => {
                violations.push(PolicyViolation::new("transfer", target, "target is unhealthy"))
            }
            Some(_) => accepted.transfer_leadership = Some(target.clone()),
        }
    }

    let mut voters = snapshot.voter_count();

    // Removals first so a server named for both is removed, not demoted
    let reductions = proposed
        .remove
        .iter()
        .map(|id| ("remove", id))
        .chain(proposed.demote.iter().map(|id| ("demote", id)));

    for (operation, id) in reductions {
        let Some(server) = snapshot.get(id) else {
            violations.push(PolicyViolation::new(operation, id, "unknown server"));
            continue;
        };

        if operation == "demote" {
            if proposed.remove.contains(id) {
                violations.push(PolicyViolation::new(operation, id, "already being removed"));
                continue;
            }
            if !server.is_voter {
                violations.push(PolicyViolation::new(operation, id, "server is not a voter"));
                continue;
            }
        }

        if leader.as_ref() == Some(id) && accepted.transfer_leadership.is_none() {
            violations.push(PolicyViolation::new(
                operation,
                id,
                "leader cannot leave without a leadership transfer",
            ));
            continue;
        }

        if server.is_voter {
            if voters.saturating_sub(1) < config.min_quorum {
                violations.push(PolicyViolation::new(
                    operation,
                    id,
                    format!(
                        "would leave {} voters, below min_quorum {}",
                        voters.saturating_sub(1),
                        config.min_quorum
                    ),
                ));
                continue;
            }
            voters -= 1;
        }

        if operation == "remove" {
            accepted.remove.insert(id.clone());
        } else {
            accepted.demote.insert(id.clone());
        }
    }

    let mut voter_total = snapshot.voter_count();
    for id in &proposed.promote {
        let Some(server) = snapshot.get(id) else {
            violations.push(PolicyViolation::new("promote", id, "unknown server"));
            continue;
        };
        if server.is_voter {
            violations.push(PolicyViolation::new("promote", id, "already a voter"));
            continue;
        }
        if accepted.remove.contains(id) {
            violations.push(PolicyViolation::new("promote", id, "also being removed"));
            continue;
        }
        if let Some(max) = config.max_voters {
            if voter_total >= max {
                violations.push(PolicyViolation::new(
                    "promote",
                    id,
                    format!("would exceed max_voters {}", max),
                ));
                continue;
            }
        }
        voter_total += 1;
        accepted.promote.insert(id.clone());
    }

    (accepted, violations)
}
