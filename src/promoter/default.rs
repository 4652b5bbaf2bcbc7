//! Default Promotion Policy
//!
//! Promotes stable non-voters, cleans up dead servers without breaking the
//! quorum floor, and suggests a leadership transfer away from a stale leader.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use super::{compare_versions, Decision, Promoter, PromoterInput};
use crate::state::{ServerId, ServerState};

/// The default promoter
#[derive(Debug, Clone, Default)]
pub struct DefaultPromoter;

impl DefaultPromoter {
    /// Create the default promoter
    pub fn new() -> Self {
        Self
    }

    /// Stable non-voters eligible for promotion, capped by `max_voters`.
    ///
    /// Unless `allow_newer` is set, a server whose version is strictly newer
    /// than the version held by a majority of voters is held back.
    pub fn promotions(&self, input: &PromoterInput<'_>, allow_newer: bool) -> BTreeSet<ServerId> {
        let mut promote = BTreeSet::new();
        let voters = input.snapshot.voter_count();
        let mut budget = input.config.max_voters.map(|max| max.saturating_sub(voters));
        let majority = if allow_newer { None } else { majority_version(input) };

        for server in input.snapshot.sorted() {
            if server.is_voter || !input.is_stable(&server.id) {
                continue;
            }

            if let Some(majority) = majority {
                let version = input.version_of(&server.id);
                if !version.is_empty() && compare_versions(version, majority) == Ordering::Greater {
                    tracing::debug!(
                        "Holding back {}: version {} is newer than voter majority {}",
                        server.id,
                        version,
                        majority
                    );
                    continue;
                }
            }

            if let Some(remaining) = budget.as_mut() {
                if *remaining == 0 {
                    tracing::debug!("Voter cap reached, deferring remaining promotions");
                    break;
                }
                *remaining -= 1;
            }

            promote.insert(server.id.clone());
        }

        promote
    }

    /// Fill in removals or demotions of dead servers
    pub fn cleanup(&self, input: &PromoterInput<'_>, decision: &mut Decision) {
        let config = input.config;
        let mut voters_after = input.snapshot.voter_count();

        for server in input.snapshot.sorted() {
            if server.is_leader || !input.is_dead(&server.id) {
                continue;
            }

            if !server.is_voter {
                if config.cleanup_dead_servers {
                    decision.remove.insert(server.id.clone());
                }
                continue;
            }

            if voters_after.saturating_sub(1) < config.min_quorum {
                tracing::warn!(
                    "Voter {} is dead but removing it would leave {} voters (min_quorum {})",
                    server.id,
                    voters_after.saturating_sub(1),
                    config.min_quorum
                );
                decision.quorum_blocked.insert(server.id.clone());
                continue;
            }

            voters_after -= 1;
            if config.cleanup_dead_servers {
                decision.remove.insert(server.id.clone());
            } else {
                decision.demote.insert(server.id.clone());
            }
        }
    }

    /// Suggest a healthier voter when the leader has fallen behind
    pub fn leadership_transfer(&self, input: &PromoterInput<'_>) -> Option<ServerId> {
        let leader = input.snapshot.leader()?;

        let best = input
            .snapshot
            .voters()
            .filter(|s| !s.is_leader && input.is_healthy(&s.id))
            .max_by(|a, b| {
                (a.last_term, a.last_log_index)
                    .cmp(&(b.last_term, b.last_log_index))
                    .then_with(|| b.id.cmp(&a.id))
            })?;

        if is_stale(leader, best, input.config.max_trailing_logs) {
            tracing::info!(
                "Leader {} is stale (term {}, index {}), suggesting transfer to {}",
                leader.id,
                leader.last_term,
                leader.last_log_index,
                best.id
            );
            Some(best.id.clone())
        } else {
            None
        }
    }
}

impl Promoter for DefaultPromoter {
    fn name(&self) -> &'static str {
        "default"
    }

    fn decide(&self, input: &PromoterInput<'_>) -> Decision {
        let mut decision = Decision {
            promote: self.promotions(input, false),
            ..Decision::default()
        };
        self.cleanup(input, &mut decision);
        decision.transfer_leadership = self.leadership_transfer(input);
        decision
    }
}

fn is_stale(leader: &ServerState, best: &ServerState, max_trailing_logs: u64) -> bool {
    if best.last_term > leader.last_term {
        return true;
    }
    max_trailing_logs > 0
        && best.last_term == leader.last_term
        && best.last_log_index.saturating_sub(leader.last_log_index) > max_trailing_logs
}

/// Version held by more than half of the voters, if any
fn majority_version<'a>(input: &PromoterInput<'a>) -> Option<&'a str> {
    let voters = input.snapshot.voter_count();
    let mut counts: HashMap<&'a str, usize> = HashMap::new();
    for voter in input.snapshot.voters() {
        let version = input.version_of(&voter.id);
        if !version.is_empty() {
            *counts.entry(version).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .find(|(_, count)| count * 2 > voters)
        .map(|(version, _)| version)
}
