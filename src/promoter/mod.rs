//! Promotion Policies
//!
//! A promoter is a pure function from cluster state to a membership
//! `Decision`. The reconciliation loop validates every decision against the
//! quorum floor and leader protection before applying it, whichever promoter
//! produced it.

mod default;
mod upgrade;
mod zone;

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::time::Instant;

use crate::config::{AutopilotConfig, PolicyKind};
use crate::state::{ClusterSnapshot, Health, HealthMap, ServerId, ServerMetadata};

pub use default::DefaultPromoter;
pub use upgrade::{compare_versions, UpgradeGatedPromoter};
pub use zone::ZoneAwarePromoter;

/// Membership changes proposed for one tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Decision {
    /// Non-voters to promote
    pub promote: BTreeSet<ServerId>,
    /// Voters to demote
    pub demote: BTreeSet<ServerId>,
    /// Servers to remove
    pub remove: BTreeSet<ServerId>,
    /// Voter to hand leadership to
    pub transfer_leadership: Option<ServerId>,
    /// Dead voters left in place because removal would break the quorum floor
    pub quorum_blocked: BTreeSet<ServerId>,
}

impl Decision {
    /// No membership operation proposed
    pub fn is_empty(&self) -> bool {
        self.promote.is_empty()
            && self.demote.is_empty()
            && self.remove.is_empty()
            && self.transfer_leadership.is_none()
    }

    /// Number of membership operations proposed
    pub fn operation_count(&self) -> usize {
        self.promote.len()
            + self.demote.len()
            + self.remove.len()
            + usize::from(self.transfer_leadership.is_some())
    }
}

/// Everything a promoter may look at
pub struct PromoterInput<'a> {
    /// Current configuration
    pub snapshot: &'a ClusterSnapshot,
    /// Health for this tick
    pub health: &'a HealthMap,
    /// Metadata for every server in the snapshot
    pub metadata: &'a HashMap<ServerId, ServerMetadata>,
    /// Active configuration
    pub config: &'a AutopilotConfig,
    /// Evaluation instant
    pub now: Instant,
}

impl<'a> PromoterInput<'a> {
    /// Health record for a server
    pub fn health_of(&self, id: &ServerId) -> Option<&'a Health> {
        self.health.get(id)
    }

    /// Healthy continuously for the stabilization time
    pub fn is_stable(&self, id: &ServerId) -> bool {
        self.health_of(id)
            .map(|h| h.is_stable(self.now, self.config.server_stabilization_time()))
            .unwrap_or(false)
    }

    /// Unhealthy continuously for the dead-server timeout
    pub fn is_dead(&self, id: &ServerId) -> bool {
        self.health_of(id)
            .map(|h| h.is_dead(self.now, self.config.dead_server_timeout()))
            .unwrap_or(false)
    }

    /// Healthy on the latest observation
    pub fn is_healthy(&self, id: &ServerId) -> bool {
        self.health_of(id).map(|h| h.healthy).unwrap_or(false)
    }

    /// Version under the configured upgrade key, empty when unknown
    pub fn version_of(&self, id: &ServerId) -> &'a str {
        let key = self.config.upgrade_version_key.as_str();
        self.metadata
            .get(id)
            .map(|m| m.version_for(key))
            .unwrap_or("")
    }

    /// Zone under the configured redundancy zone key, empty when unknown
    pub fn zone_of(&self, id: &ServerId) -> &'a str {
        let key = self.config.redundancy_zone_key.as_str();
        self.metadata.get(id).map(|m| m.zone_for(key)).unwrap_or("")
    }
}

/// Membership decision strategy
pub trait Promoter: Send + Sync {
    /// Policy name reported in status
    fn name(&self) -> &'static str;

    /// Propose membership changes. Must be deterministic and side-effect free.
    fn decide(&self, input: &PromoterInput<'_>) -> Decision;
}

/// Build the promoter selected by configuration
pub fn from_config(config: &AutopilotConfig) -> Arc<dyn Promoter> {
    match config.policy {
        PolicyKind::Default => Arc::new(DefaultPromoter::new()),
        PolicyKind::ZoneAware => Arc::new(ZoneAwarePromoter::new()),
        PolicyKind::UpgradeGated => Arc::new(UpgradeGatedPromoter::new()),
    }
}
