//! WolfPilot - Raft Membership Autopilot
//!
//! Keeps a Raft cluster's voting membership healthy without operator
//! intervention: it watches every server's replication health, promotes
//! stable non-voters, removes dead servers while holding the quorum floor,
//! and moves leadership away from a stale leader.
//!
//! # Architecture
//!
//! The autopilot runs beside each consensus server but only acts on the
//! leader. Each reconciliation tick reads the cluster configuration through
//! the `ConsensusControl` trait, updates per-server health, asks a pluggable
//! `Promoter` for membership changes, validates them against the quorum
//! floor and leader protection, and applies what survives one command at a
//! time.
//!
//! # Features
//!
//! - Stability-gated promotion with flap protection
//! - Dead-server cleanup that never breaks `min_quorum`
//! - Default, zone-aware and upgrade-gated promotion policies
//! - Leadership-gated activation with cooperative cancellation
//! - Runtime configuration updates and a watchable status surface

pub mod autopilot;
pub mod config;
pub mod consensus;
pub mod error;
pub mod promoter;
pub mod state;

pub use config::WolfPilotConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::autopilot::{Autopilot, Reconciler, Status};
    pub use crate::config::{AutopilotConfig, PolicyKind, WolfPilotConfig};
    pub use crate::consensus::{Command, ConsensusControl, InMemoryConsensus};
    pub use crate::error::{Error, Result};
    pub use crate::promoter::{Decision, Promoter, PromoterInput};
    pub use crate::state::{ClusterSnapshot, MetadataResolver, ServerId, ServerState};
}
