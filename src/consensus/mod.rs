//! Consensus Control Module
//!
//! The narrow interface through which the autopilot reads the cluster
//! configuration and issues membership changes. The consensus protocol
//! itself lives behind this trait.

mod memory;

use serde::Serialize;
use tokio::sync::watch;

use crate::error::Result;
use crate::state::{ClusterSnapshot, ServerId};

pub use memory::InMemoryConsensus;

/// Membership-change command issued to the consensus layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    /// Promote a non-voter
    AddVoter { id: ServerId, address: String },
    /// Turn a voter into a non-voter
    DemoteVoter { id: ServerId },
    /// Drop a server from the configuration
    RemoveServer { id: ServerId },
    /// Hand leadership to another voter
    TransferLeadership { id: ServerId },
}

impl Command {
    /// Server the command targets
    pub fn target(&self) -> &ServerId {
        match self {
            Command::AddVoter { id, .. }
            | Command::DemoteVoter { id }
            | Command::RemoveServer { id }
            | Command::TransferLeadership { id } => id,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::AddVoter { id, address } => write!(f, "AddVoter({}, {})", id, address),
            Command::DemoteVoter { id } => write!(f, "DemoteVoter({})", id),
            Command::RemoveServer { id } => write!(f, "RemoveServer({})", id),
            Command::TransferLeadership { id } => write!(f, "TransferLeadership({})", id),
        }
    }
}

/// Control surface of the consensus layer
///
/// Mutating calls return the configuration index after the change, which
/// the caller passes as `prior_index` on its next `add_voter`.
#[async_trait::async_trait]
pub trait ConsensusControl: Send + Sync {
    /// Read the current configuration
    async fn get_configuration(&self) -> Result<ClusterSnapshot>;

    /// Promote a server to voter if the configuration is still at `prior_index`
    async fn add_voter(&self, id: &ServerId, address: &str, prior_index: u64) -> Result<u64>;

    /// Demote a voter to non-voter
    async fn demote_voter(&self, id: &ServerId) -> Result<u64>;

    /// Remove a server from the configuration
    async fn remove_server(&self, id: &ServerId) -> Result<u64>;

    /// Transfer leadership to another voter
    async fn transfer_leadership(&self, id: &ServerId) -> Result<u64>;

    /// Stream of local leadership changes (`true` while this node leads)
    fn leadership_changes(&self) -> watch::Receiver<bool>;
}

/// Dispatch a command to the consensus layer
pub async fn execute(
    consensus: &dyn ConsensusControl,
    command: &Command,
    prior_index: u64,
) -> Result<u64> {
    match command {
        Command::AddVoter { id, address } => consensus.add_voter(id, address, prior_index).await,
        Command::DemoteVoter { id } => consensus.demote_voter(id).await,
        Command::RemoveServer { id } => consensus.remove_server(id).await,
        Command::TransferLeadership { id } => consensus.transfer_leadership(id).await,
    }
}
