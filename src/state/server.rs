//! Cluster Servers
//!
//! Per-server state as reported by the consensus layer. Rebuilt from a
//! fresh snapshot every tick and never persisted.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Opaque, stable server identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    /// Create a server id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ServerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// State of a single server in the consensus configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerState {
    /// Server identifier
    pub id: ServerId,
    /// Server address (host:port)
    pub address: String,
    /// Counted toward quorum
    pub is_voter: bool,
    /// Currently holds leadership
    pub is_leader: bool,
    /// Last time the leader heard from this server
    pub last_contact: Instant,
    /// Last log index replicated to this server
    pub last_log_index: u64,
    /// Term of the last log entry on this server
    pub last_term: u64,
}

impl ServerState {
    /// Create a non-voter that was just heard from
    pub fn new(id: impl Into<ServerId>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            is_voter: false,
            is_leader: false,
            last_contact: Instant::now(),
            last_log_index: 0,
            last_term: 0,
        }
    }

    /// Set voter flag
    #[must_use]
    pub fn with_voter(mut self, voter: bool) -> Self {
        self.is_voter = voter;
        self
    }

    /// Set leader flag
    #[must_use]
    pub fn with_leader(mut self, leader: bool) -> Self {
        self.is_leader = leader;
        self
    }

    /// Set last contact time
    #[must_use]
    pub fn with_last_contact(mut self, at: Instant) -> Self {
        self.last_contact = at;
        self
    }

    /// Set log position
    #[must_use]
    pub fn with_log(mut self, index: u64, term: u64) -> Self {
        self.last_log_index = index;
        self.last_term = term;
        self
    }

    /// Time since the leader last heard from this server
    pub fn contact_age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_contact)
    }
}

/// A point-in-time read of the consensus configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterSnapshot {
    /// Configuration index the snapshot was read at
    pub index: u64,
    /// All servers in the configuration
    pub servers: Vec<ServerState>,
}

impl ClusterSnapshot {
    /// Create a snapshot
    pub fn new(index: u64, servers: Vec<ServerState>) -> Self {
        Self { index, servers }
    }

    /// Look up a server by id
    pub fn get(&self, id: &ServerId) -> Option<&ServerState> {
        self.servers.iter().find(|s| &s.id == id)
    }

    /// The current leader, if the snapshot names one
    pub fn leader(&self) -> Option<&ServerState> {
        self.servers.iter().find(|s| s.is_leader)
    }

    /// Voting servers
    pub fn voters(&self) -> impl Iterator<Item = &ServerState> {
        self.servers.iter().filter(|s| s.is_voter)
    }

    /// Number of voting servers
    pub fn voter_count(&self) -> usize {
        self.voters().count()
    }

    /// Servers ordered by id, so decisions do not depend on snapshot order
    pub fn sorted(&self) -> Vec<&ServerState> {
        let mut servers: Vec<&ServerState> = self.servers.iter().collect();
        servers.sort_by(|a, b| a.id.cmp(&b.id));
        servers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_builders() {
        let now = Instant::now();
        let server = ServerState::new("server-1", "10.0.0.1:8300")
            .with_voter(true)
            .with_leader(true)
            .with_log(42, 3)
            .with_last_contact(now);

        assert_eq!(server.id.as_str(), "server-1");
        assert!(server.is_voter);
        assert!(server.is_leader);
        assert_eq!(server.last_log_index, 42);
        assert_eq!(server.last_term, 3);
        assert_eq!(server.contact_age(now + Duration::from_secs(2)), Duration::from_secs(2));
    }

    #[test]
    fn test_contact_age_never_negative() {
        let now = Instant::now();
        let server = ServerState::new("s", "a").with_last_contact(now + Duration::from_secs(5));
        assert_eq!(server.contact_age(now), Duration::ZERO);
    }

    #[test]
    fn test_snapshot_queries() {
        let snapshot = ClusterSnapshot::new(
            7,
            vec![
                ServerState::new("c", "c:1").with_voter(true),
                ServerState::new("a", "a:1").with_voter(true).with_leader(true),
                ServerState::new("b", "b:1"),
            ],
        );

        assert_eq!(snapshot.voter_count(), 2);
        assert_eq!(snapshot.leader().unwrap().id.as_str(), "a");
        assert!(snapshot.get(&ServerId::from("b")).is_some());
        assert!(snapshot.get(&ServerId::from("z")).is_none());

        let order: Vec<&str> = snapshot.sorted().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }
}
