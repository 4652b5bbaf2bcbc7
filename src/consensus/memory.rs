//! In-Memory Consensus
//!
//! A process-local consensus configuration implementing `ConsensusControl`.
//! Backs the `simulate` command and the test suite, with hooks for injecting
//! snapshot failures, slow snapshots, and mid-sequence apply failures.

use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;

use super::{Command, ConsensusControl};
use crate::error::{Error, Result};
use crate::state::{ClusterSnapshot, ServerId, ServerState};

#[derive(Debug, Default)]
struct Inner {
    index: u64,
    servers: BTreeMap<ServerId, ServerState>,
    applied: Vec<Command>,
    fail_apply_after: Option<usize>,
    failing_snapshots: usize,
    snapshot_delay: Option<Duration>,
}

/// In-memory consensus configuration
pub struct InMemoryConsensus {
    /// Id of the server this instance acts as
    local_id: ServerId,
    inner: RwLock<Inner>,
    leadership: watch::Sender<bool>,
}

impl InMemoryConsensus {
    /// Create an empty configuration viewed from `local_id`
    pub fn new(local_id: impl Into<ServerId>) -> Self {
        let (leadership, _) = watch::channel(false);
        Self {
            local_id: local_id.into(),
            inner: RwLock::new(Inner::default()),
            leadership,
        }
    }

    /// Id this instance acts as
    pub fn local_id(&self) -> &ServerId {
        &self.local_id
    }

    /// Add a server (or replace one with the same id)
    pub async fn add_server(&self, server: ServerState) {
        let mut inner = self.inner.write().await;
        if server.is_leader {
            for other in inner.servers.values_mut() {
                other.is_leader = false;
            }
        }
        inner.servers.insert(server.id.clone(), server);
        inner.index += 1;
        self.sync_leadership(&inner);
    }

    /// Make `id` the leader
    pub async fn set_leader(&self, id: &ServerId) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.servers.contains_key(id) {
            return Err(Error::ServerNotFound(id.to_string()));
        }
        for server in inner.servers.values_mut() {
            server.is_leader = &server.id == id;
        }
        self.sync_leadership(&inner);
        Ok(())
    }

    /// Clear leadership entirely
    pub async fn clear_leader(&self) {
        let mut inner = self.inner.write().await;
        for server in inner.servers.values_mut() {
            server.is_leader = false;
        }
        self.sync_leadership(&inner);
    }

    /// Record contact from a server
    pub async fn touch(&self, id: &ServerId, at: Instant) {
        let mut inner = self.inner.write().await;
        if let Some(server) = inner.servers.get_mut(id) {
            server.last_contact = at;
        }
    }

    /// Set a server's log position
    pub async fn set_log(&self, id: &ServerId, index: u64, term: u64) {
        let mut inner = self.inner.write().await;
        if let Some(server) = inner.servers.get_mut(id) {
            server.last_log_index = index;
            server.last_term = term;
        }
    }

    /// Commands applied so far, in order
    pub async fn applied(&self) -> Vec<Command> {
        self.inner.read().await.applied.clone()
    }

    /// Let `successes` more commands apply, then fail the next one as if
    /// leadership had moved
    pub async fn fail_apply_after(&self, successes: usize) {
        self.inner.write().await.fail_apply_after = Some(successes);
    }

    /// Fail the next `count` snapshot reads
    pub async fn fail_snapshots(&self, count: usize) {
        self.inner.write().await.failing_snapshots = count;
    }

    /// Delay every snapshot read
    pub async fn set_snapshot_delay(&self, delay: Option<Duration>) {
        self.inner.write().await.snapshot_delay = delay;
    }

    fn sync_leadership(&self, inner: &Inner) {
        let leading = inner
            .servers
            .get(&self.local_id)
            .map(|s| s.is_leader)
            .unwrap_or(false);
        self.leadership.send_if_modified(|current| {
            if *current != leading {
                tracing::debug!("{} leadership -> {}", self.local_id, leading);
                *current = leading;
                true
            } else {
                false
            }
        });
    }

    fn admit(&self, inner: &mut Inner) -> Result<()> {
        if !*self.leadership.borrow() {
            return Err(Error::NotLeader);
        }
        if let Some(remaining) = inner.fail_apply_after {
            if remaining == 0 {
                inner.fail_apply_after = None;
                return Err(Error::NotLeader);
            }
            inner.fail_apply_after = Some(remaining - 1);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ConsensusControl for InMemoryConsensus {
    async fn get_configuration(&self) -> Result<ClusterSnapshot> {
        let delay = self.inner.read().await.snapshot_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.write().await;
        if inner.failing_snapshots > 0 {
            inner.failing_snapshots -= 1;
            return Err(Error::Snapshot("configuration unavailable".into()));
        }

        Ok(ClusterSnapshot::new(
            inner.index,
            inner.servers.values().cloned().collect(),
        ))
    }

    async fn add_voter(&self, id: &ServerId, address: &str, prior_index: u64) -> Result<u64> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        self.admit(inner)?;

        if prior_index != inner.index {
            return Err(Error::Apply {
                operation: format!("AddVoter({})", id),
                reason: format!(
                    "configuration index is {}, expected {}",
                    inner.index, prior_index
                ),
            });
        }

        let server = inner
            .servers
            .get_mut(id)
            .ok_or_else(|| Error::ServerNotFound(id.to_string()))?;
        server.is_voter = true;
        server.address = address.to_string();

        inner.index += 1;
        inner.applied.push(Command::AddVoter {
            id: id.clone(),
            address: address.to_string(),
        });
        Ok(inner.index)
    }

    async fn demote_voter(&self, id: &ServerId) -> Result<u64> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        self.admit(inner)?;

        let server = inner
            .servers
            .get_mut(id)
            .ok_or_else(|| Error::ServerNotFound(id.to_string()))?;
        if !server.is_voter {
            return Err(Error::Apply {
                operation: format!("DemoteVoter({})", id),
                reason: "server is not a voter".into(),
            });
        }
        server.is_voter = false;
        server.is_leader = false;

        inner.index += 1;
        inner.applied.push(Command::DemoteVoter { id: id.clone() });
        self.sync_leadership(inner);
        Ok(inner.index)
    }

    async fn remove_server(&self, id: &ServerId) -> Result<u64> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        self.admit(inner)?;

        if inner.servers.remove(id).is_none() {
            return Err(Error::ServerNotFound(id.to_string()));
        }

        inner.index += 1;
        inner.applied.push(Command::RemoveServer { id: id.clone() });
        self.sync_leadership(inner);
        Ok(inner.index)
    }

    async fn transfer_leadership(&self, id: &ServerId) -> Result<u64> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        self.admit(inner)?;

        match inner.servers.get(id) {
            Some(target) if target.is_voter => {}
            Some(_) => {
                return Err(Error::Apply {
                    operation: format!("TransferLeadership({})", id),
                    reason: "target is not a voter".into(),
                })
            }
            None => return Err(Error::ServerNotFound(id.to_string())),
        }

        for server in inner.servers.values_mut() {
            server.is_leader = &server.id == id;
        }

        inner.applied.push(Command::TransferLeadership { id: id.clone() });
        self.sync_leadership(inner);
        Ok(inner.index)
    }

    fn leadership_changes(&self) -> watch::Receiver<bool> {
        self.leadership.subscribe()
    }
}
