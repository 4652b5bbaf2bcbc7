//! Autopilot Module
//!
//! Ties the health monitor, the promoter and the consensus control surface
//! together. One `Autopilot` context is created per process and threaded
//! through the loop; a leadership observer starts the `Reconciler` when the
//! local server becomes leader and stops it when leadership is lost.

mod reconciler;
mod status;
mod validate;

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AutopilotConfig;
use crate::consensus::ConsensusControl;
use crate::error::{Error, Result};
use crate::promoter::{self, Promoter};
use crate::state::MetadataResolver;

pub use reconciler::{plan, Reconciler, TickReport};
pub use status::{failure_tolerance, HealthReport, LoopState, Metrics, ServerReport, Status};
pub use validate::{validate, PolicyViolation};

/// Per-process autopilot context
pub struct Autopilot {
    consensus: Arc<dyn ConsensusControl>,
    metadata: Arc<dyn MetadataResolver>,
    promoter: Arc<dyn Promoter>,
    config_tx: watch::Sender<AutopilotConfig>,
    status_tx: watch::Sender<Status>,
}

impl Autopilot {
    /// Create an autopilot with an explicit promoter
    pub fn new(
        consensus: Arc<dyn ConsensusControl>,
        metadata: Arc<dyn MetadataResolver>,
        promoter: Arc<dyn Promoter>,
        config: AutopilotConfig,
    ) -> Result<Self> {
        config.validate()?;

        let (status_tx, _) = watch::channel(Status::initial(promoter.name(), !config.disabled));
        let (config_tx, _) = watch::channel(config);

        Ok(Self {
            consensus,
            metadata,
            promoter,
            config_tx,
            status_tx,
        })
    }

    /// Create an autopilot with the promoter named by `config.policy`
    pub fn from_config(
        consensus: Arc<dyn ConsensusControl>,
        metadata: Arc<dyn MetadataResolver>,
        config: AutopilotConfig,
    ) -> Result<Self> {
        let promoter = promoter::from_config(&config);
        Self::new(consensus, metadata, promoter, config)
    }

    /// Current status copy
    pub fn status(&self) -> Status {
        self.status_tx.borrow().clone()
    }

    /// Subscribe to status updates
    pub fn subscribe_status(&self) -> watch::Receiver<Status> {
        self.status_tx.subscribe()
    }

    /// Active configuration
    pub fn config(&self) -> AutopilotConfig {
        self.config_tx.borrow().clone()
    }

    /// Name of the active promoter
    pub fn policy(&self) -> &'static str {
        self.promoter.name()
    }

    /// Replace the configuration. Takes effect on the next tick; an invalid
    /// configuration is rejected and the current one stays active.
    pub fn update_config(&self, config: AutopilotConfig) -> Result<()> {
        if let Err(e) = config.validate() {
            tracing::warn!("Rejected autopilot configuration: {}", e);
            return Err(e);
        }

        let current = self.config_tx.borrow().policy;
        if config.policy != current {
            let e = Error::Config(format!(
                "autopilot.policy cannot change at runtime ({} -> {})",
                current, config.policy
            ));
            tracing::warn!("Rejected autopilot configuration: {}", e);
            return Err(e);
        }

        let enabled = !config.disabled;
        self.config_tx.send_replace(config);
        self.status_tx.send_modify(|status| status.enabled = enabled);
        tracing::info!("Autopilot configuration updated");
        Ok(())
    }

    /// Observe leadership until `shutdown` fires, running the reconciler
    /// only while the local server leads
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let mut leadership = self.consensus.leadership_changes();
        let mut active: Option<(CancellationToken, JoinHandle<()>)> = None;

        tracing::info!("Autopilot started with {} policy", self.promoter.name());

        loop {
            let leading = *leadership.borrow_and_update();

            if leading && active.is_none() {
                tracing::info!("Gained leadership, starting reconciliation");
                self.status_tx.send_modify(|status| status.leader = true);
                let token = shutdown.child_token();
                let reconciler = Reconciler::new(Arc::clone(&self)).with_cancellation(token.clone());
                active = Some((token, tokio::spawn(reconciler.run())));
            } else if !leading {
                if let Some((token, handle)) = active.take() {
                    tracing::info!("Lost leadership, stopping reconciliation");
                    self.stop_reconciler(token, handle).await;
                    self.status_tx.send_modify(|status| {
                        status.leader = false;
                        status.state = LoopState::Idle;
                    });
                }
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                changed = leadership.changed() => {
                    if changed.is_err() {
                        tracing::warn!("Leadership notifications closed, stopping autopilot");
                        break;
                    }
                }
            }
        }

        if let Some((token, handle)) = active.take() {
            self.stop_reconciler(token, handle).await;
        }
        self.status_tx.send_modify(|status| {
            status.leader = false;
            status.state = LoopState::Stopped;
        });
        tracing::info!("Autopilot stopped");
        Ok(())
    }

    async fn stop_reconciler(&self, token: CancellationToken, handle: JoinHandle<()>) {
        token.cancel();
        if let Err(e) = handle.await {
            tracing::error!("Reconciler task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::InMemoryConsensus;
    use crate::state::{ServerId, ServerState, StaticMetadataResolver};
    use std::time::Duration;

    async fn cluster(local: &str, leader: &str) -> Arc<InMemoryConsensus> {
        let consensus = Arc::new(InMemoryConsensus::new(local));
        for id in ["s1", "s2", "s3"] {
            consensus
                .add_server(
                    ServerState::new(id, format!("{}:8300", id))
                        .with_voter(true)
                        .with_leader(id == leader),
                )
                .await;
        }
        consensus
    }

    fn autopilot(consensus: Arc<InMemoryConsensus>, config: AutopilotConfig) -> Arc<Autopilot> {
        Arc::new(
            Autopilot::from_config(consensus, Arc::new(StaticMetadataResolver::new()), config)
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_rejects_invalid_initial_config() {
        let consensus = cluster("s1", "s1").await;
        let config = AutopilotConfig {
            min_quorum: 0,
            ..AutopilotConfig::default()
        };
        let result =
            Autopilot::from_config(consensus, Arc::new(StaticMetadataResolver::new()), config);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_update_config_keeps_previous_on_error() {
        let autopilot = autopilot(cluster("s1", "s1").await, AutopilotConfig::default());

        let invalid = AutopilotConfig {
            max_voters: Some(1),
            ..AutopilotConfig::default()
        };
        assert!(matches!(autopilot.update_config(invalid), Err(Error::Config(_))));
        assert_eq!(autopilot.config(), AutopilotConfig::default());

        let policy_change = AutopilotConfig {
            policy: crate::config::PolicyKind::ZoneAware,
            ..AutopilotConfig::default()
        };
        assert!(autopilot.update_config(policy_change).is_err());

        let disabled = AutopilotConfig {
            disabled: true,
            ..AutopilotConfig::default()
        };
        autopilot.update_config(disabled.clone()).unwrap();
        assert_eq!(autopilot.config(), disabled);
        assert!(!autopilot.status().enabled);
    }

    #[tokio::test]
    async fn test_instances_are_independent() {
        let first = autopilot(cluster("s1", "s1").await, AutopilotConfig::default());
        let second = autopilot(cluster("s1", "s1").await, AutopilotConfig::default());

        first
            .update_config(AutopilotConfig {
                disabled: true,
                ..AutopilotConfig::default()
            })
            .unwrap();

        assert!(!first.status().enabled);
        assert!(second.status().enabled);
        assert_eq!(second.policy(), "default");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconciles_only_while_leading() {
        let consensus = cluster("s1", "s2").await;
        let config = AutopilotConfig {
            reconcile_interval_ms: 1_000,
            ..AutopilotConfig::default()
        };
        let autopilot = autopilot(Arc::clone(&consensus), config);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&autopilot).run(shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(5)).await;
        let standby = autopilot.status();
        assert!(!standby.leader);
        assert_eq!(standby.tick, 0);
        assert_eq!(standby.state, LoopState::Idle);

        consensus.set_leader(&ServerId::from("s1")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        let leading = autopilot.status();
        assert!(leading.leader);
        assert!(leading.tick >= 4);
        assert!(leading.last_tick_time.is_some());

        consensus.set_leader(&ServerId::from("s3")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let demoted = autopilot.status();
        assert!(!demoted.leader);
        assert_eq!(demoted.state, LoopState::Idle);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(autopilot.status().tick, demoted.tick);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(autopilot.status().state, LoopState::Stopped);
        assert!(consensus.applied().await.is_empty());
    }
}
