//! Reconciliation Loop
//!
//! Each tick reads a fresh snapshot, resolves metadata, updates health, asks
//! the promoter for a decision, validates it, and applies what survives. A
//! tick that fails before a decision leaves all state as it was; a tick that
//! fails mid-apply drops the rest of its commands. Either way the next tick
//! starts over from a new snapshot.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::status::{LoopState, Metrics};
use super::validate::{validate, PolicyViolation};
use super::Autopilot;
use crate::consensus::{self, Command};
use crate::error::{Error, Result};
use crate::promoter::{Decision, PromoterInput};
use crate::state::{ClusterSnapshot, HealthMap, HealthMonitor, ServerId, ServerMetadata};

/// Outcome of a completed tick
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Tick number
    pub tick: u64,
    /// Decision left after validation
    pub decision: Decision,
    /// Operations dropped by validation
    pub violations: Vec<PolicyViolation>,
    /// Commands the consensus layer accepted, in order
    pub applied: Vec<Command>,
    /// Failure that stopped the apply sequence
    pub aborted: Option<String>,
}

/// Owns tick execution and the health map while the local server leads
pub struct Reconciler {
    autopilot: Arc<Autopilot>,
    health: HealthMap,
    tick: u64,
    /// Successful snapshots folded into `health`
    observed: u64,
    metrics: Metrics,
    cancel: CancellationToken,
}

impl Reconciler {
    /// Create a reconciler, continuing the tick counter and metrics from the
    /// last published status
    pub fn new(autopilot: Arc<Autopilot>) -> Self {
        let (tick, metrics) = {
            let status = autopilot.status_tx.borrow();
            (status.tick, status.metrics.clone())
        };
        Self {
            autopilot,
            health: HealthMap::new(),
            tick,
            observed: 0,
            metrics,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop issuing commands once `token` is cancelled
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Health map as of the last successful tick
    pub fn health(&self) -> &HealthMap {
        &self.health
    }

    /// Counters so far
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Tick on the configured interval until cancelled
    pub async fn run(mut self) {
        let mut period = self.autopilot.config().reconcile_interval();
        let mut ticker = skip_missed(interval(period));

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.tick(Instant::now()).await {
                if e.is_transient() {
                    tracing::debug!("Tick {} abandoned: {}", self.tick, e);
                } else {
                    tracing::error!("Tick {} failed: {}", self.tick, e);
                }
            }

            let next = self.autopilot.config().reconcile_interval();
            if next != period {
                tracing::info!("Reconcile interval changed {:?} -> {:?}", period, next);
                period = next;
                ticker = skip_missed(interval_at(Instant::now() + period, period));
            }
        }

        tracing::debug!("Reconciler stopped after tick {}", self.tick);
    }

    /// Run one tick evaluated at `now`
    pub async fn tick(&mut self, now: Instant) -> Result<TickReport> {
        let config = self.autopilot.config();
        let timeout = config.call_timeout();

        self.tick += 1;
        self.metrics.ticks += 1;
        self.publish_state(LoopState::Ticking);

        let consensus = Arc::clone(&self.autopilot.consensus);
        let snapshot =
            match deadline("get_configuration", timeout, consensus.get_configuration()).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    if !matches!(e, Error::Timeout { .. }) {
                        self.metrics.snapshot_failures += 1;
                    }
                    return Err(self.abandon(e));
                }
            };

        let metadata = match self.resolve_metadata(&snapshot, timeout).await {
            Ok(metadata) => metadata,
            Err(e) => return Err(self.abandon(e)),
        };

        self.observed += 1;
        self.health =
            HealthMonitor::new(&config).update(&snapshot, &self.health, now, self.observed);

        let proposed = self.autopilot.promoter.decide(&PromoterInput {
            snapshot: &snapshot,
            health: &self.health,
            metadata: &metadata,
            config: &config,
            now,
        });
        let (decision, violations) = validate(&proposed, &snapshot, &self.health, &config);

        for violation in &violations {
            tracing::warn!("Policy violation: {}", violation);
        }
        let blocked = decision.quorum_blocked.len() as u64;
        self.metrics.policy_violations += violations.len() as u64 + blocked;
        self.metrics.quorum_blocked += blocked;

        let mut report = TickReport {
            tick: self.tick,
            decision,
            violations,
            ..TickReport::default()
        };

        let commands = plan(&report.decision, &snapshot);
        if config.disabled {
            if !commands.is_empty() {
                tracing::info!(
                    "Autopilot disabled, not applying {} operations",
                    commands.len()
                );
            }
        } else if !commands.is_empty() {
            self.publish_state(LoopState::Applying);
            self.apply(&commands, snapshot.index, timeout, &mut report).await;
        }

        let tick = self.tick;
        let health = &self.health;
        let metrics = self.metrics.clone();
        let decision = report.decision.clone();
        self.autopilot.status_tx.send_modify(|status| {
            status.observe(&snapshot, health, now);
            status.state = LoopState::Idle;
            status.tick = tick;
            status.enabled = !config.disabled;
            status.last_decision = Some(decision);
            status.metrics = metrics;
        });

        Ok(report)
    }

    async fn resolve_metadata(
        &self,
        snapshot: &ClusterSnapshot,
        timeout: Duration,
    ) -> Result<HashMap<ServerId, ServerMetadata>> {
        let resolver = Arc::clone(&self.autopilot.metadata);
        let mut metadata = HashMap::with_capacity(snapshot.servers.len());
        for server in &snapshot.servers {
            let found = deadline("metadata lookup", timeout, resolver.lookup(&server.id)).await?;
            metadata.insert(server.id.clone(), found);
        }
        Ok(metadata)
    }

    /// Issue commands one at a time, threading the configuration index.
    /// Stops at the first failure or once cancelled.
    async fn apply(
        &mut self,
        commands: &[Command],
        mut prior_index: u64,
        timeout: Duration,
        report: &mut TickReport,
    ) {
        let consensus = Arc::clone(&self.autopilot.consensus);

        for (i, command) in commands.iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::info!(
                    "Reconciler cancelled, skipping {} remaining operations",
                    commands.len() - i
                );
                break;
            }

            let operation = command.to_string();
            let result = deadline(
                &operation,
                timeout,
                consensus::execute(consensus.as_ref(), command, prior_index),
            )
            .await;

            match result {
                Ok(index) => {
                    tracing::info!("Applied {} (configuration index {})", command, index);
                    prior_index = index;
                    self.metrics.commands_issued += 1;
                    report.applied.push(command.clone());
                }
                Err(e) => {
                    self.metrics.apply_failures += 1;
                    if matches!(e, Error::Timeout { .. }) {
                        self.metrics.timeouts += 1;
                    }
                    if e.is_leadership_lost() {
                        tracing::info!("Leadership moved during tick {}", self.tick);
                    }
                    tracing::warn!(
                        "{} failed, dropping {} remaining operations: {}",
                        command,
                        commands.len() - i - 1,
                        e
                    );
                    report.aborted = Some(e.to_string());
                    break;
                }
            }
        }
    }

    fn abandon(&mut self, e: Error) -> Error {
        self.metrics.ticks_abandoned += 1;
        if matches!(e, Error::Timeout { .. }) {
            self.metrics.timeouts += 1;
        }
        tracing::warn!("Abandoning tick {}: {}", self.tick, e);

        let metrics = self.metrics.clone();
        let tick = self.tick;
        self.autopilot.status_tx.send_modify(|status| {
            status.state = LoopState::Idle;
            status.tick = tick;
            status.metrics = metrics;
        });
        e
    }

    fn publish_state(&self, state: LoopState) {
        self.autopilot.status_tx.send_modify(|status| status.state = state);
    }
}

/// Order a decision into commands: promotions, demotions, removals of
/// non-leaders, leadership transfer, then the leader's own demotion or removal
pub fn plan(decision: &Decision, snapshot: &ClusterSnapshot) -> Vec<Command> {
    let leader = snapshot.leader().map(|s| &s.id);
    let is_leader = |id: &ServerId| leader == Some(id);
    let mut commands = Vec::with_capacity(decision.operation_count());

    for id in &decision.promote {
        if let Some(server) = snapshot.get(id) {
            commands.push(Command::AddVoter {
                id: id.clone(),
                address: server.address.clone(),
            });
        }
    }

    for id in decision.demote.iter().filter(|id| !is_leader(id)) {
        commands.push(Command::DemoteVoter { id: id.clone() });
    }

    for id in decision.remove.iter().filter(|id| !is_leader(id)) {
        commands.push(Command::RemoveServer { id: id.clone() });
    }

    if let Some(target) = &decision.transfer_leadership {
        commands.push(Command::TransferLeadership { id: target.clone() });
    }

    for id in decision.demote.iter().filter(|id| is_leader(id)) {
        commands.push(Command::DemoteVoter { id: id.clone() });
    }

    for id in decision.remove.iter().filter(|id| is_leader(id)) {
        commands.push(Command::RemoveServer { id: id.clone() });
    }

    commands
}

fn skip_missed(mut interval: Interval) -> Interval {
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn deadline<T>(
    operation: &str,
    timeout: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            operation: operation.to_string(),
            timeout,
        }),
    }
}
