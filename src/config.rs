//! WolfPilot Configuration
//!
//! This module provides configuration structures for the WolfPilot
//! membership autopilot.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Main WolfPilot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfPilotConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Autopilot thresholds and policy selection
    #[serde(default)]
    pub autopilot: AutopilotConfig,

    /// Static server metadata
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Seed cluster for the `simulate` command
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Identifier of the server this autopilot instance runs beside
    pub id: String,
}

/// Promotion policy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Stability-gated promotion with quorum-safe cleanup
    #[default]
    Default,
    /// Spread voters across redundancy zones first
    ZoneAware,
    /// Honor upgrade migration and promotion suspension flags
    UpgradeGated,
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyKind::Default => write!(f, "default"),
            PolicyKind::ZoneAware => write!(f, "zone_aware"),
            PolicyKind::UpgradeGated => write!(f, "upgrade_gated"),
        }
    }
}

/// Autopilot (operator) configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutopilotConfig {
    /// Maximum tolerated follower contact age before a server is unhealthy
    #[serde(default = "default_last_contact_threshold_ms")]
    pub last_contact_threshold_ms: u64,

    /// Minimum continuous healthy duration before promotion
    #[serde(default = "default_server_stabilization_time_ms")]
    pub server_stabilization_time_ms: u64,

    /// Continuous unhealthy duration before removal eligibility
    #[serde(default = "default_dead_server_timeout_ms")]
    pub dead_server_timeout_ms: u64,

    /// Floor on voter count
    #[serde(default = "default_min_quorum")]
    pub min_quorum: usize,

    /// Optional cap on voter count
    #[serde(default)]
    pub max_voters: Option<usize>,

    /// Log entries a server may trail the leader by and stay healthy (0 disables)
    #[serde(default = "default_max_trailing_logs")]
    pub max_trailing_logs: u64,

    /// Terms a server may trail the leader by and stay healthy
    #[serde(default = "default_max_term_lag")]
    pub max_term_lag: u64,

    /// Remove dead servers (true) or only demote dead voters (false)
    #[serde(default = "default_true")]
    pub cleanup_dead_servers: bool,

    /// Ticks a vanished server's health record is retained for
    #[serde(default = "default_health_grace_ticks")]
    pub health_grace_ticks: u64,

    /// Reconciliation tick period in milliseconds
    #[serde(default = "default_reconcile_interval_ms")]
    pub reconcile_interval_ms: u64,

    /// Deadline for each consensus or metadata call in milliseconds
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Metadata tag naming a server's redundancy zone
    #[serde(default = "default_redundancy_zone_key")]
    pub redundancy_zone_key: String,

    /// Metadata tag naming a server's build version
    #[serde(default = "default_upgrade_version_key")]
    pub upgrade_version_key: String,

    /// Promotion policy
    #[serde(default)]
    pub policy: PolicyKind,

    /// Sanction promotion of servers running a newer version
    #[serde(default)]
    pub upgrade_migration: bool,

    /// Hold all promotions (canary gate)
    #[serde(default)]
    pub suspend_promotions: bool,

    /// Observe only, never issue membership commands
    #[serde(default, alias = "autopilot_disabled")]
    pub disabled: bool,
}

/// Static metadata, keyed by server id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Per-server metadata
    #[serde(default)]
    pub servers: HashMap<String, ServerMetadataConfig>,
}

/// Metadata for a single server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerMetadataConfig {
    /// Build version
    #[serde(default)]
    pub version: String,

    /// Redundancy zone
    #[serde(default)]
    pub zone: String,

    /// Free-form tags
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Seed cluster for the `simulate` command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of ticks to run
    #[serde(default = "default_simulation_ticks")]
    pub ticks: u64,

    /// Servers in the simulated cluster
    #[serde(default)]
    pub servers: Vec<SimulatedServer>,
}

/// A server in the simulated cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedServer {
    /// Server id
    pub id: String,

    /// Server address
    pub address: String,

    /// Starts as a voter
    #[serde(default)]
    pub voter: bool,

    /// Starts as the leader
    #[serde(default)]
    pub leader: bool,

    /// Keeps contacting the leader
    #[serde(default = "default_true")]
    pub healthy: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_last_contact_threshold_ms() -> u64 {
    200
}

fn default_server_stabilization_time_ms() -> u64 {
    10_000
}

fn default_dead_server_timeout_ms() -> u64 {
    30_000
}

fn default_min_quorum() -> usize {
    3
}

fn default_max_trailing_logs() -> u64 {
    250
}

fn default_max_term_lag() -> u64 {
    1
}

fn default_health_grace_ticks() -> u64 {
    3
}

fn default_reconcile_interval_ms() -> u64 {
    2_000
}

fn default_call_timeout_ms() -> u64 {
    5_000
}

fn default_redundancy_zone_key() -> String {
    "zone".to_string()
}

fn default_upgrade_version_key() -> String {
    "build".to_string()
}

fn default_simulation_ticks() -> u64 {
    20
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self {
            last_contact_threshold_ms: default_last_contact_threshold_ms(),
            server_stabilization_time_ms: default_server_stabilization_time_ms(),
            dead_server_timeout_ms: default_dead_server_timeout_ms(),
            min_quorum: default_min_quorum(),
            max_voters: None,
            max_trailing_logs: default_max_trailing_logs(),
            max_term_lag: default_max_term_lag(),
            cleanup_dead_servers: true,
            health_grace_ticks: default_health_grace_ticks(),
            reconcile_interval_ms: default_reconcile_interval_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            redundancy_zone_key: default_redundancy_zone_key(),
            upgrade_version_key: default_upgrade_version_key(),
            policy: PolicyKind::Default,
            upgrade_migration: false,
            suspend_promotions: false,
            disabled: false,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            ticks: default_simulation_ticks(),
            servers: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl AutopilotConfig {
    /// Validate thresholds. Rejected configurations never replace a running one.
    pub fn validate(&self) -> crate::Result<()> {
        if self.last_contact_threshold_ms == 0 {
            return Err(crate::Error::Config(
                "autopilot.last_contact_threshold_ms must be greater than zero".into(),
            ));
        }

        if self.reconcile_interval_ms == 0 {
            return Err(crate::Error::Config(
                "autopilot.reconcile_interval_ms must be greater than zero".into(),
            ));
        }

        if self.call_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "autopilot.call_timeout_ms must be greater than zero".into(),
            ));
        }

        if self.min_quorum == 0 {
            return Err(crate::Error::Config(
                "autopilot.min_quorum must be at least 1".into(),
            ));
        }

        if let Some(max) = self.max_voters {
            if max < self.min_quorum {
                return Err(crate::Error::Config(format!(
                    "autopilot.max_voters ({}) cannot be below min_quorum ({})",
                    max, self.min_quorum
                )));
            }
        }

        if self.dead_server_timeout_ms < self.last_contact_threshold_ms {
            return Err(crate::Error::Config(format!(
                "autopilot.dead_server_timeout_ms ({}) cannot be below last_contact_threshold_ms ({})",
                self.dead_server_timeout_ms, self.last_contact_threshold_ms
            )));
        }

        if self.redundancy_zone_key.is_empty() || self.upgrade_version_key.is_empty() {
            return Err(crate::Error::Config(
                "autopilot metadata keys cannot be empty".into(),
            ));
        }

        Ok(())
    }

    /// Get last contact threshold as Duration
    pub fn last_contact_threshold(&self) -> Duration {
        Duration::from_millis(self.last_contact_threshold_ms)
    }

    /// Get server stabilization time as Duration
    pub fn server_stabilization_time(&self) -> Duration {
        Duration::from_millis(self.server_stabilization_time_ms)
    }

    /// Get dead server timeout as Duration
    pub fn dead_server_timeout(&self) -> Duration {
        Duration::from_millis(self.dead_server_timeout_ms)
    }

    /// Get reconcile interval as Duration
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    /// Get per-call timeout as Duration
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl WolfPilotConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfPilotConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.id.is_empty() {
            return Err(crate::Error::Config("node.id cannot be empty".into()));
        }

        self.autopilot.validate()?;

        let leaders = self.simulation.servers.iter().filter(|s| s.leader).count();
        if leaders > 1 {
            return Err(crate::Error::Config(
                "simulation.servers may mark at most one leader".into(),
            ));
        }
        if let Some(leader) = self.simulation.servers.iter().find(|s| s.leader) {
            if !leader.voter {
                return Err(crate::Error::Config(format!(
                    "simulation leader {} must be a voter",
                    leader.id
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[node]
id = "server-1"

[autopilot]
last_contact_threshold_ms = 500
server_stabilization_time_ms = 10000
dead_server_timeout_ms = 60000
min_quorum = 3
max_voters = 5
policy = "zone_aware"
redundancy_zone_key = "az"

[metadata.servers.server-2]
version = "1.4.0"
zone = "us-east-1a"

[[simulation.servers]]
id = "server-1"
address = "10.0.0.1:8300"
voter = true
leader = true
"#;

        let config = WolfPilotConfig::from_str(toml).unwrap();
        assert_eq!(config.node.id, "server-1");
        assert_eq!(config.autopilot.policy, PolicyKind::ZoneAware);
        assert_eq!(config.autopilot.max_voters, Some(5));
        assert_eq!(config.autopilot.redundancy_zone_key, "az");
        assert_eq!(config.autopilot.upgrade_version_key, "build");
        assert_eq!(config.autopilot.last_contact_threshold(), Duration::from_millis(500));
        assert_eq!(config.metadata.servers["server-2"].zone, "us-east-1a");
        assert_eq!(config.simulation.servers.len(), 1);
        assert!(config.simulation.servers[0].healthy);
    }

    #[test]
    fn test_defaults() {
        let config = WolfPilotConfig::from_str("[node]\nid = \"n1\"\n").unwrap();
        assert_eq!(config.autopilot, AutopilotConfig::default());
        assert_eq!(config.autopilot.server_stabilization_time(), Duration::from_secs(10));
        assert_eq!(config.logging.level, "info");
        assert!(!config.autopilot.disabled);
    }

    #[test]
    fn test_autopilot_disabled_alias() {
        let config = WolfPilotConfig::from_str(
            "[node]\nid = \"n1\"\n[autopilot]\nautopilot_disabled = true\n",
        )
        .unwrap();
        assert!(config.autopilot.disabled);
    }

    #[test]
    fn test_rejects_invalid_thresholds() {
        let mut config = AutopilotConfig::default();
        config.min_quorum = 0;
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));

        let mut config = AutopilotConfig::default();
        config.max_voters = Some(2);
        assert!(config.validate().is_err());

        let mut config = AutopilotConfig::default();
        config.dead_server_timeout_ms = 10;
        assert!(config.validate().is_err());

        let mut config = AutopilotConfig::default();
        config.redundancy_zone_key.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_policy() {
        let result = WolfPilotConfig::from_str(
            "[node]\nid = \"n1\"\n[autopilot]\npolicy = \"round_robin\"\n",
        );
        assert!(matches!(result, Err(crate::Error::ConfigParse(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[node]\nid = \"server-7\"\n[autopilot]\nmin_quorum = 5").unwrap();

        let config = WolfPilotConfig::from_file(file.path()).unwrap();
        assert_eq!(config.node.id, "server-7");
        assert_eq!(config.autopilot.min_quorum, 5);
    }
}
