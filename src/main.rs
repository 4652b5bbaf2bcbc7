//! WolfPilot - Raft Membership Autopilot
//!
//! Command-line front end: configuration scaffolding and validation, plus a
//! simulator that drives the reconciliation loop against an in-memory
//! cluster.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfpilot::autopilot::{Autopilot, Reconciler};
use wolfpilot::config::WolfPilotConfig;
use wolfpilot::consensus::InMemoryConsensus;
use wolfpilot::error::{Error, Result};
use wolfpilot::state::{ServerId, ServerState, StaticMetadataResolver};

/// WolfPilot - Raft Membership Autopilot
#[derive(Parser)]
#[command(name = "wolfpilot")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfpilot.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error), overrides [logging] level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Log format (pretty, json), overrides [logging] format
    #[arg(long)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfpilot.toml")]
        output: PathBuf,

        /// Node ID
        #[arg(long, default_value = "server-1")]
        node_id: String,
    },

    /// Validate configuration file
    Validate,

    /// Show effective autopilot settings
    Info,

    /// Run the autopilot against the simulated cluster in the config file
    Simulate {
        /// Number of ticks (overrides simulation.ticks)
        #[arg(short, long)]
        ticks: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging, preferring flags over the config file
    let logging = WolfPilotConfig::from_file(&cli.config)
        .map(|c| c.logging)
        .unwrap_or_default();
    init_logging(
        cli.log_level.as_deref().unwrap_or(&logging.level),
        cli.log_format.as_deref().unwrap_or(&logging.format),
    );

    match cli.command {
        Commands::Init { output, node_id } => run_init(output, node_id),
        Commands::Validate => run_validate(cli.config),
        Commands::Info => run_info(cli.config),
        Commands::Simulate { ticks } => run_simulate(cli.config, ticks).await,
    }
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Create configuration file
fn run_init(output: PathBuf, node_id: String) -> Result<()> {
    let config_content = format!(r#"# WolfPilot Configuration
# Generated configuration file

[node]
id = "{node_id}"

[autopilot]
last_contact_threshold_ms = 200
server_stabilization_time_ms = 10000
dead_server_timeout_ms = 30000
min_quorum = 3
# max_voters = 5
max_trailing_logs = 250
max_term_lag = 1
cleanup_dead_servers = true
health_grace_ticks = 3
reconcile_interval_ms = 2000
call_timeout_ms = 5000
redundancy_zone_key = "zone"
upgrade_version_key = "build"
policy = "default"
upgrade_migration = false
suspend_promotions = false
disabled = false

# [metadata.servers.{node_id}]
# version = "1.0.0"
# zone = "zone-a"

[simulation]
ticks = 20

[[simulation.servers]]
id = "{node_id}"
address = "127.0.0.1:8300"
voter = true
leader = true

[[simulation.servers]]
id = "server-2"
address = "127.0.0.1:8301"
voter = true

[[simulation.servers]]
id = "server-3"
address = "127.0.0.1:8302"
voter = true

[[simulation.servers]]
id = "server-4"
address = "127.0.0.1:8303"

[logging]
level = "info"
format = "pretty"
"#);

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the thresholds and simulated cluster to taste.");
    println!("Then try: wolfpilot --config {} simulate", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match WolfPilotConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Node ID: {}", config.node.id);
            println!("  Policy: {}", config.autopilot.policy);
            println!("  Min Quorum: {}", config.autopilot.min_quorum);
            println!(
                "  Max Voters: {}",
                config
                    .autopilot
                    .max_voters
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "(unlimited)".to_string())
            );
            println!("  Simulated Servers: {}", config.simulation.servers.len());
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show autopilot information
fn run_info(config_path: PathBuf) -> Result<()> {
    let config = WolfPilotConfig::from_file(&config_path)?;
    let autopilot = &config.autopilot;

    println!("WolfPilot Node Information");
    println!("==========================");
    println!();
    println!("Node ID:            {}", config.node.id);
    println!("Policy:             {}", autopilot.policy);
    println!("Enabled:            {}", !autopilot.disabled);
    println!();
    println!("Health Thresholds:");
    println!("  Last Contact:     {:?}", autopilot.last_contact_threshold());
    println!("  Max Trailing:     {} entries", autopilot.max_trailing_logs);
    println!("  Max Term Lag:     {}", autopilot.max_term_lag);
    println!("  Stabilization:    {:?}", autopilot.server_stabilization_time());
    println!("  Dead Timeout:     {:?}", autopilot.dead_server_timeout());
    println!();
    println!("Membership:");
    println!("  Min Quorum:       {}", autopilot.min_quorum);
    println!("  Max Voters:       {:?}", autopilot.max_voters);
    println!("  Cleanup Dead:     {}", autopilot.cleanup_dead_servers);
    println!("  Zone Key:         {}", autopilot.redundancy_zone_key);
    println!("  Version Key:      {}", autopilot.upgrade_version_key);
    println!();
    println!("Loop:");
    println!("  Interval:         {:?}", autopilot.reconcile_interval());
    println!("  Call Timeout:     {:?}", autopilot.call_timeout());
    println!("  Metadata Entries: {}", config.metadata.servers.len());

    Ok(())
}

/// Drive the reconciliation loop over the simulated cluster
async fn run_simulate(config_path: PathBuf, ticks: Option<u64>) -> Result<()> {
    let config = WolfPilotConfig::from_file(&config_path)?;
    let ticks = ticks.unwrap_or(config.simulation.ticks);

    // Commands are only accepted from the leader, so act as the simulated leader
    let local_id = config
        .simulation
        .servers
        .iter()
        .find(|s| s.leader)
        .map(|s| s.id.clone())
        .unwrap_or_else(|| {
            tracing::warn!("Simulated cluster has no leader, no commands will be applied");
            config.node.id.clone()
        });

    let start = Instant::now();
    let consensus = Arc::new(InMemoryConsensus::new(local_id.as_str()));
    for server in &config.simulation.servers {
        consensus
            .add_server(
                ServerState::new(server.id.as_str(), server.address.clone())
                    .with_voter(server.voter)
                    .with_leader(server.leader)
                    .with_last_contact(start),
            )
            .await;
    }

    let resolver = Arc::new(StaticMetadataResolver::from_config(&config.metadata));
    let autopilot = Arc::new(Autopilot::from_config(
        consensus.clone(),
        resolver,
        config.autopilot.clone(),
    )?);
    let mut reconciler = Reconciler::new(Arc::clone(&autopilot));

    let healthy: Vec<ServerId> = config
        .simulation
        .servers
        .iter()
        .filter(|s| s.healthy)
        .map(|s| ServerId::new(s.id.clone()))
        .collect();

    tracing::info!(
        "Simulating {} ticks over {} servers with {} policy",
        ticks,
        config.simulation.servers.len(),
        autopilot.policy()
    );

    let interval = config.autopilot.reconcile_interval();
    for i in 0..ticks {
        let now = simulated_now(start, interval, i)?;
        for id in &healthy {
            consensus.touch(id, now).await;
        }

        match reconciler.tick(now).await {
            Ok(report) => {
                for command in &report.applied {
                    println!("tick {:>3}: {}", report.tick, command);
                }
                if let Some(reason) = &report.aborted {
                    println!("tick {:>3}: aborted ({})", report.tick, reason);
                }
            }
            Err(e) => println!("tick {:>3}: abandoned ({})", i + 1, e),
        }
    }

    println!("{}", serde_json::to_string_pretty(&autopilot.status())?);
    Ok(())
}

/// Simulated clock reading for tick `i`
fn simulated_now(start: Instant, interval: Duration, i: u64) -> Result<Instant> {
    u32::try_from(i)
        .ok()
        .and_then(|i| interval.checked_mul(i))
        .and_then(|offset| start.checked_add(offset))
        .ok_or_else(|| {
            Error::Config(format!(
                "simulation tick {} at {:?} per tick overflows the clock",
                i, interval
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_now() {
        let start = Instant::now();
        let interval = Duration::from_secs(2);
        assert_eq!(simulated_now(start, interval, 0).unwrap(), start);
        assert_eq!(
            simulated_now(start, interval, 5).unwrap(),
            start + Duration::from_secs(10)
        );
    }

    #[test]
    fn test_simulated_now_rejects_overflow() {
        let start = Instant::now();
        assert!(matches!(
            simulated_now(start, Duration::from_secs(2), u64::MAX),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            simulated_now(start, Duration::from_millis(u64::MAX), 3),
            Err(Error::Config(_))
        ));
    }
}
