//! State Module
//!
//! Server snapshots, health tracking, and deployment metadata.

mod server;
mod health;
mod metadata;

pub use server::{ServerId, ServerState, ClusterSnapshot};
pub use health::{Health, HealthMap, HealthMonitor};
pub use metadata::{ServerMetadata, MetadataResolver, StaticMetadataResolver};
