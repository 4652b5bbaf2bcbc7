//! Server Metadata
//!
//! Deployment metadata (build version, redundancy zone, tags) consumed by
//! promotion policies.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::config::MetadataConfig;
use crate::error::Result;
use crate::state::ServerId;

/// Deployment metadata for one server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMetadata {
    /// Build version
    pub version: String,
    /// Redundancy zone
    pub zone: String,
    /// Free-form tags
    pub tags: BTreeMap<String, String>,
}

impl ServerMetadata {
    /// Create metadata with a version and zone
    pub fn new(version: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            zone: zone.into(),
            tags: BTreeMap::new(),
        }
    }

    /// Add a tag
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Zone under the configured key, falling back to the zone field
    pub fn zone_for<'a>(&'a self, key: &str) -> &'a str {
        self.tags.get(key).map(String::as_str).unwrap_or(self.zone.as_str())
    }

    /// Version under the configured key, falling back to the version field
    pub fn version_for<'a>(&'a self, key: &str) -> &'a str {
        self.tags.get(key).map(String::as_str).unwrap_or(self.version.as_str())
    }
}

/// Resolves server ids to deployment metadata
#[async_trait::async_trait]
pub trait MetadataResolver: Send + Sync {
    /// Look up metadata. Unknown ids resolve to `ServerMetadata::default()`.
    async fn lookup(&self, id: &ServerId) -> Result<ServerMetadata>;
}

/// Resolver backed by a fixed table
#[derive(Debug, Clone, Default)]
pub struct StaticMetadataResolver {
    servers: HashMap<ServerId, ServerMetadata>,
}

impl StaticMetadataResolver {
    /// Create an empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a resolver from the `[metadata]` configuration section
    pub fn from_config(config: &MetadataConfig) -> Self {
        let servers = config
            .servers
            .iter()
            .map(|(id, meta)| {
                (
                    ServerId::new(id.clone()),
                    ServerMetadata {
                        version: meta.version.clone(),
                        zone: meta.zone.clone(),
                        tags: meta.tags.clone(),
                    },
                )
            })
            .collect();
        Self { servers }
    }

    /// Add or replace one server's metadata
    #[must_use]
    pub fn with_server(mut self, id: impl Into<ServerId>, metadata: ServerMetadata) -> Self {
        self.servers.insert(id.into(), metadata);
        self
    }
}

#[async_trait::async_trait]
impl MetadataResolver for StaticMetadataResolver {
    async fn lookup(&self, id: &ServerId) -> Result<ServerMetadata> {
        Ok(self.servers.get(id).cloned().unwrap_or_default())
    }
}
