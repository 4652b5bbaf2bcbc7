//! WolfPilot Error Types

use std::time::Duration;
use thiserror::Error;

/// Result type alias for WolfPilot operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfPilot error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Consensus errors
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Apply failed for {operation}: {reason}")]
    Apply { operation: String, reason: String },

    #[error("Not leader")]
    NotLeader,

    #[error("Server not found: {0}")]
    ServerNotFound(String),

    // Metadata errors
    #[error("Metadata lookup failed for {id}: {reason}")]
    Metadata { id: String, reason: String },

    // Deadline errors
    #[error("{operation} timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Check if this error is expected to clear up on its own by the next tick
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Snapshot(_)
                | Error::Timeout { .. }
                | Error::NotLeader
                | Error::Metadata { .. }
                | Error::Apply { .. }
        )
    }

    /// Check if this error means the caller no longer holds leadership
    pub fn is_leadership_lost(&self) -> bool {
        matches!(self, Error::NotLeader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Snapshot("gone".into()).is_transient());
        assert!(Error::NotLeader.is_transient());
        assert!(Error::Timeout {
            operation: "get_configuration".into(),
            timeout: Duration::from_secs(1),
        }
        .is_transient());
        assert!(!Error::Config("bad".into()).is_transient());
        assert!(!Error::ServerNotFound("s9".into()).is_transient());
    }

    #[test]
    fn test_leadership_lost() {
        assert!(Error::NotLeader.is_leadership_lost());
        assert!(!Error::Snapshot("x".into()).is_leadership_lost());
    }
}
