//! Error types for nb-dns.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in the records store, the DNS engine and the supervisor.
#[derive(Debug, Error)]
pub enum DnsError {
    /// Record failed validation (bad name, domain, type or value).
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// No record stored under the given domain and name.
    #[error("record not found: {name}.{domain}")]
    NotFound {
        /// Domain that was looked up.
        domain: String,
        /// Name within the domain.
        name: String,
    },

    /// Reading, locking or writing the snapshot file failed.
    #[error("persistence failure on {}: {source}", path.display())]
    Persistence {
        /// Snapshot path involved.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The snapshot file exists but does not decode.
    #[error("malformed records snapshot {}: {source}", path.display())]
    Snapshot {
        /// Snapshot path involved.
        path: PathBuf,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },

    /// A child process could not be launched.
    #[error("failed to start {name}: {source}")]
    ProcessStart {
        /// Logical process name.
        name: String,
        /// Spawn error.
        #[source]
        source: io::Error,
    },

    /// A supervised process exited outside of a requested shutdown.
    #[error("{name} exited unexpectedly: {status}")]
    UnexpectedExit {
        /// Logical process name.
        name: String,
        /// Exit status description.
        status: String,
    },

    /// The supervisor was cancelled and refuses new launches.
    #[error("supervisor is shutting down")]
    ShuttingDown,

    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// DNS protocol error
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),

    /// Failed to parse address
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

impl DnsError {
    pub(crate) fn not_found(domain: &str, name: &str) -> Self {
        Self::NotFound {
            domain: domain.to_string(),
            name: name.to_string(),
        }
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    /// True for the persistence class (disk, lock or decode failures).
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence { .. } | Self::Snapshot { .. })
    }
}
