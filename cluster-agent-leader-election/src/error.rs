//! Error types for leader election

use cluster_agent_common::RetryError;
use std::io;
use std::time::Duration;

/// Errors reported by a coordination backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The record does not exist
    #[error("Record {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },

    /// A create raced with another writer
    #[error("Record {namespace}/{name} already exists")]
    AlreadyExists { namespace: String, name: String },

    /// An update was based on a stale resource version
    #[error("Record {namespace}/{name} was modified concurrently (expected version {expected}, found {found})")]
    Conflict {
        namespace: String,
        name: String,
        expected: u64,
        found: u64,
    },

    /// The call did not complete within the client timeout
    #[error("Coordination call timed out after {0:?}")]
    Timeout(Duration),

    /// Any other backend failure
    #[error("Coordination backend error: {0}")]
    Backend(String),
}

impl ClientError {
    /// Whether the error means the record is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        ClientError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Backend(err.to_string())
    }
}

/// Errors that can occur during leader election
#[derive(Debug, thiserror::Error)]
pub enum ElectionError {
    /// The local host name could not be resolved
    #[error("Cannot get hostname: {0}")]
    Hostname(#[source] io::Error),

    /// The coordination backend client could not be obtained or failed
    #[error("Coordination client error: {0}")]
    Client(#[from] ClientError),

    /// Looking up the existing lease record failed
    #[error("Cannot retrieve {namespace}/{name}: {source}")]
    RecordLookup {
        namespace: String,
        name: String,
        #[source]
        source: ClientError,
    },

    /// The election state machine could not be constructed
    #[error("Could not initialize the leader election process: {0}")]
    ElectorSetup(String),

    /// No leader was observed within the readiness window
    #[error("Leader election still not running, timeout after {timeout:?}")]
    NotRunning { timeout: Duration },

    /// Engine initialization has not succeeded
    #[error("Leader engine initialization failed: {0}")]
    Init(#[from] RetryError),

    /// The lease record does not exist
    #[error("Leader election record {namespace}/{name} not found")]
    RecordNotFound { namespace: String, name: String },

    /// The lease record exists but carries no election annotation
    #[error("Annotation {key} not found on {namespace}/{name}")]
    AnnotationMissing {
        namespace: String,
        name: String,
        key: String,
    },

    /// The election annotation is not a valid leader election record
    #[error("Malformed leader election record: {0}")]
    Decode(#[from] serde_json::Error),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),
}

impl ElectionError {
    /// Whether the error means there is no leader election record to read
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ElectionError::RecordNotFound { .. } | ElectionError::AnnotationMissing { .. }
        )
    }

    /// Whether the error is the readiness timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, ElectionError::NotRunning { .. })
    }
}

impl From<figment::Error> for ElectionError {
    fn from(err: figment::Error) -> Self {
        ElectionError::Config(Box::new(err))
    }
}

/// Result type for election operations
pub type Result<T> = std::result::Result<T, ElectionError>;
