//! Coordination backend boundary
//!
//! The engine never talks to a store directly. It asks a
//! [`CoordinationBackend`] for a [`CoordinationClient`] and reads or writes
//! named, namespaced [`CoordinationRecord`]s through it. Writes are
//! compare-and-swap on the record's resource version.

use crate::error::ClientError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default bound on a single coordination call
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(2);

/// A named record in the coordination store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinationRecord {
    pub namespace: String,
    pub name: String,
    /// Bumped by the store on every successful write
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl CoordinationRecord {
    /// Create an empty record that has never been stored
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            resource_version: 0,
            annotations: BTreeMap::new(),
        }
    }

    /// Set an annotation, builder style
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Look up an annotation
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

/// Namespaced record access against the coordination store
#[async_trait]
pub trait CoordinationClient: Send + Sync + fmt::Debug {
    /// Fetch a record, `ClientError::NotFound` if it does not exist
    async fn get(&self, namespace: &str, name: &str)
        -> Result<CoordinationRecord, ClientError>;

    /// Store a new record, `ClientError::AlreadyExists` if the name is taken
    async fn create(&self, record: CoordinationRecord) -> Result<CoordinationRecord, ClientError>;

    /// Replace a record whose stored version equals `record.resource_version`,
    /// `ClientError::Conflict` otherwise
    async fn update(&self, record: CoordinationRecord) -> Result<CoordinationRecord, ClientError>;
}

/// Source of coordination clients and of the namespace the agent's records live in
#[async_trait]
pub trait CoordinationBackend: Send + Sync {
    /// Obtain a client for the coordination store
    async fn client(&self) -> Result<Arc<dyn CoordinationClient>, ClientError>;

    /// Namespace holding the agent's shared records
    fn resources_namespace(&self) -> String;
}

/// Client wrapper that caps every call at a fixed timeout
#[derive(Debug, Clone)]
pub struct BoundedClient {
    inner: Arc<dyn CoordinationClient>,
    timeout: Duration,
}

impl BoundedClient {
    pub fn new(inner: Arc<dyn CoordinationClient>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl CoordinationClient for BoundedClient {
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<CoordinationRecord, ClientError> {
        tokio::time::timeout(self.timeout, self.inner.get(namespace, name))
            .await
            .map_err(|_| ClientError::Timeout(self.timeout))?
    }

    async fn create(&self, record: CoordinationRecord) -> Result<CoordinationRecord, ClientError> {
        tokio::time::timeout(self.timeout, self.inner.create(record))
            .await
            .map_err(|_| ClientError::Timeout(self.timeout))?
    }

    async fn update(&self, record: CoordinationRecord) -> Result<CoordinationRecord, ClientError> {
        tokio::time::timeout(self.timeout, self.inner.update(record))
            .await
            .map_err(|_| ClientError::Timeout(self.timeout))?
    }
}
