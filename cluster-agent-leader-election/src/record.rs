//! Leader election record carried by the shared coordination record
//!
//! The election primitive stores its state as a JSON document in a
//! well-known annotation of the lease record. [`get_leader_details`] reads it
//! back for status and diagnostic tooling without touching any engine.

use crate::client::{CoordinationBackend, CoordinationRecord};
use crate::error::{ElectionError, Result};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Annotation key holding the JSON leader election record
pub const LEADER_ELECTION_RECORD_ANNOTATION_KEY: &str = "control-plane.alpha.kubernetes.io/leader";

/// Default name of the shared lease record
pub const DEFAULT_LEASE_NAME: &str = "datadog-leader-election";

/// State of a leader election as written by the election primitive
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderElectionRecord {
    /// Identity of the current holder, empty once released
    #[serde(default)]
    pub holder_identity: String,
    /// How long the holder's lease is valid after each renewal
    #[serde(default)]
    pub lease_duration_seconds: u64,
    /// When the current holder acquired the lease
    #[serde(default)]
    pub acquire_time: Option<DateTime<Utc>>,
    /// When the current holder last renewed the lease
    #[serde(default)]
    pub renew_time: Option<DateTime<Utc>>,
    /// Number of times leadership changed hands
    #[serde(default)]
    pub leader_transitions: u32,
}

impl LeaderElectionRecord {
    /// Moment the lease lapses unless renewed
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let seconds = i64::try_from(self.lease_duration_seconds).ok()?;
        self.renew_time?
            .checked_add_signed(TimeDelta::try_seconds(seconds)?)
    }

    /// Whether the lease has lapsed at `now`. A record that was never
    /// renewed counts as expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Some(expires_at) => expires_at <= now,
            None => true,
        }
    }
}

/// Decode the leader election record stored in `record`'s annotation
pub fn decode_leader_record(record: &CoordinationRecord) -> Result<LeaderElectionRecord> {
    let annotation = record
        .annotation(LEADER_ELECTION_RECORD_ANNOTATION_KEY)
        .ok_or_else(|| ElectionError::AnnotationMissing {
            namespace: record.namespace.clone(),
            name: record.name.clone(),
            key: LEADER_ELECTION_RECORD_ANNOTATION_KEY.to_string(),
        })?;
    Ok(serde_json::from_str(annotation)?)
}

pub(crate) fn encode_leader_record(record: &LeaderElectionRecord) -> Result<String> {
    Ok(serde_json::to_string(record)?)
}

/// Fetch and decode the leader election record at its default location
pub async fn get_leader_details(
    backend: &dyn CoordinationBackend,
) -> Result<LeaderElectionRecord> {
    let namespace = backend.resources_namespace();
    get_leader_details_in(backend, &namespace, DEFAULT_LEASE_NAME).await
}

/// Fetch and decode the leader election record stored in `namespace/name`
pub async fn get_leader_details_in(
    backend: &dyn CoordinationBackend,
    namespace: &str,
    name: &str,
) -> Result<LeaderElectionRecord> {
    let client = backend.client().await?;
    let record = client.get(namespace, name).await.map_err(|e| {
        if e.is_not_found() {
            ElectionError::RecordNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }
        } else {
            ElectionError::Client(e)
        }
    })?;
    debug!(
        "Leader election record {}/{} at version {}",
        namespace, name, record.resource_version
    );
    decode_leader_record(&record)
}
