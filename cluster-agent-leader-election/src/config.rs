//! Leader election configuration using Figment
//!
//! Values are merged in precedence order (later sources override earlier ones):
//! 1. Defaults
//! 2. An optional TOML, YAML or JSON file, chosen by extension
//! 3. Environment variables prefixed with `CLUSTER_AGENT_`, e.g.
//!    `CLUSTER_AGENT_LEADER_LEASE_DURATION=30`

use crate::client::DEFAULT_CLIENT_TIMEOUT;
use crate::error::Result;
use crate::record::DEFAULT_LEASE_NAME;
use cluster_agent_common::retry::{DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY};
use cluster_agent_common::RetryConfig;
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Prefix of the environment variables read by [`ElectionConfig::load`]
pub const ENV_PREFIX: &str = "CLUSTER_AGENT_";

/// Lease duration used when neither configuration nor caller picks one
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(60);

/// Interval between two readiness checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Settings consumed by the leader election engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// Lease duration in seconds, 0 keeps the caller's or the default value
    pub leader_lease_duration: u64,
    /// Candidate identity, the host name when unset
    pub holder_identity: Option<String>,
    /// Name of the shared lease record
    pub lease_name: String,
    /// Namespace of the lease record, the backend's namespace when unset
    pub namespace: Option<String>,
    /// Bound on a single coordination call, in milliseconds
    pub client_timeout_ms: u64,
    /// Interval between readiness checks, in milliseconds
    pub poll_interval_ms: u64,
    /// Initialization attempts before giving up
    pub init_retry_count: u32,
    /// Delay between initialization attempts, in seconds
    pub init_retry_delay_secs: u64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            leader_lease_duration: 0,
            holder_identity: None,
            lease_name: DEFAULT_LEASE_NAME.to_string(),
            namespace: None,
            client_timeout_ms: DEFAULT_CLIENT_TIMEOUT.as_millis() as u64,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            init_retry_count: DEFAULT_RETRY_COUNT,
            init_retry_delay_secs: DEFAULT_RETRY_DELAY.as_secs(),
        }
    }
}

impl ElectionConfig {
    /// Load configuration from defaults, `file` (if any) and the environment
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let config: ElectionConfig = Self::figment(file).extract()?;
        debug!("Loaded election config: {:?}", config);
        Ok(config)
    }

    /// Build the figment used by [`ElectionConfig::load`]
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(ElectionConfig::default()));

        if let Some(path) = file {
            figment = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml") | Some("yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Toml::file(path)),
            };
        }

        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    /// Configured lease duration, `None` when left at 0
    pub fn lease_duration(&self) -> Option<Duration> {
        match self.leader_lease_duration {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Configured candidate identity, `None` when unset or blank
    pub fn holder_identity(&self) -> Option<&str> {
        self.holder_identity
            .as_deref()
            .map(str::trim)
            .filter(|identity| !identity.is_empty())
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// How long a readiness check may wait for a leader
    pub fn readiness_timeout(&self) -> Duration {
        self.client_timeout() * 2
    }

    /// Retry policy for engine initialization
    pub fn init_retry(&self) -> RetryConfig {
        RetryConfig::new("leaderElection")
            .with_retry_count(self.init_retry_count)
            .with_retry_delay(Duration::from_secs(self.init_retry_delay_secs))
    }
}
