//! Lease-based leader election for cluster-scoped agent work.
//!
//! Among N replicas of the agent, exactly one should poll the central API
//! and emit cluster-level metrics. This crate decides *who* does it: every
//! replica competes for a shared lease record, and the winner is the leader
//! until it fails to renew.
//!
//! # Overview
//!
//! - **Engine**: [`LeaderEngine`] launches the election run loop once,
//!   waits a bounded time for a first leader observation, then answers
//!   [`LeaderEngine::is_leader`] and [`LeaderEngine::current_leader_name`]
//!   without blocking
//! - **Provider**: [`EngineProvider`] builds the engine lazily, retrying the
//!   initialization a bounded number of times
//! - **Backends**: anything implementing [`CoordinationBackend`];
//!   [`MemoryStore`] and [`FileStore`] ship with the crate
//! - **Diagnostics**: [`get_leader_details`] decodes the lease record
//!   directly, independent of any engine
//!
//! # Example
//!
//! ```ignore
//! use cluster_agent_leader_election::{
//!     ElectionConfig, EngineProvider, FileStore, LeaseElectorFactory,
//! };
//! use std::sync::Arc;
//!
//! let provider = EngineProvider::new(
//!     ElectionConfig::load(None)?,
//!     Arc::new(FileStore::new("/var/run/cluster-agent", "default")),
//!     Arc::new(LeaseElectorFactory),
//! );
//!
//! let engine = provider.get_engine().await?;
//! engine.ensure_election_runs().await?;
//!
//! if engine.is_leader() {
//!     // run cluster-scoped checks
//! }
//! ```

pub mod client;
pub mod config;
pub mod elector;
pub mod engine;
mod error;
pub mod provider;
pub mod record;
pub mod store;

pub use client::{BoundedClient, CoordinationBackend, CoordinationClient, CoordinationRecord};
pub use config::{ElectionConfig, DEFAULT_LEASE_DURATION};
pub use elector::{
    Elector, ElectorFactory, ElectorParams, LeaderEvent, LeaderEventSender, LeaseElector,
    LeaseElectorFactory,
};
pub use engine::{EngineSettings, HolderState, LeaderEngine, Lifecycle};
pub use error::{ClientError, ElectionError, Result};
pub use provider::{local_hostname, EngineProvider};
pub use record::{
    decode_leader_record, get_leader_details, get_leader_details_in, LeaderElectionRecord,
    DEFAULT_LEASE_NAME, LEADER_ELECTION_RECORD_ANNOTATION_KEY,
};
pub use store::{FileStore, MemoryStore};
