//! Logging utilities for the cluster agent
//!
//! This module provides the tracing bootstrap used by the binaries and a
//! helper for formatting structured values in log messages.

use serde::Serialize;
use std::fmt::Debug;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset and debug output is not requested.
///
/// Only the workspace crates log at info; everything else is kept at warn so
/// chatty dependencies stay quiet.
pub const DEFAULT_FILTER: &str = "warn,cluster_agent=info,cluster_agent_leader_election=info,cluster_agent_common=info";

/// Filter used when debug output is requested
pub const DEBUG_FILTER: &str =
    "warn,cluster_agent=debug,cluster_agent_leader_election=debug,cluster_agent_common=debug";

/// Install the global tracing subscriber, writing to stderr.
///
/// `RUST_LOG` wins over the defaults unless `debug` is set. Calling this more
/// than once is harmless: later calls leave the first subscriber in place.
pub fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new(DEBUG_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(debug)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Wrapper for pretty-printing types in logs as YAML
///
/// ```ignore
/// use cluster_agent_common::Pretty;
/// use tracing::info;
///
/// info!("Election config: {}", Pretty(&config));
/// ```
///
/// Outputs YAML with a leading newline. Debug is used as a fallback if YAML
/// serialization fails.
pub struct Pretty<T>(pub T);

impl<T: Serialize + Debug> std::fmt::Display for Pretty<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_yaml_ng::to_string(&self.0) {
            Ok(yaml) => write!(f, "\n{}", yaml),
            Err(_) => write!(f, "\n{:#?}", self.0),
        }
    }
}

impl<T: Serialize + Debug> std::fmt::Debug for Pretty<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}
