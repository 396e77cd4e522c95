//! CLI definition for the cluster agent command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Default interval between two leadership reports of `run`, in seconds
pub const DEFAULT_REPORT_INTERVAL_SECS: u64 = 10;

/// Cluster agent - leader election for cluster-scoped checks
///
/// Every replica pointed at the same store competes for one lease; the
/// holder runs the cluster-level work.
#[derive(Parser, Debug)]
#[command(name = "cluster-agent")]
#[command(version)]
#[command(about = "Cluster agent - leader election for cluster-scoped checks")]
pub struct Cli {
    /// Enable debug output to stderr
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Configuration file (toml, yaml or json)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the shared lease records [default: <tmp>/cluster-agent]
    #[arg(long, global = true)]
    pub store_dir: Option<PathBuf>,

    /// Namespace of the lease record, unless the configuration sets one
    #[arg(long, global = true, default_value = "default")]
    pub namespace: String,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// The store directory, falling back to `<tmp>/cluster-agent`
    pub fn store_dir(&self) -> PathBuf {
        self.store_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("cluster-agent"))
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Join the election and report leadership until interrupted
    Run {
        /// Candidate identity [default: host name]
        #[arg(long)]
        identity: Option<String>,
        /// Lease duration in seconds, unless the configuration sets one
        #[arg(long, value_name = "SECS")]
        lease_duration: Option<u64>,
        /// Seconds between two leadership reports
        #[arg(long, value_name = "SECS", default_value_t = DEFAULT_REPORT_INTERVAL_SECS)]
        report_interval: u64,
    },
    /// Show the current leader election record
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
