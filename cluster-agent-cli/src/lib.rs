//! Cluster agent command-line interface.
//!
//! - `cluster-agent run`: join the leader election and report leadership
//! - `cluster-agent status`: show the stored leader election record

pub mod cli;
pub mod run;
pub mod status;

pub use cli::{Cli, Commands};
