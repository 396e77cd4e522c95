//! Cluster agent CLI.
//!
//! Commands:
//! - `cluster-agent run`: compete for the shared lease and report leadership
//!   until interrupted
//! - `cluster-agent status`: print the stored leader election record
//!
//! Exit codes:
//! - 0: Success
//! - 1: Error, or no leader elected yet (`status`)

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use cluster_agent::run::{run_election, RunOptions};
use cluster_agent::status::run_status;
use cluster_agent::{Cli, Commands};
use cluster_agent_common::{init_tracing, Pretty};
use cluster_agent_leader_election::{
    ElectionConfig, EngineProvider, FileStore, LeaseElectorFactory,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let exit_code = dispatch_command(cli).await;
    std::process::exit(exit_code);
}

/// Dispatch a parsed CLI to the appropriate command handler.
async fn dispatch_command(cli: Cli) -> i32 {
    let config = match ElectionConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    tracing::debug!("Election config: {}", Pretty(&config));

    let store = FileStore::new(cli.store_dir(), cli.namespace.as_str());

    match cli.command {
        Commands::Run {
            identity,
            lease_duration,
            report_interval,
        } => {
            let options = RunOptions {
                identity: identity.unwrap_or_default(),
                lease_duration: Duration::from_secs(lease_duration.unwrap_or(0)),
                report_interval: Duration::from_secs(report_interval),
            };
            let provider =
                EngineProvider::new(config, Arc::new(store), Arc::new(LeaseElectorFactory));
            result_to_exit(run_election(&provider, &options, shutdown_signal()).await)
        }
        Commands::Status { json } => {
            let namespace = config
                .namespace
                .clone()
                .filter(|namespace| !namespace.is_empty())
                .unwrap_or_else(|| cli.namespace.clone());
            match run_status(&store, &namespace, &config.lease_name, json).await {
                Ok(code) => code,
                Err(e) => result_to_exit::<anyhow::Error>(Err(e)),
            }
        }
    }
}

/// Resolves on Ctrl-C. If the handler cannot be installed, never resolves.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Convert a `Result<(), E: Display>` to an exit code.
fn result_to_exit<E: std::fmt::Display>(result: Result<(), E>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_cli_parsing_run_defaults() {
        let cli = Cli::parse_from(["cluster-agent", "run"]);
        assert!(!cli.debug);
        assert_eq!(cli.namespace, "default");
        assert_eq!(cli.store_dir(), std::env::temp_dir().join("cluster-agent"));
        match cli.command {
            Commands::Run {
                identity,
                lease_duration,
                report_interval,
            } => {
                assert!(identity.is_none());
                assert!(lease_duration.is_none());
                assert_eq!(report_interval, 10);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_parsing_run_with_options() {
        let cli = Cli::parse_from([
            "cluster-agent",
            "run",
            "--identity",
            "pod-a",
            "--lease-duration",
            "30",
            "--report-interval",
            "5",
        ]);
        match cli.command {
            Commands::Run {
                identity,
                lease_duration,
                report_interval,
            } => {
                assert_eq!(identity.as_deref(), Some("pod-a"));
                assert_eq!(lease_duration, Some(30));
                assert_eq!(report_interval, 5);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_parsing_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "cluster-agent",
            "status",
            "--json",
            "--debug",
            "--store-dir",
            "/srv/leases",
            "--namespace",
            "monitoring",
            "--config",
            "agent.yaml",
        ]);
        assert!(cli.debug);
        assert_eq!(cli.store_dir(), PathBuf::from("/srv/leases"));
        assert_eq!(cli.namespace, "monitoring");
        assert_eq!(cli.config, Some(PathBuf::from("agent.yaml")));
        assert!(matches!(cli.command, Commands::Status { json: true }));
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["cluster-agent"]).is_err());
    }

    #[test]
    fn test_result_to_exit_ok() {
        let result: Result<(), String> = Ok(());
        assert_eq!(result_to_exit(result), 0);
    }

    #[test]
    fn test_result_to_exit_err() {
        let result: Result<(), String> = Err("something failed".to_string());
        assert_eq!(result_to_exit(result), 1);
    }
}
