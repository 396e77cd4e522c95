//! `cluster-agent run` - join the election and report leadership.

use anyhow::{bail, Context};
use cluster_agent_leader_election::{ElectionError, EngineProvider, LeaderEngine};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Delay between two engine initialization attempts; the provider's own
/// retrier decides whether an attempt actually runs.
const INIT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Candidate identity, empty for the host name
    pub identity: String,
    /// Requested lease duration, zero for the default
    pub lease_duration: Duration,
    pub report_interval: Duration,
}

/// Run the election until `shutdown` completes.
///
/// Fails when the engine can never be initialized. Readiness timeouts are
/// logged and waited out again.
pub async fn run_election<S>(
    provider: &EngineProvider,
    options: &RunOptions,
    shutdown: S,
) -> anyhow::Result<()>
where
    S: Future<Output = ()>,
{
    if options.report_interval.is_zero() {
        bail!("report interval must be greater than zero");
    }
    tokio::pin!(shutdown);

    let engine = loop {
        match provider
            .get_custom_engine(&options.identity, options.lease_duration)
            .await
        {
            Ok(engine) => break engine,
            Err(ElectionError::Init(e)) if e.is_permanent() => {
                return Err(e).context("leader engine cannot be initialized");
            }
            Err(e) => warn!("Leader engine not available yet: {}", e),
        }

        tokio::select! {
            biased;
            _ = &mut shutdown => return Ok(()),
            _ = tokio::time::sleep(INIT_POLL_INTERVAL) => {}
        }
    };

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => return Ok(()),
            result = engine.ensure_election_runs() => match result {
                Ok(()) => break,
                Err(e) => warn!("{}", e),
            },
        }
    }

    let mut ticker = tokio::time::interval(options.report_interval);
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("Shutting down, last known leader {:?}", engine.current_leader_name());
                return Ok(());
            }
            _ = ticker.tick() => report(&engine),
        }
    }
}

fn report(engine: &Arc<LeaderEngine>) {
    info!(
        leader = engine.is_leader(),
        holder = %engine.current_leader_name(),
        "Leadership of {:?}",
        engine.holder_identity()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_agent_leader_election::{
        get_leader_details, ElectionConfig, FileStore, LeaseElectorFactory, MemoryStore,
    };

    fn options(identity: &str) -> RunOptions {
        RunOptions {
            identity: identity.to_string(),
            lease_duration: Duration::ZERO,
            report_interval: Duration::from_secs(10),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_acquires_lease_until_shutdown() {
        let store = MemoryStore::new("default");
        let provider = EngineProvider::new(
            ElectionConfig::default(),
            Arc::new(store.clone()),
            Arc::new(LeaseElectorFactory),
        );

        run_election(
            &provider,
            &options("pod-a"),
            tokio::time::sleep(Duration::from_secs(30)),
        )
        .await
        .unwrap();

        let engine = provider.get_engine().await.unwrap();
        assert!(engine.is_leader());
        assert_eq!(get_leader_details(&store).await.unwrap().holder_identity, "pod-a");
    }

    #[tokio::test]
    async fn test_immediate_shutdown_never_competes() {
        let store = MemoryStore::new("default");
        let provider = EngineProvider::new(
            ElectionConfig::default(),
            Arc::new(store.clone()),
            Arc::new(LeaseElectorFactory),
        );

        run_election(&provider, &options("pod-a"), std::future::ready(()))
            .await
            .unwrap();

        let engine = provider.get_engine().await.unwrap();
        assert!(!engine.is_running());
        assert!(get_leader_details(&store).await.unwrap_err().is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unusable_store_gives_up() {
        let dir = tempfile::tempdir().unwrap();
        let not_a_dir = dir.path().join("store");
        std::fs::write(&not_a_dir, "").unwrap();

        let config = ElectionConfig {
            init_retry_count: 1,
            ..Default::default()
        };
        let provider = EngineProvider::new(
            config,
            Arc::new(FileStore::new(&not_a_dir, "default")),
            Arc::new(LeaseElectorFactory),
        );

        let err = run_election(&provider, &options("pod-a"), std::future::pending())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot be initialized"));
    }
}
