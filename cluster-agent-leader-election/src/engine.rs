//! The leader engine
//!
//! A [`LeaderEngine`] owns one elector. The first successful
//! [`LeaderEngine::ensure_election_runs`] launches the elector's run loop
//! and waits until a leader has been observed; afterwards the holder
//! queries are plain reads.
//!
//! The engine's mutable state is split in two independent parts:
//! - the lifecycle (`NotStarted -> Starting -> Running`), an atomic that only
//!   `ensure_election_runs` writes, under an async mutex that serializes
//!   callers. Reading it never waits on that mutex.
//! - the observed holder identity, behind a read/write lock whose only
//!   writer is the observer task draining the elector's events

use crate::elector::{Elector, LeaderEvent, LeaderEventReceiver};
use crate::error::{ElectionError, Result};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Resolved, immutable settings of an engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// This process's candidate identity
    pub holder_identity: String,
    pub lease_duration: Duration,
    pub lease_name: String,
    pub namespace: String,
    /// Bound on a single coordination call; readiness waits twice as long
    pub client_timeout: Duration,
    /// Interval between readiness checks
    pub poll_interval: Duration,
}

/// Where the election run loop stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Lifecycle {
    /// The run loop has not been launched
    NotStarted,
    /// The run loop was launched but no leader has been observed yet
    Starting,
    /// A leader has been observed at least once
    Running,
}

impl Lifecycle {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Lifecycle::NotStarted,
            1 => Lifecycle::Starting,
            _ => Lifecycle::Running,
        }
    }
}

/// Last observed holder of the lease
#[derive(Debug, Default)]
pub struct HolderState {
    identity: RwLock<String>,
}

impl HolderState {
    /// Current holder identity, empty if none was observed yet
    pub fn get(&self) -> String {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set(&self, identity: String) {
        *self.identity.write().unwrap_or_else(PoisonError::into_inner) = identity;
    }
}

/// Apply elector events to the holder state until the elector goes away
async fn observe(mut events: LeaderEventReceiver, holder: Arc<HolderState>, identity: String) {
    while let Some(event) = events.recv().await {
        match event {
            LeaderEvent::NewLeader(leader) => {
                debug!("Leader changed to {:?}", leader);
                holder.set(leader);
            }
            LeaderEvent::StartedLeading => info!("{:?} started leading", identity),
            LeaderEvent::StoppedLeading => {
                warn!("{:?} stopped leading", identity);
                // Never keep believing in our own lease once it is gone
                if holder.get() == identity {
                    holder.set(String::new());
                }
            }
        }
    }
    debug!("Elector event channel closed");
}

/// Leader election engine for one candidate
pub struct LeaderEngine {
    settings: EngineSettings,
    elector: Arc<dyn Elector>,
    lifecycle: AtomicU8,
    transition: Mutex<()>,
    holder: Arc<HolderState>,
}

impl fmt::Debug for LeaderEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaderEngine")
            .field("settings", &self.settings)
            .field("lifecycle", &self.lifecycle())
            .field("holder", &self.holder)
            .finish_non_exhaustive()
    }
}

impl LeaderEngine {
    /// Create an engine around an already built elector. Nothing runs until
    /// [`LeaderEngine::ensure_election_runs`] is called.
    pub fn new(settings: EngineSettings, elector: Arc<dyn Elector>) -> Self {
        Self {
            settings,
            elector,
            lifecycle: AtomicU8::new(Lifecycle::NotStarted as u8),
            transition: Mutex::new(()),
            holder: Arc::new(HolderState::default()),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// This process's candidate identity
    pub fn holder_identity(&self) -> &str {
        &self.settings.holder_identity
    }

    pub fn lease_duration(&self) -> Duration {
        self.settings.lease_duration
    }

    /// How long [`LeaderEngine::ensure_election_runs`] waits for a leader
    pub fn readiness_timeout(&self) -> Duration {
        self.settings.client_timeout * 2
    }

    /// Current lifecycle state. Does not wait for a readiness check in progress.
    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    fn set_lifecycle(&self, lifecycle: Lifecycle) {
        self.lifecycle.store(lifecycle as u8, Ordering::Release);
    }

    /// Whether a leader has been observed since the run loop started
    pub fn is_running(&self) -> bool {
        self.lifecycle() == Lifecycle::Running
    }

    /// Start the election if it is not running yet, and wait until a leader
    /// is known.
    ///
    /// The run loop is launched at most once. A call that times out leaves
    /// the loop running; the next call waits on that same loop again.
    pub async fn ensure_election_runs(&self) -> Result<()> {
        let _transition = self.transition.lock().await;

        match self.lifecycle() {
            Lifecycle::Running => {
                debug!(
                    "Currently leader: {}, leader identity: {:?}",
                    self.is_leader(),
                    self.current_leader_name()
                );
                return Ok(());
            }
            Lifecycle::NotStarted => {
                self.launch();
                self.set_lifecycle(Lifecycle::Starting);
            }
            Lifecycle::Starting => {
                debug!("Leader election already launched, waiting for a leader again");
            }
        }

        let timeout = self.readiness_timeout();
        let poll_interval = self.settings.poll_interval;
        let wait_for_leader = async {
            let mut tick = tokio::time::interval_at(Instant::now() + poll_interval, poll_interval);
            loop {
                tick.tick().await;
                let leader = self.current_leader_name();
                if !leader.is_empty() {
                    return leader;
                }
                trace!("Leader identity is unset");
            }
        };

        match tokio::time::timeout(timeout, wait_for_leader).await {
            Ok(leader) => {
                info!("Leader election running, current leader is {:?}", leader);
                self.set_lifecycle(Lifecycle::Running);
                Ok(())
            }
            Err(_) => Err(ElectionError::NotRunning { timeout }),
        }
    }

    fn launch(&self) {
        info!(
            "Starting leader election process for {:?}...",
            self.settings.holder_identity
        );

        let (events, receiver) = mpsc::unbounded_channel();
        tokio::spawn(observe(
            receiver,
            Arc::clone(&self.holder),
            self.settings.holder_identity.clone(),
        ));

        let elector = Arc::clone(&self.elector);
        tokio::spawn(async move { elector.run(events).await });
    }

    /// Identity of the current leader, empty if none was observed yet
    pub fn current_leader_name(&self) -> String {
        self.holder.get()
    }

    /// Whether this process is the leader, as far as it currently knows
    ///
    /// This lags behind the coordination store by up to one elector round.
    pub fn is_leader(&self) -> bool {
        self.current_leader_name() == self.settings.holder_identity
    }
}
