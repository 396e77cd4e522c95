//! Election state machine boundary and the default lease-based elector
//!
//! An [`Elector`] runs the acquire/renew protocol for the whole life of the
//! process and reports what it sees as [`LeaderEvent`]s on a channel. The
//! engine only consumes those events; it never drives the protocol itself.

use crate::client::{CoordinationClient, CoordinationRecord};
use crate::error::{ClientError, ElectionError, Result};
use crate::record::{
    decode_leader_record, encode_leader_record, LeaderElectionRecord,
    LEADER_ELECTION_RECORD_ANNOTATION_KEY,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Notifications emitted by an elector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaderEvent {
    /// This process acquired the lease
    StartedLeading,
    /// This process lost the lease
    StoppedLeading,
    /// The observed holder identity changed
    NewLeader(String),
}

/// Sending half of the elector event channel
pub type LeaderEventSender = mpsc::UnboundedSender<LeaderEvent>;

/// Receiving half of the elector event channel
pub type LeaderEventReceiver = mpsc::UnboundedReceiver<LeaderEvent>;

/// Everything an elector needs to know about the lease it competes for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectorParams {
    pub holder_identity: String,
    pub namespace: String,
    pub lease_name: String,
    pub lease_duration: Duration,
}

/// The run loop of an election state machine
#[async_trait]
pub trait Elector: Send + Sync {
    /// Participate in the election until the process exits, reporting every
    /// observation on `events`
    async fn run(&self, events: LeaderEventSender);
}

/// Builds the elector bound to a resolved identity and lease
pub trait ElectorFactory: Send + Sync {
    fn build(
        &self,
        params: ElectorParams,
        client: Arc<dyn CoordinationClient>,
    ) -> Result<Arc<dyn Elector>>;
}

/// Factory for [`LeaseElector`]
#[derive(Debug, Default, Clone, Copy)]
pub struct LeaseElectorFactory;

impl ElectorFactory for LeaseElectorFactory {
    fn build(
        &self,
        params: ElectorParams,
        client: Arc<dyn CoordinationClient>,
    ) -> Result<Arc<dyn Elector>> {
        Ok(Arc::new(LeaseElector::new(params, client)?))
    }
}

/// Outcome of one acquire-or-renew round
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Attempt {
    pub acquired: bool,
    /// Holder seen during the round, if it could be determined
    pub holder: Option<String>,
}

/// Lease-based elector writing a [`LeaderElectionRecord`] into the
/// coordination record's annotation
///
/// The holder renews every `lease_duration / 4`. A holder that fails to
/// renew for `lease_duration / 2` steps down; other candidates take over
/// once the full lease duration has passed without renewal.
pub struct LeaseElector {
    params: ElectorParams,
    client: Arc<dyn CoordinationClient>,
    renew_deadline: Duration,
    retry_period: Duration,
}

impl fmt::Debug for LeaseElector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseElector")
            .field("params", &self.params)
            .field("renew_deadline", &self.renew_deadline)
            .field("retry_period", &self.retry_period)
            .finish()
    }
}

impl LeaseElector {
    pub fn new(params: ElectorParams, client: Arc<dyn CoordinationClient>) -> Result<Self> {
        if params.holder_identity.is_empty() {
            return Err(ElectionError::ElectorSetup(
                "holder identity must not be empty".to_string(),
            ));
        }
        if params.namespace.is_empty() || params.lease_name.is_empty() {
            return Err(ElectionError::ElectorSetup(
                "lease namespace and name must not be empty".to_string(),
            ));
        }
        if params.lease_duration < Duration::from_secs(1) {
            return Err(ElectionError::ElectorSetup(format!(
                "lease duration must be at least 1s, got {:?}",
                params.lease_duration
            )));
        }

        Ok(Self {
            renew_deadline: params.lease_duration / 2,
            retry_period: params.lease_duration / 4,
            params,
            client,
        })
    }

    pub fn renew_deadline(&self) -> Duration {
        self.renew_deadline
    }

    pub fn retry_period(&self) -> Duration {
        self.retry_period
    }

    fn identity(&self) -> &str {
        &self.params.holder_identity
    }

    fn claim(&self, previous: Option<&LeaderElectionRecord>, now: DateTime<Utc>) -> LeaderElectionRecord {
        let mut record = LeaderElectionRecord {
            holder_identity: self.identity().to_string(),
            lease_duration_seconds: self.params.lease_duration.as_secs(),
            acquire_time: Some(now),
            renew_time: Some(now),
            leader_transitions: 0,
        };
        if let Some(previous) = previous {
            if previous.holder_identity == self.identity() {
                record.acquire_time = previous.acquire_time.or(Some(now));
                record.leader_transitions = previous.leader_transitions;
            } else {
                record.leader_transitions = previous.leader_transitions.saturating_add(1);
            }
        }
        record
    }

    /// One round of the protocol: create the record if it is missing, take
    /// it over if the lease lapsed, renew it if we hold it.
    pub(crate) async fn try_acquire_or_renew(&self, now: DateTime<Utc>) -> Result<Attempt> {
        let namespace = &self.params.namespace;
        let name = &self.params.lease_name;

        let stored = match self.client.get(namespace, name).await {
            Ok(stored) => stored,
            Err(e) if e.is_not_found() => {
                let claim = self.claim(None, now);
                let record = CoordinationRecord::new(namespace.as_str(), name.as_str())
                    .with_annotation(
                        LEADER_ELECTION_RECORD_ANNOTATION_KEY,
                        encode_leader_record(&claim)?,
                    );
                return match self.client.create(record).await {
                    Ok(_) => {
                        info!("Created lease {}/{} held by {:?}", namespace, name, self.identity());
                        Ok(Attempt {
                            acquired: true,
                            holder: Some(claim.holder_identity),
                        })
                    }
                    Err(ClientError::AlreadyExists { .. }) => Ok(Attempt {
                        acquired: false,
                        holder: None,
                    }),
                    Err(e) => Err(e.into()),
                };
            }
            Err(e) => return Err(e.into()),
        };

        let current = match decode_leader_record(&stored) {
            Ok(current) => current,
            Err(e) => {
                debug!("Ignoring unreadable election record on {}/{}: {}", namespace, name, e);
                LeaderElectionRecord::default()
            }
        };

        if !current.holder_identity.is_empty()
            && current.holder_identity != self.identity()
            && !current.is_expired(now)
        {
            return Ok(Attempt {
                acquired: false,
                holder: Some(current.holder_identity),
            });
        }

        let claim = self.claim(Some(&current), now);
        let mut next = stored;
        next.annotations.insert(
            LEADER_ELECTION_RECORD_ANNOTATION_KEY.to_string(),
            encode_leader_record(&claim)?,
        );

        match self.client.update(next).await {
            Ok(_) => Ok(Attempt {
                acquired: true,
                holder: Some(claim.holder_identity),
            }),
            Err(ClientError::Conflict { .. }) => {
                debug!("Lost a concurrent update of {}/{}", namespace, name);
                Ok(Attempt {
                    acquired: false,
                    holder: None,
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Elector for LeaseElector {
    async fn run(&self, events: LeaderEventSender) {
        info!(
            "Competing for lease {}/{} as {:?} (lease {:?}, retry every {:?})",
            self.params.namespace,
            self.params.lease_name,
            self.identity(),
            self.params.lease_duration,
            self.retry_period
        );

        let mut observed = String::new();
        let mut leading = false;
        let mut last_renew = Instant::now();

        let mut ticker = tokio::time::interval(self.retry_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if events.is_closed() {
                debug!("Leader event receiver dropped, leaving the election");
                return;
            }

            let mut acquired = false;
            match self.try_acquire_or_renew(Utc::now()).await {
                Ok(attempt) => {
                    acquired = attempt.acquired;
                    if let Some(holder) = attempt.holder {
                        if holder != observed {
                            debug!("Observed new leader {:?}", holder);
                            observed = holder.clone();
                            let _ = events.send(LeaderEvent::NewLeader(holder));
                        }
                    }
                }
                Err(e) => warn!(
                    "Failed to acquire or renew lease {}/{}: {}",
                    self.params.namespace, self.params.lease_name, e
                ),
            }

            if acquired {
                last_renew = Instant::now();
                if !leading {
                    leading = true;
                    info!("{:?} became the leader", self.identity());
                    let _ = events.send(LeaderEvent::StartedLeading);
                }
            } else if leading
                && (observed != self.identity() || last_renew.elapsed() >= self.renew_deadline)
            {
                leading = false;
                warn!("{:?} stopped being the leader", self.identity());
                let _ = events.send(LeaderEvent::StoppedLeading);

                // The real holder is unknown until a round succeeds again
                if observed == self.identity() {
                    observed.clear();
                    let _ = events.send(LeaderEvent::NewLeader(String::new()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DEFAULT_LEASE_NAME;
    use crate::store::MemoryStore;
    use chrono::TimeDelta;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn params(identity: &str) -> ElectorParams {
        ElectorParams {
            holder_identity: identity.to_string(),
            namespace: "default".to_string(),
            lease_name: DEFAULT_LEASE_NAME.to_string(),
            lease_duration: Duration::from_secs(60),
        }
    }

    fn elector(store: &MemoryStore, identity: &str) -> LeaseElector {
        LeaseElector::new(params(identity), Arc::new(store.clone())).unwrap()
    }

    fn stored_record(store: &MemoryStore) -> LeaderElectionRecord {
        let record = store.snapshot("default", DEFAULT_LEASE_NAME).unwrap();
        decode_leader_record(&record).unwrap()
    }

    fn seed(store: &MemoryStore, record: &LeaderElectionRecord) {
        store.insert(
            CoordinationRecord::new("default", DEFAULT_LEASE_NAME).with_annotation(
                LEADER_ELECTION_RECORD_ANNOTATION_KEY,
                encode_leader_record(record).unwrap(),
            ),
        );
    }

    #[test]
    fn test_timing_derived_from_lease() {
        let store = MemoryStore::new("default");
        let elector = elector(&store, "pod-a");
        assert_eq!(elector.renew_deadline(), Duration::from_secs(30));
        assert_eq!(elector.retry_period(), Duration::from_secs(15));
    }

    #[test]
    fn test_rejects_invalid_params() {
        let store = Arc::new(MemoryStore::new("default"));

        let err = LeaseElector::new(params(""), store.clone()).unwrap_err();
        assert!(matches!(err, ElectionError::ElectorSetup(_)));

        let mut short = params("pod-a");
        short.lease_duration = Duration::from_millis(10);
        assert!(LeaseElector::new(short, store.clone()).is_err());

        let mut unnamed = params("pod-a");
        unnamed.lease_name = String::new();
        assert!(LeaseElectorFactory.build(unnamed, store).is_err());
    }

    #[tokio::test]
    async fn test_first_candidate_creates_record() {
        let store = MemoryStore::new("default");
        let now = Utc::now();

        let attempt = elector(&store, "pod-a").try_acquire_or_renew(now).await.unwrap();
        assert_eq!(
            attempt,
            Attempt {
                acquired: true,
                holder: Some("pod-a".to_string())
            }
        );

        let record = stored_record(&store);
        assert_eq!(record.holder_identity, "pod-a");
        assert_eq!(record.lease_duration_seconds, 60);
        assert_eq!(record.leader_transitions, 0);
        assert_eq!(record.acquire_time, Some(now));
    }

    #[tokio::test]
    async fn test_valid_lease_is_respected() {
        let store = MemoryStore::new("default");
        elector(&store, "pod-a")
            .try_acquire_or_renew(Utc::now())
            .await
            .unwrap();

        let attempt = elector(&store, "pod-b")
            .try_acquire_or_renew(Utc::now())
            .await
            .unwrap();
        assert!(!attempt.acquired);
        assert_eq!(attempt.holder.as_deref(), Some("pod-a"));
        assert_eq!(stored_record(&store).holder_identity, "pod-a");
    }

    #[tokio::test]
    async fn test_expired_lease_is_taken_over() {
        let store = MemoryStore::new("default");
        let stale = Utc::now() - TimeDelta::seconds(120);
        seed(
            &store,
            &LeaderElectionRecord {
                holder_identity: "pod-a".to_string(),
                lease_duration_seconds: 60,
                acquire_time: Some(stale),
                renew_time: Some(stale),
                leader_transitions: 4,
            },
        );

        let now = Utc::now();
        let attempt = elector(&store, "pod-b").try_acquire_or_renew(now).await.unwrap();
        assert!(attempt.acquired);

        let record = stored_record(&store);
        assert_eq!(record.holder_identity, "pod-b");
        assert_eq!(record.leader_transitions, 5);
        assert_eq!(record.acquire_time, Some(now));
    }

    #[tokio::test]
    async fn test_renewal_keeps_acquire_time() {
        let store = MemoryStore::new("default");
        let elector = elector(&store, "pod-a");

        let first = Utc::now();
        elector.try_acquire_or_renew(first).await.unwrap();
        let later = first + TimeDelta::seconds(15);
        let attempt = elector.try_acquire_or_renew(later).await.unwrap();
        assert!(attempt.acquired);

        let record = stored_record(&store);
        assert_eq!(record.acquire_time, Some(first));
        assert_eq!(record.renew_time, Some(later));
        assert_eq!(record.leader_transitions, 0);
    }

    #[tokio::test]
    async fn test_unreadable_record_is_claimed() {
        let store = MemoryStore::new("default");
        store.insert(
            CoordinationRecord::new("default", DEFAULT_LEASE_NAME)
                .with_annotation(LEADER_ELECTION_RECORD_ANNOTATION_KEY, "garbage"),
        );

        let attempt = elector(&store, "pod-a")
            .try_acquire_or_renew(Utc::now())
            .await
            .unwrap();
        assert!(attempt.acquired);
        assert_eq!(stored_record(&store).leader_transitions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_reports_leader_to_every_candidate() {
        let store = MemoryStore::new("default");
        let a = Arc::new(elector(&store, "pod-a"));
        let b = Arc::new(elector(&store, "pod-b"));

        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        let a_run = Arc::clone(&a);
        tokio::spawn(async move { a_run.run(a_tx).await });

        assert_eq!(
            a_rx.recv().await,
            Some(LeaderEvent::NewLeader("pod-a".to_string()))
        );
        assert_eq!(a_rx.recv().await, Some(LeaderEvent::StartedLeading));

        let b_run = Arc::clone(&b);
        tokio::spawn(async move { b_run.run(b_tx).await });
        assert_eq!(
            b_rx.recv().await,
            Some(LeaderEvent::NewLeader("pod-a".to_string()))
        );

        // pod-b never leads while pod-a keeps renewing
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_steps_down_when_lease_is_taken() {
        let store = MemoryStore::new("default");
        let a = Arc::new(elector(&store, "pod-a"));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let a_run = Arc::clone(&a);
        tokio::spawn(async move { a_run.run(tx).await });
        assert_eq!(
            rx.recv().await,
            Some(LeaderEvent::NewLeader("pod-a".to_string()))
        );
        assert_eq!(rx.recv().await, Some(LeaderEvent::StartedLeading));

        // Another candidate overwrites the lease behind pod-a's back
        let mut current = store.snapshot("default", DEFAULT_LEASE_NAME).unwrap();
        let now = Utc::now();
        current.annotations.insert(
            LEADER_ELECTION_RECORD_ANNOTATION_KEY.to_string(),
            encode_leader_record(&LeaderElectionRecord {
                holder_identity: "pod-b".to_string(),
                lease_duration_seconds: 60,
                acquire_time: Some(now),
                renew_time: Some(now),
                leader_transitions: 1,
            })
            .unwrap(),
        );
        store.update(current).await.unwrap();

        assert_eq!(
            rx.recv().await,
            Some(LeaderEvent::NewLeader("pod-b".to_string()))
        );
        assert_eq!(rx.recv().await, Some(LeaderEvent::StoppedLeading));
    }

    #[tokio::test]
    async fn test_transition_counter_saturates() {
        let store = MemoryStore::new("default");
        let stale = Utc::now() - TimeDelta::seconds(120);
        seed(
            &store,
            &LeaderElectionRecord {
                holder_identity: "pod-b".to_string(),
                lease_duration_seconds: 60,
                acquire_time: Some(stale),
                renew_time: Some(stale),
                leader_transitions: u32::MAX,
            },
        );

        let attempt = elector(&store, "pod-a")
            .try_acquire_or_renew(Utc::now())
            .await
            .unwrap();
        assert!(attempt.acquired);

        let record = stored_record(&store);
        assert_eq!(record.holder_identity, "pod-a");
        assert_eq!(record.leader_transitions, u32::MAX);
    }

    /// Store client that can be cut off from the store
    #[derive(Debug)]
    struct SeveredClient {
        store: MemoryStore,
        severed: AtomicBool,
    }

    impl SeveredClient {
        fn check(&self) -> std::result::Result<(), ClientError> {
            if self.severed.load(Ordering::SeqCst) {
                Err(ClientError::Backend("unreachable".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl CoordinationClient for SeveredClient {
        async fn get(
            &self,
            namespace: &str,
            name: &str,
        ) -> std::result::Result<CoordinationRecord, ClientError> {
            self.check()?;
            self.store.get(namespace, name).await
        }

        async fn create(
            &self,
            record: CoordinationRecord,
        ) -> std::result::Result<CoordinationRecord, ClientError> {
            self.check()?;
            self.store.create(record).await
        }

        async fn update(
            &self,
            record: CoordinationRecord,
        ) -> std::result::Result<CoordinationRecord, ClientError> {
            self.check()?;
            self.store.update(record).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cut_off_leader_forgets_itself() {
        let store = MemoryStore::new("default");
        let client = Arc::new(SeveredClient {
            store: store.clone(),
            severed: AtomicBool::new(false),
        });
        let a = Arc::new(LeaseElector::new(params("pod-a"), client.clone()).unwrap());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let a_run = Arc::clone(&a);
        tokio::spawn(async move { a_run.run(tx).await });
        assert_eq!(
            rx.recv().await,
            Some(LeaderEvent::NewLeader("pod-a".to_string()))
        );
        assert_eq!(rx.recv().await, Some(LeaderEvent::StartedLeading));

        client.severed.store(true, Ordering::SeqCst);
        let severed_at = Instant::now();

        assert_eq!(rx.recv().await, Some(LeaderEvent::StoppedLeading));
        assert!(severed_at.elapsed() >= a.renew_deadline() - a.retry_period());
        assert_eq!(
            rx.recv().await,
            Some(LeaderEvent::NewLeader(String::new()))
        );

        // Reconnected, it learns the holder again from the store
        client.severed.store(false, Ordering::SeqCst);
        assert_eq!(
            rx.recv().await,
            Some(LeaderEvent::NewLeader("pod-a".to_string()))
        );
        assert_eq!(rx.recv().await, Some(LeaderEvent::StartedLeading));
    }
}
