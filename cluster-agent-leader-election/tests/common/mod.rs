//! Shared fixtures for the leader election integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use cluster_agent_leader_election::{
    ClientError, CoordinationBackend, CoordinationClient, CoordinationRecord, Elector,
    ElectorFactory, ElectorParams, EngineSettings, LeaderEvent, LeaderEventSender, MemoryStore,
    Result, DEFAULT_LEASE_NAME,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Elector that announces a fixed sequence of leaders, then idles forever
#[derive(Debug, Default)]
pub struct ScriptedElector {
    script: Vec<(Duration, String)>,
    launches: AtomicUsize,
}

impl ScriptedElector {
    /// Announce `leader` once, `delay` after the run loop starts
    pub fn leading(leader: &str, delay: Duration) -> Self {
        Self::with_script(vec![(delay, leader.to_string())])
    }

    /// Never announce anything
    pub fn silent() -> Self {
        Self::default()
    }

    /// Announce each leader after its delay, relative to the previous one
    pub fn with_script(script: Vec<(Duration, String)>) -> Self {
        Self {
            script,
            launches: AtomicUsize::new(0),
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Elector for ScriptedElector {
    async fn run(&self, events: LeaderEventSender) {
        self.launches.fetch_add(1, Ordering::SeqCst);
        for (delay, leader) in &self.script {
            tokio::time::sleep(*delay).await;
            let _ = events.send(LeaderEvent::NewLeader(leader.clone()));
        }
        std::future::pending::<()>().await;
    }
}

pub fn settings(identity: &str) -> EngineSettings {
    EngineSettings {
        holder_identity: identity.to_string(),
        lease_duration: Duration::from_secs(60),
        lease_name: DEFAULT_LEASE_NAME.to_string(),
        namespace: "default".to_string(),
        client_timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(500),
    }
}

/// Client whose every call fails with a backend error
#[derive(Debug)]
pub struct BrokenClient;

#[async_trait]
impl CoordinationClient for BrokenClient {
    async fn get(
        &self,
        _: &str,
        _: &str,
    ) -> std::result::Result<CoordinationRecord, ClientError> {
        Err(ClientError::Backend("forbidden".to_string()))
    }

    async fn create(
        &self,
        _: CoordinationRecord,
    ) -> std::result::Result<CoordinationRecord, ClientError> {
        Err(ClientError::Backend("forbidden".to_string()))
    }

    async fn update(
        &self,
        _: CoordinationRecord,
    ) -> std::result::Result<CoordinationRecord, ClientError> {
        Err(ClientError::Backend("forbidden".to_string()))
    }
}

/// Backend over a [`MemoryStore`] that counts and optionally fails client requests
pub struct CountingBackend {
    pub store: MemoryStore,
    client_calls: AtomicUsize,
    failures_left: AtomicUsize,
    broken_lookup: bool,
}

impl CountingBackend {
    pub fn new() -> Self {
        Self {
            store: MemoryStore::new("default"),
            client_calls: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
            broken_lookup: false,
        }
    }

    /// Fail the next `failures` client requests
    pub fn failing(failures: usize) -> Self {
        let backend = Self::new();
        backend.failures_left.store(failures, Ordering::SeqCst);
        backend
    }

    /// Hand out clients that cannot read anything
    pub fn with_broken_lookup() -> Self {
        Self {
            broken_lookup: true,
            ..Self::new()
        }
    }

    pub fn client_calls(&self) -> usize {
        self.client_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CoordinationBackend for CountingBackend {
    async fn client(&self) -> std::result::Result<Arc<dyn CoordinationClient>, ClientError> {
        self.client_calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(ClientError::Backend("api server unreachable".to_string()));
        }
        if self.broken_lookup {
            return Ok(Arc::new(BrokenClient));
        }
        self.store.client().await
    }

    fn resources_namespace(&self) -> String {
        self.store.resources_namespace()
    }
}

/// Factory recording what it was asked to build; its electors announce
/// their own identity as leader shortly after starting
#[derive(Default)]
pub struct RecordingFactory {
    builds: Mutex<Vec<ElectorParams>>,
}

impl RecordingFactory {
    pub fn builds(&self) -> Vec<ElectorParams> {
        self.builds.lock().unwrap().clone()
    }
}

impl ElectorFactory for RecordingFactory {
    fn build(
        &self,
        params: ElectorParams,
        _client: Arc<dyn CoordinationClient>,
    ) -> Result<Arc<dyn Elector>> {
        self.builds.lock().unwrap().push(params.clone());
        Ok(Arc::new(ScriptedElector::leading(
            &params.holder_identity,
            Duration::from_millis(100),
        )))
    }
}

/// Backend over a shared [`MemoryStore`] whose clients can be cut off from it
#[derive(Clone)]
pub struct SeverableBackend {
    pub store: MemoryStore,
    severed: Arc<AtomicBool>,
}

impl SeverableBackend {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            severed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn sever(&self) {
        self.severed.store(true, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.severed.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct SeverableClient {
    store: MemoryStore,
    severed: Arc<AtomicBool>,
}

impl SeverableClient {
    fn check(&self) -> std::result::Result<(), ClientError> {
        if self.severed.load(Ordering::SeqCst) {
            Err(ClientError::Backend("network unreachable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CoordinationClient for SeverableClient {
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

#[async_trait]
impl CoordinationBackend for SeverableBackend {
    async fn client(&self) -> std::result::Result<Arc<dyn CoordinationClient>, ClientError> {
        Ok(Arc::new(SeverableClient {
            store: self.store.clone(),
            severed: Arc::clone(&self.severed),
        }))
    }

    fn resources_namespace(&self) -> String {
        self.store.resources_namespace()
    }
}
