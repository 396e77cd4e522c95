//! Lazy, retried construction of the process's leader engine
//!
//! The composition root owns one [`EngineProvider`] and hands it to every
//! consumer. The first call to [`EngineProvider::get_custom_engine`] fixes
//! the identity and lease duration; every call re-triggers the
//! initialization retrier until it succeeds, after which the same engine is
//! returned forever (or until [`EngineProvider::reset`]).

use crate::client::{BoundedClient, CoordinationBackend, CoordinationClient};
use crate::config::{ElectionConfig, DEFAULT_LEASE_DURATION};
use crate::elector::{ElectorFactory, ElectorParams};
use crate::engine::{EngineSettings, LeaderEngine};
use crate::error::{ElectionError, Result};
use cluster_agent_common::Retrier;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Eq)]
struct EngineRequest {
    holder_identity: String,
    lease_duration: Duration,
}

struct EngineSlot {
    request: EngineRequest,
    retrier: Retrier<Arc<LeaderEngine>>,
}

/// Owner of the single leader engine of a process
pub struct EngineProvider {
    config: ElectionConfig,
    backend: Arc<dyn CoordinationBackend>,
    elector_factory: Arc<dyn ElectorFactory>,
    slot: Mutex<Option<Arc<EngineSlot>>>,
}

impl EngineProvider {
    /// Create a provider. No initialization happens until an engine is requested.
    pub fn new(
        config: ElectionConfig,
        backend: Arc<dyn CoordinationBackend>,
        elector_factory: Arc<dyn ElectorFactory>,
    ) -> Self {
        Self {
            config,
            backend,
            elector_factory,
            slot: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    /// The engine for the configured identity (host name when unset) and
    /// the default lease duration
    pub async fn get_engine(&self) -> Result<Arc<LeaderEngine>> {
        let identity = self.config.holder_identity().unwrap_or_default().to_string();
        self.get_custom_engine(&identity, Duration::ZERO).await
    }

    /// The engine for `holder_identity` and `lease_duration`
    ///
    /// An empty identity selects the host name and a zero duration selects
    /// the default. Only the first call's arguments are used.
    pub async fn get_custom_engine(
        &self,
        holder_identity: &str,
        lease_duration: Duration,
    ) -> Result<Arc<LeaderEngine>> {
        let slot = self.slot(EngineRequest {
            holder_identity: holder_identity.to_string(),
            lease_duration,
        });

        slot.retrier
            .trigger_retry(|| self.initialize(&slot.request))
            .await
            .map_err(|e| {
                debug!("Init error: {}", e);
                ElectionError::from(e)
            })
    }

    /// Whether an engine has been successfully initialized
    pub async fn is_initialized(&self) -> bool {
        let slot = self.lock_slot().clone();
        match slot {
            Some(slot) => slot.retrier.value().await.is_some(),
            None => false,
        }
    }

    /// Discard the engine and its retry state. Meant for tests.
    pub fn reset(&self) {
        *self.lock_slot() = None;
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Option<Arc<EngineSlot>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, request: EngineRequest) -> Arc<EngineSlot> {
        let mut slot = self.lock_slot();
        if let Some(existing) = slot.as_ref() {
            if existing.request != request {
                debug!(
                    "Leader engine already requested as {:?}, ignoring {:?}",
                    existing.request, request
                );
            }
            return Arc::clone(existing);
        }

        let created = Arc::new(EngineSlot {
            request,
            retrier: Retrier::new(self.config.init_retry()),
        });
        *slot = Some(Arc::clone(&created));
        created
    }

    async fn initialize(&self, request: &EngineRequest) -> Result<Arc<LeaderEngine>> {
        let holder_identity = if request.holder_identity.is_empty() {
            local_hostname().inspect_err(|e| debug!("{}", e))?
        } else {
            request.holder_identity.clone()
        };
        debug!("Init leader engine with holder identity {:?}", holder_identity);

        let lease_duration = resolve_lease_duration(&self.config, request.lease_duration);
        debug!("Leader lease duration: {:?}", lease_duration);

        let namespace = self
            .config
            .namespace
            .clone()
            .filter(|namespace| !namespace.is_empty())
            .unwrap_or_else(|| self.backend.resources_namespace());
        let lease_name = self.config.lease_name.clone();

        let client = self.backend.client().await.map_err(|e| {
            error!("Not able to set up a client for the leader election: {}", e);
            ElectionError::Client(e)
        })?;
        let client: Arc<dyn CoordinationClient> =
            Arc::new(BoundedClient::new(client, self.config.client_timeout()));

        // The record is created by the elector on first acquisition, so it
        // may legitimately be missing here.
        match client.get(&namespace, &lease_name).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                debug!("Lease record {}/{} does not exist yet", namespace, lease_name)
            }
            Err(e) => {
                error!(
                    "Cannot retrieve {}/{} from the coordination backend: {}",
                    namespace, lease_name, e
                );
                return Err(ElectionError::RecordLookup {
                    namespace,
                    name: lease_name,
                    source: e,
                });
            }
        }

        let params = ElectorParams {
            holder_identity: holder_identity.clone(),
            namespace: namespace.clone(),
            lease_name: lease_name.clone(),
            lease_duration,
        };
        let elector = self
            .elector_factory
            .build(params, client)
            .inspect_err(|e| error!("Could not initialize the leader election process: {}", e))?;

        let engine = LeaderEngine::new(
            EngineSettings {
                holder_identity,
                lease_duration,
                lease_name,
                namespace,
                client_timeout: self.config.client_timeout(),
                poll_interval: self.config.poll_interval(),
            },
            elector,
        );
        debug!(
            "Leader engine for {:?} successfully initialized",
            engine.holder_identity()
        );
        Ok(Arc::new(engine))
    }
}

/// Configured lease duration, else the requested one, else the default.
/// Zero always means "unset".
fn resolve_lease_duration(config: &ElectionConfig, requested: Duration) -> Duration {
    config
        .lease_duration()
        .or((!requested.is_zero()).then_some(requested))
        .unwrap_or(DEFAULT_LEASE_DURATION)
}

/// Host name of this machine, used as the default candidate identity
pub fn local_hostname() -> Result<String> {
    hostname::get()
        .map_err(ElectionError::Hostname)?
        .into_string()
        .map_err(|raw| {
            ElectionError::Hostname(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("host name {:?} is not valid UTF-8", raw),
            ))
        })
}
