use crate::client::{CoordinationBackend, CoordinationClient, CoordinationRecord};
use crate::error::ClientError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type RecordKey = (String, String);

/// In-memory coordination store
///
/// Clones share the same records, so one store can hand out clients to
/// several electors and still let a test inspect what they wrote.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    namespace: String,
    records: Arc<Mutex<HashMap<RecordKey, CoordinationRecord>>>,
}

impl MemoryStore {
    /// Create an empty store whose resources namespace is `namespace`
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            records: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Store a record as-is, replacing any existing one
    ///
    /// A record with version 0 is stored as version 1.
    pub fn insert(&self, mut record: CoordinationRecord) {
        record.resource_version = record.resource_version.max(1);
        let key = (record.namespace.clone(), record.name.clone());
        self.lock().insert(key, record);
    }

    /// Current content of a record
    pub fn snapshot(&self, namespace: &str, name: &str) -> Option<CoordinationRecord> {
        self.lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RecordKey, CoordinationRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CoordinationClient for MemoryStore {
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<CoordinationRecord, ClientError> {
        self.snapshot(namespace, name)
            .ok_or_else(|| ClientError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    async fn create(
        &self,
        mut record: CoordinationRecord,
    ) -> Result<CoordinationRecord, ClientError> {
        let mut records = self.lock();
        let key = (record.namespace.clone(), record.name.clone());
        if records.contains_key(&key) {
            return Err(ClientError::AlreadyExists {
                namespace: record.namespace,
                name: record.name,
            });
        }
        record.resource_version = 1;
        records.insert(key, record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        mut record: CoordinationRecord,
    ) -> Result<CoordinationRecord, ClientError> {
        let mut records = self.lock();
        let key = (record.namespace.clone(), record.name.clone());
        let stored = records.get(&key).ok_or_else(|| ClientError::NotFound {
            namespace: record.namespace.clone(),
            name: record.name.clone(),
        })?;
        if stored.resource_version != record.resource_version {
            return Err(ClientError::Conflict {
                namespace: record.namespace,
                name: record.name,
                expected: record.resource_version,
                found: stored.resource_version,
            });
        }
        record.resource_version += 1;
        records.insert(key, record.clone());
        Ok(record)
    }
}

#[async_trait]
impl CoordinationBackend for MemoryStore {
    async fn client(&self) -> Result<Arc<dyn CoordinationClient>, ClientError> {
        Ok(Arc::new(self.clone()))
    }

    fn resources_namespace(&self) -> String {
        self.namespace.clone()
    }
}
