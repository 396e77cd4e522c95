use crate::client::{CoordinationBackend, CoordinationClient, CoordinationRecord};
use crate::error::ClientError;
use async_trait::async_trait;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::trace;

/// File-backed coordination store
///
/// Each record is a JSON file at `<root>/<namespace>/<name>.json`. Every
/// read-modify-write holds an exclusive lock on `<name>.lock` next to it, so
/// processes sharing the root directory see compare-and-swap semantics.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    namespace: String,
}

impl FileStore {
    /// Create a store rooted at `root` whose resources namespace is `namespace`
    pub fn new(root: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            namespace: namespace.into(),
        }
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn paths(&self, namespace: &str, name: &str) -> Result<(PathBuf, PathBuf), ClientError> {
        validate_segment(namespace)?;
        validate_segment(name)?;
        let dir = self.root.join(namespace);
        Ok((
            dir.join(format!("{}.json", name)),
            dir.join(format!("{}.lock", name)),
        ))
    }

    /// Run `op` on the record path while holding the record's lock file
    async fn locked<R, F>(&self, namespace: &str, name: &str, op: F) -> Result<R, ClientError>
    where
        R: Send + 'static,
        F: FnOnce(&Path) -> Result<R, ClientError> + Send + 'static,
    {
        let (record_path, lock_path) = self.paths(namespace, name)?;

        tokio::task::spawn_blocking(move || {
            if let Some(dir) = lock_path.parent() {
                fs::create_dir_all(dir)?;
            }
            let lock_file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&lock_path)?;
            lock_file.lock_exclusive()?;
            trace!("Locked {}", lock_path.display());

            // Lock is released when lock_file is dropped
            op(&record_path)
        })
        .await
        .map_err(|e| ClientError::Backend(format!("file store task failed: {}", e)))?
    }
}

fn validate_segment(segment: &str) -> Result<(), ClientError> {
    if segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains(['/', '\\'])
    {
        return Err(ClientError::Backend(format!(
            "invalid record path segment: {:?}",
            segment
        )));
    }
    Ok(())
}

fn read_record(path: &Path) -> Result<Option<CoordinationRecord>, ClientError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_record(path: &Path, record: &CoordinationRecord) -> Result<(), ClientError> {
    let tmp = path.with_extension("json.tmp");
    {
        let file = File::create(&tmp)?;
        serde_json::to_writer_pretty(&file, record)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[async_trait]
impl CoordinationClient for FileStore {
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<CoordinationRecord, ClientError> {
        let (ns, n) = (namespace.to_string(), name.to_string());
        self.locked(namespace, name, move |path| {
            read_record(path)?.ok_or(ClientError::NotFound {
                namespace: ns,
                name: n,
            })
        })
        .await
    }

    async fn create(
        &self,
        mut record: CoordinationRecord,
    ) -> Result<CoordinationRecord, ClientError> {
        let (namespace, name) = (record.namespace.clone(), record.name.clone());
        self.locked(&namespace, &name, move |path| {
            if read_record(path)?.is_some() {
                return Err(ClientError::AlreadyExists {
                    namespace: record.namespace,
                    name: record.name,
                });
            }
            record.resource_version = 1;
            write_record(path, &record)?;
            Ok(record)
        })
        .await
    }

    async fn update(
        &self,
        mut record: CoordinationRecord,
    ) -> Result<CoordinationRecord, ClientError> {
        let (namespace, name) = (record.namespace.clone(), record.name.clone());
        self.locked(&namespace, &name, move |path| {
            let stored = read_record(path)?.ok_or_else(|| ClientError::NotFound {
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
            write_record(path, &record)?;
            Ok(record)
        })
        .await
    }
}

#[async_trait]
impl CoordinationBackend for FileStore {
    async fn client(&self) -> Result<Arc<dyn CoordinationClient>, ClientError> {
        let dir = self.root.join(&self.namespace);
        tokio::task::spawn_blocking(move || {
            fs::create_dir_all(&dir).map_err(|e| {
                ClientError::Backend(format!(
                    "cannot prepare store directory {}: {}",
                    dir.display(),
                    e
                ))
            })
        })
        .await
        .map_err(|e| ClientError::Backend(format!("file store task failed: {}", e)))??;
        Ok(Arc::new(self.clone()))
    }

    fn resources_namespace(&self) -> String {
        self.namespace.clone()
    }
}
