//! Snapshot archive
//!
//! One pretty-printed JSON document per account per run, partitioned by
//! date and hour. Stores must never overwrite an existing object.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::directory::GroupNode;
use crate::error::PublishError;
use crate::orchestrator::CollectionResult;

/// Write-once object store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `key`; fails with `AlreadyExists` if the key is taken
    async fn put_new(&self, key: &str, body: Vec<u8>) -> Result<(), PublishError>;
}

pub struct ArchiveWriter {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ArchiveWriter {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into().trim_matches('/').to_string(),
        }
    }

    /// `<prefix>/date=YYYY-MM-DD/hour=HH/account=<id>/<run_id>.json`
    pub fn key_for(&self, result: &CollectionResult) -> String {
        let partition = format!(
            "date={}/hour={}/account={}/{}.json",
            result.collected_at.format("%Y-%m-%d"),
            result.collected_at.format("%H"),
            result.account.id,
            result.run_id
        );
        self.prefixed(partition)
    }

    /// `<prefix>/hierarchy/date=YYYY-MM-DD/<run_id>.json`
    pub fn hierarchy_key(&self, run_id: Uuid, at: DateTime<Utc>) -> String {
        self.prefixed(format!("hierarchy/date={}/{}.json", at.format("%Y-%m-%d"), run_id))
    }

    fn prefixed(&self, partition: String) -> String {
        if self.prefix.is_empty() {
            partition
        } else {
            format!("{}/{}", self.prefix, partition)
        }
    }

    /// Archive `result`, returning the key written
    pub async fn write(&self, result: &CollectionResult) -> Result<String, PublishError> {
        let key = self.key_for(result);
        let body = serde_json::to_vec_pretty(result)?;
        self.store.put_new(&key, body).await?;
        debug!(account_id = %result.account_id(), key = %key, "Archived snapshot");
        Ok(key)
    }

    /// Archive the organization tree seen by run `run_id`
    pub async fn write_hierarchy(
        &self,
        run_id: Uuid,
        at: DateTime<Utc>,
        tree: &GroupNode,
    ) -> Result<String, PublishError> {
        let key = self.hierarchy_key(run_id, at);
        let body = serde_json::to_vec_pretty(tree)?;
        self.store.put_new(&key, body).await?;
        debug!(key = %key, groups = tree.node_count(), "Archived organization hierarchy");
        Ok(key)
    }
}

/// Object store rooted at a local directory
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|part| !part.is_empty() && *part != "..")
            .fold(self.root.clone(), |path, part| path.join(part))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put_new(&self, key: &str, body: Vec<u8>) -> Result<(), PublishError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => PublishError::AlreadyExists(key.to_string()),
                _ => PublishError::Io(e),
            })?;

        file.write_all(&body).await?;
        file.flush().await?;
        Ok(())
    }
}
