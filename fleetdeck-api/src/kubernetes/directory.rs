//! Cluster directory: where cluster records and credentials come from

use crate::kubernetes::error::{K8sError, K8sResult};
use async_trait::async_trait;
use fleetdeck_common::{ClusterCredentials, ClusterId, ClusterRecord};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// Lookup of registered clusters
#[async_trait]
pub trait ClusterDirectory: Send + Sync {
    /// Fetch a cluster's record, including credentials
    async fn get(&self, cluster_id: &ClusterId) -> K8sResult<ClusterRecord>;

    /// Ids of every registered cluster
    async fn list_ids(&self) -> K8sResult<Vec<ClusterId>>;
}

/// Directory held in memory, for embedding and tests
#[derive(Default)]
pub struct InMemoryClusterDirectory {
    records: RwLock<HashMap<ClusterId, ClusterRecord>>,
}

impl InMemoryClusterDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: ClusterRecord) {
        self.records.write().await.insert(record.id.clone(), record);
    }

    pub async fn remove(&self, cluster_id: &ClusterId) -> Option<ClusterRecord> {
        self.records.write().await.remove(cluster_id)
    }
}

#[async_trait]
impl ClusterDirectory for InMemoryClusterDirectory {
    async fn get(&self, cluster_id: &ClusterId) -> K8sResult<ClusterRecord> {
        self.records
            .read()
            .await
            .get(cluster_id)
            .cloned()
            .ok_or_else(|| K8sError::ClusterNotFound(cluster_id.to_string()))
    }

    async fn list_ids(&self) -> K8sResult<Vec<ClusterId>> {
        Ok(self.records.read().await.keys().cloned().collect())
    }
}

#[derive(Debug, Deserialize)]
struct ClustersFile {
    #[serde(default)]
    clusters: Vec<ClusterEntry>,
}

#[derive(Debug, Deserialize)]
struct ClusterEntry {
    id: String,
    #[serde(default)]
    name: Option<String>,
    kubeconfig_path: PathBuf,
    #[serde(default)]
    context: Option<String>,
}

/// Directory backed by a TOML file of `[[clusters]]` entries
///
/// The file is re-read on every call so edits take effect without a restart.
/// Relative kubeconfig paths are resolved against the file's own directory.
#[derive(Debug, Clone)]
pub struct FileClusterDirectory {
    path: PathBuf,
}

impl FileClusterDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> K8sResult<ClustersFile> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            K8sError::Internal(format!(
                "Failed to read clusters file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        debug!(path = %self.path.display(), "Loaded clusters file");

        toml::from_str(&content).map_err(|e| {
            K8sError::Internal(format!(
                "Failed to parse clusters file {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn resolve(&self, kubeconfig_path: &Path) -> PathBuf {
        if kubeconfig_path.is_absolute() {
            return kubeconfig_path.to_path_buf();
        }
        self.path
            .parent()
            .map(|dir| dir.join(kubeconfig_path))
            .unwrap_or_else(|| kubeconfig_path.to_path_buf())
    }
}

#[async_trait]
impl ClusterDirectory for FileClusterDirectory {
    async fn get(&self, cluster_id: &ClusterId) -> K8sResult<ClusterRecord> {
        let file = self.load().await?;
        let entry = file
            .clusters
            .into_iter()
            .find(|entry| entry.id == cluster_id.as_str())
            .ok_or_else(|| K8sError::ClusterNotFound(cluster_id.to_string()))?;

        let kubeconfig_path = self.resolve(&entry.kubeconfig_path);
        let kubeconfig = tokio::fs::read_to_string(&kubeconfig_path).await.map_err(|e| {
            K8sError::InvalidKubeconfig(format!(
                "Failed to read kubeconfig {} for cluster '{}': {}",
                kubeconfig_path.display(),
                cluster_id,
                e
            ))
        })?;

        let mut credentials = ClusterCredentials::new(kubeconfig);
        credentials.context = entry.context;
        Ok(ClusterRecord::new(
            entry.id.clone(),
            entry.name.unwrap_or(entry.id),
            credentials,
        ))
    }

    async fn list_ids(&self) -> K8sResult<Vec<ClusterId>> {
        let file = self.load().await?;
        Ok(file
            .clusters
            .into_iter()
            .map(|entry| ClusterId::from(entry.id))
            .collect())
    }
}
