//! Registry of per-cluster caches with single-flight creation

use super::cache::ClusterCache;
use super::kind::{describe_kinds, ResourceKind};
use super::store::Lister;
use crate::config::InformerConfig;
use crate::kubernetes::connection::ClusterConnectionFactory;
use crate::kubernetes::directory::ClusterDirectory;
use crate::kubernetes::error::{K8sError, K8sResult};
use crate::kubernetes::types::{CacheReadiness, Rollout};
use dashmap::DashMap;
use fleetdeck_common::{ClusterId, ClusterRecord};
use futures::future::{BoxFuture, FutureExt, Shared};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Node, Pod};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type Creation = Shared<BoxFuture<'static, K8sResult<Arc<ClusterCache>>>>;

/// One creation attempt and, once it succeeds, the live cache
///
/// The attempt runs in its own task, so callers that give up waiting do not
/// cancel it for the others.
struct CacheSlot {
    generation: u64,
    cancel: CancellationToken,
    created: Arc<OnceCell<Arc<ClusterCache>>>,
    creation: Creation,
}

impl CacheSlot {
    fn cache(&self) -> Option<Arc<ClusterCache>> {
        self.created.get().cloned()
    }
}

type Registry = DashMap<ClusterId, Arc<CacheSlot>>;

/// Owns at most one live cache per cluster
///
/// Concurrent `ensure_*` calls for the same cluster share one creation: the
/// factory is consulted once and every caller receives the same cache, or the
/// same error.
pub struct ClusterInformerManager {
    factory: Arc<dyn ClusterConnectionFactory>,
    directory: Option<Arc<dyn ClusterDirectory>>,
    config: InformerConfig,
    caches: Arc<Registry>,
    generations: AtomicU64,
}

impl ClusterInformerManager {
    pub fn new(factory: Arc<dyn ClusterConnectionFactory>, config: InformerConfig) -> Self {
        Self {
            factory,
            directory: None,
            config,
            caches: Arc::new(DashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    /// Attach a directory for id-based lookups and sweeping
    pub fn with_directory(mut self, directory: Arc<dyn ClusterDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn config(&self) -> &InformerConfig {
        &self.config
    }

    /// Return the cluster's cache, creating and starting it if needed
    ///
    /// A failed attempt is removed from the registry before its error is
    /// reported, so the next call dials again.
    pub async fn ensure_for_cluster(&self, record: &ClusterRecord) -> K8sResult<Arc<ClusterCache>> {
        let slot: Arc<CacheSlot> = self
            .caches
            .entry(record.id.clone())
            .or_insert_with(|| self.begin_creation(record))
            .clone();

        let cache = slot.creation.clone().await?;
        if cache.is_stopped() {
            return Err(K8sError::Stopped(record.id.to_string()));
        }
        Ok(cache)
    }

    fn begin_creation(&self, record: &ClusterRecord) -> Arc<CacheSlot> {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let created = Arc::new(OnceCell::new());
        let caches = Arc::clone(&self.caches);
        let attempt = create_cache(
            Arc::clone(&self.factory),
            self.config.clone(),
            record.clone(),
            cancel.clone(),
        );
        let cluster_id = record.id.clone();
        let publish = Arc::clone(&created);

        let task = tokio::spawn(async move {
            let result = attempt.await;
            match &result {
                Ok(cache) => {
                    let _ = publish.set(Arc::clone(cache));
                }
                Err(_) => {
                    caches.remove_if(&cluster_id, |_, slot| slot.generation == generation);
                }
            }
            result
        });

        let creation = async move {
            task.await.unwrap_or_else(|e| {
                Err(K8sError::Internal(format!("Cache creation task failed: {}", e)))
            })
        }
        .boxed()
        .shared();

        Arc::new(CacheSlot {
            generation,
            cancel,
            created,
            creation,
        })
    }

    /// Ensure the cache exists and wait for its required kinds to sync
    ///
    /// `timeout` bounds creation and sync together, and `cancel` is honoured
    /// throughout. Giving up never aborts the creation for other callers.
    pub async fn ensure_and_wait(
        &self,
        record: &ClusterRecord,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> K8sResult<Arc<ClusterCache>> {
        let deadline = Instant::now() + timeout;

        let cache = tokio::select! {
            _ = cancel.cancelled() => return Err(K8sError::Cancelled(record.id.to_string())),
            created = tokio::time::timeout_at(deadline, self.ensure_for_cluster(record)) => {
                match created {
                    Ok(res) => res?,
                    Err(_) => {
                        return Err(K8sError::NotReady {
                            cluster_id: record.id.to_string(),
                            pending: describe_kinds(&self.config.required_kinds),
                        })
                    }
                }
            }
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        cache.wait_ready(remaining, cancel).await?;
        Ok(cache)
    }

    /// Resolve the cluster through the directory, then ensure and wait
    pub async fn ensure_and_wait_by_id(
        &self,
        cluster_id: &ClusterId,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> K8sResult<Arc<ClusterCache>> {
        let directory = self
            .directory
            .as_ref()
            .ok_or_else(|| K8sError::Internal("no cluster directory configured".to_string()))?;
        let record = directory.get(cluster_id).await?;
        self.ensure_and_wait(&record, timeout, cancel).await
    }

    /// Stop the cluster's cache and forget it; unknown clusters are a no-op
    ///
    /// An attempt still in flight is cancelled and discards what it built.
    /// The cache is fully stopped before its slot is removed.
    pub async fn stop_for_cluster(&self, cluster_id: &ClusterId) {
        let Some(slot) = self.caches.get(cluster_id).map(|entry| entry.value().clone()) else {
            debug!(cluster_id = %cluster_id, "No cache registered, nothing to stop");
            return;
        };

        slot.cancel.cancel();
        if let Ok(cache) = slot.creation.clone().await {
            cache.stop().await;
        }
        self.caches
            .remove_if(cluster_id, |_, current| current.generation == slot.generation);
        info!(cluster_id = %cluster_id, "Cluster cache removed");
    }

    /// Replace the cluster's cache with one built from fresh credentials
    pub async fn rotate_credentials(&self, record: &ClusterRecord) -> K8sResult<Arc<ClusterCache>> {
        info!(cluster_id = %record.id, "Rotating cluster credentials");
        self.stop_for_cluster(&record.id).await;
        self.ensure_for_cluster(record).await
    }

    /// The running cache for a cluster, if one has been created
    pub fn get(&self, cluster_id: &ClusterId) -> Option<Arc<ClusterCache>> {
        self.caches.get(cluster_id).and_then(|slot| slot.value().cache())
    }

    pub fn is_registered(&self, cluster_id: &ClusterId) -> bool {
        self.caches.contains_key(cluster_id)
    }

    pub fn cluster_ids(&self) -> Vec<ClusterId> {
        self.caches.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Readiness of a registered cluster; `Pending` while its cache is being created
    pub fn readiness(&self, cluster_id: &ClusterId) -> Option<CacheReadiness> {
        let slot = self.caches.get(cluster_id)?.value().clone();
        Some(match slot.cache() {
            Some(cache) => cache.readiness(),
            None => CacheReadiness::pending(cluster_id.clone()),
        })
    }

    pub fn nodes_lister(&self, cluster_id: &ClusterId) -> Lister<Node> {
        self.get(cluster_id)
            .map(|cache| cache.nodes())
            .unwrap_or_else(|| Lister::unavailable(cluster_id.clone(), ResourceKind::Node))
    }

    pub fn pods_lister(&self, cluster_id: &ClusterId) -> Lister<Pod> {
        self.get(cluster_id)
            .map(|cache| cache.pods())
            .unwrap_or_else(|| Lister::unavailable(cluster_id.clone(), ResourceKind::Pod))
    }

    pub fn deployments_lister(&self, cluster_id: &ClusterId) -> Lister<Deployment> {
        self.get(cluster_id)
            .map(|cache| cache.deployments())
            .unwrap_or_else(|| Lister::unavailable(cluster_id.clone(), ResourceKind::Deployment))
    }

    pub fn statefulsets_lister(&self, cluster_id: &ClusterId) -> Lister<StatefulSet> {
        self.get(cluster_id)
            .map(|cache| cache.statefulsets())
            .unwrap_or_else(|| Lister::unavailable(cluster_id.clone(), ResourceKind::StatefulSet))
    }

    pub fn daemonsets_lister(&self, cluster_id: &ClusterId) -> Lister<DaemonSet> {
        self.get(cluster_id)
            .map(|cache| cache.daemonsets())
            .unwrap_or_else(|| Lister::unavailable(cluster_id.clone(), ResourceKind::DaemonSet))
    }

    pub fn jobs_lister(&self, cluster_id: &ClusterId) -> Lister<Job> {
        self.get(cluster_id)
            .map(|cache| cache.jobs())
            .unwrap_or_else(|| Lister::unavailable(cluster_id.clone(), ResourceKind::Job))
    }

    pub fn rollouts_lister(&self, cluster_id: &ClusterId) -> Lister<Rollout> {
        self.get(cluster_id)
            .map(|cache| cache.rollouts())
            .unwrap_or_else(|| Lister::unavailable(cluster_id.clone(), ResourceKind::Rollout))
    }

    /// Stop caches for clusters the directory no longer knows
    ///
    /// Returns the clusters that were stopped. A directory error, or a
    /// directory that lists no clusters at all, skips the sweep rather than
    /// treating every cluster as gone.
    pub async fn sweep_once(&self, directory: &dyn ClusterDirectory) -> K8sResult<Vec<ClusterId>> {
        let known: HashSet<ClusterId> = directory.list_ids().await?.into_iter().collect();
        if known.is_empty() && !self.caches.is_empty() {
            warn!(
                registered = self.caches.len(),
                "Cluster directory is empty, skipping sweep"
            );
            return Ok(Vec::new());
        }
        let stale: Vec<ClusterId> = self
            .cluster_ids()
            .into_iter()
            .filter(|id| !known.contains(id))
            .collect();

        for cluster_id in &stale {
            info!(cluster_id = %cluster_id, "Cluster no longer registered, stopping cache");
            self.stop_for_cluster(cluster_id).await;
        }
        Ok(stale)
    }

    /// Periodically sweep caches of deregistered clusters until `shutdown` fires
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        directory: Arc<dyn ClusterDirectory>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match manager.sweep_once(directory.as_ref()).await {
                    Ok(stopped) if !stopped.is_empty() => {
                        info!(count = stopped.len(), "Swept stale cluster caches");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Cluster sweep failed"),
                }
            }
            debug!("Cluster sweeper exited");
        })
    }

    /// Stop every cache; used on process shutdown
    pub async fn shutdown(&self) {
        let ids = self.cluster_ids();
        info!(count = ids.len(), "Stopping all cluster caches");
        futures::future::join_all(ids.iter().map(|id| self.stop_for_cluster(id))).await;
    }
}

async fn create_cache(
    factory: Arc<dyn ClusterConnectionFactory>,
    config: InformerConfig,
    record: ClusterRecord,
    cancel: CancellationToken,
) -> K8sResult<Arc<ClusterCache>> {
    debug!(cluster_id = %record.id, "Connecting to cluster");
    let connection = tokio::select! {
        _ = cancel.cancelled() => return Err(K8sError::Stopped(record.id.to_string())),
        connected = factory.connect(&record) => connected.map_err(|e| {
            error!(cluster_id = %record.id, error = %e, "Failed to connect to cluster");
            e
        })?,
    };

    let cache = Arc::new(ClusterCache::new(connection, config));
    cache.start().await?;
    if cancel.is_cancelled() {
        warn!(
            cluster_id = %record.id,
            "Cluster was stopped while its cache was created, discarding"
        );
        cache.stop().await;
        return Err(K8sError::Stopped(record.id.to_string()));
    }

    info!(cluster_id = %record.id, name = %record.name, "Cluster cache created");
    Ok(cache)
}
