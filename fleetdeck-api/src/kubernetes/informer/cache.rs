//! Per-cluster cache: one watch per resource kind, shared lifecycle

use super::kind::{describe_kinds, KindState, ResourceKind};
use super::store::Lister;
use super::watch::KindWatch;
use crate::config::InformerConfig;
use crate::kubernetes::connection::{ClusterConnection, WatchStream};
use crate::kubernetes::error::{K8sError, K8sResult};
use crate::kubernetes::types::{CacheReadiness, CacheStatus, Rollout};
use fleetdeck_common::ClusterId;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::runtime::reflector::{self, Store};
use kube::Resource;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reader half of one kind: its store and its state
struct KindSlot<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    store: Store<K>,
    state: watch::Receiver<KindState>,
}

fn kind_slot<K>(cluster_id: &ClusterId, kind: ResourceKind) -> (KindSlot<K>, KindWatch<K>)
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    let (store, writer) = reflector::store::<K>();
    let (state_tx, state_rx) = watch::channel(KindState::Pending);
    (
        KindSlot {
            store,
            state: state_rx,
        },
        KindWatch {
            cluster_id: cluster_id.clone(),
            kind,
            writer,
            state: state_tx,
        },
    )
}

/// Writer halves held until the cache is started
struct UnstartedWatches {
    nodes: KindWatch<Node>,
    pods: KindWatch<Pod>,
    deployments: KindWatch<Deployment>,
    statefulsets: KindWatch<StatefulSet>,
    daemonsets: KindWatch<DaemonSet>,
    jobs: KindWatch<Job>,
    rollouts: KindWatch<Rollout>,
}

impl UnstartedWatches {
    fn mark_stopped(self) {
        self.nodes.state.send_replace(KindState::Stopped);
        self.pods.state.send_replace(KindState::Stopped);
        self.deployments.state.send_replace(KindState::Stopped);
        self.statefulsets.state.send_replace(KindState::Stopped);
        self.daemonsets.state.send_replace(KindState::Stopped);
        self.jobs.state.send_replace(KindState::Stopped);
        self.rollouts.state.send_replace(KindState::Stopped);
    }
}

/// Cached, watch-backed view of one cluster
///
/// Every watch shares the cache's cancellation token, so stopping the cache
/// releases all of them together. Listers are handed out only for kinds that
/// completed an initial sync and only while the cache is running.
pub struct ClusterCache {
    cluster_id: ClusterId,
    connection: Arc<dyn ClusterConnection>,
    config: InformerConfig,
    cancel: CancellationToken,
    started: AtomicBool,
    unstarted: Mutex<Option<UnstartedWatches>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    nodes: KindSlot<Node>,
    pods: KindSlot<Pod>,
    deployments: KindSlot<Deployment>,
    statefulsets: KindSlot<StatefulSet>,
    daemonsets: KindSlot<DaemonSet>,
    jobs: KindSlot<Job>,
    rollouts: KindSlot<Rollout>,
}

impl ClusterCache {
    pub fn new(connection: Arc<dyn ClusterConnection>, config: InformerConfig) -> Self {
        let cluster_id = connection.cluster_id().clone();

        let (nodes, nodes_watch) = kind_slot(&cluster_id, ResourceKind::Node);
        let (pods, pods_watch) = kind_slot(&cluster_id, ResourceKind::Pod);
        let (deployments, deployments_watch) = kind_slot(&cluster_id, ResourceKind::Deployment);
        let (statefulsets, statefulsets_watch) = kind_slot(&cluster_id, ResourceKind::StatefulSet);
        let (daemonsets, daemonsets_watch) = kind_slot(&cluster_id, ResourceKind::DaemonSet);
        let (jobs, jobs_watch) = kind_slot(&cluster_id, ResourceKind::Job);
        let (rollouts, rollouts_watch) = kind_slot(&cluster_id, ResourceKind::Rollout);

        Self {
            cluster_id,
            connection,
            config,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            unstarted: Mutex::new(Some(UnstartedWatches {
                nodes: nodes_watch,
                pods: pods_watch,
                deployments: deployments_watch,
                statefulsets: statefulsets_watch,
                daemonsets: daemonsets_watch,
                jobs: jobs_watch,
                rollouts: rollouts_watch,
            })),
            tasks: Mutex::new(Vec::new()),
            nodes,
            pods,
            deployments,
            statefulsets,
            daemonsets,
            jobs,
            rollouts,
        }
    }

    pub fn cluster_id(&self) -> &ClusterId {
        &self.cluster_id
    }

    /// Launch one watch per kind; later calls are no-ops
    ///
    /// Returns without touching the network. The Rollout watch runs behind
    /// its own CRD check, so the built-in kinds never wait on discovery. When
    /// the CRD is missing, tracking is disabled, or discovery fails, Rollout
    /// is marked `Unavailable` for the lifetime of this cache.
    pub async fn start(&self) -> K8sResult<()> {
        let mut unstarted = self.unstarted.lock().await;
        if self.is_stopped() {
            return Err(K8sError::Stopped(self.cluster_id.to_string()));
        }
        let Some(watches) = unstarted.take() else {
            return Ok(());
        };

        let mut tasks = self.tasks.lock().await;
        let conn = &self.connection;
        tasks.push(self.spawn_watch(watches.nodes, {
            let conn = conn.clone();
            move || conn.watch_nodes()
        }));
        tasks.push(self.spawn_watch(watches.pods, {
            let conn = conn.clone();
            move || conn.watch_pods()
        }));
        tasks.push(self.spawn_watch(watches.deployments, {
            let conn = conn.clone();
            move || conn.watch_deployments()
        }));
        tasks.push(self.spawn_watch(watches.statefulsets, {
            let conn = conn.clone();
            move || conn.watch_statefulsets()
        }));
        tasks.push(self.spawn_watch(watches.daemonsets, {
            let conn = conn.clone();
            move || conn.watch_daemonsets()
        }));
        tasks.push(self.spawn_watch(watches.jobs, {
            let conn = conn.clone();
            move || conn.watch_jobs()
        }));
        tasks.push(self.spawn_rollout_watch(watches.rollouts));

        self.started.store(true, Ordering::SeqCst);
        info!(
            cluster_id = %self.cluster_id,
            watches = tasks.len(),
            "Cluster cache started"
        );
        Ok(())
    }

    fn spawn_rollout_watch(&self, kind_watch: KindWatch<Rollout>) -> JoinHandle<()> {
        let connection = self.connection.clone();
        let cancel = self.cancel.clone();
        let tuning = self.config.watch_tuning();
        let track = self.config.track_rollouts;

        tokio::spawn(async move {
            if !track {
                debug!(cluster_id = %kind_watch.cluster_id, "Rollout tracking disabled");
                kind_watch.state.send_replace(KindState::Unavailable);
                return;
            }

            let served = tokio::select! {
                _ = cancel.cancelled() => {
                    kind_watch.state.send_replace(KindState::Stopped);
                    return;
                }
                served = detect_rollouts(connection.as_ref()) => served,
            };

            if served {
                kind_watch
                    .run(move || connection.watch_rollouts(), tuning, cancel)
                    .await;
            } else {
                kind_watch.state.send_replace(KindState::Unavailable);
            }
        })
    }

    fn spawn_watch<K, F>(&self, kind_watch: KindWatch<K>, open: F) -> JoinHandle<()>
    where
        K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
        F: FnMut() -> WatchStream<K> + Send + 'static,
    {
        tokio::spawn(kind_watch.run(open, self.config.watch_tuning(), self.cancel.clone()))
    }

    /// Wait until every required kind has completed its initial sync
    ///
    /// Never starts the cache. Fails with `NotReady` on timeout (a zero
    /// timeout only succeeds if the cache is already ready), `Cancelled` when
    /// `cancel` fires, and `Stopped` if the cache is stopped meanwhile.
    pub async fn wait_ready(&self, timeout: Duration, cancel: &CancellationToken) -> K8sResult<()> {
        let required = self.config.required_kinds.clone();
        let mut receivers: Vec<_> = required.iter().map(|kind| self.subscribe(*kind)).collect();

        let settled = async move {
            for rx in receivers.iter_mut() {
                let open = rx.wait_for(KindState::is_settled).await.is_ok();
                if !open {
                    break;
                }
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(K8sError::Cancelled(self.cluster_id.to_string())),
            res = tokio::time::timeout(timeout, settled) => match res {
                Ok(()) if self.is_stopped() => Err(K8sError::Stopped(self.cluster_id.to_string())),
                // Also reached when a watch died and dropped its sender before Ready
                _ => self.check_required(&required),
            },
        }
    }

    fn check_required(&self, required: &[ResourceKind]) -> K8sResult<()> {
        let pending = self.readiness().pending_kinds(required);
        if pending.is_empty() {
            return Ok(());
        }
        Err(K8sError::NotReady {
            cluster_id: self.cluster_id.to_string(),
            pending: describe_kinds(&pending),
        })
    }

    /// Cancel every watch and wait for them to exit; safe to call repeatedly
    ///
    /// Watches that outlive the configured grace period are aborted.
    pub async fn stop(&self) {
        self.cancel.cancel();

        // Waits out an in-flight start, after which nothing new is spawned
        if let Some(watches) = self.unstarted.lock().await.take() {
            watches.mark_stopped();
        }

        let mut tasks = self.tasks.lock().await;
        let handles = std::mem::take(&mut *tasks);
        if handles.is_empty() {
            return;
        }

        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        let grace = self.config.stop_grace();
        match tokio::time::timeout(grace, futures::future::join_all(handles)).await {
            Ok(_) => debug!(cluster_id = %self.cluster_id, "All watches exited"),
            Err(_) => {
                warn!(
                    cluster_id = %self.cluster_id,
                    grace_secs = grace.as_secs(),
                    "Watches did not exit within grace period, aborting"
                );
                for handle in aborts {
                    handle.abort();
                }
            }
        }

        info!(cluster_id = %self.cluster_id, "Cluster cache stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn kind_state(&self, kind: ResourceKind) -> KindState {
        *self.receiver_ref(kind).borrow()
    }

    fn receiver_ref(&self, kind: ResourceKind) -> &watch::Receiver<KindState> {
        match kind {
            ResourceKind::Node => &self.nodes.state,
            ResourceKind::Pod => &self.pods.state,
            ResourceKind::Deployment => &self.deployments.state,
            ResourceKind::StatefulSet => &self.statefulsets.state,
            ResourceKind::DaemonSet => &self.daemonsets.state,
            ResourceKind::Job => &self.jobs.state,
            ResourceKind::Rollout => &self.rollouts.state,
        }
    }

    /// Follow one kind's state changes
    pub fn subscribe(&self, kind: ResourceKind) -> watch::Receiver<KindState> {
        self.receiver_ref(kind).clone()
    }

    pub fn status(&self) -> CacheStatus {
        if self.is_stopped() {
            return CacheStatus::Stopped;
        }
        if !self.started.load(Ordering::SeqCst) {
            return CacheStatus::Pending;
        }

        let states: Vec<KindState> = self
            .config
            .required_kinds
            .iter()
            .map(|kind| self.kind_state(*kind))
            .collect();
        if states.iter().all(|s| *s == KindState::Ready) {
            CacheStatus::Ready
        } else if states.iter().any(|s| *s == KindState::Failed) {
            CacheStatus::Failed
        } else {
            CacheStatus::Syncing
        }
    }

    pub fn readiness(&self) -> CacheReadiness {
        let kinds: BTreeMap<_, _> = ResourceKind::ALL
            .iter()
            .map(|kind| (*kind, self.kind_state(*kind)))
            .collect();
        let status = self.status();
        CacheReadiness {
            cluster_id: self.cluster_id.clone(),
            status,
            ready: status == CacheStatus::Ready,
            kinds,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status() == CacheStatus::Ready
    }

    fn lister<K>(&self, kind: ResourceKind, slot: &KindSlot<K>) -> Lister<K>
    where
        K: Resource<DynamicType = ()> + Clone + 'static,
    {
        let synced = *slot.state.borrow() == KindState::Ready;
        if synced && !self.is_stopped() {
            Lister::new(self.cluster_id.clone(), kind, slot.store.clone())
        } else {
            Lister::unavailable(self.cluster_id.clone(), kind)
        }
    }

    pub fn nodes(&self) -> Lister<Node> {
        self.lister(ResourceKind::Node, &self.nodes)
    }

    pub fn pods(&self) -> Lister<Pod> {
        self.lister(ResourceKind::Pod, &self.pods)
    }

    pub fn deployments(&self) -> Lister<Deployment> {
        self.lister(ResourceKind::Deployment, &self.deployments)
    }

    pub fn statefulsets(&self) -> Lister<StatefulSet> {
        self.lister(ResourceKind::StatefulSet, &self.statefulsets)
    }

    pub fn daemonsets(&self) -> Lister<DaemonSet> {
        self.lister(ResourceKind::DaemonSet, &self.daemonsets)
    }

    pub fn jobs(&self) -> Lister<Job> {
        self.lister(ResourceKind::Job, &self.jobs)
    }

    pub fn rollouts(&self) -> Lister<Rollout> {
        self.lister(ResourceKind::Rollout, &self.rollouts)
    }
}

impl std::fmt::Debug for ClusterCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterCache")
            .field("cluster_id", &self.cluster_id)
            .field("status", &self.status())
            .finish()
    }
}

async fn detect_rollouts(connection: &dyn ClusterConnection) -> bool {
    let cluster_id = connection.cluster_id();
    match connection.rollouts_available().await {
        Ok(true) => true,
        Ok(false) => {
            let reason = K8sError::KindUnavailable {
                cluster_id: cluster_id.to_string(),
                kind: ResourceKind::Rollout,
            };
            info!(cluster_id = %cluster_id, "{}, Rollout CRD not installed", reason);
            false
        }
        Err(e) => {
            warn!(
                cluster_id = %cluster_id,
                error = %e,
                "Rollout CRD discovery failed, treating rollouts as unavailable"
            );
            false
        }
    }
}
