//! Common test utilities: in-memory clusters driven from channels
#![allow(dead_code)]

use async_trait::async_trait;
use fleetdeck_api::config::InformerConfig;
use fleetdeck_api::kubernetes::types::{Rollout, RolloutSpec, RolloutStatus};
use fleetdeck_api::kubernetes::{
    ClusterConnection, ClusterConnectionFactory, ClusterInformerManager, K8sError, K8sResult,
    WatchStream,
};
use fleetdeck_common::{ClusterCredentials, ClusterId, ClusterRecord};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{
    Node, NodeCondition, NodeStatus, Pod, PodCondition, PodStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::watcher;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Watch events for one kind, pushed by the test
pub struct Feed<K> {
    tx: mpsc::UnboundedSender<K8sResult<watcher::Event<K>>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<K8sResult<watcher::Event<K>>>>>,
    opens: AtomicUsize,
    broken: AtomicBool,
}

impl<K: Send + 'static> Feed<K> {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            opens: AtomicUsize::new(0),
            broken: AtomicBool::new(false),
        }
    }

    /// First open streams the channel, later opens never yield
    fn open(&self) -> WatchStream<K> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.broken.load(Ordering::SeqCst) {
            panic!("watch stream crashed");
        }
        match self.rx.lock().unwrap().take() {
            Some(rx) => futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed(),
            None => futures::stream::pending().boxed(),
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn send(&self, event: watcher::Event<K>) {
        let _ = self.tx.send(Ok(event));
    }

    /// Deliver a complete initial list
    pub fn sync(&self, objects: Vec<K>) {
        self.send(watcher::Event::Init);
        for obj in objects {
            self.send(watcher::Event::InitApply(obj));
        }
        self.send(watcher::Event::InitDone);
    }

    /// Make the next open panic, killing the watch task
    pub fn crash_on_open(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    pub fn fail(&self, message: &str) {
        let _ = self.tx.send(Err(K8sError::WatchError(message.to_string())));
    }
}

/// How the fake answers the Rollout CRD check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discovery {
    Installed,
    Missing,
    Fails,
    Hangs,
}

/// A cluster whose watches are fed by the test
pub struct FakeCluster {
    pub id: ClusterId,
    pub discovery: Discovery,
    pub nodes: Feed<Node>,
    pub pods: Feed<Pod>,
    pub deployments: Feed<Deployment>,
    pub statefulsets: Feed<StatefulSet>,
    pub daemonsets: Feed<DaemonSet>,
    pub jobs: Feed<Job>,
    pub rollouts: Feed<Rollout>,
}

impl FakeCluster {
    pub fn new(id: &str) -> Arc<Self> {
        Self::with_discovery(id, Discovery::Installed)
    }

    pub fn without_rollouts(id: &str) -> Arc<Self> {
        Self::with_discovery(id, Discovery::Missing)
    }

    pub fn with_discovery(id: &str, discovery: Discovery) -> Arc<Self> {
        Arc::new(Self {
            id: ClusterId::from(id),
            discovery,
            nodes: Feed::new(),
            pods: Feed::new(),
            deployments: Feed::new(),
            statefulsets: Feed::new(),
            daemonsets: Feed::new(),
            jobs: Feed::new(),
            rollouts: Feed::new(),
        })
    }

    /// Complete the initial sync of every required kind with empty lists
    pub fn sync_required(&self) {
        self.nodes.sync(vec![]);
        self.pods.sync(vec![]);
        self.deployments.sync(vec![]);
    }
}

#[async_trait]
impl ClusterConnection for FakeCluster {
    fn cluster_id(&self) -> &ClusterId {
        &self.id
    }

    async fn rollouts_available(&self) -> K8sResult<bool> {
        match self.discovery {
            Discovery::Installed => Ok(true),
            Discovery::Missing => Ok(false),
            Discovery::Fails => Err(K8sError::Internal("discovery unavailable".to_string())),
            Discovery::Hangs => futures::future::pending().await,
        }
    }

    fn watch_nodes(&self) -> WatchStream<Node> {
        self.nodes.open()
    }

    fn watch_pods(&self) -> WatchStream<Pod> {
        self.pods.open()
    }

    fn watch_deployments(&self) -> WatchStream<Deployment> {
        self.deployments.open()
    }

    fn watch_statefulsets(&self) -> WatchStream<StatefulSet> {
        self.statefulsets.open()
    }

    fn watch_daemonsets(&self) -> WatchStream<DaemonSet> {
        self.daemonsets.open()
    }

    fn watch_jobs(&self) -> WatchStream<Job> {
        self.jobs.open()
    }

    fn watch_rollouts(&self) -> WatchStream<Rollout> {
        self.rollouts.open()
    }
}

/// Factory handing out registered fake clusters and counting connects
#[derive(Default)]
pub struct CountingFactory {
    clusters: Mutex<HashMap<ClusterId, Arc<FakeCluster>>>,
    connects: AtomicUsize,
    refusals: AtomicUsize,
    delay: Duration,
}

impl CountingFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Default::default()
        })
    }

    /// Refuse the next `count` connects even for registered clusters
    pub fn refuse_next(&self, count: usize) {
        self.refusals.store(count, Ordering::SeqCst);
    }

    pub fn register(&self, cluster: Arc<FakeCluster>) {
        self.clusters
            .lock()
            .unwrap()
            .insert(cluster.id.clone(), cluster);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterConnectionFactory for CountingFactory {
    async fn connect(&self, record: &ClusterRecord) -> K8sResult<Arc<dyn ClusterConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let cluster = if refused {
            None
        } else {
            self.clusters.lock().unwrap().get(&record.id).cloned()
        };
        match cluster {
            Some(cluster) => Ok(cluster as Arc<dyn ClusterConnection>),
            None => Err(K8sError::Connection {
                cluster_id: record.id.to_string(),
                reason: "connection refused".to_string(),
            }),
        }
    }
}

pub fn test_config() -> InformerConfig {
    InformerConfig {
        backoff_initial_ms: 100,
        backoff_max_ms: 1_000,
        backoff_jitter: 0.0,
        stop_grace_secs: 1,
        ..Default::default()
    }
}

pub fn manager(factory: Arc<CountingFactory>) -> ClusterInformerManager {
    ClusterInformerManager::new(factory, test_config())
}

pub fn record(id: &str) -> ClusterRecord {
    ClusterRecord::new(id, format!("cluster {}", id), ClusterCredentials::new("apiVersion: v1"))
}

fn meta(namespace: Option<&str>, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(String::from),
        ..Default::default()
    }
}

pub fn node(name: &str, ready: bool) -> Node {
    Node {
        metadata: meta(None, name),
        status: Some(NodeStatus {
            conditions: Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn pod(namespace: &str, name: &str, phase: &str, ready: bool) -> Pod {
    Pod {
        metadata: meta(Some(namespace), name),
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            conditions: ready.then(|| {
                vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: "True".to_string(),
                    ..Default::default()
                }]
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn rollout(namespace: &str, name: &str, replicas: i32, ready: i32) -> Rollout {
    let mut rollout = Rollout::new(
        name,
        RolloutSpec {
            replicas: Some(replicas),
            paused: None,
        },
    );
    rollout.metadata.namespace = Some(namespace.to_string());
    rollout.status = Some(RolloutStatus {
        ready_replicas: Some(ready),
        ..Default::default()
    });
    rollout
}
