//! Connection seams between the informer layer and a cluster's API server
//!
//! The informer manager never builds clients itself. It asks a
//! [`ClusterConnectionFactory`] for a fresh [`ClusterConnection`] each time a
//! cache is created, which lets tests drive watches from in-memory channels.

use crate::kubernetes::error::K8sResult;
use crate::kubernetes::types::Rollout;
use async_trait::async_trait;
use fleetdeck_common::{ClusterId, ClusterRecord};
use futures::stream::BoxStream;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::runtime::watcher;
use std::sync::Arc;

/// Stream of watch events for one kind across all namespaces
///
/// An `Err` item is a failed attempt; the stream may keep yielding after it.
/// Stream exhaustion means the watch has to be reopened.
pub type WatchStream<K> = BoxStream<'static, K8sResult<watcher::Event<K>>>;

/// A live connection to one cluster
#[async_trait]
pub trait ClusterConnection: Send + Sync {
    fn cluster_id(&self) -> &ClusterId;

    /// Whether the cluster serves the Argo Rollouts CRD
    async fn rollouts_available(&self) -> K8sResult<bool>;

    fn watch_nodes(&self) -> WatchStream<Node>;
    fn watch_pods(&self) -> WatchStream<Pod>;
    fn watch_deployments(&self) -> WatchStream<Deployment>;
    fn watch_statefulsets(&self) -> WatchStream<StatefulSet>;
    fn watch_daemonsets(&self) -> WatchStream<DaemonSet>;
    fn watch_jobs(&self) -> WatchStream<Job>;
    fn watch_rollouts(&self) -> WatchStream<Rollout>;
}

/// Builds connections from cluster records
#[async_trait]
pub trait ClusterConnectionFactory: Send + Sync {
    async fn connect(&self, record: &ClusterRecord) -> K8sResult<Arc<dyn ClusterConnection>>;
}
