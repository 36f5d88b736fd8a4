//! Kubernetes client wrapper
//!
//! Wraps the kube-rs Client with cluster context and implements the
//! connection seam the informer layer watches through.

use super::connection::{ClusterConnection, ClusterConnectionFactory, WatchStream};
use super::error::{K8sError, K8sResult};
use super::types::{Rollout, ROLLOUT_API_GROUP_VERSION, ROLLOUT_PLURAL};
use async_trait::async_trait;
use fleetdeck_common::{ClusterId, ClusterRecord};
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::Api;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::runtime::watcher;
use kube::{Client, Config, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::info;

/// Wrapper around kube-rs Client with cluster context
#[derive(Clone)]
pub struct K8sClient {
    inner: Client,
    cluster_id: ClusterId,
    cluster_name: String,
    api_server: String,
}

impl K8sClient {
    /// Create client from kubeconfig YAML with optional context
    pub async fn from_kubeconfig(
        kubeconfig_yaml: &str,
        context: Option<&str>,
        cluster_id: ClusterId,
        cluster_name: String,
    ) -> K8sResult<Self> {
        let kubeconfig = Kubeconfig::from_yaml(kubeconfig_yaml).map_err(|e| {
            K8sError::InvalidKubeconfig(format!("Failed to parse kubeconfig: {}", e))
        })?;

        let api_server = Self::extract_api_server(&kubeconfig, context)?;

        let config = Config::from_custom_kubeconfig(
            kubeconfig,
            &KubeConfigOptions {
                context: context.map(String::from),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| K8sError::InvalidKubeconfig(format!("Failed to create config: {}", e)))?;

        let client = Client::try_from(config)
            .map_err(|e| K8sError::InvalidKubeconfig(format!("Failed to create client: {}", e)))?;

        Ok(Self {
            inner: client,
            cluster_id,
            cluster_name,
            api_server,
        })
    }

    /// Extract API server URL from kubeconfig
    fn extract_api_server(kubeconfig: &Kubeconfig, context_name: Option<&str>) -> K8sResult<String> {
        let context_name = context_name
            .map(String::from)
            .or_else(|| kubeconfig.current_context.clone())
            .ok_or_else(|| {
                K8sError::InvalidKubeconfig("No context specified and no current-context".into())
            })?;

        let context = kubeconfig
            .contexts
            .iter()
            .find(|c| c.name == context_name)
            .ok_or_else(|| {
                K8sError::InvalidKubeconfig(format!("Context '{}' not found", context_name))
            })?;

        let cluster_name = context
            .context
            .as_ref()
            .map(|c| c.cluster.as_str())
            .ok_or_else(|| K8sError::InvalidKubeconfig("Context has no cluster reference".into()))?;

        let cluster = kubeconfig
            .clusters
            .iter()
            .find(|c| c.name == cluster_name)
            .ok_or_else(|| {
                K8sError::InvalidKubeconfig(format!("Cluster '{}' not found", cluster_name))
            })?;

        cluster
            .cluster
            .as_ref()
            .and_then(|c| c.server.clone())
            .ok_or_else(|| K8sError::InvalidKubeconfig("Cluster has no server URL".into()))
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn api_server(&self) -> &str {
        &self.api_server
    }

    /// Cluster-wide watch of one kind
    fn watch_all<K>(&self) -> WatchStream<K>
    where
        K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    {
        let api: Api<K> = Api::all(self.inner.clone());
        watcher(api, watcher::Config::default().any_semantic())
            .map_err(|e| K8sError::WatchError(e.to_string()))
            .boxed()
    }
}

impl std::fmt::Debug for K8sClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("K8sClient")
            .field("cluster_id", &self.cluster_id)
            .field("cluster_name", &self.cluster_name)
            .field("api_server", &self.api_server)
            .finish()
    }
}

#[async_trait]
impl ClusterConnection for K8sClient {
    fn cluster_id(&self) -> &ClusterId {
        &self.cluster_id
    }

    async fn rollouts_available(&self) -> K8sResult<bool> {
        match self.inner.list_api_group_resources(ROLLOUT_API_GROUP_VERSION).await {
            Ok(list) => Ok(list.resources.iter().any(|r| r.name == ROLLOUT_PLURAL)),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn watch_nodes(&self) -> WatchStream<Node> {
        self.watch_all()
    }

    fn watch_pods(&self) -> WatchStream<Pod> {
        self.watch_all()
    }

    fn watch_deployments(&self) -> WatchStream<Deployment> {
        self.watch_all()
    }

    fn watch_statefulsets(&self) -> WatchStream<StatefulSet> {
        self.watch_all()
    }

    fn watch_daemonsets(&self) -> WatchStream<DaemonSet> {
        self.watch_all()
    }

    fn watch_jobs(&self) -> WatchStream<Job> {
        self.watch_all()
    }

    fn watch_rollouts(&self) -> WatchStream<Rollout> {
        self.watch_all()
    }
}

/// Builds a fresh kube-rs client from each record's kubeconfig
///
/// Nothing is cached here: every cache creation gets a new client, which is
/// what lets a credential rotation take effect.
#[derive(Debug, Default, Clone)]
pub struct KubeconfigConnectionFactory;

impl KubeconfigConnectionFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ClusterConnectionFactory for KubeconfigConnectionFactory {
    async fn connect(&self, record: &ClusterRecord) -> K8sResult<Arc<dyn ClusterConnection>> {
        let client = K8sClient::from_kubeconfig(
            &record.credentials.kubeconfig,
            record.credentials.context.as_deref(),
            record.id.clone(),
            record.name.clone(),
        )
        .await
        .map_err(|e| K8sError::Connection {
            cluster_id: record.id.to_string(),
            reason: e.to_string(),
        })?;

        info!(
            cluster_id = %record.id,
            api_server = %client.api_server(),
            "Connected to cluster '{}'",
            client.cluster_name()
        );
        Ok(Arc::new(client) as Arc<dyn ClusterConnection>)
    }
}
