//! Kubernetes-facing types shared across the informer and snapshot layers

use crate::kubernetes::informer::{KindState, ResourceKind};
use fleetdeck_common::ClusterId;
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Argo Rollouts `Rollout`, reduced to the fields a summary needs
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize)]
#[kube(
    group = "argoproj.io",
    version = "v1alpha1",
    kind = "Rollout",
    namespaced,
    status = "RolloutStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct RolloutSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
}

/// Observed state of a Rollout
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_replicas: Option<i32>,
}

pub const ROLLOUT_API_GROUP_VERSION: &str = "argoproj.io/v1alpha1";
pub const ROLLOUT_PLURAL: &str = "rollouts";

/// Cluster health rollup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

/// Overall state of a cluster cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    /// Created but watches not started
    Pending,
    /// Some required kind has not finished its initial sync
    Syncing,
    /// Every required kind is serving data
    Ready,
    /// A required kind keeps failing before its first sync
    Failed,
    Stopped,
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheStatus::Pending => write!(f, "pending"),
            CacheStatus::Syncing => write!(f, "syncing"),
            CacheStatus::Ready => write!(f, "ready"),
            CacheStatus::Failed => write!(f, "failed"),
            CacheStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Readiness report for one cluster cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheReadiness {
    pub cluster_id: ClusterId,
    pub status: CacheStatus,
    pub ready: bool,
    pub kinds: BTreeMap<ResourceKind, KindState>,
}

impl CacheReadiness {
    /// Report for a cluster whose cache is still being created
    pub fn pending(cluster_id: ClusterId) -> Self {
        Self {
            cluster_id,
            status: CacheStatus::Pending,
            ready: false,
            kinds: ResourceKind::ALL
                .iter()
                .map(|kind| (*kind, KindState::Pending))
                .collect(),
        }
    }

    /// Kinds a waiter is still blocked on
    pub fn pending_kinds(&self, required: &[ResourceKind]) -> Vec<ResourceKind> {
        required
            .iter()
            .copied()
            .filter(|kind| self.kinds.get(kind) != Some(&KindState::Ready))
            .collect()
    }
}
