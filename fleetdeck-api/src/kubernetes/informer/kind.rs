//! Resource kinds tracked per cluster and the lifecycle of their watches

use serde::{Deserialize, Serialize};
use std::fmt;

/// A resource kind with its own watch inside a cluster cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Node,
    Pod,
    Deployment,
    StatefulSet,
    DaemonSet,
    Job,
    Rollout,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::Node,
        ResourceKind::Pod,
        ResourceKind::Deployment,
        ResourceKind::StatefulSet,
        ResourceKind::DaemonSet,
        ResourceKind::Job,
        ResourceKind::Rollout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Node => "node",
            ResourceKind::Pod => "pod",
            ResourceKind::Deployment => "deployment",
            ResourceKind::StatefulSet => "statefulset",
            ResourceKind::DaemonSet => "daemonset",
            ResourceKind::Job => "job",
            ResourceKind::Rollout => "rollout",
        }
    }

    /// Kinds backed by a CRD that may be missing from a cluster
    pub fn is_optional(&self) -> bool {
        matches!(self, ResourceKind::Rollout)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a single kind's watch
///
/// `Ready` is sticky: once the initial list has been applied the store keeps
/// serving data across watch restarts, and only `Stopped` replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KindState {
    /// Watch not started yet
    Pending,
    /// Initial list in progress
    Syncing,
    /// Initial list applied, store is serving data
    Ready,
    /// Repeated errors before the first sync, still retrying
    Failed,
    /// Kind is not served by the cluster
    Unavailable,
    /// Watch released
    Stopped,
}

impl KindState {
    /// States a waiter can stop waiting on
    pub fn is_settled(&self) -> bool {
        matches!(self, KindState::Ready | KindState::Stopped)
    }
}

impl fmt::Display for KindState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KindState::Pending => "pending",
            KindState::Syncing => "syncing",
            KindState::Ready => "ready",
            KindState::Failed => "failed",
            KindState::Unavailable => "unavailable",
            KindState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Join kinds into a short human readable list
pub fn describe_kinds(kinds: &[ResourceKind]) -> String {
    kinds
        .iter()
        .map(ResourceKind::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
