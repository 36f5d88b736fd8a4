//! Cluster overview computed from cached listers
//!
//! Nothing here talks to an API server. A kind whose lister is unavailable
//! simply has its section left out of the snapshot.

use crate::kubernetes::informer::{ClusterCache, Lister, ResourceKind};
use crate::kubernetes::types::{HealthStatus, Rollout};
use chrono::{DateTime, Utc};
use fleetdeck_common::ClusterId;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Node, Pod};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSummary {
    pub node_count: u32,
    pub ready_nodes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSummary {
    pub pod_count: u32,
    pub ready_pods: u32,
    pub running: u32,
    pub pending: u32,
    pub succeeded: u32,
    pub failed: u32,
}

/// Replica-based workloads: Deployments, StatefulSets, DaemonSets, Rollouts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSummary {
    pub total: u32,
    pub ready: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub total: u32,
    pub active: u32,
    pub succeeded: u32,
    pub failed: u32,
}

/// Point-in-time overview of one cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSnapshot {
    pub cluster_id: ClusterId,
    pub generated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub nodes: Option<NodeSummary>,
    #[serde(flatten)]
    pub pods: Option<PodSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployments: Option<WorkloadSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statefulsets: Option<WorkloadSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daemonsets: Option<WorkloadSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobs: Option<JobSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollouts: Option<WorkloadSummary>,
    pub health: HealthStatus,
    /// Kinds left out because their lister was unavailable
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub omitted: Vec<ResourceKind>,
}

/// Listers a snapshot is computed from
pub struct SnapshotSources {
    pub nodes: Lister<Node>,
    pub pods: Lister<Pod>,
    pub deployments: Lister<Deployment>,
    pub statefulsets: Lister<StatefulSet>,
    pub daemonsets: Lister<DaemonSet>,
    pub jobs: Lister<Job>,
    pub rollouts: Lister<Rollout>,
}

impl SnapshotSources {
    pub fn from_cache(cache: &ClusterCache) -> Self {
        Self {
            nodes: cache.nodes(),
            pods: cache.pods(),
            deployments: cache.deployments(),
            statefulsets: cache.statefulsets(),
            daemonsets: cache.daemonsets(),
            jobs: cache.jobs(),
            rollouts: cache.rollouts(),
        }
    }

    /// Every kind unavailable; fill in the ones under test
    pub fn unavailable(cluster_id: &ClusterId) -> Self {
        Self {
            nodes: Lister::unavailable(cluster_id.clone(), ResourceKind::Node),
            pods: Lister::unavailable(cluster_id.clone(), ResourceKind::Pod),
            deployments: Lister::unavailable(cluster_id.clone(), ResourceKind::Deployment),
            statefulsets: Lister::unavailable(cluster_id.clone(), ResourceKind::StatefulSet),
            daemonsets: Lister::unavailable(cluster_id.clone(), ResourceKind::DaemonSet),
            jobs: Lister::unavailable(cluster_id.clone(), ResourceKind::Job),
            rollouts: Lister::unavailable(cluster_id.clone(), ResourceKind::Rollout),
        }
    }
}

pub struct SnapshotAggregator;

impl SnapshotAggregator {
    /// Snapshot of a running cache
    pub fn from_cache(cache: &ClusterCache) -> ClusterSnapshot {
        Self::aggregate(cache.cluster_id(), &SnapshotSources::from_cache(cache))
    }

    pub fn aggregate(cluster_id: &ClusterId, sources: &SnapshotSources) -> ClusterSnapshot {
        let nodes = summarize_nodes(&sources.nodes);
        let pods = summarize_pods(&sources.pods);
        let deployments = available(&sources.deployments).map(|l| {
            summarize_workloads(l.list(None).iter().map(|d| {
                let desired = d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
                let ready = d.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0);
                (desired, ready)
            }))
        });
        let statefulsets = available(&sources.statefulsets).map(|l| {
            summarize_workloads(l.list(None).iter().map(|s| {
                let desired = s.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
                let ready = s.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0);
                (desired, ready)
            }))
        });
        let daemonsets = available(&sources.daemonsets).map(|l| {
            summarize_workloads(l.list(None).iter().map(|d| {
                d.status
                    .as_ref()
                    .map(|s| (s.desired_number_scheduled, s.number_ready))
                    .unwrap_or((0, 0))
            }))
        });
        let rollouts = available(&sources.rollouts).map(|l| {
            summarize_workloads(l.list(None).iter().map(|r| {
                let desired = r.spec.replicas.unwrap_or(1);
                let ready = r.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0);
                (desired, ready)
            }))
        });
        let jobs = summarize_jobs(&sources.jobs);

        let omitted: Vec<ResourceKind> = [
            (ResourceKind::Node, sources.nodes.is_available()),
            (ResourceKind::Pod, sources.pods.is_available()),
            (ResourceKind::Deployment, sources.deployments.is_available()),
            (ResourceKind::StatefulSet, sources.statefulsets.is_available()),
            (ResourceKind::DaemonSet, sources.daemonsets.is_available()),
            (ResourceKind::Job, sources.jobs.is_available()),
            (ResourceKind::Rollout, sources.rollouts.is_available()),
        ]
        .into_iter()
        .filter(|(_, ok)| !ok)
        .map(|(kind, _)| kind)
        .collect();

        let workloads = [&deployments, &statefulsets, &daemonsets, &rollouts];
        let health = rollup_health(nodes.as_ref(), pods.as_ref(), &workloads);

        ClusterSnapshot {
            cluster_id: cluster_id.clone(),
            generated_at: Utc::now(),
            nodes,
            pods,
            deployments,
            statefulsets,
            daemonsets,
            jobs,
            rollouts,
            health,
            omitted,
        }
    }
}

fn available<K>(lister: &Lister<K>) -> Option<&Lister<K>>
where
    K: kube::Resource<DynamicType = ()> + Clone + 'static,
{
    lister.is_available().then_some(lister)
}

fn summarize_nodes(lister: &Lister<Node>) -> Option<NodeSummary> {
    let lister = available(lister)?;
    let nodes = lister.list(None);
    let ready = nodes
        .iter()
        .filter(|node| {
            node.status
                .as_ref()
                .and_then(|s| s.conditions.as_ref())
                .map(|conds| conds.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
                .unwrap_or(false)
        })
        .count();

    Some(NodeSummary {
        node_count: nodes.len() as u32,
        ready_nodes: ready as u32,
    })
}

fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| conds.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
        .unwrap_or(false)
}

fn summarize_pods(lister: &Lister<Pod>) -> Option<PodSummary> {
    let lister = available(lister)?;
    let mut summary = PodSummary {
        pod_count: 0,
        ready_pods: 0,
        running: 0,
        pending: 0,
        succeeded: 0,
        failed: 0,
    };

    for pod in lister.list(None) {
        summary.pod_count += 1;
        if pod_is_ready(&pod) {
            summary.ready_pods += 1;
        }
        match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
            Some("Running") => summary.running += 1,
            Some("Pending") => summary.pending += 1,
            Some("Succeeded") => summary.succeeded += 1,
            Some("Failed") => summary.failed += 1,
            _ => {}
        }
    }
    Some(summary)
}

fn summarize_workloads(replicas: impl Iterator<Item = (i32, i32)>) -> WorkloadSummary {
    let mut summary = WorkloadSummary { total: 0, ready: 0 };
    for (desired, ready) in replicas {
        summary.total += 1;
        if ready >= desired {
            summary.ready += 1;
        }
    }
    summary
}

fn summarize_jobs(lister: &Lister<Job>) -> Option<JobSummary> {
    let lister = available(lister)?;
    let mut summary = JobSummary {
        total: 0,
        active: 0,
        succeeded: 0,
        failed: 0,
    };

    for job in lister.list(None) {
        summary.total += 1;
        let status = job.status.as_ref();
        if status.and_then(|s| s.active).unwrap_or(0) > 0 {
            summary.active += 1;
        } else if status.and_then(|s| s.succeeded).unwrap_or(0) > 0 {
            summary.succeeded += 1;
        } else if status.and_then(|s| s.failed).unwrap_or(0) > 0 {
            summary.failed += 1;
        }
    }
    Some(summary)
}

// Completed pods are ignored; only live pods that are not ready degrade health
fn rollup_health(
    nodes: Option<&NodeSummary>,
    pods: Option<&PodSummary>,
    workloads: &[&Option<WorkloadSummary>],
) -> HealthStatus {
    let Some(nodes) = nodes else {
        return HealthStatus::Unknown;
    };
    if nodes.ready_nodes == 0 {
        return HealthStatus::Unhealthy;
    }

    let nodes_degraded = nodes.ready_nodes < nodes.node_count;
    let pods_degraded = pods
        .map(|p| p.ready_pods < p.pod_count - p.succeeded)
        .unwrap_or(false);
    let workloads_degraded = workloads
        .iter()
        .filter_map(|w| w.as_ref())
        .any(|w| w.ready < w.total);

    if nodes_degraded || pods_degraded || workloads_degraded {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}
