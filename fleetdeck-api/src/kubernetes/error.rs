//! Kubernetes error types and ApiError mapping
//!
//! Maps informer and kube-rs errors to API errors for consistent handling.

use crate::error::ApiError;
use crate::kubernetes::informer::ResourceKind;
use std::sync::Arc;
use thiserror::Error;

/// Kubernetes-specific errors
///
/// Cloneable so a failed cache creation can be reported to every caller
/// that was waiting on it.
#[derive(Debug, Clone, Error)]
pub enum K8sError {
    /// Cluster not found in the directory
    #[error("Cluster not found: {0}")]
    ClusterNotFound(String),

    /// Building a client for the cluster failed
    #[error("Failed to connect to cluster '{cluster_id}': {reason}")]
    Connection { cluster_id: String, reason: String },

    /// Required kinds did not finish their initial sync in time
    #[error("Cache for cluster '{cluster_id}' not ready, waiting on: {pending}")]
    NotReady { cluster_id: String, pending: String },

    /// The resource kind is not served by the cluster or has not synced
    #[error("{kind} is unavailable for cluster '{cluster_id}'")]
    KindUnavailable {
        cluster_id: String,
        kind: ResourceKind,
    },

    /// The caller gave up waiting
    #[error("Wait cancelled for cluster '{0}'")]
    Cancelled(String),

    /// The cache was stopped
    #[error("Cache for cluster '{0}' has been stopped")]
    Stopped(String),

    /// Error from kube-rs client
    #[error("Kubernetes API error: {0}")]
    KubeError(#[source] Arc<kube::Error>),

    /// Invalid kubeconfig
    #[error("Invalid kubeconfig: {0}")]
    InvalidKubeconfig(String),

    /// Watch stream error
    #[error("Watch error: {0}")]
    WatchError(String),

    /// Internal system error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<K8sError> for ApiError {
    fn from(err: K8sError) -> Self {
        match err {
            K8sError::ClusterNotFound(id) => {
                ApiError::NotFound(format!("Kubernetes cluster '{}' not found", id))
            }
            K8sError::KindUnavailable { cluster_id, kind } => ApiError::NotFound(format!(
                "{} is not available for cluster '{}'",
                kind, cluster_id
            )),
            e @ K8sError::Connection { .. } => ApiError::Internal(e.to_string()),
            e @ K8sError::NotReady { .. } => ApiError::ServiceUnavailable(e.to_string()),
            e @ K8sError::Cancelled(_) => ApiError::ServiceUnavailable(e.to_string()),
            e @ K8sError::Stopped(_) => ApiError::ServiceUnavailable(e.to_string()),
            K8sError::KubeError(e) => match e.as_ref() {
                kube::Error::Api(resp) if resp.code == 401 => ApiError::AuthenticationFailed,
                kube::Error::Api(resp) if resp.code == 403 => {
                    ApiError::Forbidden(resp.message.clone())
                }
                kube::Error::Api(resp) if resp.code == 404 => {
                    ApiError::NotFound(resp.message.clone())
                }
                _ => ApiError::Internal(format!("Kubernetes error: {}", e)),
            },
            K8sError::InvalidKubeconfig(msg) => ApiError::ValidationError(msg),
            K8sError::WatchError(msg) => ApiError::Internal(format!("Watch error: {}", msg)),
            K8sError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<kube::Error> for K8sError {
    fn from(err: kube::Error) -> Self {
        K8sError::KubeError(Arc::new(err))
    }
}

/// Result type for Kubernetes operations
pub type K8sResult<T> = std::result::Result<T, K8sError>;
