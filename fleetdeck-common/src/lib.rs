//! Common types shared between the fleetdeck API server and its clients

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier for a managed Kubernetes cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(String);

impl ClusterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClusterId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ClusterId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for ClusterId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Credentials used to reach a cluster's API server
#[derive(Clone, Serialize, Deserialize)]
pub struct ClusterCredentials {
    /// Raw kubeconfig YAML
    pub kubeconfig: String,
    /// Context to select, the kubeconfig's current-context when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl ClusterCredentials {
    pub fn new(kubeconfig: impl Into<String>) -> Self {
        Self {
            kubeconfig: kubeconfig.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

// Kubeconfigs carry tokens and client keys, keep them out of logs
impl fmt::Debug for ClusterCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterCredentials")
            .field("kubeconfig", &"<redacted>")
            .field("context", &self.context)
            .finish()
    }
}

/// A registered cluster: identity plus the credentials needed to connect
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub id: ClusterId,
    pub name: String,
    pub credentials: ClusterCredentials,
}

impl ClusterRecord {
    pub fn new(id: impl Into<ClusterId>, name: impl Into<String>, credentials: ClusterCredentials) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            credentials,
        }
    }
}
