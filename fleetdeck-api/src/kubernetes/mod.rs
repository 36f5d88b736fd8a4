//! Kubernetes multi-cluster caching
//!
//! Connections come from a [`connection::ClusterConnectionFactory`], caches are
//! owned by the [`informer::ClusterInformerManager`], and snapshots are built
//! from cached listers only.

pub mod client;
pub mod connection;
pub mod directory;
pub mod error;
pub mod informer;
pub mod snapshot;
pub mod types;

pub use client::{K8sClient, KubeconfigConnectionFactory};
pub use connection::{ClusterConnection, ClusterConnectionFactory, WatchStream};
pub use directory::{ClusterDirectory, FileClusterDirectory, InMemoryClusterDirectory};
pub use error::{K8sError, K8sResult};
pub use informer::{ClusterCache, ClusterInformerManager, KindState, Lister, ResourceKind};
pub use snapshot::{ClusterSnapshot, SnapshotAggregator, SnapshotSources};
