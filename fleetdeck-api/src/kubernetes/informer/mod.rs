//! Watch-backed caches of cluster state
//!
//! The [`ClusterInformerManager`] owns one [`ClusterCache`] per cluster. Each
//! cache runs a watch per [`ResourceKind`] and hands out [`Lister`]s over the
//! resulting stores.

pub mod backoff;
pub mod cache;
pub mod kind;
pub mod manager;
pub mod store;
pub mod watch;

pub use cache::ClusterCache;
pub use kind::{KindState, ResourceKind};
pub use manager::ClusterInformerManager;
pub use store::Lister;
