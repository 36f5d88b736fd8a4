//! Fleetdeck API Library
//!
//! Multi-cluster Kubernetes caching: lazily created per-cluster watch caches,
//! typed listers over them, and snapshots computed from cached state.

pub mod config;
pub mod error;
pub mod logging;
pub mod routes;
pub mod shutdown;

pub mod kubernetes;

pub use config::FleetdeckConfig;
pub use error::ApiError;
pub use kubernetes::informer::ClusterInformerManager;
