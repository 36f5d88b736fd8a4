//! Read-only views over a cluster cache's per-kind stores

use super::kind::ResourceKind;
use crate::kubernetes::error::{K8sError, K8sResult};
use fleetdeck_common::ClusterId;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Resource, ResourceExt};
use std::sync::Arc;

/// Lister over one kind of one cluster
///
/// An unavailable lister answers every query with nothing. Callers are
/// expected to check [`Lister::is_available`] and leave the corresponding
/// section out rather than report an empty cluster.
#[derive(Clone)]
pub struct Lister<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    cluster_id: ClusterId,
    kind: ResourceKind,
    store: Option<Store<K>>,
}

impl<K> Lister<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    pub fn new(cluster_id: ClusterId, kind: ResourceKind, store: Store<K>) -> Self {
        Self {
            cluster_id,
            kind,
            store: Some(store),
        }
    }

    pub fn unavailable(cluster_id: ClusterId, kind: ResourceKind) -> Self {
        Self {
            cluster_id,
            kind,
            store: None,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn is_available(&self) -> bool {
        self.store.is_some()
    }

    /// All objects, optionally restricted to one namespace
    pub fn list(&self, namespace: Option<&str>) -> Vec<Arc<K>> {
        let Some(store) = &self.store else {
            return Vec::new();
        };
        match namespace {
            None => store.state(),
            Some(ns) => store
                .state()
                .into_iter()
                .filter(|obj| obj.namespace().as_deref() == Some(ns))
                .collect(),
        }
    }

    /// One object by name; `namespace` is ignored for cluster-scoped kinds
    pub fn get(&self, namespace: Option<&str>, name: &str) -> Option<Arc<K>> {
        let store = self.store.as_ref()?;
        let mut key = ObjectRef::<K>::new(name);
        if let Some(ns) = namespace {
            key = key.within(ns);
        }
        store.get(&key)
    }

    pub fn len(&self) -> usize {
        self.store.as_ref().map(|s| s.state().len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Like [`Lister::list`] but fails when the kind is unavailable
    pub fn try_list(&self, namespace: Option<&str>) -> K8sResult<Vec<Arc<K>>> {
        if !self.is_available() {
            return Err(K8sError::KindUnavailable {
                cluster_id: self.cluster_id.to_string(),
                kind: self.kind,
            });
        }
        Ok(self.list(namespace))
    }
}

impl<K> std::fmt::Debug for Lister<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lister")
            .field("cluster_id", &self.cluster_id)
            .field("kind", &self.kind)
            .field("available", &self.is_available())
            .finish()
    }
}
