//! Mock ClusterGateway for unit testing
//!
//! Keeps objects in memory keyed by namespace, kind and name, records every
//! apply and delete, and can be told to fail writes for a given object.

use crate::error::GatewayError;
use crate::gateway::ClusterGateway;
use crate::selector::Selector;
use manifests::{Manifest, ResourceKind};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

type ObjectKey = (String, ResourceKind, String);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A write recorded by the mock.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    Applied(Manifest),
    Deleted { kind: ResourceKind, name: String },
}

/// In-memory cluster for handler tests.
#[derive(Clone, Default)]
pub struct MockClusterGateway {
    objects: Arc<Mutex<BTreeMap<ObjectKey, Manifest>>>,
    writes: Arc<Mutex<Vec<Write>>>,
    failing: Arc<Mutex<BTreeSet<(ResourceKind, String)>>>,
    next_uid: Arc<Mutex<u64>>,
}

impl MockClusterGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an object without recording a write.
    pub fn insert(&self, namespace: &str, manifest: impl Into<Manifest>) {
        let mut manifest = manifest.into();
        let name = manifest.name().unwrap_or_default().to_string();
        manifest.metadata_mut().namespace = Some(namespace.to_string());
        lock(&self.objects).insert((namespace.to_string(), manifest.kind(), name), manifest);
    }

    pub fn object(&self, namespace: &str, kind: ResourceKind, name: &str) -> Option<Manifest> {
        lock(&self.objects)
            .get(&(namespace.to_string(), kind, name.to_string()))
            .cloned()
    }

    /// Names of all stored objects of `kind` in `namespace`.
    pub fn names(&self, namespace: &str, kind: ResourceKind) -> Vec<String> {
        lock(&self.objects)
            .keys()
            .filter(|(ns, k, _)| ns == namespace && *k == kind)
            .map(|(_, _, name)| name.clone())
            .collect()
    }

    pub fn writes(&self) -> Vec<Write> {
        lock(&self.writes).clone()
    }

    pub fn applied(&self) -> Vec<Manifest> {
        self.writes()
            .into_iter()
            .filter_map(|w| match w {
                Write::Applied(m) => Some(m),
                Write::Deleted { .. } => None,
            })
            .collect()
    }

    pub fn deleted(&self) -> Vec<(ResourceKind, String)> {
        self.writes()
            .into_iter()
            .filter_map(|w| match w {
                Write::Deleted { kind, name } => Some((kind, name)),
                Write::Applied(_) => None,
            })
            .collect()
    }

    pub fn clear_writes(&self) {
        lock(&self.writes).clear();
    }

    /// Makes every subsequent apply or delete of `kind/name` time out.
    pub fn fail_writes_to(&self, kind: ResourceKind, name: &str) {
        lock(&self.failing).insert((kind, name.to_string()));
    }

    fn check_failure(&self, kind: ResourceKind, name: &str) -> Result<(), GatewayError> {
        if lock(&self.failing).contains(&(kind, name.to_string())) {
            return Err(GatewayError::Timeout {
                operation: format!("write {}/{}", kind, name),
                after: Duration::from_secs(5),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ClusterGateway for MockClusterGateway {
    async fn list(&self, namespace: &str, kind: ResourceKind, selector: &Selector) -> Result<Vec<Manifest>, GatewayError> {
        Ok(lock(&self.objects)
            .iter()
            .filter(|((ns, k, _), m)| ns == namespace && *k == kind && selector.matches(m.metadata().labels.as_ref()))
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn get(&self, namespace: &str, kind: ResourceKind, name: &str) -> Result<Option<Manifest>, GatewayError> {
        Ok(self.object(namespace, kind, name))
    }

    async fn apply(&self, namespace: &str, manifest: &Manifest) -> Result<(), GatewayError> {
        let name = manifest
            .name()
            .ok_or_else(|| GatewayError::MissingName(manifest.kind().to_string()))?
            .to_string();
        self.check_failure(manifest.kind(), &name)?;

        let key = (namespace.to_string(), manifest.kind(), name);
        let mut stored = manifest.clone();
        let meta = stored.metadata_mut();
        meta.namespace = Some(namespace.to_string());
        meta.managed_fields = None;

        let mut objects = lock(&self.objects);
        let uid = objects.get(&key).and_then(|existing| existing.metadata().uid.clone());
        stored.metadata_mut().uid = Some(match uid {
            Some(uid) => uid,
            None => {
                let mut next = lock(&self.next_uid);
                *next += 1;
                format!("mock-uid-{}", next)
            }
        });
        objects.insert(key, stored);
        drop(objects);

        lock(&self.writes).push(Write::Applied(manifest.clone()));
        Ok(())
    }

    async fn delete(&self, namespace: &str, kind: ResourceKind, name: &str) -> Result<(), GatewayError> {
        self.check_failure(kind, name)?;
        lock(&self.objects).remove(&(namespace.to_string(), kind, name.to_string()));
        lock(&self.writes).push(Write::Deleted {
            kind,
            name: name.to_string(),
        });
        Ok(())
    }
}
