//! API-server backed gateway.
//!
//! Every call is bounded by the configured timeout. Writes use server-side
//! apply with `force`, so the operator takes ownership of the fields it sends.
//! A `resourceVersion` carried by the manifest is sent along and acts as an
//! optimistic-concurrency precondition.

use crate::error::GatewayError;
use crate::gateway::ClusterGateway;
use crate::selector::Selector;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::{Client, Resource};
use manifests::{Manifest, ResourceKind};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Runs `$body` with `$K` bound to the k8s-openapi type for `$kind`.
macro_rules! with_kind {
    ($kind:expr, $K:ident => $body:expr) => {
        match $kind {
            ResourceKind::ServiceAccount => {
                type $K = ServiceAccount;
                $body
            }
            ResourceKind::Role => {
                type $K = Role;
                $body
            }
            ResourceKind::RoleBinding => {
                type $K = RoleBinding;
                $body
            }
            ResourceKind::PersistentVolumeClaim => {
                type $K = PersistentVolumeClaim;
                $body
            }
            ResourceKind::Deployment => {
                type $K = Deployment;
                $body
            }
            ResourceKind::Service => {
                type $K = Service;
                $body
            }
            ResourceKind::Ingress => {
                type $K = Ingress;
                $body
            }
        }
    };
}

/// Bounds shared by every kind the gateway handles.
trait Managed:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Into<Manifest>
    + Send
    + Sync
    + 'static
{
}

impl<K> Managed for K where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Into<Manifest>
        + Send
        + Sync
        + 'static
{
}

/// Gateway backed by a kube `Client`.
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
    field_manager: String,
    timeout: Duration,
}

impl KubeGateway {
    pub fn new(client: Client, field_manager: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
            timeout,
        }
    }

    async fn bounded<T, F>(&self, operation: String, call: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, kube::Error>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(GatewayError::Kube { operation, source }),
            Err(_) => Err(GatewayError::Timeout {
                operation,
                after: self.timeout,
            }),
        }
    }

    async fn list_typed<K: Managed>(&self, namespace: &str, selector: &Selector) -> Result<Vec<Manifest>, GatewayError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let selector = selector.to_string();
        let params = ListParams::default().labels(&selector);
        let operation = format!("list {} in {} matching {:?}", K::kind(&()), namespace, selector);
        let list = self.bounded(operation, api.list(&params)).await?;
        Ok(list.items.into_iter().map(Into::into).collect())
    }

    async fn get_typed<K: Managed>(&self, namespace: &str, name: &str) -> Result<Option<Manifest>, GatewayError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let operation = format!("get {}/{} in {}", K::kind(&()), name, namespace);
        let found = self.bounded(operation, api.get_opt(name)).await?;
        Ok(found.map(Into::into))
    }

    async fn apply_typed<K: Managed>(&self, namespace: &str, obj: &K) -> Result<(), GatewayError> {
        let name = obj
            .meta()
            .name
            .clone()
            .ok_or_else(|| GatewayError::MissingName(K::kind(&()).to_string()))?;

        // managedFields must not be sent with an apply patch
        let mut obj = obj.clone();
        obj.meta_mut().managed_fields = None;

        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let params = PatchParams::apply(&self.field_manager).force();
        let operation = format!("apply {}/{} in {}", K::kind(&()), name, namespace);
        self.bounded(operation, api.patch(&name, &params, &Patch::Apply(&obj))).await?;
        debug!("Applied {}/{} in namespace {}", K::kind(&()), name, namespace);
        Ok(())
    }

    async fn delete_typed<K: Managed>(&self, namespace: &str, name: &str) -> Result<(), GatewayError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let operation = format!("delete {}/{} in {}", K::kind(&()), name, namespace);
        match self.bounded(operation, api.delete(name, &DeleteParams::default())).await {
            Ok(_) => {
                debug!("Deleted {}/{} in namespace {}", K::kind(&()), name, namespace);
                Ok(())
            }
            Err(GatewayError::Kube {
                source: kube::Error::Api(ae),
                ..
            }) if ae.code == 404 => {
                debug!("{}/{} already gone from namespace {}", K::kind(&()), name, namespace);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait::async_trait]
impl ClusterGateway for KubeGateway {
    async fn list(&self, namespace: &str, kind: ResourceKind, selector: &Selector) -> Result<Vec<Manifest>, GatewayError> {
        with_kind!(kind, K => self.list_typed::<K>(namespace, selector).await)
    }

    async fn get(&self, namespace: &str, kind: ResourceKind, name: &str) -> Result<Option<Manifest>, GatewayError> {
        with_kind!(kind, K => self.get_typed::<K>(namespace, name).await)
    }

    async fn apply(&self, namespace: &str, manifest: &Manifest) -> Result<(), GatewayError> {
        match manifest {
            Manifest::ServiceAccount(obj) => self.apply_typed(namespace, obj).await,
            Manifest::Role(obj) => self.apply_typed(namespace, obj).await,
            Manifest::RoleBinding(obj) => self.apply_typed(namespace, obj).await,
            Manifest::PersistentVolumeClaim(obj) => self.apply_typed(namespace, obj).await,
            Manifest::Deployment(obj) => self.apply_typed(namespace, obj).await,
            Manifest::Service(obj) => self.apply_typed(namespace, obj).await,
            Manifest::Ingress(obj) => self.apply_typed(namespace, obj).await,
        }
    }

    async fn delete(&self, namespace: &str, kind: ResourceKind, name: &str) -> Result<(), GatewayError> {
        with_kind!(kind, K => self.delete_typed::<K>(namespace, name).await)
    }
}
