//! Reconciliation logic for DevEnv resources.
//!
//! One file per handler of the dispatch table:
//! - `provision`: base objects of the environment (RBAC, PVC, workload, service)
//! - `mounts`: attach/detach the code volume on mount targets, clone mode
//! - `cleanup`: detach the code volume when the DevEnv is deleted
//!
//! Handlers read live cluster state through the `ClusterGateway` right before
//! each mutation and never keep documents between calls.

pub mod cleanup;
pub mod mounts;
pub mod provision;
pub mod status;

use crate::dispatch::Handler;
use crate::error::ControllerError;
use cluster_gateway::{ClusterGateway, Selector};
use crds::{DevEnv, DevEnvStatus, MountTarget};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use manifests::{Manifest, TemplateEngine};
use tracing::{debug, info};

/// Cluster-wide settings the handlers need besides the DevEnv itself.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Labels merged into every mount target selector
    pub extra_labels: Selector,
    /// Storage class of the code PVC
    pub storage_class: String,
    /// Access mode of the code PVC
    pub pvc_access_mode: String,
}

/// Identity of the DevEnv being reconciled.
#[derive(Debug, Clone)]
pub(crate) struct Owner {
    pub name: String,
    pub namespace: String,
    pub reference: OwnerReference,
}

impl Owner {
    pub fn of(devenv: &DevEnv) -> Result<Self, ControllerError> {
        let namespace = devenv.namespace().ok_or(ControllerError::MissingMetadata("metadata.namespace"))?;
        let reference = devenv
            .controller_owner_ref(&())
            .ok_or(ControllerError::MissingMetadata("metadata.name or metadata.uid"))?;
        Ok(Self {
            name: devenv.name_any(),
            namespace,
            reference,
        })
    }
}

/// Runs dispatch handlers against the cluster.
pub struct Reconciler {
    pub(crate) gateway: Box<dyn ClusterGateway>,
    pub(crate) templates: TemplateEngine,
    pub(crate) settings: Settings,
}

impl Reconciler {
    pub fn new(gateway: Box<dyn ClusterGateway>, templates: TemplateEngine, settings: Settings) -> Self {
        Self {
            gateway,
            templates,
            settings,
        }
    }

    /// Runs `handlers` in order, stopping at the first failure.
    ///
    /// `status` is updated as handlers complete, so on failure it still holds
    /// what the earlier handlers produced.
    pub async fn run(&self, devenv: &DevEnv, handlers: &[Handler], status: &mut DevEnvStatus) -> Result<(), ControllerError> {
        for handler in handlers {
            debug!("Running {:?} handler for DevEnv {}", handler, devenv.name_any());
            match handler {
                Handler::Provision => self.provision(devenv, status).await?,
                Handler::Mounts => self.update_mounts(devenv, status).await?,
                Handler::Cleanup => self.cleanup_mounts(devenv).await?,
            }
        }
        Ok(())
    }

    /// Selector of a mount target, including the configured extra labels.
    pub(crate) fn target_selector(&self, target: &MountTarget) -> Selector {
        Selector::from(&target.labels).merged(&self.settings.extra_labels)
    }

    /// Applies `updated` only if it differs from what was read from the cluster.
    pub(crate) async fn apply_if_changed(
        &self,
        namespace: &str,
        original: &Deployment,
        updated: Deployment,
    ) -> Result<bool, ControllerError> {
        let manifest = Manifest::from(updated);
        if manifest.as_deployment() == Some(original) {
            debug!("{} already up to date", manifest.display_name());
            return Ok(false);
        }
        self.gateway.apply(namespace, &manifest).await?;
        info!("Applied {} in namespace {}", manifest.display_name(), namespace);
        Ok(true)
    }
}
