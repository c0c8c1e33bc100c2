//! Detach on delete.
//!
//! Every mount target is detached regardless of the current mode: a workload
//! may still carry an in-place mount from before a switch to clone mode. Clone
//! objects carry the DevEnv as owner and go away with it.

use super::{Owner, Reconciler};
use crate::error::ControllerError;
use cluster_gateway::{GatewayError, Selection};
use crds::DevEnv;
use manifests::ResourceKind;
use tracing::{info, warn};

impl Reconciler {
    /// Removes the code volume and entrypoint overrides from every mount target
    /// that still exists.
    pub async fn cleanup_mounts(&self, devenv: &DevEnv) -> Result<(), ControllerError> {
        let spec = &devenv.spec;
        let owner = Owner::of(devenv)?;
        // Clone settings are irrelevant here; a DevEnv missing them must still be deletable
        for (index, target) in spec.mounts.iter().enumerate() {
            target.validate(index)?;
        }
        info!("Cleaning up mounts of DevEnv {}/{}", owner.namespace, owner.name);

        for target in &spec.mounts {
            let selector = self.target_selector(target);
            match self.gateway.select(&owner.namespace, ResourceKind::Deployment, &selector).await? {
                Selection::Zero => {
                    warn!("No deployment matches {} anymore, skipping", selector);
                }
                Selection::Multiple(count) => {
                    return Err(GatewayError::AmbiguousSelection {
                        kind: ResourceKind::Deployment,
                        selector: selector.to_string(),
                        count,
                    }
                    .into());
                }
                Selection::One(manifest) => {
                    self.unmount_in_place(&owner, target, manifest.into_deployment()?).await?;
                }
            }
        }
        Ok(())
    }
}
