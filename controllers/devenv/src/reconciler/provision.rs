//! Base objects of a dev environment.

use super::{Owner, Reconciler, status};
use crate::error::ControllerError;
use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use crds::{DevEnv, DevEnvSpec, DevEnvStatus};
use manifests::{Manifest, Template, TemplateParams, adopt};
use tracing::info;

impl Reconciler {
    /// Renders, adopts and applies the base objects, then reports how to reach
    /// the environment.
    pub async fn provision(&self, devenv: &DevEnv, status: &mut DevEnvStatus) -> Result<(), ControllerError> {
        let spec = &devenv.spec;
        spec.validate_provisioning()?;
        let owner = Owner::of(devenv)?;
        info!("Provisioning DevEnv {}/{}", owner.namespace, owner.name);

        let mut resources = self.render_base(&owner.name, spec)?;
        for resource in &mut resources {
            adopt(resource, &owner.reference, &owner.namespace);
        }
        self.gateway.apply_all(&owner.namespace, &resources).await?;

        let ssh = status::ssh_address(&owner.name, &spec.base_domain);
        status.cmd = Some(status::sync_command(&ssh, &spec.excluded_paths));
        status.ssh = Some(ssh);
        info!("DevEnv {}/{} provisioned ({} objects)", owner.namespace, owner.name, resources.len());
        Ok(())
    }

    /// Service account, role, role binding, PVC, workload and service, in apply order.
    pub(crate) fn render_base(&self, name: &str, spec: &DevEnvSpec) -> Result<Vec<Manifest>, ControllerError> {
        let mounts = BASE64_STANDARD.encode(serde_yaml::to_string(&spec.mounts)?);
        let base = TemplateParams::new().with("name", name);

        let plan = [
            (Template::ServiceAccount, base.clone()),
            (Template::Role, base.clone()),
            (Template::RoleBinding, base.clone()),
            (
                Template::Pvc,
                base.clone()
                    .with("size", &spec.pvc_size)
                    .with("access_mode", &self.settings.pvc_access_mode)
                    .with("storage_class", &self.settings.storage_class),
            ),
            (
                Template::Deployment,
                base.clone()
                    .with("image", &spec.image)
                    .with("ssh_keys", spec.authorized_keys.join("\n"))
                    .with("mounts", mounts)
                    .with("reload_signal", &spec.reload_signal)
                    .with("post_mount_pod_cmd", &spec.post_mount_pod_cmd),
            ),
            (Template::Service, base.with("base_domain", &spec.base_domain)),
        ];

        plan.iter()
            .map(|(template, params)| self.templates.render(*template, params).map_err(ControllerError::from))
            .collect()
    }
}
