//! Code volume on mount targets.
//!
//! In modify mode the matched workload itself gets the volume (or loses it).
//! In clone mode the matched workload is left alone: a renamed copy plus its
//! own Service and Ingress carry the volume, and are deleted again on unmount.

use super::{Owner, Reconciler};
use crate::error::ControllerError;
use cluster_gateway::Selector;
use crds::{CloneRecord, DevEnv, DevEnvSpec, DevEnvStatus, MountMode, MountTarget, SpecError};
use k8s_openapi::api::apps::v1::Deployment;
use manifests::mutate;
use manifests::{Manifest, ResourceKind, Template, TemplateParams, adopt};
use tracing::{debug, info};

/// Key of a clone in `status.clones`: the target's own labels, without the
/// controller-wide extra labels.
fn clone_key(target: &MountTarget) -> String {
    Selector::from(&target.labels).to_string()
}

impl Reconciler {
    /// Brings every mount target in line with `mountsEnabled`/`mounted`.
    pub async fn update_mounts(&self, devenv: &DevEnv, status: &mut DevEnvStatus) -> Result<(), ControllerError> {
        let spec = &devenv.spec;
        spec.validate_mounts()?;
        let owner = Owner::of(devenv)?;
        info!(
            "Updating {} mount target(s) of DevEnv {}/{} (enabled: {}, mode: {:?})",
            spec.mounts.len(),
            owner.namespace,
            owner.name,
            spec.mounts_enabled,
            spec.mode
        );

        for target in &spec.mounts {
            let selector = self.target_selector(target);
            let matched = self
                .gateway
                .get_one(&owner.namespace, ResourceKind::Deployment, &selector)
                .await?
                .into_deployment()?;

            let enabled = spec.mounts_enabled && target.mounted;
            match (spec.mode, enabled) {
                (MountMode::Modify, true) => self.mount_in_place(&owner, target, matched).await?,
                (MountMode::Modify, false) => self.unmount_in_place(&owner, target, matched).await?,
                (MountMode::Clone, true) => self.mount_clone(&owner, spec, target, &matched, status).await?,
                (MountMode::Clone, false) => self.remove_clone(&owner, target, &matched, status).await?,
            }
        }
        Ok(())
    }

    async fn mount_in_place(&self, owner: &Owner, target: &MountTarget, matched: Deployment) -> Result<(), ControllerError> {
        let mut doc = matched.clone();
        mutate::add_mount(&mut doc, &owner.name, &owner.name, &target.mount_path, target.sub_path());
        mutate::update_entrypoints(&mut doc, &target.entrypoints);
        self.apply_if_changed(&owner.namespace, &matched, doc).await?;
        Ok(())
    }

    /// Removes the volume and the entrypoint overrides from `matched`.
    pub(crate) async fn unmount_in_place(
        &self,
        owner: &Owner,
        target: &MountTarget,
        matched: Deployment,
    ) -> Result<(), ControllerError> {
        let mut doc = matched.clone();
        mutate::remove_mount(&mut doc, &owner.name);
        mutate::restore_entrypoints(&mut doc, &target.entrypoints);
        self.apply_if_changed(&owner.namespace, &matched, doc).await?;
        Ok(())
    }

    async fn mount_clone(
        &self,
        owner: &Owner,
        spec: &DevEnvSpec,
        target: &MountTarget,
        matched: &Deployment,
        status: &mut DevEnvStatus,
    ) -> Result<(), ControllerError> {
        let (Some(port), Some(group)) = (spec.port, spec.group.as_deref()) else {
            return Err(SpecError::ConfigShape("spec.port and spec.group are required in clone mode".to_string()).into());
        };

        let mut clone = mutate::clone_manifest(matched, &owner.name);
        let clone_name = clone.metadata.name.clone().unwrap_or_default();
        mutate::add_mount(&mut clone, &owner.name, &owner.name, &target.mount_path, target.sub_path());
        mutate::update_entrypoints(&mut clone, &target.entrypoints);

        let params = TemplateParams::new()
            .with("name", &clone_name)
            .with_int("port", i64::from(port))
            .with("base_domain", &spec.base_domain)
            .with("group", group);
        let mut resources = vec![
            self.templates.render(Template::CloneService, &params)?,
            self.templates.render(Template::CloneIngress, &params)?,
            Manifest::from(clone),
        ];
        for resource in &mut resources {
            adopt(resource, &owner.reference, &owner.namespace);
        }
        self.gateway.apply_all(&owner.namespace, &resources).await?;
        info!("Clone {} of {} is up in namespace {}", clone_name, matched.metadata.name.as_deref().unwrap_or_default(), owner.namespace);

        status.clones.insert(
            clone_key(target),
            CloneRecord {
                name: clone_name.clone(),
                service: clone_name.clone(),
                ingress: clone_name,
            },
        );
        Ok(())
    }

    async fn remove_clone(
        &self,
        owner: &Owner,
        target: &MountTarget,
        matched: &Deployment,
        status: &mut DevEnvStatus,
    ) -> Result<(), ControllerError> {
        let key = clone_key(target);
        let record = status.clones.get(&key).cloned().unwrap_or_else(|| {
            let name = mutate::clone_name(matched.metadata.name.as_deref().unwrap_or_default(), &owner.name);
            CloneRecord {
                name: name.clone(),
                service: name.clone(),
                ingress: name,
            }
        });

        let ns = &owner.namespace;
        if self.gateway.get(ns, ResourceKind::Deployment, &record.name).await?.is_some() {
            // Workload last: a retry after a partial failure still finds it
            self.gateway.delete(ns, ResourceKind::Ingress, &record.ingress).await?;
            self.gateway.delete(ns, ResourceKind::Service, &record.service).await?;
            self.gateway.delete(ns, ResourceKind::Deployment, &record.name).await?;
            info!("Removed clone {} from namespace {}", record.name, ns);
        } else {
            debug!("No clone {} in namespace {}, nothing to remove", record.name, ns);
        }

        status.clones.remove(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::Settings;
    use super::super::test_support::*;
    use super::*;
    use cluster_gateway::{GatewayError, MockClusterGateway};
    use k8s_openapi::api::core::v1::PodSpec;
    use manifests::TemplateEngine;
    use std::collections::BTreeMap;

    fn pod(manifest: &Manifest) -> PodSpec {
        manifest
            .as_deployment()
            .and_then(|d| d.spec.as_ref())
            .and_then(|s| s.template.spec.clone())
            .unwrap()
    }

    fn has_volume(manifest: &Manifest, name: &str) -> bool {
        let pod = pod(manifest);
        pod.volumes.unwrap_or_default().iter().any(|v| v.name == name)
            || pod
                .containers
                .iter()
                .any(|c| c.volume_mounts.iter().flatten().any(|m| m.name == name))
    }

    #[tokio::test]
    async fn test_modify_mode_mounts_into_matched_workload() {
        let gateway = MockClusterGateway::new();
        gateway.insert(NAMESPACE, workload("api", "api"));
        let reconciler = reconciler(&gateway);
        let devenv = devenv(MountMode::Modify, true, vec![target("api", true)]);

        reconciler.update_mounts(&devenv, &mut DevEnvStatus::default()).await.unwrap();

        let applied = gateway.applied();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].name(), Some("api"));
        let pod = pod(&applied[0]);
        let volumes = pod.volumes.clone().unwrap_or_default();
        let volume = &volumes[0];
        assert_eq!(volume.name, "devenv-1");
        assert_eq!(volume.persistent_volume_claim.as_ref().unwrap().claim_name, "devenv-1");
        let mount = &pod.containers[0].volume_mounts.as_ref().unwrap()[0];
        assert_eq!(mount.name, "devenv-1");
        assert_eq!(mount.mount_path, "/code");
        assert_eq!(mount.sub_path, None);
    }

    #[tokio::test]
    async fn test_modify_mode_is_idempotent() {
        let gateway = MockClusterGateway::new();
        gateway.insert(NAMESPACE, workload("api", "api"));
        let reconciler = reconciler(&gateway);
        let devenv = devenv(MountMode::Modify, true, vec![target("api", true)]);

        reconciler.update_mounts(&devenv, &mut DevEnvStatus::default()).await.unwrap();
        let after_first = gateway.object(NAMESPACE, ResourceKind::Deployment, "api");
        reconciler.update_mounts(&devenv, &mut DevEnvStatus::default()).await.unwrap();

        assert_eq!(gateway.applied().len(), 1);
        assert_eq!(gateway.object(NAMESPACE, ResourceKind::Deployment, "api"), after_first);
    }

    #[tokio::test]
    async fn test_disabled_mounts_are_removed() {
        let gateway = MockClusterGateway::new();
        let mut mounted = workload("api", "api");
        mutate::add_mount(&mut mounted, "devenv-1", "devenv-1", "/code", None);
        gateway.insert(NAMESPACE, mounted);
        let reconciler = reconciler(&gateway);
        let devenv = devenv(MountMode::Modify, false, vec![target("api", true)]);

        reconciler.update_mounts(&devenv, &mut DevEnvStatus::default()).await.unwrap();

        let applied = gateway.applied();
        assert_eq!(applied.len(), 1);
        assert!(!has_volume(&applied[0], "devenv-1"));

        // Nothing left to remove: no further write
        reconciler.update_mounts(&devenv, &mut DevEnvStatus::default()).await.unwrap();
        assert_eq!(gateway.applied().len(), 1);
        let stored = gateway.object(NAMESPACE, ResourceKind::Deployment, "api").unwrap();
        assert!(!has_volume(&stored, "devenv-1"));
    }

    #[tokio::test]
    async fn test_entrypoints_follow_mount_state() {
        let gateway = MockClusterGateway::new();
        gateway.insert(NAMESPACE, workload("api", "api"));
        let reconciler = reconciler(&gateway);
        let mut mount = target("api", true);
        mount.entrypoints = BTreeMap::from([("app".to_string(), vec!["/bin/sleep".to_string(), "1000".to_string()])]);
        let mut devenv = devenv(MountMode::Modify, true, vec![mount]);

        reconciler.update_mounts(&devenv, &mut DevEnvStatus::default()).await.unwrap();
        let stored = gateway.object(NAMESPACE, ResourceKind::Deployment, "api").unwrap();
        assert_eq!(
            pod(&stored).containers[0].command,
            Some(vec!["/bin/sleep".to_string(), "1000".to_string()])
        );

        devenv.spec.mounts[0].mounted = false;
        reconciler.update_mounts(&devenv, &mut DevEnvStatus::default()).await.unwrap();
        let stored = gateway.object(NAMESPACE, ResourceKind::Deployment, "api").unwrap();
        assert_eq!(pod(&stored).containers[0].command, None);
        assert!(!has_volume(&stored, "devenv-1"));
    }

    #[tokio::test]
    async fn test_clone_mode_leaves_original_untouched() {
        let gateway = MockClusterGateway::new();
        gateway.insert(NAMESPACE, workload("api", "api"));
        let original = gateway.object(NAMESPACE, ResourceKind::Deployment, "api");
        let reconciler = reconciler(&gateway);
        let devenv = devenv(MountMode::Clone, true, vec![target("api", true)]);
        let mut status = DevEnvStatus::default();

        reconciler.update_mounts(&devenv, &mut status).await.unwrap();

        let applied: Vec<String> = gateway.applied().iter().map(Manifest::display_name).collect();
        assert_eq!(
            applied,
            vec!["Service/api-devenv-1", "Ingress/api-devenv-1", "Deployment/api-devenv-1"]
        );
        assert_eq!(gateway.object(NAMESPACE, ResourceKind::Deployment, "api"), original);

        let clone = gateway.object(NAMESPACE, ResourceKind::Deployment, "api-devenv-1").unwrap();
        assert!(has_volume(&clone, "devenv-1"));
        let clone = clone.as_deployment().unwrap();
        assert_eq!(clone.spec.as_ref().unwrap().replicas, Some(1));
        assert_eq!(
            clone.metadata.owner_references.as_ref().unwrap()[0].uid,
            "uid-devenv-1"
        );

        let record = &status.clones["app=api"];
        assert_eq!(record.name, "api-devenv-1");
        assert_eq!(record.ingress, "api-devenv-1");

        // The clone does not carry the target labels, so the next pass still
        // resolves exactly the original
        reconciler.update_mounts(&devenv, &mut status).await.unwrap();
        assert_eq!(gateway.object(NAMESPACE, ResourceKind::Deployment, "api"), original);
    }

    #[tokio::test]
    async fn test_clone_unmount_deletes_clone_objects_once() {
        let gateway = MockClusterGateway::new();
        gateway.insert(NAMESPACE, workload("api", "api"));
        let reconciler = reconciler(&gateway);
        let mut devenv = devenv(MountMode::Clone, true, vec![target("api", true)]);
        let mut status = DevEnvStatus::default();
        reconciler.update_mounts(&devenv, &mut status).await.unwrap();

        devenv.spec.mounts_enabled = false;
        reconciler.update_mounts(&devenv, &mut status).await.unwrap();
        assert_eq!(
            gateway.deleted(),
            vec![
                (ResourceKind::Ingress, "api-devenv-1".to_string()),
                (ResourceKind::Service, "api-devenv-1".to_string()),
                (ResourceKind::Deployment, "api-devenv-1".to_string()),
            ]
        );
        assert!(status.clones.is_empty());
        assert_eq!(gateway.names(NAMESPACE, ResourceKind::Deployment), vec!["api".to_string()]);

        reconciler.update_mounts(&devenv, &mut status).await.unwrap();
        assert_eq!(gateway.deleted().len(), 3);
    }

    #[tokio::test]
    async fn test_clone_unmount_uses_recorded_name() {
        let gateway = MockClusterGateway::new();
        gateway.insert(NAMESPACE, workload("api", "api"));
        gateway.insert(NAMESPACE, workload("legacy-clone", "legacy"));
        let reconciler = reconciler(&gateway);
        let devenv = devenv(MountMode::Clone, false, vec![target("api", true)]);
        let mut status = DevEnvStatus {
            clones: BTreeMap::from([(
                "app=api".to_string(),
                CloneRecord {
                    name: "legacy-clone".to_string(),
                    service: "legacy-clone".to_string(),
                    ingress: "legacy-clone".to_string(),
                },
            )]),
            ..Default::default()
        };

        reconciler.update_mounts(&devenv, &mut status).await.unwrap();

        assert!(gateway.deleted().contains(&(ResourceKind::Deployment, "legacy-clone".to_string())));
        assert!(gateway.object(NAMESPACE, ResourceKind::Deployment, "legacy-clone").is_none());
        assert!(status.clones.is_empty());
    }

    #[tokio::test]
    async fn test_selection_must_be_unique() {
        let gateway = MockClusterGateway::new();
        let reconciler = reconciler(&gateway);
        let devenv = devenv(MountMode::Modify, true, vec![target("api", true)]);

        let err = reconciler.update_mounts(&devenv, &mut DevEnvStatus::default()).await.unwrap_err();
        assert!(matches!(err, ControllerError::Gateway(GatewayError::AmbiguousSelection { count: 0, .. })));

        gateway.insert(NAMESPACE, workload("api-a", "api"));
        gateway.insert(NAMESPACE, workload("api-b", "api"));
        let err = reconciler.update_mounts(&devenv, &mut DevEnvStatus::default()).await.unwrap_err();
        assert!(matches!(err, ControllerError::Gateway(GatewayError::AmbiguousSelection { count: 2, .. })));
        assert!(gateway.writes().is_empty());
    }

    #[tokio::test]
    async fn test_extra_labels_narrow_the_selection() {
        let gateway = MockClusterGateway::new();
        gateway.insert(NAMESPACE, workload("api-a", "api"));
        let mut released = workload("api-b", "api");
        released
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert("release".to_string(), "r1".to_string());
        gateway.insert(NAMESPACE, released);

        let reconciler = Reconciler::new(
            Box::new(gateway.clone()),
            TemplateEngine::embedded(),
            Settings {
                extra_labels: "release=r1".parse().unwrap(),
                storage_class: "efs".to_string(),
                pvc_access_mode: "ReadWriteMany".to_string(),
            },
        );
        let devenv = devenv(MountMode::Modify, true, vec![target("api", true)]);
        reconciler.update_mounts(&devenv, &mut DevEnvStatus::default()).await.unwrap();

        let applied = gateway.applied();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].name(), Some("api-b"));
    }

    #[tokio::test]
    async fn test_unsupported_target_kind_fails_before_lookup() {
        let gateway = MockClusterGateway::new();
        gateway.insert(NAMESPACE, workload("api", "api"));
        let reconciler = reconciler(&gateway);
        let mut mount = target("api", true);
        mount.kind = "StatefulSet".to_string();
        let devenv = devenv(MountMode::Modify, true, vec![mount]);

        let err = reconciler.update_mounts(&devenv, &mut DevEnvStatus::default()).await.unwrap_err();
        assert!(matches!(err, ControllerError::Spec(SpecError::UnsupportedKind(_))));
        assert!(gateway.writes().is_empty());
    }
}
