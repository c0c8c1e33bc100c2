//! In-place edits on workload manifests.
//!
//! Every function here is idempotent: applying it twice with the same
//! arguments yields the same document as applying it once. A volume and its
//! mounts are always added or removed together.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaimVolumeSource, PodSpec, Volume, VolumeMount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::collections::BTreeMap;

/// Label selecting the pods of a clone.
pub const CLONE_LABEL: &str = "devenv.dell.com/clone";
/// Label naming the DevEnv an object belongs to.
pub const DEVENV_LABEL: &str = "devenv.dell.com/devenv";

/// Annotations the cluster maintains and a clone must not inherit.
const STRIPPED_ANNOTATIONS: [&str; 2] = [
    "deployment.kubernetes.io/revision",
    "kubectl.kubernetes.io/last-applied-configuration",
];

fn pod_spec_mut(doc: &mut Deployment) -> &mut PodSpec {
    doc.spec
        .get_or_insert_with(Default::default)
        .template
        .spec
        .get_or_insert_with(Default::default)
}

fn existing_pod_spec_mut(doc: &mut Deployment) -> Option<&mut PodSpec> {
    doc.spec.as_mut()?.template.spec.as_mut()
}

/// Upserts a PVC-backed volume named `volume_name` and mounts it into every container.
///
/// An empty or absent `sub_path` clears any sub path left by a previous call.
pub fn add_mount(doc: &mut Deployment, volume_name: &str, pvc_name: &str, mount_path: &str, sub_path: Option<&str>) {
    let sub_path = sub_path.filter(|p| !p.is_empty()).map(str::to_string);
    let pod = pod_spec_mut(doc);

    let volume = Volume {
        name: volume_name.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: pvc_name.to_string(),
            read_only: None,
        }),
        ..Default::default()
    };
    let volumes = pod.volumes.get_or_insert_with(Vec::new);
    match volumes.iter_mut().find(|v| v.name == volume_name) {
        Some(existing) => *existing = volume,
        None => volumes.push(volume),
    }

    for container in &mut pod.containers {
        let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
        match mounts.iter_mut().find(|m| m.name == volume_name) {
            Some(mount) => {
                mount.mount_path = mount_path.to_string();
                mount.sub_path.clone_from(&sub_path);
            }
            None => mounts.push(VolumeMount {
                name: volume_name.to_string(),
                mount_path: mount_path.to_string(),
                sub_path: sub_path.clone(),
                ..Default::default()
            }),
        }
    }
}

/// Removes the volume named `volume_name` and its mount from every container.
///
/// Duplicate entries are all removed; a missing volume is not an error.
pub fn remove_mount(doc: &mut Deployment, volume_name: &str) {
    let Some(pod) = existing_pod_spec_mut(doc) else {
        return;
    };
    if let Some(volumes) = pod.volumes.as_mut() {
        volumes.retain(|v| v.name != volume_name);
    }
    for container in &mut pod.containers {
        if let Some(mounts) = container.volume_mounts.as_mut() {
            mounts.retain(|m| m.name != volume_name);
        }
    }
}

/// Overrides the command of every container named in `entrypoints`.
pub fn update_entrypoints(doc: &mut Deployment, entrypoints: &BTreeMap<String, Vec<String>>) {
    if entrypoints.is_empty() {
        return;
    }
    let Some(pod) = existing_pod_spec_mut(doc) else {
        return;
    };
    for container in &mut pod.containers {
        if let Some(command) = entrypoints.get(&container.name) {
            container.command = Some(command.clone());
        }
    }
}

/// Drops the command override of every container named in `entrypoints`,
/// falling back to the image entrypoint.
pub fn restore_entrypoints(doc: &mut Deployment, entrypoints: &BTreeMap<String, Vec<String>>) {
    if entrypoints.is_empty() {
        return;
    }
    let Some(pod) = existing_pod_spec_mut(doc) else {
        return;
    };
    for container in &mut pod.containers {
        if entrypoints.contains_key(&container.name) {
            container.command = None;
        }
    }
}

/// Sets `spec.replicas`, creating the spec if needed.
pub fn set_replicas(doc: &mut Deployment, replicas: i32) {
    doc.spec.get_or_insert_with(Default::default).replicas = Some(replicas);
}

/// Name of the clone of `source` owned by the DevEnv `suffix`.
pub fn clone_name(source: &str, suffix: &str) -> String {
    format!("{}-{}", source, suffix)
}

/// Labels selecting the pods of the clone `name`.
pub fn clone_selector(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(CLONE_LABEL.to_string(), name.to_string())])
}

/// Returns an independent copy of `doc` renamed to `<name>-<suffix>`.
///
/// Cluster-generated metadata and status are stripped, the selector and all
/// labels are replaced by clone-scoped ones so the copy is never matched by
/// the selectors of the original, and replicas are forced to 1.
pub fn clone_manifest(doc: &Deployment, suffix: &str) -> Deployment {
    let source = doc.metadata.name.as_deref().unwrap_or_default();
    let name = clone_name(source, suffix);
    let mut labels = clone_selector(&name);
    labels.insert(DEVENV_LABEL.to_string(), suffix.to_string());

    let mut clone = doc.clone();
    clone.status = None;

    let meta = &mut clone.metadata;
    meta.name = Some(name.clone());
    meta.generate_name = None;
    meta.creation_timestamp = None;
    meta.deletion_timestamp = None;
    meta.deletion_grace_period_seconds = None;
    meta.generation = None;
    meta.resource_version = None;
    meta.uid = None;
    meta.self_link = None;
    meta.managed_fields = None;
    meta.owner_references = None;
    meta.finalizers = None;
    if let Some(annotations) = meta.annotations.as_mut() {
        for key in STRIPPED_ANNOTATIONS {
            annotations.remove(key);
        }
    }
    meta.labels = Some(labels.clone());

    set_replicas(&mut clone, 1);
    if let Some(spec) = clone.spec.as_mut() {
        spec.selector = LabelSelector {
            match_labels: Some(clone_selector(&name)),
            match_expressions: None,
        };
        spec.template.metadata.get_or_insert_with(Default::default).labels = Some(labels);
    }
    clone
}
