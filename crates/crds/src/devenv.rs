//! DevEnv CRD
//!
//! Declares an ephemeral developer environment: an SSH/rsync workload backed by a
//! shared code volume, plus the set of existing workloads that should have that
//! volume mounted while the developer is iterating.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::SpecError;

/// The only workload kind that can currently be provisioned or mounted into.
pub const SUPPORTED_WORKLOAD_KIND: &str = "deployment";

fn default_workload_kind() -> String {
    SUPPORTED_WORKLOAD_KIND.to_string()
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "dell.com",
    version = "v1",
    kind = "DevEnv",
    plural = "devenvs",
    namespaced,
    status = "DevEnvStatus",
    printcolumn = r#"{"name":"SSH", "type":"string", "jsonPath":".status.ssh"}"#,
    printcolumn = r#"{"name":"MOUNTS", "type":"boolean", "jsonPath":".spec.mountsEnabled"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DevEnvSpec {
    /// Container image of the dev environment workload
    #[serde(default)]
    pub image: String,

    /// Public keys allowed to SSH into the dev environment
    #[serde(default)]
    pub authorized_keys: Vec<String>,

    /// Size of the code volume (e.g. "10Gi")
    #[serde(default)]
    pub pvc_size: String,

    /// Domain under which `<name>.<baseDomain>` is published
    #[serde(default)]
    pub base_domain: String,

    /// Paths excluded from the rsync command reported in status
    #[serde(default)]
    pub excluded_paths: Vec<String>,

    /// Signal sent to reload services after a sync
    #[serde(default)]
    pub reload_signal: String,

    /// Command run inside mounted pods after a sync
    #[serde(default)]
    pub post_mount_pod_cmd: String,

    /// Workload kind of the dev environment itself
    #[serde(default = "default_workload_kind")]
    pub kind: String,

    /// How mount targets are handled
    #[serde(default)]
    pub mode: MountMode,

    /// Global switch for all mount targets
    #[serde(default)]
    pub mounts_enabled: bool,

    /// Workloads that receive the code volume
    #[serde(default)]
    pub mounts: Vec<MountTarget>,

    /// Container port exposed by clones (clone mode only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    /// Ingress group clones join (clone mode only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl Default for DevEnvSpec {
    fn default() -> Self {
        Self {
            image: String::new(),
            authorized_keys: Vec::new(),
            pvc_size: String::new(),
            base_domain: String::new(),
            excluded_paths: Vec::new(),
            reload_signal: String::new(),
            post_mount_pod_cmd: String::new(),
            kind: default_workload_kind(),
            mode: MountMode::default(),
            mounts_enabled: false,
            mounts: Vec::new(),
            port: None,
            group: None,
        }
    }
}

/// Mount handling mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MountMode {
    /// Edit the matched workload in place
    #[default]
    Modify,

    /// Mount into a per-environment copy of the matched workload
    Clone,
}

/// Selection rule for a workload that should receive the code volume.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MountTarget {
    /// Workload kind; only "deployment" is supported
    #[serde(default)]
    pub kind: String,

    /// Labels that must select exactly one workload
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Where the code volume is mounted in every container
    #[serde(default)]
    pub mount_path: String,

    /// Optional path inside the volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,

    /// Whether this target is currently mounted
    #[serde(default)]
    pub mounted: bool,

    /// Command overrides keyed by container name, applied while mounted
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub entrypoints: BTreeMap<String, Vec<String>>,
}

impl MountTarget {
    /// Checks the shape of this target. `index` is only used for messages.
    pub fn validate(&self, index: usize) -> Result<(), SpecError> {
        if self.kind.is_empty() {
            return Err(SpecError::ConfigShape(format!("spec.mounts[{}].kind is required", index)));
        }
        if !self.kind.eq_ignore_ascii_case(SUPPORTED_WORKLOAD_KIND) {
            return Err(SpecError::UnsupportedKind(format!(
                "spec.mounts[{}].kind is {:?}, only deployments are supported",
                index, self.kind
            )));
        }
        if self.labels.is_empty() {
            return Err(SpecError::ConfigShape(format!("spec.mounts[{}].labels must not be empty", index)));
        }
        if !self.mount_path.starts_with('/') {
            return Err(SpecError::ConfigShape(format!(
                "spec.mounts[{}].mountPath must be an absolute path, got {:?}",
                index, self.mount_path
            )));
        }
        for (container, command) in &self.entrypoints {
            if command.is_empty() {
                return Err(SpecError::ConfigShape(format!(
                    "spec.mounts[{}].entrypoints.{} must not be empty",
                    index, container
                )));
            }
        }
        Ok(())
    }

    /// Sub path with empty strings treated as absent.
    pub fn sub_path(&self) -> Option<&str> {
        self.sub_path.as_deref().filter(|p| !p.is_empty())
    }
}

impl DevEnvSpec {
    /// Checks everything the provisioning handler reads.
    pub fn validate_provisioning(&self) -> Result<(), SpecError> {
        if !self.kind.eq_ignore_ascii_case(SUPPORTED_WORKLOAD_KIND) {
            return Err(SpecError::UnsupportedKind(format!(
                "spec.kind is {:?}, only deployments are supported",
                self.kind
            )));
        }
        for (field, value) in [
            ("spec.image", &self.image),
            ("spec.pvcSize", &self.pvc_size),
            ("spec.baseDomain", &self.base_domain),
        ] {
            if value.trim().is_empty() {
                return Err(SpecError::ConfigShape(format!("{} is required", field)));
            }
        }
        Ok(())
    }

    /// Checks everything the mount handlers read.
    pub fn validate_mounts(&self) -> Result<(), SpecError> {
        for (index, target) in self.mounts.iter().enumerate() {
            target.validate(index)?;
        }
        if self.mode == MountMode::Clone {
            if self.port.is_none() {
                return Err(SpecError::ConfigShape("spec.port is required in clone mode".to_string()));
            }
            if self.group.as_deref().is_none_or(str::is_empty) {
                return Err(SpecError::ConfigShape("spec.group is required in clone mode".to_string()));
            }
            if self.base_domain.trim().is_empty() {
                return Err(SpecError::ConfigShape("spec.baseDomain is required in clone mode".to_string()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DevEnvStatus {
    /// SSH address of the dev environment (`docker@<name>.<baseDomain>`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh: Option<String>,

    /// Shell command that syncs local files and reloads remote services
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,

    /// Clones created in clone mode, keyed by the mount target selector (`k=v,...`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub clones: BTreeMap<String, CloneRecord>,

    /// Last reconciliation error, cleared on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Names of the objects generated for one clone.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CloneRecord {
    pub name: String,
    pub service: String,
    pub ingress: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> MountTarget {
        MountTarget {
            kind: "deployment".to_string(),
            labels: BTreeMap::from([("app".to_string(), "api".to_string())]),
            mount_path: "/code".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_spec_deserializes_with_defaults() {
        let spec: DevEnvSpec = serde_json::from_value(serde_json::json!({
            "image": "registry/devenv:1",
            "authorizedKeys": ["ssh-ed25519 AAAA"],
            "pvcSize": "5Gi",
            "baseDomain": "dev.example.com",
            "mounts": [{"kind": "Deployment", "labels": {"app": "api"}, "mountPath": "/code", "mounted": true}]
        }))
        .unwrap();

        assert_eq!(spec.kind, "deployment");
        assert_eq!(spec.mode, MountMode::Modify);
        assert!(!spec.mounts_enabled);
        assert!(spec.mounts[0].mounted);
        assert!(spec.mounts[0].entrypoints.is_empty());
        assert!(spec.validate_provisioning().is_ok());
        assert!(spec.validate_mounts().is_ok());
    }

    #[test]
    fn test_mode_parses_lowercase() {
        let spec: DevEnvSpec = serde_json::from_value(serde_json::json!({"mode": "clone"})).unwrap();
        assert_eq!(spec.mode, MountMode::Clone);
    }

    #[test]
    fn test_statefulset_target_is_unsupported() {
        let mut t = target();
        t.kind = "statefulset".to_string();
        assert!(matches!(t.validate(0), Err(SpecError::UnsupportedKind(_))));
    }

    #[test]
    fn test_statefulset_workload_is_unsupported() {
        let spec = DevEnvSpec {
            image: "img".to_string(),
            pvc_size: "1Gi".to_string(),
            base_domain: "example.com".to_string(),
            kind: "statefulset".to_string(),
            ..Default::default()
        };
        assert!(matches!(spec.validate_provisioning(), Err(SpecError::UnsupportedKind(_))));
    }

    #[test]
    fn test_missing_fields_are_config_shape_errors() {
        let mut t = target();
        t.labels.clear();
        assert!(matches!(t.validate(0), Err(SpecError::ConfigShape(_))));

        let mut t = target();
        t.mount_path = "code".to_string();
        assert!(matches!(t.validate(0), Err(SpecError::ConfigShape(_))));

        assert!(matches!(
            DevEnvSpec::default().validate_provisioning(),
            Err(SpecError::ConfigShape(_))
        ));
    }

    #[test]
    fn test_clone_mode_requires_port_and_group() {
        let mut spec = DevEnvSpec {
            base_domain: "example.com".to_string(),
            mode: MountMode::Clone,
            mounts: vec![target()],
            ..Default::default()
        };
        assert!(matches!(spec.validate_mounts(), Err(SpecError::ConfigShape(_))));

        spec.port = Some(8080);
        spec.group = Some("devenvs".to_string());
        assert!(spec.validate_mounts().is_ok());
    }

    #[test]
    fn test_empty_sub_path_is_absent() {
        let mut t = target();
        t.sub_path = Some(String::new());
        assert_eq!(t.sub_path(), None);
        t.sub_path = Some("api".to_string());
        assert_eq!(t.sub_path(), Some("api"));
    }
}
