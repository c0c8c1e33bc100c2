//! Typed resource documents.
//!
//! `Manifest` covers the small, fixed catalog of kinds the operator renders,
//! reads and applies. Each variant wraps the k8s-openapi type so mutations are
//! checked statically instead of walking loosely-typed maps.

use crate::error::ManifestError;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use std::fmt;
use std::str::FromStr;

/// Kinds the operator knows how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    ServiceAccount,
    Role,
    RoleBinding,
    PersistentVolumeClaim,
    Deployment,
    Service,
    Ingress,
}

impl ResourceKind {
    /// The `kind` field value as the API server spells it.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ServiceAccount => "ServiceAccount",
            Self::Role => "Role",
            Self::RoleBinding => "RoleBinding",
            Self::PersistentVolumeClaim => "PersistentVolumeClaim",
            Self::Deployment => "Deployment",
            Self::Service => "Service",
            Self::Ingress => "Ingress",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = ManifestError;

    /// Accepts the canonical kind, lowercase, and kubectl-style plurals/short names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.to_ascii_lowercase().as_str() {
            "serviceaccount" | "serviceaccounts" | "sa" => Self::ServiceAccount,
            "role" | "roles" => Self::Role,
            "rolebinding" | "rolebindings" => Self::RoleBinding,
            "persistentvolumeclaim" | "persistentvolumeclaims" | "pvc" => Self::PersistentVolumeClaim,
            "deployment" | "deployments" | "deploy" => Self::Deployment,
            "service" | "services" | "svc" => Self::Service,
            "ingress" | "ingresses" | "ing" => Self::Ingress,
            _ => return Err(ManifestError::UnknownKind(s.to_string())),
        };
        Ok(kind)
    }
}

/// A resource document owned by a single reconcile step.
#[derive(Debug, Clone, PartialEq)]
pub enum Manifest {
    ServiceAccount(ServiceAccount),
    Role(Role),
    RoleBinding(RoleBinding),
    PersistentVolumeClaim(PersistentVolumeClaim),
    Deployment(Deployment),
    Service(Service),
    Ingress(Ingress),
}

macro_rules! each_variant {
    ($value:expr, $obj:ident => $body:expr) => {
        match $value {
            Manifest::ServiceAccount($obj) => $body,
            Manifest::Role($obj) => $body,
            Manifest::RoleBinding($obj) => $body,
            Manifest::PersistentVolumeClaim($obj) => $body,
            Manifest::Deployment($obj) => $body,
            Manifest::Service($obj) => $body,
            Manifest::Ingress($obj) => $body,
        }
    };
}

macro_rules! impl_from {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Manifest {
                fn from(obj: $variant) -> Self {
                    Manifest::$variant(obj)
                }
            }
        )*
    };
}

impl_from!(ServiceAccount, Role, RoleBinding, PersistentVolumeClaim, Deployment, Service, Ingress);

impl Manifest {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::ServiceAccount(_) => ResourceKind::ServiceAccount,
            Self::Role(_) => ResourceKind::Role,
            Self::RoleBinding(_) => ResourceKind::RoleBinding,
            Self::PersistentVolumeClaim(_) => ResourceKind::PersistentVolumeClaim,
            Self::Deployment(_) => ResourceKind::Deployment,
            Self::Service(_) => ResourceKind::Service,
            Self::Ingress(_) => ResourceKind::Ingress,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        each_variant!(self, obj => &obj.metadata)
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        each_variant!(self, obj => &mut obj.metadata)
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata().name.as_deref()
    }

    /// `Kind/name` for log lines.
    pub fn display_name(&self) -> String {
        format!("{}/{}", self.kind(), self.name().unwrap_or("<unnamed>"))
    }

    pub fn as_deployment(&self) -> Option<&Deployment> {
        match self {
            Self::Deployment(d) => Some(d),
            _ => None,
        }
    }

    pub fn into_deployment(self) -> Result<Deployment, ManifestError> {
        match self {
            Self::Deployment(d) => Ok(d),
            other => Err(ManifestError::UnexpectedKind {
                expected: ResourceKind::Deployment,
                found: other.kind(),
            }),
        }
    }

    /// Builds a manifest from a JSON document, dispatching on its `kind` field.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ManifestError> {
        let kind = value
            .get("kind")
            .and_then(serde_json::Value::as_str)
            .ok_or(ManifestError::MissingKind)?
            .parse::<ResourceKind>()?;

        let manifest = match kind {
            ResourceKind::ServiceAccount => Self::ServiceAccount(serde_json::from_value(value)?),
            ResourceKind::Role => Self::Role(serde_json::from_value(value)?),
            ResourceKind::RoleBinding => Self::RoleBinding(serde_json::from_value(value)?),
            ResourceKind::PersistentVolumeClaim => Self::PersistentVolumeClaim(serde_json::from_value(value)?),
            ResourceKind::Deployment => Self::Deployment(serde_json::from_value(value)?),
            ResourceKind::Service => Self::Service(serde_json::from_value(value)?),
            ResourceKind::Ingress => Self::Ingress(serde_json::from_value(value)?),
        };
        Ok(manifest)
    }

    pub fn to_value(&self) -> Result<serde_json::Value, ManifestError> {
        let value = each_variant!(self, obj => serde_json::to_value(obj)?);
        Ok(value)
    }

    /// YAML rendering for debug logs and dry runs.
    pub fn to_yaml(&self) -> Result<String, ManifestError> {
        let value = self.to_value()?;
        serde_yaml::to_string(&value).map_err(ManifestError::Yaml)
    }
}

/// Binds a generated object to its owner so the cluster garbage-collects it.
///
/// Sets the namespace and upserts the owner reference (matched by uid).
pub fn adopt(manifest: &mut Manifest, owner: &OwnerReference, namespace: &str) {
    let meta = manifest.metadata_mut();
    meta.namespace = Some(namespace.to_string());
    let refs = meta.owner_references.get_or_insert_with(Vec::new);
    match refs.iter_mut().find(|r| r.uid == owner.uid) {
        Some(existing) => *existing = owner.clone(),
        None => refs.push(owner.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(uid: &str) -> OwnerReference {
        OwnerReference {
            api_version: "dell.com/v1".to_string(),
            kind: "DevEnv".to_string(),
            name: "devenv-1".to_string(),
            uid: uid.to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    #[test]
    fn test_from_value_dispatches_on_kind() {
        let manifest = Manifest::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "ServiceAccount",
            "metadata": {"name": "devenv-1"}
        }))
        .unwrap();
        assert_eq!(manifest.kind(), ResourceKind::ServiceAccount);
        assert_eq!(manifest.name(), Some("devenv-1"));
        assert_eq!(manifest.display_name(), "ServiceAccount/devenv-1");
    }

    #[test]
    fn test_from_value_rejects_unknown_kind() {
        let err = Manifest::from_value(serde_json::json!({"apiVersion": "v1", "kind": "ConfigMap"})).unwrap_err();
        assert!(matches!(err, ManifestError::UnknownKind(k) if k == "ConfigMap"));

        let err = Manifest::from_value(serde_json::json!({"apiVersion": "v1"})).unwrap_err();
        assert!(matches!(err, ManifestError::MissingKind));
    }

    #[test]
    fn test_kind_parsing_accepts_kubectl_spellings() {
        assert_eq!("deployment".parse::<ResourceKind>().unwrap(), ResourceKind::Deployment);
        assert_eq!("Deployments".parse::<ResourceKind>().unwrap(), ResourceKind::Deployment);
        assert_eq!("pvc".parse::<ResourceKind>().unwrap(), ResourceKind::PersistentVolumeClaim);
        assert!("statefulset".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_into_deployment_checks_kind() {
        let manifest = Manifest::from(Service::default());
        assert!(matches!(
            manifest.into_deployment(),
            Err(ManifestError::UnexpectedKind { found: ResourceKind::Service, .. })
        ));
    }

    #[test]
    fn test_adopt_is_idempotent() {
        let mut manifest = Manifest::from(ServiceAccount::default());
        adopt(&mut manifest, &owner("uid-1"), "dev");
        adopt(&mut manifest, &owner("uid-1"), "dev");

        let meta = manifest.metadata();
        assert_eq!(meta.namespace.as_deref(), Some("dev"));
        assert_eq!(meta.owner_references.as_ref().map(Vec::len), Some(1));
    }
}
