//! Controller-specific error types.
//!
//! Wraps the errors of the crates the controller drives and decides which of
//! them are worth retrying.

use cluster_gateway::GatewayError;
use crds::SpecError;
use kube::Error as KubeError;
use manifests::{ManifestError, TemplateError};
use thiserror::Error;

/// Errors that can occur in the DevEnv Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error while reading or patching the DevEnv itself
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Cluster access error while handling generated or target objects
    #[error("Cluster error: {0}")]
    Gateway(#[from] GatewayError),

    /// The DevEnv spec is missing fields or names an unsupported kind
    #[error("Invalid DevEnv spec: {0}")]
    Spec(#[from] SpecError),

    /// A bundled or overridden template could not be rendered
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    /// A fetched object was not of the expected kind
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Mount list could not be encoded for the workload environment
    #[error("Failed to encode mounts: {0}")]
    Encoding(#[from] serde_yaml::Error),

    /// Status or snapshot could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The DevEnv object lacks metadata the controller relies on
    #[error("DevEnv is missing {0}")]
    MissingMetadata(&'static str),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Whether redelivering the same event can succeed.
    ///
    /// Cluster failures (including ambiguous selections, which depend on live
    /// cluster state) are retried with backoff. Spec, template and config
    /// problems need a human and only a spec change triggers another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kube(_) | Self::Gateway(_) | Self::Watch(_) => true,
            Self::Spec(_)
            | Self::Template(_)
            | Self::Manifest(_)
            | Self::Encoding(_)
            | Self::Serialization(_)
            | Self::MissingMetadata(_)
            | Self::InvalidConfig(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use manifests::ResourceKind;
    use std::time::Duration;

    #[test]
    fn test_retry_classification() {
        let timeout = ControllerError::from(GatewayError::Timeout {
            operation: "apply Deployment/api".to_string(),
            after: Duration::from_secs(5),
        });
        assert!(timeout.is_retryable());

        let ambiguous = ControllerError::from(GatewayError::AmbiguousSelection {
            kind: ResourceKind::Deployment,
            selector: "app=api".to_string(),
            count: 2,
        });
        assert!(ambiguous.is_retryable());

        let unsupported = ControllerError::from(SpecError::UnsupportedKind("statefulset".to_string()));
        assert!(!unsupported.is_retryable());
        assert!(!ControllerError::InvalidConfig("x".to_string()).is_retryable());
    }
}
