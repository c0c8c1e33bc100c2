//! Cluster gateway errors

use manifests::ResourceKind;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when talking to the cluster
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The API server rejected the request or was unreachable
    #[error("Kubernetes error during {operation}: {source}")]
    Kube {
        operation: String,
        #[source]
        source: kube::Error,
    },

    /// The request did not complete within the configured timeout
    #[error("Timed out after {after:?} during {operation}")]
    Timeout { operation: String, after: Duration },

    /// A selector that must match exactly one object matched zero or several
    #[error("Selector {selector} matched {count} {kind} objects, expected exactly one")]
    AmbiguousSelection {
        kind: ResourceKind,
        selector: String,
        count: usize,
    },

    /// A manifest without metadata.name was passed to apply
    #[error("Cannot apply unnamed {0}")]
    MissingName(String),
}

impl GatewayError {
    /// True for selector cardinality failures.
    pub fn is_ambiguous_selection(&self) -> bool {
        matches!(self, Self::AmbiguousSelection { .. })
    }
}
