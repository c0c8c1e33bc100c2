//! ClusterGateway trait for mocking
//!
//! Reconcile handlers only ever see `&dyn ClusterGateway`; the controller
//! binary passes a `KubeGateway` and unit tests pass a `MockClusterGateway`.

use crate::error::GatewayError;
use crate::selector::Selector;
use manifests::{Manifest, ResourceKind};

/// Result of running a selector against a namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Nothing matched
    Zero,
    /// Exactly one object matched
    One(Manifest),
    /// More than one object matched; only the count is kept
    Multiple(usize),
}

impl Selection {
    pub fn from_items(mut items: Vec<Manifest>) -> Self {
        match items.len() {
            0 => Self::Zero,
            1 => items.pop().map_or(Self::Zero, Self::One),
            n => Self::Multiple(n),
        }
    }

    pub fn count(&self) -> usize {
        match self {
            Self::Zero => 0,
            Self::One(_) => 1,
            Self::Multiple(n) => *n,
        }
    }

    /// The single match, or `AmbiguousSelection` for zero or several.
    pub fn into_single(self, kind: ResourceKind, selector: &Selector) -> Result<Manifest, GatewayError> {
        match self {
            Self::One(manifest) => Ok(manifest),
            other => Err(GatewayError::AmbiguousSelection {
                kind,
                selector: selector.to_string(),
                count: other.count(),
            }),
        }
    }
}

/// Cluster operations used by the reconcile handlers.
///
/// All methods must be `Send` to work with Tokio's work-stealing runtime.
/// Implementations do not retry; failures surface to the caller as-is.
#[async_trait::async_trait]
pub trait ClusterGateway: Send + Sync {
    /// All objects of `kind` in `namespace` whose labels satisfy `selector`.
    async fn list(&self, namespace: &str, kind: ResourceKind, selector: &Selector) -> Result<Vec<Manifest>, GatewayError>;

    /// Object by name, `None` when absent.
    async fn get(&self, namespace: &str, kind: ResourceKind, name: &str) -> Result<Option<Manifest>, GatewayError>;

    /// Creates or replaces `manifest` in `namespace`.
    async fn apply(&self, namespace: &str, manifest: &Manifest) -> Result<(), GatewayError>;

    /// Deletes an object by name. Deleting a missing object succeeds.
    async fn delete(&self, namespace: &str, kind: ResourceKind, name: &str) -> Result<(), GatewayError>;

    async fn select(&self, namespace: &str, kind: ResourceKind, selector: &Selector) -> Result<Selection, GatewayError> {
        Ok(Selection::from_items(self.list(namespace, kind, selector).await?))
    }

    /// The unique object matching `selector`.
    async fn get_one(&self, namespace: &str, kind: ResourceKind, selector: &Selector) -> Result<Manifest, GatewayError> {
        self.select(namespace, kind, selector).await?.into_single(kind, selector)
    }

    /// Applies in order, stopping at the first failure.
    async fn apply_all(&self, namespace: &str, manifests: &[Manifest]) -> Result<(), GatewayError> {
        for manifest in manifests {
            self.apply(namespace, manifest).await?;
        }
        Ok(())
    }
}
