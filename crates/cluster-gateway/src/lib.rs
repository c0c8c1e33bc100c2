//! Cluster Gateway
//!
//! Read, apply and delete access to the small catalog of kinds the DevEnv
//! operator manages. Lookups go through label selectors; callers that need a
//! unique target use `get_one`, which turns any count other than one into an
//! error.
//!
//! `KubeGateway` talks to the API server with a bounded timeout per call and
//! never retries. With the `test-util` feature, `MockClusterGateway` keeps the
//! same contract over an in-memory store.

pub mod error;
pub mod gateway;
pub mod kube_gateway;
pub mod selector;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use error::GatewayError;
pub use gateway::{ClusterGateway, Selection};
pub use kube_gateway::KubeGateway;
pub use selector::Selector;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockClusterGateway;
