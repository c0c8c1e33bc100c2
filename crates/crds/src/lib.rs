//! DevEnv CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the DevEnv operator.

pub mod devenv;
pub mod error;

pub use devenv::*;
pub use error::SpecError;
