//! DevEnv manifests
//!
//! Typed Kubernetes documents for the DevEnv operator:
//! - `manifest`: the `Manifest` document type and owner binding
//! - `template`: renders the fixed catalog of templates from typed parameters
//! - `mutate`: idempotent mount, entrypoint and clone edits on Deployments

pub mod error;
pub mod manifest;
pub mod mutate;
pub mod template;

pub use error::{ManifestError, TemplateError};
pub use manifest::{adopt, Manifest, ResourceKind};
pub use template::{ParamValue, Template, TemplateEngine, TemplateParams};
