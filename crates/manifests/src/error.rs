//! Manifest and template errors.

use crate::manifest::ResourceKind;
use thiserror::Error;

/// Errors converting between raw documents and typed manifests.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Document has no `kind` field
    #[error("Manifest has no kind")]
    MissingKind,

    /// Document kind is outside the supported catalog
    #[error("Unsupported manifest kind: {0}")]
    UnknownKind(String),

    /// A manifest of one kind was used where another was required
    #[error("Expected a {expected} manifest, found {found}")]
    UnexpectedKind {
        expected: ResourceKind,
        found: ResourceKind,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML error: {0}")]
    Yaml(serde_yaml::Error),
}

/// Errors rendering a manifest template. All of them indicate a packaging defect.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// A required parameter was not supplied
    #[error("Template {template} is missing parameter {key}")]
    MissingParameter {
        template: &'static str,
        key: String,
    },

    /// The template body is not valid YAML
    #[error("Template {template} failed to parse: {source}")]
    Parse {
        template: &'static str,
        #[source]
        source: serde_yaml::Error,
    },

    /// A placeholder expression failed to render
    #[error("Template {template} failed to render: {source}")]
    Render {
        template: &'static str,
        #[source]
        source: minijinja::Error,
    },

    /// The rendered document is not a supported manifest
    #[error("Template {template} produced an invalid manifest: {source}")]
    Manifest {
        template: &'static str,
        #[source]
        source: ManifestError,
    },

    /// A template override could not be read from disk
    #[error("Failed to read template {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
