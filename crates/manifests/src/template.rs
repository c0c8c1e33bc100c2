//! Manifest template engine.
//!
//! Templates are YAML documents whose string scalars may contain `{{ key }}`
//! placeholders. The body is parsed first and placeholders are rendered only
//! inside string scalars, so a parameter value can never change the shape of
//! the document. A scalar consisting of a single placeholder bound to an
//! integer parameter is emitted as a YAML integer.

use crate::error::TemplateError;
use crate::manifest::Manifest;
use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use serde::Serialize;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// The fixed catalog of templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Template {
    ServiceAccount,
    Role,
    RoleBinding,
    Pvc,
    Deployment,
    Service,
    CloneService,
    CloneIngress,
}

impl Template {
    pub const ALL: [Template; 8] = [
        Template::ServiceAccount,
        Template::Role,
        Template::RoleBinding,
        Template::Pvc,
        Template::Deployment,
        Template::Service,
        Template::CloneService,
        Template::CloneIngress,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            Self::ServiceAccount => "service-account.yaml",
            Self::Role => "role.yaml",
            Self::RoleBinding => "role-binding.yaml",
            Self::Pvc => "pvc.yaml",
            Self::Deployment => "deployment.yaml",
            Self::Service => "svc.yaml",
            Self::CloneService => "clone-svc.yaml",
            Self::CloneIngress => "clone-ingress.yaml",
        }
    }

    /// Keys that must be present in the parameter set.
    pub fn required_params(self) -> &'static [&'static str] {
        match self {
            Self::ServiceAccount | Self::Role | Self::RoleBinding => &["name"],
            Self::Pvc => &["name", "size", "access_mode", "storage_class"],
            Self::Deployment => &["name", "image", "ssh_keys", "mounts", "reload_signal", "post_mount_pod_cmd"],
            Self::Service => &["name", "base_domain"],
            Self::CloneService => &["name", "port"],
            Self::CloneIngress => &["name", "base_domain", "port", "group"],
        }
    }

    fn embedded_body(self) -> &'static str {
        match self {
            Self::ServiceAccount => include_str!("../templates/service-account.yaml"),
            Self::Role => include_str!("../templates/role.yaml"),
            Self::RoleBinding => include_str!("../templates/role-binding.yaml"),
            Self::Pvc => include_str!("../templates/pvc.yaml"),
            Self::Deployment => include_str!("../templates/deployment.yaml"),
            Self::Service => include_str!("../templates/svc.yaml"),
            Self::CloneService => include_str!("../templates/clone-svc.yaml"),
            Self::CloneIngress => include_str!("../templates/clone-ingress.yaml"),
        }
    }
}

/// A template parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Str(String),
    Int(i64),
}

/// Named parameters for one render call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateParams {
    values: BTreeMap<String, ParamValue>,
}

impl TemplateParams {
    /// An empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a string parameter.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), ParamValue::Str(value.into()));
        self
    }

    /// Adds an integer parameter.
    #[must_use]
    pub fn with_int(mut self, key: impl Into<String>, value: i64) -> Self {
        self.values.insert(key.into(), ParamValue::Int(value));
        self
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

/// Renders templates into typed manifests.
pub struct TemplateEngine {
    bodies: BTreeMap<Template, String>,
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::embedded()
    }
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine")
            .field("templates", &self.bodies.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl TemplateEngine {
    /// Engine using the templates compiled into the binary.
    pub fn embedded() -> Self {
        let bodies = Template::ALL
            .iter()
            .map(|t| (*t, t.embedded_body().to_string()))
            .collect();
        Self::with_bodies(bodies)
    }

    /// Engine that prefers files found in `dir`, falling back to the embedded bodies.
    pub fn from_dir(dir: &Path) -> Result<Self, TemplateError> {
        let mut bodies = BTreeMap::new();
        for template in Template::ALL {
            let path = dir.join(template.file_name());
            let body = if path.exists() {
                debug!("Loading template override {}", path.display());
                std::fs::read_to_string(&path).map_err(|source| TemplateError::Io {
                    path: path.display().to_string(),
                    source,
                })?
            } else {
                template.embedded_body().to_string()
            };
            bodies.insert(template, body);
        }
        Ok(Self::with_bodies(bodies))
    }

    fn with_bodies(bodies: BTreeMap<Template, String>) -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        Self { bodies, env }
    }

    /// Renders `template` with `params` into a manifest.
    pub fn render(&self, template: Template, params: &TemplateParams) -> Result<Manifest, TemplateError> {
        let name = template.file_name();
        if let Some(key) = template.required_params().iter().find(|k| !params.contains(k)) {
            return Err(TemplateError::MissingParameter {
                template: name,
                key: (*key).to_string(),
            });
        }

        let body = self
            .bodies
            .get(&template)
            .map_or_else(|| template.embedded_body(), String::as_str);
        let mut doc: Value = serde_yaml::from_str(body).map_err(|source| TemplateError::Parse { template: name, source })?;
        self.substitute(&mut doc, template, params)?;

        let json = serde_json::to_value(&doc).map_err(|e| TemplateError::Manifest {
            template: name,
            source: e.into(),
        })?;
        let manifest = Manifest::from_value(json).map_err(|source| TemplateError::Manifest { template: name, source })?;
        debug!("Rendered {} from {}", manifest.display_name(), name);
        Ok(manifest)
    }

    fn substitute(&self, value: &mut Value, template: Template, params: &TemplateParams) -> Result<(), TemplateError> {
        match value {
            Value::String(s) if s.contains("{{") || s.contains("{%") => {
                *value = self.render_scalar(s, template, params)?;
            }
            Value::Sequence(items) => {
                for item in items {
                    self.substitute(item, template, params)?;
                }
            }
            Value::Mapping(map) => {
                for (_, item) in map.iter_mut() {
                    self.substitute(item, template, params)?;
                }
            }
            Value::Tagged(tagged) => self.substitute(&mut tagged.value, template, params)?,
            _ => {}
        }
        Ok(())
    }

    fn render_scalar(&self, scalar: &str, template: Template, params: &TemplateParams) -> Result<Value, TemplateError> {
        if let Some(ParamValue::Int(n)) = sole_placeholder(scalar).and_then(|key| params.get(key)) {
            return Ok(Value::Number((*n).into()));
        }

        let ctx = minijinja::Value::from_serialize(&params.values);
        self.env.render_str(scalar, ctx).map(Value::String).map_err(|source| {
            if source.kind() == ErrorKind::UndefinedError {
                TemplateError::MissingParameter {
                    template: template.file_name(),
                    key: source.detail().unwrap_or("<unknown>").to_string(),
                }
            } else {
                TemplateError::Render {
                    template: template.file_name(),
                    source,
                }
            }
        })
    }
}

/// Returns `key` if `s` is exactly `{{ key }}`.
fn sole_placeholder(s: &str) -> Option<&str> {
    let key = s.trim().strip_prefix("{{")?.strip_suffix("}}")?.trim();
    let is_ident = !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    is_ident.then_some(key)
}
