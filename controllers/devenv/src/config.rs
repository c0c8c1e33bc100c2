//! Controller configuration from environment variables.

use crate::error::ControllerError;
use cluster_gateway::Selector;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Runtime settings of the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Namespace to watch, all namespaces when unset
    pub namespace: Option<String>,
    /// Labels added to every mount target selector (e.g. a Helm release)
    pub extra_labels: Selector,
    /// Upper bound for every cluster call
    pub kube_timeout: Duration,
    pub storage_class: String,
    pub pvc_access_mode: String,
    /// Directory overriding the bundled templates
    pub template_dir: Option<PathBuf>,
    /// Field manager for server-side apply
    pub field_manager: String,
    /// Maximum concurrent reconciliations
    pub concurrency: u16,
    pub backoff_min_secs: u64,
    pub backoff_max_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: None,
            extra_labels: Selector::default(),
            kube_timeout: Duration::from_secs(5),
            storage_class: "efs".to_string(),
            pvc_access_mode: "ReadWriteMany".to_string(),
            template_dir: None,
            field_manager: "devenv-operator".to_string(),
            concurrency: 3,
            backoff_min_secs: 5,
            backoff_max_secs: 300,
        }
    }
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let extra_labels = match get("DEVENV_EXTRA_LABELS") {
            Some(raw) => raw
                .parse::<Selector>()
                .map_err(|e| ControllerError::InvalidConfig(format!("DEVENV_EXTRA_LABELS: {}", e)))?,
            None => defaults.extra_labels,
        };

        let config = Self {
            namespace: get("WATCH_NAMESPACE"),
            extra_labels,
            kube_timeout: Duration::from_secs(parse_or(&get, "DEVENV_KUBE_TIMEOUT_SECS", defaults.kube_timeout.as_secs())?),
            storage_class: get("DEVENV_STORAGE_CLASS").unwrap_or(defaults.storage_class),
            pvc_access_mode: get("DEVENV_PVC_ACCESS_MODE").unwrap_or(defaults.pvc_access_mode),
            template_dir: get("DEVENV_TEMPLATE_DIR").map(PathBuf::from),
            field_manager: get("DEVENV_FIELD_MANAGER").unwrap_or(defaults.field_manager),
            concurrency: parse_or(&get, "DEVENV_CONCURRENCY", defaults.concurrency)?,
            backoff_min_secs: parse_or(&get, "DEVENV_BACKOFF_MIN_SECS", defaults.backoff_min_secs)?,
            backoff_max_secs: parse_or(&get, "DEVENV_BACKOFF_MAX_SECS", defaults.backoff_max_secs)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ControllerError> {
        if self.kube_timeout.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "DEVENV_KUBE_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }
        if self.backoff_min_secs == 0 || self.backoff_min_secs > self.backoff_max_secs {
            return Err(ControllerError::InvalidConfig(format!(
                "backoff bounds must satisfy 0 < min <= max, got min={} max={}",
                self.backoff_min_secs, self.backoff_max_secs
            )));
        }
        Ok(())
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ControllerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| ControllerError::InvalidConfig(format!("{}={:?}: {}", key, raw, e))),
        None => Ok(default),
    }
}
