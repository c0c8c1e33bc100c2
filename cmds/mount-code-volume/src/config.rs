//! Mount configuration file.
//!
//! ```yaml
//! volume_name: code        # optional
//! mounts:
//!   - kind: deployment
//!     labels: {app: api}
//!     mountPath: /code
//!     subPath: api         # optional
//! ```

use anyhow::{Context, Result, bail};
use crds::MountTarget;
use serde::Deserialize;
use std::path::Path;

fn default_volume_name() -> String {
    "code".to_string()
}

/// Parsed configuration file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MountConfig {
    /// Name of the volume and of its mounts in every container
    #[serde(default = "default_volume_name")]
    pub volume_name: String,

    pub mounts: Vec<MountTarget>,
}

impl MountConfig {
    /// Reads and validates the file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("Can't find configuration file at '{}'", path.display());
        }
        let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid configuration in {}", path.display()))
    }

    /// Parses and validates configuration text.
    pub fn parse(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        if config.volume_name.is_empty() {
            bail!("volume_name must not be empty");
        }
        for (index, mount) in config.mounts.iter().enumerate() {
            mount.validate(index)?;
        }
        Ok(config)
    }
}
