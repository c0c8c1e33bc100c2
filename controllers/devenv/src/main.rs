//! DevEnv Controller
//!
//! Reconciles `DevEnv` resources:
//! - provisions the environment (RBAC, code PVC, SSH workload, service)
//! - mounts the code PVC into existing workloads, in place or on clones
//! - detaches the code volume again when the DevEnv is deleted

mod backoff;
mod config;
mod controller;
mod dispatch;
mod error;
mod reconciler;
mod watcher;

use crate::config::Config;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube is built with rustls but no default provider
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting DevEnv Controller");

    let config = Config::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Extra labels: {}", config.extra_labels);
    info!("  Storage class: {} ({})", config.storage_class, config.pvc_access_mode);
    info!(
        "  Templates: {}",
        config.template_dir.as_ref().map_or_else(|| "embedded".to_string(), |d| d.display().to_string())
    );
    info!("  Field manager: {}", config.field_manager);
    info!("  Kube timeout: {}s", config.kube_timeout.as_secs());
    info!("  Concurrency: {}", config.concurrency);
    info!("  Backoff: {}s..{}s", config.backoff_min_secs, config.backoff_max_secs);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
