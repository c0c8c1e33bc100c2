//! Mount code volume to pods.
//!
//! Attaches (or with `--disable`, detaches) a PVC-backed volume on every
//! workload listed in a configuration file. Each entry must match exactly
//! one deployment; the edited manifest is printed before it is applied.

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use cluster_gateway::{ClusterGateway, KubeGateway, Selector};
use config::MountConfig;
use manifests::{Manifest, ResourceKind, mutate};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const FIELD_MANAGER: &str = "mount-code-volume";
const KUBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "mount-code-volume")]
#[command(about = "Mount code volume to pods")]
struct Cli {
    /// Configuration file with target manifests and mount paths
    #[arg(short = 'c', long, default_value = "./config.yaml")]
    config: PathBuf,

    /// Kubernetes namespace of all objects that will be modified
    #[arg(short = 'n', long, default_value = "default")]
    namespace: String,

    /// Labels common to all objects that will be modified, as key=value pairs
    /// separated by commas (e.g. `release=test-env-42`)
    #[arg(short = 'l', long, default_value = "")]
    labels: Selector,

    /// Disable mounts instead of enabling them
    #[arg(short = 'd', long)]
    disable: bool,

    /// Name of the PVC to mount
    pvc_name: String,
}

/// Edits every configured target and applies it, in file order.
///
/// Returns the applied manifests.
async fn mount_all(gateway: &dyn ClusterGateway, cli: &Cli, config: &MountConfig) -> Result<Vec<Manifest>> {
    let mut applied = Vec::with_capacity(config.mounts.len());
    for target in &config.mounts {
        let selector = Selector::from(&target.labels).merged(&cli.labels);
        let mut deployment = gateway
            .get_one(&cli.namespace, ResourceKind::Deployment, &selector)
            .await?
            .into_deployment()?;

        if cli.disable {
            mutate::remove_mount(&mut deployment, &config.volume_name);
        } else {
            mutate::add_mount(
                &mut deployment,
                &config.volume_name,
                &cli.pvc_name,
                &target.mount_path,
                target.sub_path(),
            );
        }

        let manifest = Manifest::from(deployment);
        println!("{}", manifest.to_yaml()?);
        gateway
            .apply(&cli.namespace, &manifest)
            .await
            .with_context(|| format!("failed to apply {}", manifest.display_name()))?;
        info!("Applied {} in namespace {}", manifest.display_name(), cli.namespace);
        applied.push(manifest);
    }
    Ok(applied)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = MountConfig::load(&cli.config)?;

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        tracing::warn!("A rustls crypto provider was already installed");
    }
    let client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    let gateway = KubeGateway::new(client, FIELD_MANAGER, KUBE_TIMEOUT);

    let applied = mount_all(&gateway, &cli, &config).await?;
    info!(
        "{} volume {:?} on {} workload(s)",
        if cli.disable { "Removed" } else { "Mounted" },
        config.volume_name,
        applied.len()
    );
    Ok(())
}
