//! Main controller implementation.
//!
//! Wires the Kubernetes client, templates and reconciler together and runs
//! the DevEnv watcher in a background task.

use crate::backoff::BackoffTracker;
use crate::config::Config;
use crate::error::ControllerError;
use crate::reconciler::{Reconciler, Settings};
use crate::watcher::{Context, watch_devenvs};
use cluster_gateway::KubeGateway;
use crds::DevEnv;
use kube::{Api, Client};
use manifests::TemplateEngine;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for DevEnv resources.
pub struct Controller {
    devenv_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts watching.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing DevEnv Controller");

        let kube_client = Client::try_default().await?;

        let templates = match &config.template_dir {
            Some(dir) => {
                info!("Loading templates from {}", dir.display());
                TemplateEngine::from_dir(dir)?
            }
            None => TemplateEngine::embedded(),
        };

        let gateway = KubeGateway::new(kube_client.clone(), config.field_manager.clone(), config.kube_timeout);
        let reconciler = Reconciler::new(
            Box::new(gateway),
            templates,
            Settings {
                extra_labels: config.extra_labels.clone(),
                storage_class: config.storage_class.clone(),
                pvc_access_mode: config.pvc_access_mode.clone(),
            },
        );

        let devenv_api: Api<DevEnv> = match config.namespace.as_deref() {
            Some(ns) => Api::namespaced(kube_client.clone(), ns),
            None => Api::all(kube_client.clone()),
        };

        let context = Arc::new(Context {
            reconciler,
            client: kube_client,
            backoff: BackoffTracker::new(config.backoff_min_secs, config.backoff_max_secs),
        });

        let concurrency = config.concurrency;
        let devenv_watcher = tokio::spawn(async move { watch_devenvs(devenv_api, context, concurrency).await });

        Ok(Self { devenv_watcher })
    }

    /// Runs the controller until shutdown.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("DevEnv Controller running");

        self.devenv_watcher
            .await
            .map_err(|e| ControllerError::Watch(format!("DevEnv watcher panicked: {}", e)))?
    }
}
