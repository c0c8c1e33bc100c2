//! DevEnv watcher.
//!
//! Drives reconciliation with `kube_runtime::Controller`, which gives
//! reconnection, per-object serialization and a bounded worker pool. Each
//! reconcile:
//! 1. makes sure the cleanup finalizer is present,
//! 2. asks the dispatch table which handlers the change calls for,
//! 3. runs them and merge-patches the status (including `status.error`),
//! 4. stores the handled spec as an annotation, or drops the finalizer on delete.

use crate::backoff::BackoffTracker;
use crate::dispatch::{self, LAST_HANDLED_ANNOTATION};
use crate::error::ControllerError;
use crate::reconciler::{Reconciler, status};
use crds::{DevEnv, DevEnvSpec};
use futures::StreamExt;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use kube_runtime::{Controller, controller::{Action, Config as ControllerConfig}, watcher};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Finalizer holding deletion until mounts are detached.
pub const FINALIZER: &str = "devenv.dell.com/cleanup";

/// Quiet period after the last event before a reconcile starts.
const DEBOUNCE: Duration = Duration::from_secs(2);

/// State shared by all reconciliations.
pub struct Context {
    pub reconciler: Reconciler,
    pub client: Client,
    pub backoff: BackoffTracker,
}

fn object_key(devenv: &DevEnv) -> String {
    format!("{}/{}", devenv.namespace().unwrap_or_default(), devenv.name_any())
}

fn has_finalizer(devenv: &DevEnv) -> bool {
    devenv.finalizers().iter().any(|f| f == FINALIZER)
}

/// Merge patch replacing the finalizer list, optionally guarded by a resourceVersion.
fn finalizer_patch(finalizers: &[String], resource_version: Option<String>) -> Value {
    let mut metadata = json!({ "finalizers": finalizers });
    if let Some(resource_version) = resource_version {
        metadata["resourceVersion"] = json!(resource_version);
    }
    json!({ "metadata": metadata })
}

fn finalizers_without_ours(devenv: &DevEnv) -> Vec<String> {
    devenv
        .finalizers()
        .iter()
        .filter(|f| *f != FINALIZER)
        .cloned()
        .collect()
}

async fn add_finalizer(api: &Api<DevEnv>, devenv: &DevEnv) -> Result<(), ControllerError> {
    let mut finalizers = devenv.finalizers().to_vec();
    finalizers.push(FINALIZER.to_string());
    let patch = finalizer_patch(&finalizers, devenv.resource_version());
    api.patch(&devenv.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Drops our finalizer. Sent without a resourceVersion: the status patch of
/// the same reconcile has already moved it past the one we read.
async fn remove_finalizer(api: &Api<DevEnv>, devenv: &DevEnv) -> Result<(), ControllerError> {
    let patch = finalizer_patch(&finalizers_without_ours(devenv), None);
    api.patch(&devenv.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

async fn record_handled(api: &Api<DevEnv>, name: &str, spec: &DevEnvSpec) -> Result<(), ControllerError> {
    let patch = json!({
        "metadata": {
            "annotations": {
                LAST_HANDLED_ANNOTATION: serde_json::to_string(spec)?,
            }
        }
    });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
    Ok(())
}

async fn reconcile(devenv: Arc<DevEnv>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let key = object_key(&devenv);
    let name = devenv.name_any();
    let namespace = devenv
        .namespace()
        .ok_or(ControllerError::MissingMetadata("metadata.namespace"))?;
    let api: Api<DevEnv> = Api::namespaced(ctx.client.clone(), &namespace);
    let deleting = devenv.metadata.deletion_timestamp.is_some();

    if !has_finalizer(&devenv) {
        if deleting {
            debug!("DevEnv {} is being deleted and has been cleaned up", key);
            return Ok(Action::await_change());
        }
        add_finalizer(&api, &devenv).await?;
        info!("Added finalizer {} to DevEnv {}", FINALIZER, key);
    }

    let previous = dispatch::last_handled(&devenv);
    let handlers = dispatch::select_handlers(previous.as_ref(), &devenv.spec, deleting);
    if handlers.is_empty() {
        debug!("DevEnv {} unchanged since it was last handled", key);
        ctx.backoff.reset(&key);
        return Ok(Action::await_change());
    }
    info!("Reconciling DevEnv {} with handlers {:?}", key, handlers);

    let current = devenv.status.clone().unwrap_or_default();
    let mut next = current.clone();
    let result = ctx.reconciler.run(&devenv, &handlers, &mut next).await;
    next.error = result.as_ref().err().map(ToString::to_string);

    if next != current {
        let patch = status::status_patch(&current, &next)?;
        let patched = api
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await;
        match (&result, patched) {
            (_, Ok(_)) => debug!("Updated status of DevEnv {}", key),
            (Ok(()), Err(e)) => return Err(e.into()),
            (Err(_), Err(e)) => warn!("Failed to record error on DevEnv {}: {}", key, e),
        }
    }
    result?;

    if deleting {
        remove_finalizer(&api, &devenv).await?;
        info!("DevEnv {} cleaned up, finalizer removed", key);
    } else {
        record_handled(&api, &name, &devenv.spec).await?;
    }
    ctx.backoff.reset(&key);
    Ok(Action::await_change())
}

fn error_policy(devenv: Arc<DevEnv>, error: &ControllerError, ctx: Arc<Context>) -> Action {
    let key = object_key(&devenv);
    if !error.is_retryable() {
        error!("Reconciliation of DevEnv {} failed, waiting for a spec change: {}", key, error);
        ctx.backoff.reset(&key);
        return Action::await_change();
    }
    let (delay, attempts) = ctx.backoff.next(&key);
    warn!(
        "Reconciliation of DevEnv {} failed (attempt {}), retrying in {}s: {}",
        key,
        attempts,
        delay.as_secs(),
        error
    );
    Action::requeue(delay)
}

/// Watches DevEnv resources until the process receives a shutdown signal.
pub async fn watch_devenvs(api: Api<DevEnv>, ctx: Arc<Context>, concurrency: u16) -> Result<(), ControllerError> {
    info!("Starting DevEnv watcher (concurrency {})", concurrency);

    let controller_config = ControllerConfig::default()
        .debounce(DEBOUNCE)
        .concurrency(concurrency);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled {}", obj),
                Err(e) => error!("Controller error for DevEnv: {}", e),
            }
        })
        .await;

    info!("DevEnv watcher stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalizer_detection() {
        let mut devenv = DevEnv::new("devenv-1", DevEnvSpec::default());
        devenv.metadata.namespace = Some("dev".to_string());
        assert!(!has_finalizer(&devenv));
        assert_eq!(object_key(&devenv), "dev/devenv-1");

        devenv.metadata.finalizers = Some(vec!["other".to_string(), FINALIZER.to_string()]);
        assert!(has_finalizer(&devenv));
    }

    #[test]
    fn test_finalizer_removal_is_not_guarded_by_stale_resource_version() {
        let mut devenv = DevEnv::new("devenv-1", DevEnvSpec::default());
        devenv.metadata.resource_version = Some("41".to_string());
        devenv.metadata.finalizers = Some(vec!["other".to_string(), FINALIZER.to_string()]);

        let removal = finalizer_patch(&finalizers_without_ours(&devenv), None);
        assert_eq!(removal, json!({ "metadata": { "finalizers": ["other"] } }));
        assert!(removal["metadata"].get("resourceVersion").is_none());

        let addition = finalizer_patch(&[FINALIZER.to_string()], devenv.resource_version());
        assert_eq!(addition["metadata"]["resourceVersion"], "41");
    }
}
