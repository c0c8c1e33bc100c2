//! Event dispatch.
//!
//! The watch loop only ever sees the current state of a DevEnv. Events are
//! derived by comparing the spec against the snapshot stored in the
//! `devenv.dell.com/last-handled-configuration` annotation after the last
//! successful reconcile, then looked up in `ROUTES`.

use crds::{DevEnv, DevEnvSpec};
use tracing::warn;

/// Annotation holding the JSON of the last successfully handled spec.
pub const LAST_HANDLED_ANNOTATION: &str = "devenv.dell.com/last-handled-configuration";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

/// Spec fields handlers subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldPath {
    Spec,
    MountsEnabled,
    Mounts,
}

impl FieldPath {
    /// Whether this field differs between two specs.
    fn changed(self, previous: &DevEnvSpec, current: &DevEnvSpec) -> bool {
        match self {
            Self::Spec => previous != current,
            Self::MountsEnabled => previous.mounts_enabled != current.mounts_enabled,
            Self::Mounts => previous.mounts != current.mounts,
        }
    }

    /// Whether this field carries a value on a freshly created object.
    fn present(self, current: &DevEnvSpec) -> bool {
        match self {
            Self::Spec => true,
            Self::MountsEnabled => current.mounts_enabled,
            Self::Mounts => !current.mounts.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    /// Render and apply the base objects, report ssh/cmd
    Provision,
    /// Attach or detach the code volume on every mount target
    Mounts,
    /// Detach the code volume before the DevEnv goes away
    Cleanup,
}

#[derive(Debug, Clone, Copy)]
pub struct Route {
    pub event: EventKind,
    pub field: Option<FieldPath>,
    pub handler: Handler,
}

const fn route(event: EventKind, field: Option<FieldPath>, handler: Handler) -> Route {
    Route { event, field, handler }
}

pub const ROUTES: &[Route] = &[
    route(EventKind::Create, None, Handler::Provision),
    route(EventKind::Update, Some(FieldPath::Spec), Handler::Provision),
    route(EventKind::Create, Some(FieldPath::MountsEnabled), Handler::Mounts),
    route(EventKind::Update, Some(FieldPath::MountsEnabled), Handler::Mounts),
    route(EventKind::Create, Some(FieldPath::Mounts), Handler::Mounts),
    route(EventKind::Update, Some(FieldPath::Mounts), Handler::Mounts),
    route(EventKind::Delete, None, Handler::Cleanup),
];

/// Handlers to run for the transition `previous -> current`, in table order.
///
/// `previous` is the last handled spec, `None` if the object was never
/// handled. Each handler appears at most once.
pub fn select_handlers(previous: Option<&DevEnvSpec>, current: &DevEnvSpec, deleting: bool) -> Vec<Handler> {
    let event = match (deleting, previous) {
        (true, _) => EventKind::Delete,
        (false, None) => EventKind::Create,
        (false, Some(_)) => EventKind::Update,
    };

    let mut handlers = Vec::new();
    for route in ROUTES.iter().filter(|r| r.event == event) {
        let fires = match (route.field, previous) {
            (None, _) => true,
            (Some(field), Some(previous)) => field.changed(previous, current),
            (Some(field), None) => field.present(current),
        };
        if fires && !handlers.contains(&route.handler) {
            handlers.push(route.handler);
        }
    }
    handlers
}

/// The last handled spec stored on `devenv`.
///
/// An unreadable snapshot is treated as absent, so every handler runs again.
pub fn last_handled(devenv: &DevEnv) -> Option<DevEnvSpec> {
    let raw = devenv.metadata.annotations.as_ref()?.get(LAST_HANDLED_ANNOTATION)?;
    match serde_json::from_str(raw) {
        Ok(spec) => Some(spec),
        Err(e) => {
            warn!(
                "Ignoring unreadable {} annotation on DevEnv {}: {}",
                LAST_HANDLED_ANNOTATION,
                devenv.metadata.name.as_deref().unwrap_or_default(),
                e
            );
            None
        }
    }
}
