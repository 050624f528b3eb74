//! Controller installing the ClusterResourceOverride admission webhook.
//!
//! A pass reads the singleton resource, runs the [`HandlerChain`] over a copy of it and
//! writes the status back when it changed. Operand objects are watched separately and
//! mapped back to the resource by the [`OwnerEnqueuer`].

use std::sync::Arc;

use kube::runtime::reflector;

use crate::controllers::State;
use crate::resources::clusterresourceoverrides::ClusterResourceOverride;
use crate::runtime::{Controller, WorkQueue};
use crate::Metrics;

pub mod condition;
pub mod context;
pub mod enqueuer;
pub mod handlers;
pub mod reconciler;

pub use enqueuer::OwnerEnqueuer;
pub use handlers::Options;
pub use reconciler::{ClusterResourceOverrideReconciler, HandlerChain, StatusUpdater};

pub const CONTROLLER_NAME: &str = "clusterresourceoverride";

/// The controller and the enqueuer that feeds operand changes into its queue.
pub fn new_controller(
    options: Options,
    metrics: Metrics,
    state: &State,
) -> (Controller<ClusterResourceOverride>, OwnerEnqueuer) {
    let queue = WorkQueue::new();
    let (store, writer) = reflector::store();
    let enqueuer = OwnerEnqueuer::new(
        queue.clone(),
        store.clone(),
        options.asset.values().owner_annotation_key.clone(),
    );
    let reconciler = Arc::new(ClusterResourceOverrideReconciler::new(
        options,
        metrics,
        state.diagnostics.clone(),
    ));
    let controller = Controller::new(CONTROLLER_NAME, queue, (store, writer), reconciler);
    (controller, enqueuer)
}
