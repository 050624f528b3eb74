use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use kube::ResourceExt;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, field, info, instrument, warn, Span};

use super::condition::Builder;
use super::context::ReconcileRequestContext;
use super::handlers::{
    AvailabilityHandler, CertGenerationHandler, CertReadyHandler, ConfigurationHandler,
    DeploymentHandler, DeploymentReadyHandler, Handler, Options, ServiceHandler,
    ValidationHandler, WebhookConfigurationHandler,
};
use crate::cluster::{self, api_resource, Cluster};
use crate::controllers::Diagnostics;
use crate::resources::clusterresourceoverrides::ClusterResourceOverride;
use crate::runtime::{Clock, ReconcileRequest, ReconcileResult, Reconciler};
use crate::{telemetry, Error, Metrics, Result};

/// Runs handlers in order until one fails or asks for a requeue.
///
/// A failing handler has its error recorded as a condition before the chain stops.
pub struct HandlerChain {
    handlers: Vec<Box<dyn Handler>>,
    clock: Arc<dyn Clock>,
}

impl HandlerChain {
    pub fn new(handlers: Vec<Box<dyn Handler>>, clock: Arc<dyn Clock>) -> Self {
        Self { handlers, clock }
    }

    /// The steps that install and maintain the admission webhook.
    pub fn install(options: &Options) -> Self {
        let handlers: Vec<Box<dyn Handler>> = vec![
            Box::new(AvailabilityHandler::new(options)),
            Box::new(ValidationHandler),
            Box::new(ConfigurationHandler::new(options)),
            Box::new(CertGenerationHandler::new(options)),
            Box::new(CertReadyHandler::new(options)),
            Box::new(ServiceHandler::new(options)),
            Box::new(DeploymentHandler::new(options)),
            Box::new(DeploymentReadyHandler::new(options)),
            Box::new(WebhookConfigurationHandler::new(options)),
            Box::new(AvailabilityHandler::new(options)),
        ];
        Self::new(handlers, options.clock.clone())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|handler| handler.name()).collect()
    }
}

#[async_trait]
impl Handler for HandlerChain {
    fn name(&self) -> &'static str {
        "chain"
    }

    async fn handle(
        &self,
        context: &mut ReconcileRequestContext,
        current: &mut ClusterResourceOverride,
    ) -> Result<ReconcileResult> {
        for handler in &self.handlers {
            match handler.handle(context, current).await {
                Err(err) => {
                    debug!(handler = handler.name(), error = %err, "Handler failed");
                    Builder::new(current.status_mut(), self.clock.as_ref()).with_error(&err);
                    return Err(err);
                }
                Ok(result) if result.is_requeue() => {
                    debug!(handler = handler.name(), "Handler requested a requeue");
                    return Ok(result);
                }
                Ok(_) => {}
            }
        }
        Ok(ReconcileResult::default())
    }
}

/// Writes the status back when a pass changed it.
pub struct StatusUpdater {
    cluster: Arc<dyn Cluster>,
}

impl StatusUpdater {
    pub fn new(cluster: Arc<dyn Cluster>) -> Self {
        Self { cluster }
    }

    /// Patch the status of `original` to that of `current`.
    ///
    /// The patch is conditional on the resourceVersion `original` was read at, so a
    /// concurrent change fails the update instead of being overwritten.
    pub async fn update(
        &self,
        original: &ClusterResourceOverride,
        current: &ClusterResourceOverride,
    ) -> Result<()> {
        if original.status == current.status {
            debug!(key = %original.name_any(), "Status unchanged");
            return Ok(());
        }

        let patch = json!({
            "metadata": {"resourceVersion": original.resource_version()},
            "status": current.status,
        });
        self.cluster
            .patch_status(
                &api_resource::<ClusterResourceOverride>(),
                None,
                &original.name_any(),
                &patch,
            )
            .await?;
        debug!(key = %original.name_any(), "Status updated");
        Ok(())
    }
}

pub struct ClusterResourceOverrideReconciler {
    options: Options,
    chain: HandlerChain,
    updater: StatusUpdater,
    metrics: Metrics,
    diagnostics: Arc<RwLock<Diagnostics>>,
}

impl ClusterResourceOverrideReconciler {
    pub fn new(options: Options, metrics: Metrics, diagnostics: Arc<RwLock<Diagnostics>>) -> Self {
        let chain = HandlerChain::install(&options);
        let updater = StatusUpdater::new(options.cluster.clone());
        Self {
            options,
            chain,
            updater,
            metrics,
            diagnostics,
        }
    }

    #[instrument(skip(self), fields(trace_id))]
    async fn reconcile_request(&self, request: &ReconcileRequest) -> Result<ReconcileResult> {
        if let Some(trace_id) = telemetry::get_trace_id() {
            Span::current().record("trace_id", field::display(&trace_id));
        }

        let expected = self.options.operand.resource_name();
        if request.name != expected {
            info!(
                "Ignoring ClusterResourceOverride \"{}\", only \"{}\" is reconciled",
                request.name, expected
            );
            return Ok(ReconcileResult::default());
        }

        let Some(original) = cluster::get_opt::<ClusterResourceOverride>(
            self.options.cluster.as_ref(),
            None,
            &request.name,
        )
        .await?
        else {
            info!("ClusterResourceOverride \"{}\" not found", request.name);
            return Ok(ReconcileResult::default());
        };

        let _timer = self.metrics.count_and_measure(&original);
        {
            let mut diagnostics = self.diagnostics.write().await;
            diagnostics.last_event = Utc::now();
            diagnostics.last_request = Some(request.to_string());
        }

        info!("Reconciling ClusterResourceOverride \"{}\"", request.name);
        let mut current = original.clone();
        let mut context = ReconcileRequestContext::new(self.options.operand.clone());
        let result = self.chain.handle(&mut context, &mut current).await;
        if let Err(err) = &result {
            warn!("reconcile failed: {}", err);
            self.metrics.reconcile_failure(&original, err);
        }

        self.metrics.observe_conditions(&current);

        let update = self.updater.update(&original, &current).await;
        if let Err(err) = &update {
            self.metrics.status_update_failure(err);
        }
        match (result, update) {
            (result, Ok(())) => result,
            (Ok(_), Err(update)) => Err(update),
            (Err(reconcile), Err(update)) => Err(Error::StatusUpdateFailed {
                reconcile: Box::new(reconcile),
                update: Box::new(update),
            }),
        }
    }
}

#[async_trait]
impl Reconciler for ClusterResourceOverrideReconciler {
    async fn reconcile(&self, request: &ReconcileRequest) -> Result<ReconcileResult> {
        self.reconcile_request(request).await
    }
}
