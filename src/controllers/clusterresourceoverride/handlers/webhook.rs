use async_trait::async_trait;
use k8s_openapi::api::admissionregistration::v1::MutatingWebhookConfiguration;
use tracing::info;

use super::{Handler, Options};
use crate::cluster;
use crate::controllers::clusterresourceoverride::context::{
    is_current, reference, ReconcileRequestContext,
};
use crate::resources::clusterresourceoverrides::{reasons, ClusterResourceOverride};
use crate::runtime::ReconcileResult;
use crate::{Error, Result};

/// Registers the webhook with the API server once the server is up.
pub struct WebhookConfigurationHandler {
    options: Options,
}

impl WebhookConfigurationHandler {
    pub fn new(options: &Options) -> Self {
        Self {
            options: options.clone(),
        }
    }
}

#[async_trait]
impl Handler for WebhookConfigurationHandler {
    fn name(&self) -> &'static str {
        "webhook-configuration"
    }

    async fn handle(
        &self,
        context: &mut ReconcileRequestContext,
        current: &mut ClusterResourceOverride,
    ) -> Result<ReconcileResult> {
        let not_available = |err: Error| Error::install_readiness(reasons::CERT_NOT_AVAILABLE, err);
        let name = self.options.asset.webhook_configuration_name();

        let live = cluster::get_opt::<MutatingWebhookConfiguration>(
            self.options.cluster.as_ref(),
            None,
            &name,
        )
        .await
        .map_err(|err| not_available(err.into()))?;

        let object = match live {
            Some(object) => object,
            None => {
                let Some(bundle) = context.bundle() else {
                    return Err(Error::install_readiness(
                        reasons::CERT_NOT_AVAILABLE,
                        "no serving certificate bundle to register the webhook with",
                    ));
                };
                let mut desired = self.options.asset.webhook_configuration(&bundle.serving_cert_ca);
                context.set_controller(&mut desired.metadata, current);
                let object = self
                    .options
                    .ensurer
                    .ensure(&desired)
                    .await
                    .map_err(not_available)?;
                info!(resource = %name, "MutatingWebhookConfiguration registered");
                object
            }
        };

        let resources = &mut current.status_mut().resources;
        if !is_current(resources.mutating_webhook_configuration_ref.as_ref(), &object) {
            resources.mutating_webhook_configuration_ref = Some(reference(&object)?);
        }
        Ok(ReconcileResult::default())
    }
}
