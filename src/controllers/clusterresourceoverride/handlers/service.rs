use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use tracing::info;

use super::{Handler, Options};
use crate::cluster;
use crate::controllers::clusterresourceoverride::context::{
    is_current, reference, ReconcileRequestContext,
};
use crate::resources::clusterresourceoverrides::{reasons, ClusterResourceOverride};
use crate::runtime::ReconcileResult;
use crate::{Error, Result};

/// Creates the Service in front of the webhook server.
pub struct ServiceHandler {
    options: Options,
}

impl ServiceHandler {
    pub fn new(options: &Options) -> Self {
        Self {
            options: options.clone(),
        }
    }
}

#[async_trait]
impl Handler for ServiceHandler {
    fn name(&self) -> &'static str {
        "service"
    }

    async fn handle(
        &self,
        context: &mut ReconcileRequestContext,
        current: &mut ClusterResourceOverride,
    ) -> Result<ReconcileResult> {
        let internal = |err: Error| Error::install_readiness(reasons::INTERNAL_ERROR, err);
        let name = self.options.asset.service_name();

        let live = cluster::get_opt::<Service>(
            self.options.cluster.as_ref(),
            Some(self.options.namespace()),
            &name,
        )
        .await
        .map_err(|err| internal(err.into()))?;

        let object = match live {
            Some(object) => object,
            None => {
                let mut desired = self.options.asset.service();
                context.set_controller(&mut desired.metadata, current);
                let object = self.options.ensurer.ensure(&desired).await.map_err(internal)?;
                info!(resource = %name, "Service created");
                object
            }
        };

        let resources = &mut current.status_mut().resources;
        if !is_current(resources.service_ref.as_ref(), &object) {
            resources.service_ref = Some(reference(&object)?);
        }
        Ok(ReconcileResult::default())
    }
}
