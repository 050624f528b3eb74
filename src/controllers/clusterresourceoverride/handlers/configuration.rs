use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use tracing::{debug, info};

use super::{Handler, Options};
use crate::cluster;
use crate::controllers::clusterresourceoverride::context::{
    is_current, reference, ReconcileRequestContext,
};
use crate::resources::clusterresourceoverrides::{reasons, ClusterResourceOverride};
use crate::runtime::ReconcileResult;
use crate::{Error, Result};

/// Renders the pod resource override into the ConfigMap read by the webhook server.
pub struct ConfigurationHandler {
    options: Options,
}

impl ConfigurationHandler {
    pub fn new(options: &Options) -> Self {
        Self {
            options: options.clone(),
        }
    }

    fn desired(
        &self,
        context: &ReconcileRequestContext,
        current: &ClusterResourceOverride,
    ) -> Result<ConfigMap> {
        let rendered = serde_yaml::to_string(&current.spec.pod_resource_override)
            .map_err(|err| Error::install_readiness(reasons::CONFIGURATION_CHECK_FAILED, err))?;
        let mut desired = self.options.asset.configuration(rendered);
        context.set_controller(&mut desired.metadata, current);
        Ok(desired)
    }
}

#[async_trait]
impl Handler for ConfigurationHandler {
    fn name(&self) -> &'static str {
        "configuration"
    }

    async fn handle(
        &self,
        context: &mut ReconcileRequestContext,
        current: &mut ClusterResourceOverride,
    ) -> Result<ReconcileResult> {
        let key = current.metadata.name.clone().unwrap_or_default();
        let desired = self.desired(context, current)?;
        let name = self.options.asset.configuration_name();
        let internal = |err: Error| Error::install_readiness(reasons::INTERNAL_ERROR, err);

        let live = cluster::get_opt::<ConfigMap>(
            self.options.cluster.as_ref(),
            Some(self.options.namespace()),
            &name,
        )
        .await
        .map_err(|err| internal(err.into()))?;

        let created = live.is_none();
        let mut object = match live {
            Some(object) => object,
            None => {
                let object = self.options.ensurer.ensure(&desired).await.map_err(internal)?;
                info!(key = %key, resource = %name, "ConfigMap created");
                object
            }
        };

        let hash = current.spec.hash();
        let status = current.status_mut();
        let equal = hash == status.hash.configuration;
        if equal && is_current(status.resources.configuration_ref.as_ref(), &object) {
            debug!(key = %key, resource = %name, "ConfigMap is in sync");
            return Ok(ReconcileResult::default());
        }

        if !equal && !created {
            info!(key = %key, resource = %name, "Configuration has drifted");
            object = self.options.ensurer.ensure(&desired).await.map_err(|err| {
                Error::install_readiness(reasons::CONFIGURATION_CHECK_FAILED, err)
            })?;
        }

        let object_ref = reference(&object)?;
        debug!(
            key = %key,
            resource = %name,
            resource_version = ?object_ref.resource_version,
            "Setting object reference"
        );
        status.hash.configuration = hash;
        status.resources.configuration_ref = Some(object_ref);
        Ok(ReconcileResult::default())
    }
}
