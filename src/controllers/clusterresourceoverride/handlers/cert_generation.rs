use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use tracing::{debug, info};

use super::{Handler, Options};
use crate::cert;
use crate::cluster;
use crate::controllers::clusterresourceoverride::context::{
    is_current, reference, ReconcileRequestContext,
};
use crate::resources::clusterresourceoverrides::{reasons, ClusterResourceOverride};
use crate::runtime::ReconcileResult;
use crate::{Error, Result};

/// Generates the serving certificate of the webhook when it is missing or due for rotation.
pub struct CertGenerationHandler {
    options: Options,
}

impl CertGenerationHandler {
    pub fn new(options: &Options) -> Self {
        Self {
            options: options.clone(),
        }
    }
}

#[async_trait]
impl Handler for CertGenerationHandler {
    fn name(&self) -> &'static str {
        "cert-generation"
    }

    async fn handle(
        &self,
        context: &mut ReconcileRequestContext,
        current: &mut ClusterResourceOverride,
    ) -> Result<ReconcileResult> {
        let key = current.metadata.name.clone().unwrap_or_default();
        let asset = &self.options.asset;
        let cluster = self.options.cluster.as_ref();
        let namespace = Some(self.options.namespace());
        let internal = |err: kube::Error| Error::install_readiness(reasons::INTERNAL_ERROR, err);
        let cannot_generate = |err: Error| Error::install_readiness(reasons::CANNOT_GENERATE_CERT, err);

        let secret = cluster::get_opt::<Secret>(cluster, namespace, &asset.serving_secret_name())
            .await
            .map_err(internal)?;
        let config_map =
            cluster::get_opt::<ConfigMap>(cluster, namespace, &asset.ca_bundle_config_map_name())
                .await
                .map_err(internal)?;

        let now = self.options.clock.now();
        let status = current.status.clone().unwrap_or_default();
        let ensure = secret.is_none()
            || config_map.is_none()
            || status.is_time_to_rotate_cert(now)
            || !cert::is_populated(secret.as_ref())
            || status.certs_rotate_at.is_none();

        let (secret, config_map) = match (secret, config_map) {
            (Some(secret), Some(config_map)) if !ensure => (secret, config_map),
            _ => {
                let bundle = cert::generate(cert::valid_for(), cert::ORGANIZATION)
                    .map_err(cannot_generate)?;

                let mut desired_secret = asset.serving_secret(&bundle);
                context.set_controller(&mut desired_secret.metadata, current);
                let secret = self
                    .options
                    .ensurer
                    .ensure(&desired_secret)
                    .await
                    .map_err(cannot_generate)?;

                let mut desired_config_map = asset.ca_bundle_config_map(&bundle);
                context.set_controller(&mut desired_config_map.metadata, current);
                let config_map = self
                    .options
                    .ensurer
                    .ensure(&desired_config_map)
                    .await
                    .map_err(cannot_generate)?;

                info!(key = %key, hash = %bundle.hash(), "Serving certificate generated");
                context.set_bundle(bundle);
                current.status_mut().certs_rotate_at = Some(Time(cert::rotate_at(now)));
                (secret, config_map)
            }
        };

        let resources = &mut current.status_mut().resources;
        if !is_current(resources.service_cert_secret_ref.as_ref(), &secret) {
            let object_ref = reference(&secret)?;
            debug!(key = %key, resource_version = ?object_ref.resource_version, "Setting serving Secret reference");
            resources.service_cert_secret_ref = Some(object_ref);
        }
        if !is_current(resources.service_ca_config_map_ref.as_ref(), &config_map) {
            let object_ref = reference(&config_map)?;
            debug!(key = %key, resource_version = ?object_ref.resource_version, "Setting CA bundle ConfigMap reference");
            resources.service_ca_config_map_ref = Some(object_ref);
        }
        Ok(ReconcileResult::default())
    }
}
