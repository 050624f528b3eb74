use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use tracing::debug;

use super::{Handler, Options};
use crate::asset::bundle_from;
use crate::cluster;
use crate::controllers::clusterresourceoverride::context::ReconcileRequestContext;
use crate::resources::clusterresourceoverrides::{reasons, ClusterResourceOverride};
use crate::runtime::ReconcileResult;
use crate::{Error, Result};

/// Makes sure a valid bundle is known for this pass and records its hash.
pub struct CertReadyHandler {
    options: Options,
}

impl CertReadyHandler {
    pub fn new(options: &Options) -> Self {
        Self {
            options: options.clone(),
        }
    }
}

#[async_trait]
impl Handler for CertReadyHandler {
    fn name(&self) -> &'static str {
        "cert-ready"
    }

    async fn handle(
        &self,
        context: &mut ReconcileRequestContext,
        current: &mut ClusterResourceOverride,
    ) -> Result<ReconcileResult> {
        if context.bundle().is_none() {
            let asset = &self.options.asset;
            let resources = &current.status_mut().resources;
            let secret_name = resources
                .service_cert_secret_ref
                .as_ref()
                .and_then(|r| r.name.clone())
                .unwrap_or_else(|| asset.serving_secret_name());
            let config_map_name = resources
                .service_ca_config_map_ref
                .as_ref()
                .and_then(|r| r.name.clone())
                .unwrap_or_else(|| asset.ca_bundle_config_map_name());

            let not_available = |err: kube::Error| Error::install_readiness(reasons::CERT_NOT_AVAILABLE, err);
            let cluster = self.options.cluster.as_ref();
            let namespace = Some(self.options.namespace());
            let secret = cluster::get::<Secret>(cluster, namespace, &secret_name)
                .await
                .map_err(not_available)?;
            let config_map = cluster::get::<ConfigMap>(cluster, namespace, &config_map_name)
                .await
                .map_err(not_available)?;

            let bundle = bundle_from(&secret, &config_map);
            bundle.validate().map_err(|err| {
                Error::install_readiness(
                    reasons::CERT_NOT_AVAILABLE,
                    format!("certs not populated - {err}"),
                )
            })?;
            context.set_bundle(bundle);
        }

        if let Some(bundle) = context.bundle() {
            current.status_mut().hash.serving_cert = bundle.hash();
        }
        debug!(key = %current.metadata.name.as_deref().unwrap_or_default(), "Certificate check passed");
        Ok(ReconcileResult::default())
    }
}
