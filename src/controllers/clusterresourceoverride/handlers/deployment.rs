use async_trait::async_trait;
use k8s_openapi::api::admissionregistration::v1::MutatingWebhookConfiguration;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use kube::Resource;
use tracing::{debug, info};

use super::{Handler, Options};
use crate::asset::RbacObject;
use crate::cluster;
use crate::controllers::clusterresourceoverride::context::{
    is_current, reference, ReconcileRequestContext,
};
use crate::resources::clusterresourceoverrides::{reasons, ClusterResourceOverride};
use crate::runtime::ReconcileResult;
use crate::{Error, Result};

/// Rolls out the webhook server whenever its configuration, certificate or image changes.
pub struct DeploymentHandler {
    options: Options,
}

impl DeploymentHandler {
    pub fn new(options: &Options) -> Self {
        Self {
            options: options.clone(),
        }
    }

    /// Ensure the webhook registration is gone, then the RBAC set, then the Deployment.
    async fn ensure(
        &self,
        context: &ReconcileRequestContext,
        current: &ClusterResourceOverride,
    ) -> Result<Deployment> {
        let webhook = self.options.asset.webhook_configuration_name();
        match cluster::delete::<MutatingWebhookConfiguration>(
            self.options.cluster.as_ref(),
            None,
            &webhook,
        )
        .await
        {
            Ok(()) => info!(resource = %webhook, "Deleted MutatingWebhookConfiguration ahead of rollout"),
            Err(err) if cluster::is_not_found(&err) => {}
            Err(err) => {
                return Err(Error::EnsureFailed(format!(
                    "failed to delete MutatingWebhookConfiguration - {err}"
                )))
            }
        }

        self.ensure_rbac(context, current).await?;

        let values = self.options.asset.values().clone();
        let status = current.status.clone().unwrap_or_default();
        let overrides = &current.spec.deployment_overrides;
        let annotations = [
            (
                values.configuration_hash_annotation_key.clone(),
                status.hash.configuration.clone(),
            ),
            (
                values.serving_cert_hash_annotation_key.clone(),
                status.hash.serving_cert.clone(),
            ),
        ];

        self.options
            .deploy
            .ensure(
                |deployment| {
                    deployment
                        .metadata
                        .annotations
                        .get_or_insert_with(Default::default)
                        .extend(annotations.clone());
                    if let (Some(replicas), Some(spec)) = (overrides.replicas, deployment.spec.as_mut()) {
                        spec.replicas = Some(replicas);
                    }
                    context.set_controller(&mut deployment.metadata, current);
                },
                |template| {
                    let metadata = template.metadata.get_or_insert_with(Default::default);
                    let template_annotations = metadata.annotations.get_or_insert_with(Default::default);
                    template_annotations.insert(
                        values.owner_annotation_key.clone(),
                        current.meta().name.clone().unwrap_or_default(),
                    );
                    template_annotations.extend(annotations.clone());

                    if let Some(spec) = template.spec.as_mut() {
                        if let Some(node_selector) = overrides.node_selector.as_ref().filter(|s| !s.is_empty()) {
                            spec.node_selector = Some(node_selector.clone());
                        }
                        if let Some(tolerations) = overrides.tolerations.as_ref().filter(|t| !t.is_empty()) {
                            spec.tolerations = Some(tolerations.clone());
                        }
                    }
                },
            )
            .await
    }

    async fn ensure_rbac(
        &self,
        context: &ReconcileRequestContext,
        current: &ClusterResourceOverride,
    ) -> Result<()> {
        let ensurer = &self.options.ensurer;
        for mut object in self.options.asset.rbac() {
            context.set_controller(object.metadata_mut(), current);
            let resource = object.resource();
            let ensured = match &object {
                RbacObject::ServiceAccount(o) => ensurer.ensure(o).await.map(|_| ()),
                RbacObject::Role(o) => ensurer.ensure(o).await.map(|_| ()),
                RbacObject::RoleBinding(o) => ensurer.ensure(o).await.map(|_| ()),
                RbacObject::ClusterRole(o) => ensurer.ensure(o).await.map(|_| ()),
                RbacObject::ClusterRoleBinding(o) => ensurer.ensure(o).await.map(|_| ()),
            };
            ensured.map_err(|err| {
                Error::EnsureFailed(format!("resource={resource} failed to ensure RBAC - {err}"))
            })?;
            debug!(resource, name = ?object.metadata().name, "Ensured RBAC");
        }
        Ok(())
    }
}

#[async_trait]
impl Handler for DeploymentHandler {
    fn name(&self) -> &'static str {
        "deployment"
    }

    async fn handle(
        &self,
        context: &mut ReconcileRequestContext,
        current: &mut ClusterResourceOverride,
    ) -> Result<ReconcileResult> {
        let key = current.metadata.name.clone().unwrap_or_default();
        let cluster = self.options.cluster.as_ref();
        let namespace = self.options.namespace();

        // Installs before the Deployment ran the server as a DaemonSet
        let daemonset = self.options.asset.daemonset_name();
        match cluster::delete::<DaemonSet>(cluster, Some(namespace), &daemonset).await {
            Ok(()) => {
                info!(key = %key, resource = %daemonset, "Deleted legacy DaemonSet");
                return Ok(ReconcileResult::default());
            }
            Err(err) if cluster::is_not_found(&err) => {}
            Err(err) => {
                return Err(Error::EnsureFailed(format!(
                    "failed to delete DaemonSet - {err}"
                )))
            }
        }

        let live = cluster::get_opt::<Deployment>(
            cluster,
            Some(namespace),
            &self.options.deploy.name(),
        )
        .await
        .map_err(|err| Error::install_readiness(reasons::INTERNAL_ERROR, err))?;

        let values = self.options.asset.values();
        let status = current.status.clone().unwrap_or_default();
        let drifted = |deployment: &Deployment| {
            let annotations = deployment.metadata.annotations.clone().unwrap_or_default();
            annotations.get(&values.configuration_hash_annotation_key) != Some(&status.hash.configuration)
                || annotations.get(&values.serving_cert_hash_annotation_key) != Some(&status.hash.serving_cert)
        };
        let ensure = match &live {
            None => true,
            Some(deployment) => {
                drifted(deployment)
                    || values.operand_image != status.image
                    || values.operand_version != status.version
            }
        };

        let object = match live {
            Some(deployment) if !ensure => deployment,
            _ => {
                let deployment = self.ensure(context, current).await?;
                info!(key = %key, resource = %self.options.deploy.name(), "Ensured Deployment");
                deployment
            }
        };

        let resources = &mut current.status_mut().resources;
        if !is_current(resources.deployment_ref.as_ref(), &object) {
            resources.deployment_ref = Some(reference(&object)?);
        }
        Ok(ReconcileResult::default())
    }
}
