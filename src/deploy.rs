//! Install strategy for the webhook server as a Deployment.

use std::fmt;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::PodTemplateSpec;

use crate::asset::Asset;
use crate::cluster::{self, Cluster};
use crate::ensurer::Ensurer;
use crate::Result;

const TIMED_OUT_REASON: &str = "ProgressDeadlineExceeded";

/// Where a Deployment is in rolling out its current spec.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RolloutStatus {
    Complete,
    InProgress(String),
}

impl RolloutStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, RolloutStatus::Complete)
    }
}

impl fmt::Display for RolloutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RolloutStatus::Complete => write!(f, "rollout complete"),
            RolloutStatus::InProgress(message) => write!(f, "{message}"),
        }
    }
}

/// Rollout status as `kubectl rollout status` reports it.
pub fn rollout_status(deployment: &Deployment) -> RolloutStatus {
    let name = deployment.metadata.name.as_deref().unwrap_or_default();
    let status = deployment.status.clone().unwrap_or_default();
    let generation = deployment.metadata.generation.unwrap_or_default();

    if generation > status.observed_generation.unwrap_or_default() {
        return RolloutStatus::InProgress(format!(
            "waiting for deployment spec update name={name}"
        ));
    }

    let timed_out = status
        .conditions
        .iter()
        .flatten()
        .find(|condition| condition.type_ == "Progressing")
        .is_some_and(|condition| condition.reason.as_deref() == Some(TIMED_OUT_REASON));
    if timed_out {
        return RolloutStatus::InProgress(format!(
            "deployment exceeded its progress deadline name={name}"
        ));
    }

    let updated = status.updated_replicas.unwrap_or_default();
    let replicas = status.replicas.unwrap_or_default();
    let available = status.available_replicas.unwrap_or_default();

    if let Some(desired) = deployment.spec.as_ref().and_then(|spec| spec.replicas) {
        if updated < desired {
            return RolloutStatus::InProgress(format!(
                "waiting for rollout to finish: {updated} out of {desired} new replicas have been updated"
            ));
        }
    }
    if replicas > updated {
        return RolloutStatus::InProgress(format!(
            "waiting for rollout to finish: {} old replicas are pending termination",
            replicas - updated
        ));
    }
    if available < updated {
        return RolloutStatus::InProgress(format!(
            "waiting for rollout to finish: {available} of {updated} updated replicas are available"
        ));
    }
    RolloutStatus::Complete
}

/// Reads and writes the webhook server Deployment.
#[derive(Clone)]
pub struct DeploymentInstall {
    cluster: Arc<dyn Cluster>,
    ensurer: Ensurer,
    asset: Asset,
}

impl DeploymentInstall {
    pub fn new(cluster: Arc<dyn Cluster>, ensurer: Ensurer, asset: Asset) -> Self {
        Self {
            cluster,
            ensurer,
            asset,
        }
    }

    pub fn name(&self) -> String {
        self.asset.deployment_name()
    }

    pub async fn get(&self) -> Result<Deployment> {
        let deployment = cluster::get(
            self.cluster.as_ref(),
            Some(&self.asset.values().namespace),
            &self.name(),
        )
        .await?;
        Ok(deployment)
    }

    /// Ensure the Deployment after letting `parent` adjust the object and `child` its pod template.
    pub async fn ensure(
        &self,
        parent: impl FnOnce(&mut Deployment),
        child: impl FnOnce(&mut PodTemplateSpec),
    ) -> Result<Deployment> {
        let mut desired = self.asset.deployment();
        parent(&mut desired);
        if let Some(spec) = desired.spec.as_mut() {
            child(&mut spec.template);
        }
        self.ensurer.ensure(&desired).await
    }

    /// Rollout status of the live Deployment. Lookup failures, including a missing
    /// Deployment, are returned as errors.
    pub async fn is_available(&self) -> Result<RolloutStatus> {
        let deployment = self.get().await?;
        Ok(rollout_status(&deployment))
    }
}
