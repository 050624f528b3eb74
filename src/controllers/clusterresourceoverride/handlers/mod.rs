//! The steps of a reconcile pass.
//!
//! Each handler converges one aspect of the install and records what it did in the
//! status of the resource. Handlers are re-run on every pass, so every one of them is
//! a no-op when its part of the cluster is already in the desired state.

use std::sync::Arc;

use async_trait::async_trait;

use super::context::ReconcileRequestContext;
use crate::asset::Asset;
use crate::cluster::Cluster;
use crate::deploy::DeploymentInstall;
use crate::ensurer::Ensurer;
use crate::resources::clusterresourceoverrides::ClusterResourceOverride;
use crate::runtime::{Clock, OperandContext, ReconcileResult};
use crate::Result;

mod availability;
mod cert_generation;
mod cert_ready;
mod configuration;
mod deployment;
mod deployment_ready;
mod service;
mod validation;
mod webhook;

pub use availability::AvailabilityHandler;
pub use cert_generation::CertGenerationHandler;
pub use cert_ready::CertReadyHandler;
pub use configuration::ConfigurationHandler;
pub use deployment::DeploymentHandler;
pub use deployment_ready::DeploymentReadyHandler;
pub use service::ServiceHandler;
pub use validation::ValidationHandler;
pub use webhook::WebhookConfigurationHandler;

#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Converge one aspect of the install, updating `current` in place.
    async fn handle(
        &self,
        context: &mut ReconcileRequestContext,
        current: &mut ClusterResourceOverride,
    ) -> Result<ReconcileResult>;
}

/// Collaborators shared by every handler.
#[derive(Clone)]
pub struct Options {
    pub operand: OperandContext,
    pub cluster: Arc<dyn Cluster>,
    pub ensurer: Ensurer,
    pub asset: Asset,
    pub deploy: DeploymentInstall,
    pub clock: Arc<dyn Clock>,
}

impl Options {
    pub fn new(operand: OperandContext, cluster: Arc<dyn Cluster>, clock: Arc<dyn Clock>) -> Self {
        let asset = Asset::new(&operand);
        let ensurer = Ensurer::new(cluster.clone());
        let deploy = DeploymentInstall::new(cluster.clone(), ensurer.clone(), asset.clone());
        Self {
            operand,
            cluster,
            ensurer,
            asset,
            deploy,
            clock,
        }
    }

    fn namespace(&self) -> &str {
        self.operand.webhook_namespace()
    }
}
