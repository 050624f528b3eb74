use async_trait::async_trait;
use tracing::{debug, info};

use super::{Handler, Options};
use crate::controllers::clusterresourceoverride::condition::Builder;
use crate::controllers::clusterresourceoverride::context::ReconcileRequestContext;
use crate::deploy::RolloutStatus;
use crate::resources::clusterresourceoverrides::{reasons, ClusterResourceOverride};
use crate::runtime::ReconcileResult;
use crate::{Error, Result};

/// Stops the pass until the webhook server has rolled out, then records the installed operand.
pub struct DeploymentReadyHandler {
    options: Options,
}

impl DeploymentReadyHandler {
    pub fn new(options: &Options) -> Self {
        Self {
            options: options.clone(),
        }
    }
}

#[async_trait]
impl Handler for DeploymentReadyHandler {
    fn name(&self) -> &'static str {
        "deployment-ready"
    }

    async fn handle(
        &self,
        _context: &mut ReconcileRequestContext,
        current: &mut ClusterResourceOverride,
    ) -> Result<ReconcileResult> {
        let not_ready = |message: String| Error::install_readiness(reasons::DEPLOYMENT_NOT_READY, message);

        match self.options.deploy.is_available().await {
            Ok(RolloutStatus::Complete) => {}
            Ok(RolloutStatus::InProgress(message)) => return Err(not_ready(message)),
            Err(err) => {
                debug!(error = %err, "Deployment lookup failed");
                return Err(not_ready(format!(
                    "name={} waiting for deployment to complete",
                    self.options.deploy.name()
                )));
            }
        }

        let operand = &self.options.operand;
        let status = current.status_mut();
        if status.version != operand.operand_version() || status.image != operand.operand_image() {
            info!(version = %operand.operand_version(), image = %operand.operand_image(), "Operand installed");
        }
        status.version = operand.operand_version().to_string();
        status.image = operand.operand_image().to_string();
        Builder::new(status, self.options.clock.as_ref()).with_install_ready();
        Ok(ReconcileResult::default())
    }
}
