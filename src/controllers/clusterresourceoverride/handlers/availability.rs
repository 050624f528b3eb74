use async_trait::async_trait;
use tracing::debug;

use super::{Handler, Options};
use crate::controllers::clusterresourceoverride::condition::{Builder, TRUE};
use crate::controllers::clusterresourceoverride::context::ReconcileRequestContext;
use crate::deploy::RolloutStatus;
use crate::resources::clusterresourceoverrides::{reasons, ClusterResourceOverride};
use crate::runtime::ReconcileResult;
use crate::{Error, Result};

/// Reflects whether the webhook server is serving in the Available condition.
pub struct AvailabilityHandler {
    options: Options,
}

impl AvailabilityHandler {
    pub fn new(options: &Options) -> Self {
        Self {
            options: options.clone(),
        }
    }
}

#[async_trait]
impl Handler for AvailabilityHandler {
    fn name(&self) -> &'static str {
        "availability"
    }

    async fn handle(
        &self,
        _context: &mut ReconcileRequestContext,
        current: &mut ClusterResourceOverride,
    ) -> Result<ReconcileResult> {
        let deploy = &self.options.deploy;
        let available = deploy.is_available().await;
        let mut builder = Builder::new(current.status_mut(), self.options.clock.as_ref());

        match available {
            Ok(RolloutStatus::Complete) => {
                builder.with_available(TRUE, "");
            }
            Ok(RolloutStatus::InProgress(progress)) => {
                debug!(name = %deploy.name(), %progress, "Admission webhook not available");
                builder.with_error(&Error::unavailable(
                    reasons::ADMISSION_WEBHOOK_NOT_AVAILABLE,
                    format!("name={} deployment not complete", deploy.name()),
                ));
            }
            Err(err) if err.is_not_found() => {
                builder.with_error(&Error::unavailable(
                    reasons::ADMISSION_WEBHOOK_NOT_AVAILABLE,
                    err,
                ));
            }
            Err(err) => {
                builder.with_error(&Error::unavailable(reasons::INTERNAL_ERROR, err));
            }
        }
        Ok(ReconcileResult::default())
    }
}
