use async_trait::async_trait;

use super::Handler;
use crate::controllers::clusterresourceoverride::context::ReconcileRequestContext;
use crate::resources::clusterresourceoverrides::ClusterResourceOverride;
use crate::runtime::ReconcileResult;
use crate::Result;

/// Stops the pass when the spec holds values the webhook cannot apply.
#[derive(Default)]
pub struct ValidationHandler;

#[async_trait]
impl Handler for ValidationHandler {
    fn name(&self) -> &'static str {
        "validation"
    }

    async fn handle(
        &self,
        _context: &mut ReconcileRequestContext,
        current: &mut ClusterResourceOverride,
    ) -> Result<ReconcileResult> {
        current.spec.validate()?;
        Ok(ReconcileResult::default())
    }
}
