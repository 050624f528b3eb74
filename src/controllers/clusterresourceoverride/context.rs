use std::ops::Deref;

use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;

use crate::cert::Bundle;
use crate::resources::clusterresourceoverrides::{reasons, ClusterResourceOverride};
use crate::runtime::{ownership, OperandContext};
use crate::{Error, Result};

/// State shared by the handlers of a single reconcile pass.
pub struct ReconcileRequestContext {
    operand: OperandContext,
    bundle: Option<Bundle>,
}

impl ReconcileRequestContext {
    pub fn new(operand: OperandContext) -> Self {
        Self {
            operand,
            bundle: None,
        }
    }

    /// Certificate bundle generated or loaded earlier in this pass.
    pub fn bundle(&self) -> Option<&Bundle> {
        self.bundle.as_ref()
    }

    pub fn set_bundle(&mut self, bundle: Bundle) {
        self.bundle = Some(bundle);
    }

    /// Make `owner` the controller of an object about to be ensured.
    pub fn set_controller(&self, owned: &mut ObjectMeta, owner: &ClusterResourceOverride) {
        ownership::set_controller(owned, owner);
    }
}

impl Deref for ReconcileRequestContext {
    type Target = OperandContext;

    fn deref(&self) -> &OperandContext {
        &self.operand
    }
}

/// Reference to `object` at its current resourceVersion.
pub fn reference<K: Resource<DynamicType = ()>>(object: &K) -> Result<ObjectReference> {
    let meta = object.meta();
    if meta.name.is_none() || meta.resource_version.is_none() {
        return Err(Error::install_readiness(
            reasons::CANNOT_SET_REFERENCE,
            format!("{} has no name or resourceVersion", K::kind(&())),
        ));
    }
    Ok(ObjectReference {
        resource_version: meta.resource_version.clone(),
        ..object.object_ref(&())
    })
}

/// True when `current` points at `object` as it is now.
pub fn is_current<K: Resource<DynamicType = ()>>(current: Option<&ObjectReference>, object: &K) -> bool {
    current.is_some_and(|reference| reference.resource_version == object.meta().resource_version)
}
