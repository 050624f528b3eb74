//! Desired state of every object installed for the admission webhook.
//!
//! Builders here are pure: they never talk to the cluster and carry no owner references.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::runtime::OperandContext;

mod configuration;
mod deployment;
mod rbac;
mod service;
mod webhook;

pub use configuration::bundle_from;
pub use rbac::RbacObject;

const GROUP: &str = "operator.autoscaling.openshift.io";

/// Names, labels and annotation keys shared by all builders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Values {
    pub name: String,
    pub namespace: String,
    pub service_account_name: String,
    pub operand_image: String,
    pub operand_version: String,
    pub admission_api_group: String,
    pub admission_api_version: String,
    pub admission_api_resource: String,
    pub owner_label_key: String,
    pub owner_label_value: String,
    pub selector_label_key: String,
    pub selector_label_value: String,
    pub configuration_key: String,
    pub configuration_hash_annotation_key: String,
    pub serving_cert_hash_annotation_key: String,
    pub owner_annotation_key: String,
}

#[derive(Clone, Debug)]
pub struct Asset {
    values: Values,
}

impl Asset {
    pub fn new(context: &OperandContext) -> Self {
        let name = context.webhook_name();
        Self {
            values: Values {
                name: name.to_string(),
                namespace: context.webhook_namespace().to_string(),
                service_account_name: name.to_string(),
                operand_image: context.operand_image().to_string(),
                operand_version: context.operand_version().to_string(),
                admission_api_group: "admission.autoscaling.openshift.io".to_string(),
                admission_api_version: "v1".to_string(),
                admission_api_resource: "clusterresourceoverrides".to_string(),
                owner_label_key: format!("{GROUP}/clusterresourceoverride"),
                owner_label_value: "true".to_string(),
                selector_label_key: "clusterresourceoverride".to_string(),
                selector_label_value: "true".to_string(),
                configuration_key: "configuration.yaml".to_string(),
                configuration_hash_annotation_key: format!("{name}.{GROUP}/configuration.hash"),
                serving_cert_hash_annotation_key: format!("{name}.{GROUP}/servingcert.hash"),
                owner_annotation_key: format!("{name}.{GROUP}/owner"),
            },
        }
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    fn owner_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(
            self.values.owner_label_key.clone(),
            self.values.owner_label_value.clone(),
        )])
    }

    fn selector_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(
            self.values.selector_label_key.clone(),
            self.values.selector_label_value.clone(),
        )])
    }

    /// Metadata for an object in the operand namespace carrying the owner label.
    fn object_meta(&self, name: impl Into<String>) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.into()),
            namespace: Some(self.values.namespace.clone()),
            labels: Some(self.owner_labels()),
            ..Default::default()
        }
    }

    fn cluster_meta(&self, name: impl Into<String>) -> ObjectMeta {
        ObjectMeta {
            namespace: None,
            ..self.object_meta(name)
        }
    }
}

#[cfg(test)]
pub(crate) fn test_asset() -> Asset {
    Asset::new(&OperandContext::new(
        "clusterresourceoverride",
        "clusterresourceoverride-operator",
        "cluster",
        "quay.io/openshift/clusterresourceoverride:4.18",
        "4.18.0",
    ))
}
