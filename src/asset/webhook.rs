use std::collections::BTreeMap;

use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations, WebhookClientConfig,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use k8s_openapi::ByteString;

use super::Asset;

impl Asset {
    /// Also the name of the single webhook inside the configuration.
    pub fn webhook_configuration_name(&self) -> String {
        format!(
            "{}.{}",
            self.values.admission_api_resource, self.values.admission_api_group
        )
    }

    /// Webhook registration sending pod creates and updates to the admission server.
    pub fn webhook_configuration(&self, ca_bundle: &[u8]) -> MutatingWebhookConfiguration {
        let values = &self.values;
        let name = self.webhook_configuration_name();
        let url = format!(
            "https://localhost:9400/apis/{}/{}/{}",
            values.admission_api_group, values.admission_api_version, values.admission_api_resource
        );

        MutatingWebhookConfiguration {
            metadata: self.cluster_meta(name.clone()),
            webhooks: Some(vec![MutatingWebhook {
                name: name.clone(),
                namespace_selector: Some(LabelSelector {
                    match_labels: Some(BTreeMap::from([(
                        format!("{name}/enabled"),
                        "true".to_string(),
                    )])),
                    match_expressions: Some(vec![LabelSelectorRequirement {
                        key: "openshift.io/run-level".into(),
                        operator: "NotIn".into(),
                        values: Some(vec!["0".into(), "1".into()]),
                    }]),
                }),
                match_policy: Some("Equivalent".into()),
                client_config: WebhookClientConfig {
                    url: Some(url),
                    ca_bundle: Some(ByteString(ca_bundle.to_vec())),
                    service: None,
                },
                rules: Some(vec![RuleWithOperations {
                    operations: Some(vec!["CREATE".into(), "UPDATE".into()]),
                    api_groups: Some(vec!["".into()]),
                    api_versions: Some(vec!["v1".into()]),
                    resources: Some(vec!["pods".into()]),
                    scope: None,
                }]),
                failure_policy: Some("Fail".into()),
                timeout_seconds: Some(5),
                side_effects: "None".into(),
                reinvocation_policy: Some("IfNeeded".into()),
                admission_review_versions: vec!["v1".into()],
                ..Default::default()
            }]),
        }
    }
}
