use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::Asset;

const SERVING_CERT_SECRET_ANNOTATION: &str = "service.alpha.openshift.io/serving-cert-secret-name";

impl Asset {
    pub fn service_name(&self) -> String {
        self.values.name.clone()
    }

    pub fn service(&self) -> Service {
        let mut metadata = self.object_meta(self.service_name());
        metadata.annotations = Some(BTreeMap::from([(
            SERVING_CERT_SECRET_ANNOTATION.to_string(),
            self.serving_secret_name(),
        )]));

        Service {
            metadata,
            spec: Some(ServiceSpec {
                selector: Some(self.selector_labels()),
                ports: Some(vec![ServicePort {
                    name: Some("https".into()),
                    protocol: Some("TCP".into()),
                    port: 443,
                    target_port: Some(IntOrString::Int(8443)),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            status: None,
        }
    }
}
