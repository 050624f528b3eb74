use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::ByteString;

use super::Asset;
use crate::cert::{Bundle, SERVICE_CA, TLS_CERT, TLS_KEY};

impl Asset {
    pub fn configuration_name(&self) -> String {
        format!("{}-configuration", self.values.name)
    }

    /// ConfigMap mounted by the admission server as its override configuration.
    pub fn configuration(&self, rendered: String) -> ConfigMap {
        ConfigMap {
            metadata: self.object_meta(self.configuration_name()),
            data: Some(BTreeMap::from([(
                self.values.configuration_key.clone(),
                rendered,
            )])),
            ..Default::default()
        }
    }

    pub fn ca_bundle_config_map_name(&self) -> String {
        format!("{}-service-serving", self.values.name)
    }

    pub fn ca_bundle_config_map(&self, bundle: &Bundle) -> ConfigMap {
        let mut metadata = self.object_meta(self.ca_bundle_config_map_name());
        metadata.annotations = Some(BTreeMap::from([(
            "service-serving".to_string(),
            "true".to_string(),
        )]));
        ConfigMap {
            metadata,
            data: Some(BTreeMap::from([(
                SERVICE_CA.to_string(),
                String::from_utf8_lossy(&bundle.serving_cert_ca).into_owned(),
            )])),
            ..Default::default()
        }
    }

    pub fn serving_secret_name(&self) -> String {
        format!("server-serving-cert-{}", self.values.name)
    }

    pub fn serving_secret(&self, bundle: &Bundle) -> Secret {
        let mut metadata = self.object_meta(self.serving_secret_name());
        metadata.labels = None;
        Secret {
            metadata,
            type_: Some("kubernetes.io/tls".to_string()),
            data: Some(BTreeMap::from([
                (TLS_KEY.to_string(), ByteString(bundle.service_key.clone())),
                (TLS_CERT.to_string(), ByteString(bundle.service_cert.clone())),
            ])),
            ..Default::default()
        }
    }
}

/// Rebuild a bundle from the objects written by [`Asset::serving_secret`] and
/// [`Asset::ca_bundle_config_map`]. Missing parts come back empty.
pub fn bundle_from(secret: &Secret, ca: &ConfigMap) -> Bundle {
    let secret_value = |key: &str| {
        secret
            .data
            .as_ref()
            .and_then(|data| data.get(key))
            .map(|value| value.0.clone())
            .unwrap_or_default()
    };
    Bundle {
        service_key: secret_value(TLS_KEY),
        service_cert: secret_value(TLS_CERT),
        serving_cert_ca: ca
            .data
            .as_ref()
            .and_then(|data| data.get(SERVICE_CA))
            .map(|value| value.clone().into_bytes())
            .unwrap_or_default(),
    }
}
