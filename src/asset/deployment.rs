use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, HTTPGetAction, PodSpec,
    PodTemplateSpec, Probe, SeccompProfile, SecretVolumeSource, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::Asset;

const SECURE_PORT: i32 = 8443;
const SERVING_CERT_MOUNT: &str = "/var/serving-cert";
const CONFIGURATION_PATH: &str = "/etc/clusterresourceoverride/config/override.yaml";

impl Asset {
    pub fn deployment_name(&self) -> String {
        self.values.name.clone()
    }

    /// DaemonSet name used by installs that predate the Deployment.
    pub fn daemonset_name(&self) -> String {
        self.values.name.clone()
    }

    /// Webhook server Deployment, before any per-resource overrides are applied.
    pub fn deployment(&self) -> Deployment {
        let name = &self.values.name;
        Deployment {
            metadata: self.object_meta(self.deployment_name()),
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(self.selector_labels()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        name: Some(name.clone()),
                        labels: Some(self.selector_labels()),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        service_account_name: Some(self.values.service_account_name.clone()),
                        containers: vec![self.container()],
                        volumes: Some(vec![
                            Volume {
                                name: "serving-cert".into(),
                                secret: Some(SecretVolumeSource {
                                    secret_name: Some(self.serving_secret_name()),
                                    default_mode: Some(420),
                                    ..Default::default()
                                }),
                                ..Default::default()
                            },
                            Volume {
                                name: "configuration".into(),
                                config_map: Some(ConfigMapVolumeSource {
                                    name: self.configuration_name(),
                                    ..Default::default()
                                }),
                                ..Default::default()
                            },
                        ]),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            status: None,
        }
    }

    fn container(&self) -> Container {
        Container {
            name: self.values.name.clone(),
            image: Some(self.values.operand_image.clone()),
            image_pull_policy: Some("Always".into()),
            args: Some(vec![
                format!("--secure-port={SECURE_PORT}"),
                format!("--tls-cert-file={SERVING_CERT_MOUNT}/tls.crt"),
                format!("--tls-private-key-file={SERVING_CERT_MOUNT}/tls.key"),
                "--v=8".into(),
            ]),
            env: Some(vec![EnvVar {
                name: "CONFIGURATION_PATH".into(),
                value: Some(CONFIGURATION_PATH.into()),
                value_from: None,
            }]),
            ports: Some(vec![ContainerPort {
                container_port: SECURE_PORT,
                ..Default::default()
            }]),
            security_context: Some(SecurityContext {
                allow_privilege_escalation: Some(false),
                capabilities: Some(Capabilities {
                    drop: Some(vec!["ALL".into()]),
                    add: None,
                }),
                run_as_non_root: Some(true),
                seccomp_profile: Some(SeccompProfile {
                    type_: "RuntimeDefault".into(),
                    localhost_profile: None,
                }),
                ..Default::default()
            }),
            volume_mounts: Some(vec![
                VolumeMount {
                    name: "serving-cert".into(),
                    mount_path: SERVING_CERT_MOUNT.into(),
                    ..Default::default()
                },
                VolumeMount {
                    name: "configuration".into(),
                    mount_path: CONFIGURATION_PATH.into(),
                    sub_path: Some(self.values.configuration_key.clone()),
                    ..Default::default()
                },
            ]),
            readiness_probe: Some(Probe {
                http_get: Some(HTTPGetAction {
                    path: Some("/healthz".into()),
                    port: IntOrString::Int(SECURE_PORT),
                    scheme: Some("HTTPS".into()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_json_diff::assert_json_include;
    use serde_json::json;

    use crate::asset::test_asset;

    #[test]
    fn deployment_runs_the_webhook_server() {
        let deployment = test_asset().deployment();
        assert_json_include!(
            actual: serde_json::to_value(&deployment).unwrap(),
            expected: json!({
                "metadata": {
                    "name": "clusterresourceoverride",
                    "namespace": "clusterresourceoverride-operator",
                },
                "spec": {
                    "replicas": 1,
                    "selector": {"matchLabels": {"clusterresourceoverride": "true"}},
                    "template": {
                        "metadata": {"labels": {"clusterresourceoverride": "true"}},
                        "spec": {
                            "serviceAccountName": "clusterresourceoverride",
                            "containers": [{
                                "name": "clusterresourceoverride",
                                "image": "quay.io/openshift/clusterresourceoverride:4.18",
                                "args": [
                                    "--secure-port=8443",
                                    "--tls-cert-file=/var/serving-cert/tls.crt",
                                    "--tls-private-key-file=/var/serving-cert/tls.key",
                                    "--v=8"
                                ],
                                "env": [{
                                    "name": "CONFIGURATION_PATH",
                                    "value": "/etc/clusterresourceoverride/config/override.yaml"
                                }],
                                "readinessProbe": {"httpGet": {"path": "/healthz", "port": 8443, "scheme": "HTTPS"}},
                                "volumeMounts": [
                                    {"name": "serving-cert", "mountPath": "/var/serving-cert"},
                                    {"name": "configuration", "subPath": "configuration.yaml"}
                                ]
                            }],
                            "volumes": [
                                {"name": "serving-cert", "secret": {"secretName": "server-serving-cert-clusterresourceoverride", "defaultMode": 420}},
                                {"name": "configuration", "configMap": {"name": "clusterresourceoverride-configuration"}}
                            ]
                        }
                    }
                }
            })
        );
    }

    #[test]
    fn container_runs_restricted() {
        let deployment = test_asset().deployment();
        let container = &deployment.spec.unwrap().template.spec.unwrap().containers[0];
        let security = container.security_context.as_ref().unwrap();
        assert_eq!(security.allow_privilege_escalation, Some(false));
        assert_eq!(security.run_as_non_root, Some(true));
        assert_eq!(
            security.capabilities.as_ref().unwrap().drop,
            Some(vec!["ALL".to_string()])
        );
    }
}
