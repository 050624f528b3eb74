use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{ObjectReference, Toleration};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Name of the only ClusterResourceOverride the operator acts on.
pub const SINGLETON_NAME: &str = "cluster";

pub mod condition_types {
    pub const INSTALL_READINESS_FAILURE: &str = "InstallReadinessFailure";
    pub const AVAILABLE: &str = "Available";
}

pub mod reasons {
    pub const INVALID_PARAMETERS: &str = "InvalidParameters";
    pub const CONFIGURATION_CHECK_FAILED: &str = "ConfigurationCheckFailed";
    pub const CERT_NOT_AVAILABLE: &str = "CertNotAvailable";
    pub const CANNOT_SET_REFERENCE: &str = "CannotSetReference";
    pub const CANNOT_GENERATE_CERT: &str = "CannotGenerateCert";
    pub const INTERNAL_ERROR: &str = "InternalError";
    pub const ADMISSION_WEBHOOK_NOT_AVAILABLE: &str = "AdmissionWebhookNotAvailable";
    pub const DEPLOYMENT_NOT_READY: &str = "DeploymentNotReady";
}

/// Configures the ClusterResourceOverride admission webhook
#[derive(CustomResource, Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[kube(
    kind = "ClusterResourceOverride",
    group = "operator.autoscaling.openshift.io",
    version = "v1",
    printcolumn = r#"{"name":"Available", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Available\")].status"}"#,
    printcolumn = r#"{"name":"Reason", "priority": 1, "type":"string", "jsonPath":".status.conditions[?(@.type==\"Available\")].reason"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[kube(status = "ClusterResourceOverrideStatus", shortname = "cro", derive = "PartialEq")]
#[serde(rename_all = "camelCase")]
pub struct ClusterResourceOverrideSpec {
    pub pod_resource_override: PodResourceOverride,
    /// deploymentOverrides tune the scheduling of the admission webhook server
    #[serde(default)]
    pub deployment_overrides: DeploymentOverrides,
}

/// Wrapper kept for compatibility with the admission server's configuration file format
#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
pub struct PodResourceOverride {
    #[serde(default)]
    pub spec: PodResourceOverrideSpec,
}

/// Ratios applied by the admission webhook to every pod admitted in an enabled namespace
#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodResourceOverrideSpec {
    /// memoryRequestToLimitPercent sets the memory request as a percentage of the memory limit
    #[serde(default)]
    pub memory_request_to_limit_percent: i64,
    /// cpuRequestToLimitPercent sets the cpu request as a percentage of the cpu limit
    #[serde(default)]
    pub cpu_request_to_limit_percent: i64,
    /// limitCPUToMemoryPercent sets the cpu limit from the memory limit, 100% maps 1GiB to 1 core
    #[serde(default, rename = "limitCPUToMemoryPercent")]
    pub limit_cpu_to_memory_percent: i64,
    /// forceSelinuxRelabel forces a recursive relabel of pod volumes
    #[serde(default)]
    pub force_selinux_relabel: bool,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentOverrides {
    /// replicas is the number of webhook server pods. Defaults to 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,
}

/// Status of the ClusterResourceOverride
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterResourceOverrideStatus {
    /// References to every object the operator installed for this resource
    #[serde(default)]
    pub resources: ClusterResourceOverrideResources,
    #[serde(default)]
    pub hash: ClusterResourceOverrideHash,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ClusterResourceOverrideCondition>,
    /// Version of the operand that was last rolled out
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Image of the operand that was last rolled out
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    /// The serving certificate is regenerated once this time has passed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certs_rotate_at: Option<Time>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterResourceOverrideResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_ref: Option<ObjectReference>,
    #[serde(default, rename = "serviceCAConfigMapRef", skip_serializing_if = "Option::is_none")]
    pub service_ca_config_map_ref: Option<ObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_ref: Option<ObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_cert_secret_ref: Option<ObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_ref: Option<ObjectReference>,
    #[serde(default, rename = "apiServiceRef", skip_serializing_if = "Option::is_none")]
    pub api_service_ref: Option<ObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutating_webhook_configuration_ref: Option<ObjectReference>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterResourceOverrideHash {
    /// Hash of the spec last written to the configuration ConfigMap
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub configuration: String,
    /// Hash of the serving certificate bundle
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub serving_cert: String,
}

/// Condition contains details for one aspect of the current state of this API Resource.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterResourceOverrideCondition {
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: Option<Time>,
    /// Human-readable message indicating details about last transition.
    pub message: Option<String>,
    /// Reason for the condition's last transition.
    pub reason: Option<String>,
    /// Status is the status of the condition. Can be True, False, Unknown.
    pub status: String,
    /// Type of the condition, InstallReadinessFailure or Available.
    pub r#type: String,
}

impl ClusterResourceOverride {
    /// Status of the resource, initialised on first use.
    pub fn status_mut(&mut self) -> &mut ClusterResourceOverrideStatus {
        self.status.get_or_insert_with(Default::default)
    }
}

impl ClusterResourceOverrideStatus {
    /// Rotation is due when no deadline was ever recorded or the deadline has passed.
    pub fn is_time_to_rotate_cert(&self, now: DateTime<Utc>) -> bool {
        match &self.certs_rotate_at {
            None => true,
            Some(Time(at)) => now >= *at,
        }
    }
}

impl ClusterResourceOverrideSpec {
    /// Hash of the whole spec. A change to either override block is drift of the configuration.
    pub fn hash(&self) -> String {
        sha256_hex(&format!(
            "PodResourceOverride={}, DeploymentOverrides={}",
            self.pod_resource_override.spec.hash(),
            self.deployment_overrides.hash()
        ))
    }

    pub fn validate(&self) -> Result<()> {
        self.pod_resource_override.spec.validate()?;
        self.deployment_overrides.validate()
    }
}

impl PodResourceOverrideSpec {
    pub fn hash(&self) -> String {
        sha256_hex(&self.to_string())
    }

    pub fn validate(&self) -> Result<()> {
        if !(0..=100).contains(&self.memory_request_to_limit_percent) {
            return Err(invalid_parameters(
                "invalid value for MemoryRequestToLimitPercent, must be [0...100]",
            ));
        }
        if !(0..=100).contains(&self.cpu_request_to_limit_percent) {
            return Err(invalid_parameters(
                "invalid value for CPURequestToLimitPercent, must be [0...100]",
            ));
        }
        if self.limit_cpu_to_memory_percent < 0 {
            return Err(invalid_parameters(
                "invalid value for LimitCPUToMemoryPercent, must be a positive value",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for PodResourceOverrideSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MemoryRequestToLimitPercent={}, CPURequestToLimitPercent={}, LimitCPUToMemoryPercent={}, ForceSelinuxRelabel={}",
            self.memory_request_to_limit_percent,
            self.cpu_request_to_limit_percent,
            self.limit_cpu_to_memory_percent,
            self.force_selinux_relabel
        )
    }
}

impl DeploymentOverrides {
    pub fn hash(&self) -> String {
        sha256_hex(&self.to_string())
    }

    pub fn validate(&self) -> Result<()> {
        match self.replicas {
            Some(replicas) if replicas < 0 => Err(invalid_parameters(
                "invalid value for Replicas, must be a positive value",
            )),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for DeploymentOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.replicas {
            Some(replicas) => write!(f, "Replicas={replicas}, ")?,
            None => write!(f, "Replicas=nil, ")?,
        }
        // BTreeMap iterates in key order, which keeps the rendering stable
        write!(f, "NodeSelector=")?;
        for (key, value) in self.node_selector.iter().flatten() {
            write!(f, "{key}={value},")?;
        }
        write!(f, ", Tolerations={:?}", self.tolerations.as_deref().unwrap_or_default())
    }
}

fn invalid_parameters(message: &str) -> Error {
    Error::install_readiness(reasons::INVALID_PARAMETERS, message)
}

fn sha256_hex(value: &str) -> String {
    format!("{:x}", Sha256::digest(value.as_bytes()))
}
