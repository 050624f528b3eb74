use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YamlError: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Certificate Error: {0}")]
    CertificateError(#[from] rcgen::Error),

    #[error("Invalid operator configuration: {0}")]
    InvalidConfig(String),

    /// The operand could not be installed; surfaced on the InstallReadinessFailure condition.
    #[error("{message}")]
    InstallReadiness {
        reason: &'static str,
        message: String,
    },

    /// The operand is installed but not serving; surfaced on the Available condition.
    #[error("{message}")]
    Unavailable {
        reason: &'static str,
        message: String,
    },

    #[error("{0}")]
    EnsureFailed(String),

    #[error("failed to generate patch - {0}")]
    PatchGeneration(String),

    #[error("controller={controller} failed to wait for caches to sync")]
    CacheSyncFailed { controller: String },

    #[error("could not find owner for {namespace}/{name}")]
    OwnerNotFound { namespace: String, name: String },

    #[error("ignoring request to enqueue - {0}")]
    EnqueueIgnored(String),

    #[error("reconciliation error - {reconcile} -- update status error - {update}")]
    StatusUpdateFailed {
        reconcile: Box<Error>,
        update: Box<Error>,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::SerializationError(_) => "SerializationError",
            Error::YamlError(_) => "YamlError",
            Error::KubeError(_) => "KubeError",
            Error::CertificateError(_) => "CertificateError",
            Error::InvalidConfig(_) => "InvalidConfig",
            Error::InstallReadiness { reason, .. } => *reason,
            Error::Unavailable { reason, .. } => *reason,
            Error::EnsureFailed(_) => "EnsureFailed",
            Error::PatchGeneration(_) => "PatchGeneration",
            Error::CacheSyncFailed { .. } => "CacheSyncFailed",
            Error::OwnerNotFound { .. } => "OwnerNotFound",
            Error::EnqueueIgnored(_) => "EnqueueIgnored",
            Error::StatusUpdateFailed { .. } => "StatusUpdateFailed",
        }
    }

    pub fn install_readiness(reason: &'static str, message: impl std::fmt::Display) -> Self {
        Error::InstallReadiness {
            reason,
            message: message.to_string(),
        }
    }

    pub fn unavailable(reason: &'static str, message: impl std::fmt::Display) -> Self {
        Error::Unavailable {
            reason,
            message: message.to_string(),
        }
    }

    /// True when the error is a Kubernetes API "not found" response.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KubeError(err) if cluster::is_not_found(err))
    }
}

/// Typed access to the Kubernetes API behind a mockable seam
pub mod cluster;

/// Create-or-patch of operand objects
pub mod ensurer;

/// Self-signed serving certificates for the webhook
pub mod cert;

/// Desired state of every operand object
pub mod asset;

/// Operand deployment install and rollout status
pub mod deploy;

/// Work queue, reconcile contracts and the controller runner
pub mod runtime;

/// Watches on operand objects that map back to the owning resource
pub mod secondarywatch;

/// Operator configuration and wiring
pub mod operator;

pub mod controllers;
pub use controllers::State;

/// Log and trace integrations
pub mod telemetry;

/// Metrics
mod metrics;

pub use metrics::Metrics;

/// Custom resources owned by this operator
pub mod resources;
