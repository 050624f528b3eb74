//! Serving certificates for the admission webhook.
//!
//! The operator acts as its own CA: every generation produces a fresh CA and a leaf
//! certificate for the webhook server signed by it. Nothing here talks to the cluster.

use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::core::v1::Secret;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose,
};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::resources::clusterresourceoverrides::reasons;
use crate::{Error, Result};

/// Secret key holding the serving private key.
pub const TLS_KEY: &str = "tls.key";
/// Secret key holding the serving certificate.
pub const TLS_CERT: &str = "tls.crt";
/// ConfigMap key holding the CA bundle.
pub const SERVICE_CA: &str = "service-ca.crt";

pub const ORGANIZATION: &str = "Red Hat, Inc.";
const HOSTS: [&str; 1] = ["localhost"];

/// How long a generated certificate is valid.
pub fn valid_for() -> Duration {
    Duration::days(365)
}

/// Margin before expiry at which the certificate is rotated.
pub fn rotate_threshold() -> Duration {
    Duration::hours(48)
}

/// PEM encoded serving key, serving certificate and CA certificate.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Bundle {
    pub service_key: Vec<u8>,
    pub service_cert: Vec<u8>,
    pub serving_cert_ca: Vec<u8>,
}

impl std::fmt::Debug for Bundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bundle")
            .field("hash", &self.hash())
            .finish_non_exhaustive()
    }
}

impl Bundle {
    pub fn validate(&self) -> Result<()> {
        if self.serving_cert_ca.is_empty() {
            return Err(not_available("serving service cert CA must be specified"));
        }
        if self.service_cert.is_empty() {
            return Err(not_available("serving service cert must be specified"));
        }
        if self.service_key.is_empty() {
            return Err(not_available("serving service private key must be specified"));
        }
        Ok(())
    }

    /// Content digest used to detect a changed bundle.
    pub fn hash(&self) -> String {
        let mut chained = Sha256::digest(&self.service_key).to_vec();
        chained.extend_from_slice(&Sha256::digest(&self.service_cert));
        chained.extend_from_slice(&Sha256::digest(&self.serving_cert_ca));
        format!("{:x}", Sha256::digest(&chained))
    }
}

/// True when the secret carries both the serving key and certificate.
pub fn is_populated(secret: Option<&Secret>) -> bool {
    let Some(data) = secret.and_then(|secret| secret.data.as_ref()) else {
        return false;
    };
    [TLS_KEY, TLS_CERT]
        .iter()
        .all(|key| data.get(*key).is_some_and(|value| !value.0.is_empty()))
}

/// Deadline after which a bundle generated at `now` must be replaced.
pub fn rotate_at(now: DateTime<Utc>) -> DateTime<Utc> {
    now + valid_for() - rotate_threshold()
}

/// Generate a new CA and a serving certificate for `localhost` signed by it.
pub fn generate(valid_for: Duration, organization: &str) -> Result<Bundle> {
    let not_before = OffsetDateTime::now_utc();
    let not_after = not_before + time::Duration::seconds(valid_for.num_seconds());

    let mut ca_params = CertificateParams::default();
    ca_params.distinguished_name = distinguished_name(
        &format!("clusterresourceoverride-ca@{}", not_before.unix_timestamp()),
        organization,
    );
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    ca_params.not_before = not_before;
    ca_params.not_after = not_after;

    let ca_key = KeyPair::generate()?;
    let ca_cert = ca_params.self_signed(&ca_key)?;
    let ca_pem = ca_cert.pem();

    let mut params = CertificateParams::new(HOSTS.iter().map(|host| host.to_string()).collect::<Vec<_>>())?;
    params.distinguished_name = distinguished_name(HOSTS[0], organization);
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    params.not_before = not_before;
    params.not_after = not_after;

    let key = KeyPair::generate()?;
    let issuer = Issuer::from_ca_cert_pem(&ca_pem, &ca_key)?;
    let cert = params.signed_by(&key, &issuer)?;

    Ok(Bundle {
        service_key: key.serialize_pem().into_bytes(),
        service_cert: cert.pem().into_bytes(),
        serving_cert_ca: ca_pem.into_bytes(),
    })
}

fn not_available(message: &str) -> Error {
    Error::install_readiness(reasons::CERT_NOT_AVAILABLE, message)
}

fn distinguished_name(common_name: &str, organization: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(common_name.to_string()));
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String(organization.to_string()),
    );
    dn
}
