use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use rustls::client::danger::HandshakeSignatureValid;
use rustls::pki_types::{CertificateDer, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::{ClientHello, ResolvesServerCert, WebPkiClientVerifier};
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, DistinguishedName, RootCertStore, ServerConfig, SignatureScheme};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::LoadError;
use crate::identity::Identity;
use crate::trust::TrustPool;

/// How a service treats inbound client certificates.
///
/// The two `verify` policies validate the presented chain against the trust
/// pool; `request`/`require-any` accept any well-formed chain without
/// validation, differing only in whether a certificate must be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientAuthPolicy {
    #[default]
    NoClientCert,
    RequestClientCert,
    RequireAnyClientCert,
    VerifyClientCertIfGiven,
    RequireAndVerifyClientCert,
}

impl ClientAuthPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoClientCert => "no-client-cert",
            Self::RequestClientCert => "request-client-cert",
            Self::RequireAnyClientCert => "require-any-client-cert",
            Self::VerifyClientCertIfGiven => "verify-client-cert-if-given",
            Self::RequireAndVerifyClientCert => "require-and-verify-client-cert",
        }
    }
}

impl fmt::Display for ClientAuthPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientAuthPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no-client-cert" => Ok(Self::NoClientCert),
            "request-client-cert" => Ok(Self::RequestClientCert),
            "require-any-client-cert" => Ok(Self::RequireAnyClientCert),
            "verify-client-cert-if-given" => Ok(Self::VerifyClientCertIfGiven),
            "require-and-verify-client-cert" => Ok(Self::RequireAndVerifyClientCert),
            other => Err(format!("unknown client auth policy: {}", other)),
        }
    }
}

/// Ready-to-use outbound (client) endpoint configuration.
#[derive(Debug, Clone)]
pub struct DeviceTlsConfig {
    config: Arc<ClientConfig>,
    trust: TrustPool,
    subject: Option<String>,
}

impl DeviceTlsConfig {
    pub fn client_config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.config)
    }

    pub fn trust(&self) -> &TrustPool {
        &self.trust
    }

    /// Subject of the presented identity, when one was configured.
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }
}

/// Ready-to-use inbound (server) endpoint configuration.
#[derive(Debug, Clone)]
pub struct ServiceTlsConfig {
    config: Arc<ServerConfig>,
    policy: ClientAuthPolicy,
    trust: TrustPool,
    subject: Option<String>,
}

impl ServiceTlsConfig {
    pub fn server_config(&self) -> Arc<ServerConfig> {
        Arc::clone(&self.config)
    }

    pub fn client_auth(&self) -> ClientAuthPolicy {
        self.policy
    }

    pub fn trust(&self) -> &TrustPool {
        &self.trust
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }
}

/// Builder for [`DeviceTlsConfig`].
///
/// Certificate and key paths come as a pair: setting one without the other
/// is a build error. CA sources augment the default roots; any source
/// failure is fatal at this level.
#[derive(Debug, Default)]
pub struct DeviceConfigBuilder {
    cert_path: Option<PathBuf>,
    key_path: Option<PathBuf>,
    ca_sources: Vec<PathBuf>,
}

impl DeviceConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cert_path = Some(path.into());
        self
    }

    pub fn key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    pub fn ca_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_sources.push(path.into());
        self
    }

    pub fn ca_sources<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.ca_sources.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> Result<DeviceTlsConfig, LoadError> {
        let trust = assemble_trust(&self.ca_sources)?;
        let identity = load_identity(self.cert_path, self.key_path)?;

        let builder = ClientConfig::builder().with_root_certificates(trust.roots());
        let (config, subject) = match identity {
            Some(identity) => {
                let subject = identity.subject().to_string();
                let (chain, key) = identity.into_parts();
                (builder.with_client_auth_cert(chain, key)?, Some(subject))
            }
            None => (builder.with_no_client_auth(), None),
        };

        info!(
            anchors = trust.len(),
            identity = subject.is_some(),
            "built device TLS config"
        );
        Ok(DeviceTlsConfig {
            config: Arc::new(config),
            trust,
            subject,
        })
    }
}

/// Builder for [`ServiceTlsConfig`].
#[derive(Debug, Default)]
pub struct ServiceConfigBuilder {
    cert_path: Option<PathBuf>,
    key_path: Option<PathBuf>,
    ca_sources: Vec<PathBuf>,
    client_auth: ClientAuthPolicy,
}

impl ServiceConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cert_path = Some(path.into());
        self
    }

    pub fn key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    pub fn ca_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_sources.push(path.into());
        self
    }

    pub fn ca_sources<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.ca_sources.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn client_auth(mut self, policy: ClientAuthPolicy) -> Self {
        self.client_auth = policy;
        self
    }

    pub fn build(self) -> Result<ServiceTlsConfig, LoadError> {
        let trust = assemble_trust(&self.ca_sources)?;
        let identity = load_identity(self.cert_path, self.key_path)?;
        let policy = self.client_auth;

        let builder = match policy {
            ClientAuthPolicy::NoClientCert => ServerConfig::builder().with_no_client_auth(),
            ClientAuthPolicy::RequestClientCert => ServerConfig::builder()
                .with_client_cert_verifier(Arc::new(UnverifiedClientCert::new(
                    &trust.roots(),
                    false,
                ))),
            ClientAuthPolicy::RequireAnyClientCert => ServerConfig::builder()
                .with_client_cert_verifier(Arc::new(UnverifiedClientCert::new(
                    &trust.roots(),
                    true,
                ))),
            ClientAuthPolicy::VerifyClientCertIfGiven => {
                let verifier = WebPkiClientVerifier::builder(trust.roots())
                    .allow_unauthenticated()
                    .build()
                    .map_err(|e| LoadError::ClientVerifier(e.to_string()))?;
                ServerConfig::builder().with_client_cert_verifier(verifier)
            }
            ClientAuthPolicy::RequireAndVerifyClientCert => {
                let verifier = WebPkiClientVerifier::builder(trust.roots())
                    .build()
                    .map_err(|e| LoadError::ClientVerifier(e.to_string()))?;
                ServerConfig::builder().with_client_cert_verifier(verifier)
            }
        };

        let (config, subject) = match identity {
            Some(identity) => {
                let subject = identity.subject().to_string();
                let (chain, key) = identity.into_parts();
                (builder.with_single_cert(chain, key)?, Some(subject))
            }
            None => {
                // Accepting connections without a certificate fails during the
                // handshake, not here; a service may come up before its
                // identity is provisioned.
                warn!("service has no identity, handshakes will fail until one is configured");
                (builder.with_cert_resolver(Arc::new(NoServerCert)), None)
            }
        };

        info!(
            anchors = trust.len(),
            policy = %policy,
            identity = subject.is_some(),
            "built service TLS config"
        );
        Ok(ServiceTlsConfig {
            config: Arc::new(config),
            policy,
            trust,
            subject,
        })
    }
}

fn assemble_trust(sources: &[PathBuf]) -> Result<TrustPool, LoadError> {
    let (trust, errors) = TrustPool::assemble(sources);
    match errors {
        Some(errors) => Err(errors.into()),
        None => Ok(trust),
    }
}

fn load_identity(
    cert_path: Option<PathBuf>,
    key_path: Option<PathBuf>,
) -> Result<Option<Identity>, LoadError> {
    match (cert_path, key_path) {
        (None, None) => Ok(None),
        (Some(cert), Some(key)) => Identity::from_files(cert, key).map(Some),
        (Some(_), None) => Err(LoadError::MissingPairPath("key")),
        (None, Some(_)) => Err(LoadError::MissingPairPath("certificate")),
    }
}

/// Accepts any well-formed client chain without validating it against the
/// trust anchors. `mandatory` selects between requesting and requiring a
/// certificate.
#[derive(Debug)]
struct UnverifiedClientCert {
    subjects: Vec<DistinguishedName>,
    mandatory: bool,
}

impl UnverifiedClientCert {
    fn new(roots: &RootCertStore, mandatory: bool) -> Self {
        Self {
            subjects: roots.subjects(),
            mandatory,
        }
    }
}

impl ClientCertVerifier for UnverifiedClientCert {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &self.subjects
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }

    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        self.mandatory
    }
}

/// Resolver for a service that has no identity yet. Offering no certificate
/// aborts the handshake on the peer's side.
#[derive(Debug)]
struct NoServerCert;

impl ResolvesServerCert for NoServerCert {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdata;
    use std::path::{Path, PathBuf};

    fn identity_files(dir: &Path, cn: &str) -> (PathBuf, PathBuf) {
        let (cert_pem, key_pem) = testdata::generate_identity(cn);
        let cert = testdata::write_pem(dir, &format!("{}-cert.pem", cn), &[&cert_pem]);
        let key = testdata::write_pem(dir, &format!("{}-key.pem", cn), &[&key_pem]);
        (cert, key)
    }

    #[test]
    fn policy_spellings_round_trip() {
        let all = [
            ClientAuthPolicy::NoClientCert,
            ClientAuthPolicy::RequestClientCert,
            ClientAuthPolicy::RequireAnyClientCert,
            ClientAuthPolicy::VerifyClientCertIfGiven,
            ClientAuthPolicy::RequireAndVerifyClientCert,
        ];
        for policy in all {
            assert_eq!(policy.as_str().parse::<ClientAuthPolicy>(), Ok(policy));
        }
        assert!("mutual-maybe".parse::<ClientAuthPolicy>().is_err());
        assert_eq!(ClientAuthPolicy::default(), ClientAuthPolicy::NoClientCert);
    }

    #[test]
    fn device_without_identity_uses_default_roots() {
        let device = DeviceConfigBuilder::new().build().unwrap();
        assert!(device.subject().is_none());
        assert_eq!(device.trust().augmented(), 0);
    }

    #[test]
    fn device_with_identity_carries_subject() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = identity_files(dir.path(), "device");
        let (ca_pem, _) = testdata::generate_identity("ca");
        let ca = testdata::write_pem(dir.path(), "ca.pem", &[&ca_pem]);

        let device = DeviceConfigBuilder::new()
            .cert_path(&cert)
            .key_path(&key)
            .ca_source(&ca)
            .build()
            .unwrap();
        assert!(device.subject().unwrap().contains("device"));
        assert_eq!(device.trust().augmented(), 1);
    }

    #[test]
    fn cert_without_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, _) = identity_files(dir.path(), "halfpair");

        match DeviceConfigBuilder::new().cert_path(&cert).build() {
            Err(LoadError::MissingPairPath(which)) => assert_eq!(which, "key"),
            other => panic!("expected missing-path error, got {:?}", other),
        }
    }

    #[test]
    fn failing_ca_source_is_fatal_for_builders() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.pem");

        assert!(DeviceConfigBuilder::new().ca_source(&missing).build().is_err());
        assert!(ServiceConfigBuilder::new().ca_source(&missing).build().is_err());
    }

    #[test]
    fn service_builds_under_every_policy() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = identity_files(dir.path(), "service");

        for policy in [
            ClientAuthPolicy::NoClientCert,
            ClientAuthPolicy::RequestClientCert,
            ClientAuthPolicy::RequireAnyClientCert,
            ClientAuthPolicy::VerifyClientCertIfGiven,
            ClientAuthPolicy::RequireAndVerifyClientCert,
        ] {
            let service = ServiceConfigBuilder::new()
                .cert_path(&cert)
                .key_path(&key)
                .client_auth(policy)
                .build()
                .unwrap();
            assert_eq!(service.client_auth(), policy);
            assert!(service.subject().unwrap().contains("service"));
        }
    }

    #[test]
    fn service_without_identity_builds_and_defers_failure() {
        let service = ServiceConfigBuilder::new().build().unwrap();
        assert!(service.subject().is_none());
        assert_eq!(service.client_auth(), ClientAuthPolicy::NoClientCert);
    }

    #[test]
    fn rebuilding_from_the_same_inputs_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = identity_files(dir.path(), "stable");

        let build = || {
            ServiceConfigBuilder::new()
                .cert_path(&cert)
                .key_path(&key)
                .client_auth(ClientAuthPolicy::RequireAndVerifyClientCert)
                .build()
                .unwrap()
        };
        let first = build();
        let second = build();
        assert_eq!(first.trust().len(), second.trust().len());
        assert_eq!(first.subject(), second.subject());
        assert_eq!(first.client_auth(), second.client_auth());
    }
}
