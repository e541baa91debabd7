use std::path::Path;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use tracing::info;
use x509_parser::prelude::*;

use crate::error::LoadError;
use crate::{certs, keys};

/// A certificate chain paired with its private key.
///
/// Loading is all-or-nothing: any failure in either half, or a pairing
/// failure, yields an error and no identity. The leaf is the first
/// certificate record in the file.
#[derive(Debug)]
pub struct Identity {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    subject: String,
}

impl Identity {
    /// Load a chain from `cert_path` and its key from `key_path`.
    ///
    /// The two paths may be equal for bundled files. The key file must hold
    /// exactly one private-key record, and that key must correspond to the
    /// leaf certificate's public key.
    pub fn from_files(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<Self, LoadError> {
        let cert_path = cert_path.as_ref();
        let key_path = key_path.as_ref();

        let (chain, cert_errors) = certs::load_certificates(cert_path);
        if let Some(errors) = cert_errors {
            return Err(errors.into());
        }

        let (mut loaded_keys, key_errors) = keys::load_private_keys(key_path);
        if let Some(errors) = key_errors {
            return Err(errors.into());
        }
        if loaded_keys.len() != 1 {
            return Err(LoadError::AmbiguousPrivateKeys {
                path: key_path.to_path_buf(),
                count: loaded_keys.len(),
            });
        }
        let key = loaded_keys.remove(0);

        let subject = leaf_subject(&chain[0])?;
        verify_pairing(&chain, &key, &subject)?;

        info!(subject = %subject, chain_len = chain.len(), "loaded identity");
        Ok(Self {
            chain,
            key,
            subject,
        })
    }

    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    pub fn key(&self) -> &PrivateKeyDer<'static> {
        &self.key
    }

    /// Distinguished name of the leaf certificate's subject.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub(crate) fn into_parts(self) -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
        (self.chain, self.key)
    }
}

impl Clone for Identity {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            key: self.key.clone_key(),
            subject: self.subject.clone(),
        }
    }
}

/// Probe a certificate/key pair without keeping the identity.
pub fn validate_identity(
    cert_path: impl AsRef<Path>,
    key_path: impl AsRef<Path>,
) -> Result<(), LoadError> {
    Identity::from_files(cert_path, key_path).map(|_| ())
}

fn leaf_subject(leaf: &CertificateDer<'static>) -> Result<String, LoadError> {
    let (_, parsed) = X509Certificate::from_der(leaf)
        .map_err(|e| LoadError::CertificateParse(e.to_string()))?;
    Ok(parsed.subject().to_string())
}

fn verify_pairing(
    chain: &[CertificateDer<'static>],
    key: &PrivateKeyDer<'static>,
    subject: &str,
) -> Result<(), LoadError> {
    let signer = rustls::crypto::ring::default_provider()
        .key_provider
        .load_private_key(key.clone_key())
        .map_err(|e| LoadError::PrivateKeyParse(e.to_string()))?;

    let certified = CertifiedKey::new(chain.to_vec(), signer);
    match certified.keys_match() {
        Ok(()) => Ok(()),
        // Provider cannot expose the public key for comparison; accept, the
        // handshake will reject a real mismatch.
        Err(rustls::Error::InconsistentKeys(rustls::InconsistentKeys::Unknown)) => Ok(()),
        Err(rustls::Error::InconsistentKeys(rustls::InconsistentKeys::KeyMismatch)) => {
            Err(LoadError::KeyMismatch {
                subject: subject.to_string(),
            })
        }
        Err(e) => Err(LoadError::Tls(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdata;

    #[test]
    fn loads_matching_pair() {
        let dir = tempfile::tempdir().unwrap();
        let cert = testdata::write_pem(dir.path(), "cert.pem", &[testdata::CERT_PEM]);
        let key = testdata::write_pem(dir.path(), "key.pem", &[testdata::PKCS8_KEY_PEM]);

        let identity = Identity::from_files(&cert, &key).unwrap();
        assert_eq!(identity.chain().len(), 1);
        assert!(identity.subject().contains("fixture.test"));
        assert!(validate_identity(&cert, &key).is_ok());
    }

    #[test]
    fn loads_bundled_file() {
        let dir = tempfile::tempdir().unwrap();
        let (cert_pem, key_pem) = testdata::generate_identity("bundled.test");
        let bundle = testdata::write_pem(dir.path(), "bundle.pem", &[&cert_pem, &key_pem]);

        let identity = Identity::from_files(&bundle, &bundle).unwrap();
        assert_eq!(identity.chain().len(), 1);
        assert!(matches!(identity.key(), PrivateKeyDer::Pkcs8(_)));
    }

    #[test]
    fn rejects_mismatched_pair() {
        let dir = tempfile::tempdir().unwrap();
        let (cert_pem, _) = testdata::generate_identity("alpha.test");
        let (_, other_key_pem) = testdata::generate_identity("beta.test");
        let cert = testdata::write_pem(dir.path(), "cert.pem", &[&cert_pem]);
        let key = testdata::write_pem(dir.path(), "key.pem", &[&other_key_pem]);

        match Identity::from_files(&cert, &key) {
            Err(LoadError::KeyMismatch { subject }) => assert!(subject.contains("alpha.test")),
            other => panic!("expected key mismatch, got {:?}", other),
        }
    }

    #[test]
    fn rejects_multiple_keys() {
        let dir = tempfile::tempdir().unwrap();
        let cert = testdata::write_pem(dir.path(), "cert.pem", &[testdata::CERT_PEM]);
        let keys = testdata::write_pem(
            dir.path(),
            "keys.pem",
            &[testdata::PKCS8_KEY_PEM, testdata::EC_KEY_PEM],
        );

        match Identity::from_files(&cert, &keys) {
            Err(LoadError::AmbiguousPrivateKeys { count, .. }) => assert_eq!(count, 2),
            other => panic!("expected ambiguity error, got {:?}", other),
        }
    }

    #[test]
    fn missing_key_file_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let cert = testdata::write_pem(dir.path(), "cert.pem", &[testdata::CERT_PEM]);

        assert!(Identity::from_files(&cert, dir.path().join("absent.pem")).is_err());
    }
}
