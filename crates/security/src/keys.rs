use std::path::Path;

use rustls::pki_types::{
    PrivateKeyDer, PrivatePkcs1KeyDer, PrivatePkcs8KeyDer, PrivateSec1KeyDer,
};
use tracing::{debug, warn};

use crate::error::{AggregateLoadError, LoadError};
use crate::pem;

/// Load every private-key record in `path`, in file order.
///
/// The declared label picks the encoding: `EC PRIVATE KEY` is SEC1,
/// `RSA PRIVATE KEY` is PKCS#1, `PRIVATE KEY` is PKCS#8. Any other label in
/// the family fails per-record, as does a record the crypto provider cannot
/// turn into a signing key. Same partial-success contract as the certificate
/// loader.
pub fn load_private_keys(
    path: impl AsRef<Path>,
) -> (Vec<PrivateKeyDer<'static>>, Option<AggregateLoadError>) {
    let path = path.as_ref();
    let records = match pem::private_key_records(path) {
        Ok(records) => records,
        Err(e) => return (Vec::new(), Some(e.into())),
    };

    let mut keys = Vec::with_capacity(records.len());
    let mut errors = Vec::new();
    for (index, record) in records.into_iter().enumerate() {
        match decode_key(&record.label, record.der, path, index) {
            Ok(key) => keys.push(key),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    index,
                    error = %e,
                    "skipping unusable private-key record"
                );
                errors.push(e);
            }
        }
    }

    debug!(
        path = %path.display(),
        loaded = keys.len(),
        failed = errors.len(),
        "loaded private keys"
    );
    (keys, AggregateLoadError::from_vec(errors))
}

/// Probe `path` without keeping the keys.
pub fn validate_private_keys(path: impl AsRef<Path>) -> Result<(), AggregateLoadError> {
    match load_private_keys(path) {
        (_, Some(errors)) => Err(errors),
        _ => Ok(()),
    }
}

fn decode_key(
    label: &str,
    der: Vec<u8>,
    path: &Path,
    index: usize,
) -> Result<PrivateKeyDer<'static>, LoadError> {
    let key = match label {
        pem::EC_PRIVATE_KEY_LABEL => PrivateKeyDer::Sec1(PrivateSec1KeyDer::from(der)),
        pem::RSA_PRIVATE_KEY_LABEL => PrivateKeyDer::Pkcs1(PrivatePkcs1KeyDer::from(der)),
        pem::PRIVATE_KEY_LABEL => PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(der)),
        other => return Err(LoadError::UnsupportedKeyType(other.to_string())),
    };

    // The label only declares an encoding; prove the payload decodes into a
    // usable signing key before handing it out.
    rustls::crypto::ring::default_provider()
        .key_provider
        .load_private_key(key.clone_key())
        .map_err(|e| {
            LoadError::PrivateKeyParse(format!(
                "record {} in {}: {}",
                index,
                path.display(),
                e
            ))
        })?;

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdata;

    #[test]
    fn dispatches_all_three_subtypes() {
        let dir = tempfile::tempdir().unwrap();
        let keys = testdata::write_pem(
            dir.path(),
            "keys.pem",
            &[
                testdata::EC_KEY_PEM,
                testdata::RSA_KEY_PEM,
                testdata::PKCS8_KEY_PEM,
            ],
        );

        let (loaded, errors) = load_private_keys(&keys);
        assert!(errors.is_none());
        assert!(matches!(loaded[0], PrivateKeyDer::Sec1(_)));
        assert!(matches!(loaded[1], PrivateKeyDer::Pkcs1(_)));
        assert!(matches!(loaded[2], PrivateKeyDer::Pkcs8(_)));
    }

    #[test]
    fn unsupported_label_fails_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let keys = testdata::write_pem(
            dir.path(),
            "keys.pem",
            &[testdata::UNSUPPORTED_KEY_PEM, testdata::PKCS8_KEY_PEM],
        );

        let (loaded, errors) = load_private_keys(&keys);
        assert_eq!(loaded.len(), 1);
        let errors = errors.unwrap();
        assert_eq!(errors.len(), 1);
        let first = errors.iter().next();
        match first {
            Some(LoadError::UnsupportedKeyType(label)) => {
                assert_eq!(label, "ENCRYPTED PRIVATE KEY")
            }
            other => panic!("expected unsupported-type error, got {:?}", other),
        }
    }

    #[test]
    fn undecodable_payload_fails_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let keys = testdata::write_pem(
            dir.path(),
            "keys.pem",
            &[testdata::CORRUPT_KEY_PEM, testdata::EC_KEY_PEM],
        );

        let (loaded, errors) = load_private_keys(&keys);
        assert_eq!(loaded.len(), 1);
        assert!(matches!(
            errors.unwrap().iter().next(),
            Some(LoadError::PrivateKeyParse(_))
        ));
    }

    #[test]
    fn cert_only_bundle_has_no_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut parts = Vec::new();
        for _ in 0..5 {
            parts.push(testdata::CERT_PEM);
        }
        let bundle = testdata::write_pem(dir.path(), "certs.pem", &parts);

        let (loaded, errors) = load_private_keys(&bundle);
        assert!(loaded.is_empty());
        assert!(matches!(
            errors.unwrap().iter().next(),
            Some(LoadError::NoMatchingBlocks { .. })
        ));

        // The same bundle is still a fine certificate source.
        let (certs, cert_errors) = crate::certs::load_certificates(&bundle);
        assert_eq!(certs.len(), 5);
        assert!(cert_errors.is_none());
    }

    #[test]
    fn validate_surfaces_batch_failures() {
        let dir = tempfile::tempdir().unwrap();
        let good = testdata::write_pem(dir.path(), "good.pem", &[testdata::PKCS8_KEY_PEM]);
        let bad = testdata::write_pem(dir.path(), "bad.pem", &[testdata::CORRUPT_KEY_PEM]);

        assert!(validate_private_keys(&good).is_ok());
        assert!(validate_private_keys(&bad).is_err());
    }
}
