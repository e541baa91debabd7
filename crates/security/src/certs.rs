use std::path::Path;

use rustls::pki_types::CertificateDer;
use tracing::{debug, warn};
use x509_parser::prelude::*;

use crate::error::{AggregateLoadError, LoadError};
use crate::pem;

/// Load every certificate record in `path`.
///
/// Records are parsed independently: a corrupt record becomes one aggregate
/// entry and its siblings still load. When extraction itself fails (file
/// unreadable, not PEM, no certificate records) the vector is empty and the
/// aggregate carries that single failure. Callers treat a non-empty vector
/// with `Some(errors)` as a degraded load.
pub fn load_certificates(
    path: impl AsRef<Path>,
) -> (Vec<CertificateDer<'static>>, Option<AggregateLoadError>) {
    let path = path.as_ref();
    let records = match pem::certificate_records(path) {
        Ok(records) => records,
        Err(e) => return (Vec::new(), Some(e.into())),
    };

    let mut certs = Vec::with_capacity(records.len());
    let mut errors = Vec::new();
    for (index, record) in records.into_iter().enumerate() {
        match X509Certificate::from_der(&record.der) {
            Ok(_) => certs.push(CertificateDer::from(record.der)),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    index,
                    error = %e,
                    "skipping unparseable certificate record"
                );
                errors.push(LoadError::CertificateParse(format!(
                    "record {} in {}: {}",
                    index,
                    path.display(),
                    e
                )));
            }
        }
    }

    debug!(
        path = %path.display(),
        loaded = certs.len(),
        failed = errors.len(),
        "loaded certificates"
    );
    (certs, AggregateLoadError::from_vec(errors))
}

/// Probe `path` without keeping the parsed certificates.
pub fn validate_certificates(path: impl AsRef<Path>) -> Result<(), AggregateLoadError> {
    match load_certificates(path) {
        (_, Some(errors)) => Err(errors),
        _ => Ok(()),
    }
}

/// CA-flavored alias of [`load_certificates`]; CA material carries no extra
/// encoding constraints, only a different role downstream.
pub fn load_ca_certificates(
    path: impl AsRef<Path>,
) -> (Vec<CertificateDer<'static>>, Option<AggregateLoadError>) {
    load_certificates(path)
}

/// Probe a CA source without keeping the certificates.
pub fn validate_ca_certificates(path: impl AsRef<Path>) -> Result<(), AggregateLoadError> {
    validate_certificates(path)
}
