use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::LoadError;

pub(crate) const CERTIFICATE_LABEL: &str = "CERTIFICATE";
pub(crate) const EC_PRIVATE_KEY_LABEL: &str = "EC PRIVATE KEY";
pub(crate) const RSA_PRIVATE_KEY_LABEL: &str = "RSA PRIVATE KEY";
pub(crate) const PRIVATE_KEY_LABEL: &str = "PRIVATE KEY";

/// One decoded PEM record: its declared type label and the DER payload.
#[derive(Debug, Clone)]
pub struct PemRecord {
    pub label: String,
    pub der: Vec<u8>,
}

/// All certificate records in `path`, in file order.
pub fn certificate_records(path: impl AsRef<Path>) -> Result<Vec<PemRecord>, LoadError> {
    matching_records(path.as_ref(), CERTIFICATE_LABEL, |label| {
        label == CERTIFICATE_LABEL
    })
}

/// All private-key records in `path`, in file order.
///
/// Matches the whole label family (`PRIVATE KEY`, `EC PRIVATE KEY`, ...) so
/// that unsupported sub-types surface as per-record failures in the key
/// loader instead of disappearing here.
pub fn private_key_records(path: impl AsRef<Path>) -> Result<Vec<PemRecord>, LoadError> {
    matching_records(path.as_ref(), PRIVATE_KEY_LABEL, |label| {
        label.ends_with(PRIVATE_KEY_LABEL)
    })
}

fn matching_records(
    path: &Path,
    kind: &'static str,
    matches: impl Fn(&str) -> bool,
) -> Result<Vec<PemRecord>, LoadError> {
    let data = fs::read(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let records = pem::parse_many(data).map_err(|e| LoadError::Scan {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let total = records.len();
    let matched: Vec<PemRecord> = records
        .into_iter()
        .filter(|record| matches(record.tag()))
        .map(|record| PemRecord {
            label: record.tag().to_string(),
            der: record.into_contents(),
        })
        .collect();

    debug!(
        path = %path.display(),
        kind,
        total,
        matched = matched.len(),
        "scanned PEM records"
    );

    if matched.is_empty() {
        return Err(LoadError::NoMatchingBlocks {
            kind,
            path: path.to_path_buf(),
        });
    }

    Ok(matched)
}
