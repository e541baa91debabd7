use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// A single failure while loading or assembling secure assets.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("scanning {path}: {reason}")]
    Scan { path: PathBuf, reason: String },

    #[error("no matching {kind} blocks in {path}")]
    NoMatchingBlocks { kind: &'static str, path: PathBuf },

    #[error("parsing certificate: {0}")]
    CertificateParse(String),

    #[error("parsing private key: {0}")]
    PrivateKeyParse(String),

    #[error("unsupported key type: {0}")]
    UnsupportedKeyType(String),

    #[error("missing {0} path for certificate/key pair")]
    MissingPairPath(&'static str),

    #[error("{count} private keys in {path}, expected exactly one")]
    AmbiguousPrivateKeys { path: PathBuf, count: usize },

    #[error("private key does not match certificate {subject}")]
    KeyMismatch { subject: String },

    #[error("building client verifier: {0}")]
    ClientVerifier(String),

    #[error("CA source {path}: {source}")]
    CaSource {
        path: PathBuf,
        source: AggregateLoadError,
    },

    #[error(transparent)]
    Tls(#[from] rustls::Error),

    #[error(transparent)]
    Aggregate(#[from] AggregateLoadError),
}

/// Ordered collection of failures gathered while processing a batch of
/// records or sources. Never empty: use [`AggregateLoadError::from_vec`].
///
/// Batch loaders hand this back *alongside* their partial successes; callers
/// tell "fatal" from "degraded" by whether the result collection is empty.
#[derive(Debug)]
pub struct AggregateLoadError {
    errors: Vec<LoadError>,
}

impl AggregateLoadError {
    /// Wrap a batch of failures, or `None` when there were none.
    pub fn from_vec(errors: Vec<LoadError>) -> Option<Self> {
        if errors.is_empty() {
            None
        } else {
            Some(Self { errors })
        }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LoadError> {
        self.errors.iter()
    }
}

impl From<LoadError> for AggregateLoadError {
    fn from(error: LoadError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

impl fmt::Display for AggregateLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", err)?;
        }
        write!(f, "]")
    }
}

impl std::error::Error for AggregateLoadError {}
