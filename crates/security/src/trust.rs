use std::path::Path;
use std::sync::Arc;

use rustls::RootCertStore;
use tracing::{info, warn};

use crate::certs;
use crate::error::{AggregateLoadError, LoadError};

/// Frozen set of trust anchors: the built-in default roots plus whatever the
/// configured CA sources contributed.
#[derive(Debug, Clone)]
pub struct TrustPool {
    roots: Arc<RootCertStore>,
    default_roots: usize,
}

impl TrustPool {
    /// Assemble a pool from zero or more CA source paths.
    ///
    /// Sources are independent: one that fails to load, or yields no usable
    /// anchor, contributes a single aggregate entry naming its path and is
    /// skipped whole. Anchors from earlier sources are never disturbed. An
    /// empty source list is valid and yields the default roots alone.
    pub fn assemble<I, P>(sources: I) -> (Self, Option<AggregateLoadError>)
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let default_roots = roots.len();

        let mut errors = Vec::new();
        for source in sources {
            let path = source.as_ref();
            match load_source(path) {
                Ok(anchors) => roots.roots.extend(anchors.roots),
                Err(source_errors) => {
                    warn!(
                        path = %path.display(),
                        error = %source_errors,
                        "skipping CA source"
                    );
                    errors.push(LoadError::CaSource {
                        path: path.to_path_buf(),
                        source: source_errors,
                    });
                }
            }
        }

        info!(
            anchors = roots.len(),
            augmented = roots.len() - default_roots,
            failed_sources = errors.len(),
            "assembled trust pool"
        );
        (
            Self {
                roots: Arc::new(roots),
                default_roots,
            },
            AggregateLoadError::from_vec(errors),
        )
    }

    pub fn roots(&self) -> Arc<RootCertStore> {
        Arc::clone(&self.roots)
    }

    /// Total number of trust anchors in the pool.
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Anchors contributed by CA sources, on top of the defaults.
    pub fn augmented(&self) -> usize {
        self.roots.len() - self.default_roots
    }
}

// A source is staged into its own store so a late failure leaves the pool
// untouched.
fn load_source(path: &Path) -> Result<RootCertStore, AggregateLoadError> {
    let (certs, load_errors) = certs::load_ca_certificates(path);
    if let Some(errors) = load_errors {
        return Err(errors);
    }

    let mut staged = RootCertStore::empty();
    for cert in certs {
        staged
            .add(cert)
            .map_err(|e| AggregateLoadError::from(LoadError::Tls(e)))?;
    }
    Ok(staged)
}
