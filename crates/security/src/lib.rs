//! Secure-asset loading and trust-store assembly.
//!
//! Turns on-disk PEM material (certificates, private keys, CA bundles) into
//! ready-to-use rustls endpoint configurations for two roles: a device
//! connecting outward and a service accepting inbound connections with
//! optional mutual authentication.
//!
//! Batch loaders never let one bad record sink its siblings: they return the
//! successfully loaded items together with an optional [`AggregateLoadError`]
//! describing what was skipped. The role config builders treat any such
//! error as fatal, so a built [`DeviceTlsConfig`] or [`ServiceTlsConfig`]
//! always reflects exactly the configured material.

pub mod certs;
pub mod error;
pub mod identity;
pub mod keys;
pub mod pem;
pub mod tls;
pub mod trust;

#[cfg(test)]
mod testdata;

pub use error::{AggregateLoadError, LoadError};
pub use identity::{validate_identity, Identity};
pub use tls::{
    ClientAuthPolicy, DeviceConfigBuilder, DeviceTlsConfig, ServiceConfigBuilder,
    ServiceTlsConfig,
};
pub use trust::TrustPool;
