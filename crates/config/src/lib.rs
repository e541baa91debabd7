//! Settings layer for courier endpoints.
//!
//! Resolution order: built-in defaults, then an optional TOML settings file,
//! then `COURIER_*` environment variables. The resolved settings hand file
//! paths and the client-auth policy to `courier-security`, and `validate()`
//! can probe the configured TLS material before an endpoint goes live.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use courier_security::{
    ClientAuthPolicy, DeviceConfigBuilder, DeviceTlsConfig, LoadError, ServiceConfigBuilder,
    ServiceTlsConfig,
};

pub const ENV_NAMESPACE: &str = "COURIER";

pub const DEFAULT_NAME: &str = "courier";
pub const DEFAULT_DEBUG: bool = false;
pub const DEFAULT_VALIDATE_TLS: bool = true;

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_BIND_PORT: u16 = 9340;
pub const DEFAULT_SERVICE_ADDRESS: &str = "service.courier.local";
pub const DEFAULT_SERVICE_PORT: u16 = 9340;

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_SEND_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 300;
/// Keep-alive values below this are clamped up to it.
pub const MIN_KEEP_ALIVE_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("settings file: {0}")]
    File(#[from] config::ConfigError),

    #[error("invalid {key}: {reason}")]
    Invalid { key: String, reason: String },

    #[error("CA pattern {pattern}: {reason}")]
    Pattern { pattern: String, reason: String },

    #[error(transparent)]
    Security(#[from] LoadError),

    #[error("{0}")]
    Validation(String),
}

/// Settings shared by both roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub name: String,
    pub debug: bool,
    pub validate_tls: bool,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            debug: DEFAULT_DEBUG,
            validate_tls: DEFAULT_VALIDATE_TLS,
            cert: None,
            key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub connect_secs: u64,
    pub send_secs: u64,
    pub keep_alive_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            send_secs: DEFAULT_SEND_TIMEOUT_SECS,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
        }
    }
}

impl TimeoutSettings {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn send(&self) -> Duration {
        Duration::from_secs(self.send_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

/// Settings for the outbound (client) role.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub service_address: String,
    pub service_port: u16,
    pub service_cacert: Option<PathBuf>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            service_address: DEFAULT_SERVICE_ADDRESS.to_string(),
            service_port: DEFAULT_SERVICE_PORT,
            service_cacert: None,
        }
    }
}

/// Settings for the inbound (server) role.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    pub bind_address: String,
    pub bind_port: u16,
    pub client_auth: ClientAuthPolicy,
    pub bootstrap_cacerts_pattern: Option<String>,
    pub device_cacerts_pattern: Option<String>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            bind_port: DEFAULT_BIND_PORT,
            client_auth: ClientAuthPolicy::default(),
            bootstrap_cacerts_pattern: None,
            device_cacerts_pattern: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub settings: Settings,
    pub timeouts: TimeoutSettings,
    pub device: DeviceSettings,
    pub service: ServiceSettings,
}

impl AppConfig {
    /// Defaults, then environment overrides; no settings file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None::<&Path>)
    }

    /// Defaults, then the TOML settings file at `path` (when given), then
    /// environment overrides. The file may be partial; absent keys keep
    /// their defaults.
    pub fn load_from(path: Option<impl AsRef<Path>>) -> Result<Self, ConfigError> {
        let mut resolved = match path {
            Some(path) => {
                let path = path.as_ref();
                debug!(path = %path.display(), "loading settings file");
                config::Config::builder()
                    .add_source(config::File::from(path))
                    .build()?
                    .try_deserialize::<AppConfig>()?
            }
            None => AppConfig::default(),
        };

        resolved.override_from_env()?;
        resolved.timeouts.keep_alive_secs =
            resolved.timeouts.keep_alive_secs.max(MIN_KEEP_ALIVE_SECS);

        info!(name = %resolved.settings.name, "resolved configuration");
        Ok(resolved)
    }

    fn override_from_env(&mut self) -> Result<(), ConfigError> {
        if let Some(name) = env_var("NAME") {
            self.settings.name = name;
        }
        if let Some(debug) = env_var("DEBUG") {
            self.settings.debug = parse_env("DEBUG", &debug)?;
        }
        if let Some(validate) = env_var("VALIDATE_TLS") {
            self.settings.validate_tls = parse_env("VALIDATE_TLS", &validate)?;
        }
        if let Some(cert) = env_var("CERT") {
            self.settings.cert = Some(PathBuf::from(cert));
        }
        if let Some(key) = env_var("KEY") {
            self.settings.key = Some(PathBuf::from(key));
        }

        if let Some(secs) = env_var("CONNECT_TIMEOUT") {
            self.timeouts.connect_secs = parse_env("CONNECT_TIMEOUT", &secs)?;
        }
        if let Some(secs) = env_var("SEND_TIMEOUT") {
            self.timeouts.send_secs = parse_env("SEND_TIMEOUT", &secs)?;
        }
        if let Some(secs) = env_var("KEEP_ALIVE_TIMEOUT") {
            self.timeouts.keep_alive_secs = parse_env("KEEP_ALIVE_TIMEOUT", &secs)?;
        }

        if let Some(address) = env_var("SERVICE_ADDRESS") {
            self.device.service_address = address;
        }
        if let Some(port) = env_var("SERVICE_PORT") {
            self.device.service_port = parse_env("SERVICE_PORT", &port)?;
        }
        if let Some(path) = env_var("SERVICE_CACERT") {
            self.device.service_cacert = Some(PathBuf::from(path));
        }

        if let Some(address) = env_var("BIND_ADDRESS") {
            self.service.bind_address = address;
        }
        if let Some(port) = env_var("BIND_PORT") {
            self.service.bind_port = parse_env("BIND_PORT", &port)?;
        }
        if let Some(policy) = env_var("CLIENT_AUTH") {
            self.service.client_auth =
                policy
                    .parse()
                    .map_err(|reason: String| ConfigError::Invalid {
                        key: "CLIENT_AUTH".to_string(),
                        reason,
                    })?;
        }
        if let Some(pattern) = env_var("BOOTSTRAP_CACERTS_PATTERN") {
            self.service.bootstrap_cacerts_pattern = Some(pattern);
        }
        if let Some(pattern) = env_var("DEVICE_CACERTS_PATTERN") {
            self.service.device_cacerts_pattern = Some(pattern);
        }

        Ok(())
    }

    /// Structural checks plus, when `validate_tls` is set, probes of the
    /// configured TLS material.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.settings.name.is_empty() {
            return Err(ConfigError::Validation("name must not be empty".into()));
        }
        if self.service.bind_port == 0 {
            return Err(ConfigError::Validation("bind port must not be 0".into()));
        }
        if self.device.service_port == 0 {
            return Err(ConfigError::Validation("service port must not be 0".into()));
        }

        if !self.settings.validate_tls {
            return Ok(());
        }

        match (&self.settings.cert, &self.settings.key) {
            (Some(cert), Some(key)) => courier_security::validate_identity(cert, key)?,
            (None, None) => {}
            _ => {
                return Err(ConfigError::Validation(
                    "cert and key must be configured together".into(),
                ))
            }
        }

        if let Some(cacert) = &self.device.service_cacert {
            courier_security::certs::validate_ca_certificates(cacert).map_err(LoadError::from)?;
        }
        for source in self.client_ca_sources()? {
            courier_security::certs::validate_ca_certificates(&source)
                .map_err(LoadError::from)?;
        }

        Ok(())
    }

    /// CA sources for inbound client verification: the bootstrap pattern's
    /// matches followed by the device pattern's, each in glob order.
    pub fn client_ca_sources(&self) -> Result<Vec<PathBuf>, ConfigError> {
        let mut sources = Vec::new();
        for pattern in [
            &self.service.bootstrap_cacerts_pattern,
            &self.service.device_cacerts_pattern,
        ]
        .into_iter()
        .flatten()
        {
            let matches = glob::glob(pattern).map_err(|e| ConfigError::Pattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
            for entry in matches {
                let path = entry.map_err(|e| ConfigError::Pattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })?;
                sources.push(path);
            }
        }
        debug!(count = sources.len(), "expanded client CA sources");
        Ok(sources)
    }

    /// Build the outbound TLS config from the resolved settings.
    pub fn device_tls(&self) -> Result<DeviceTlsConfig, ConfigError> {
        let mut builder = DeviceConfigBuilder::new();
        if let Some(cert) = &self.settings.cert {
            builder = builder.cert_path(cert);
        }
        if let Some(key) = &self.settings.key {
            builder = builder.key_path(key);
        }
        if let Some(cacert) = &self.device.service_cacert {
            builder = builder.ca_source(cacert);
        }
        Ok(builder.build()?)
    }

    /// Build the inbound TLS config from the resolved settings.
    pub fn service_tls(&self) -> Result<ServiceTlsConfig, ConfigError> {
        let mut builder = ServiceConfigBuilder::new().client_auth(self.service.client_auth);
        if let Some(cert) = &self.settings.cert {
            builder = builder.cert_path(cert);
        }
        if let Some(key) = &self.settings.key {
            builder = builder.key_path(key);
        }
        builder = builder.ca_sources(self.client_ca_sources()?);
        Ok(builder.build()?)
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(format!("{}_{}", ENV_NAMESPACE, key))
        .ok()
        .filter(|value| !value.is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
