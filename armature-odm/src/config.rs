//! Connection configuration.

use crate::error::{OdmError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Settings used to construct one connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Node URLs. Only the first is used; the engine routes internally.
    #[serde(default = "default_hosts")]
    pub hosts: Vec<String>,
    /// Basic auth username.
    #[serde(default)]
    pub username: Option<String>,
    /// Basic auth password.
    #[serde(default)]
    pub password: Option<String>,
    /// Request timeout.
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
    /// TLS configuration.
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

fn default_hosts() -> Vec<String> {
    vec!["http://localhost:9200".to_string()]
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            hosts: default_hosts(),
            username: None,
            password: None,
            request_timeout: default_request_timeout(),
            tls: None,
        }
    }
}

impl ConnectionConfig {
    /// Create a configuration for a single node.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            hosts: vec![url.into()],
            ..Default::default()
        }
    }

    /// Create a builder.
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::new()
    }

    /// Load configuration from `{prefix}_*` environment variables.
    ///
    /// Reads `URL` (comma separated), `USERNAME`, `PASSWORD`, `TIMEOUT`
    /// (seconds), `CA_CERT` and `INSECURE`.
    pub fn from_env(prefix: &str) -> ConnectionConfigBuilder {
        Self::from_vars(prefix, |key| std::env::var(key).ok())
    }

    pub(crate) fn from_vars(
        prefix: &str,
        var: impl Fn(&str) -> Option<String>,
    ) -> ConnectionConfigBuilder {
        let key = |name: &str| format!("{}_{}", prefix, name);
        let mut builder = ConnectionConfigBuilder::new();

        if let Some(urls) = var(&key("URL")) {
            let hosts: Vec<String> = urls
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            builder = builder.hosts(hosts);
        }

        if let Some(username) = var(&key("USERNAME")) {
            builder = builder.username(username);
        }

        if let Some(password) = var(&key("PASSWORD")) {
            builder = builder.password(password);
        }

        if let Some(timeout) = var(&key("TIMEOUT"))
            && let Ok(secs) = timeout.parse()
        {
            builder = builder.request_timeout(Duration::from_secs(secs));
        }

        if let Some(ca_cert) = var(&key("CA_CERT")) {
            builder = builder.tls(TlsConfig::with_ca_cert(ca_cert));
        }

        if var(&key("INSECURE")).is_some() {
            let tls = builder.config.tls.take().unwrap_or_default();
            builder = builder.tls(tls.danger_accept_invalid_certs());
        }

        builder
    }

    /// First configured host.
    pub fn url(&self) -> Result<&str> {
        self.hosts
            .first()
            .map(String::as_str)
            .ok_or_else(|| OdmError::Config("No hosts configured".to_string()))
    }
}

/// Builder for [`ConnectionConfig`].
#[derive(Debug, Default)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a single host.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.hosts = vec![url.into()];
        self
    }

    /// Set the hosts.
    pub fn hosts(mut self, hosts: Vec<String>) -> Self {
        self.config.hosts = hosts;
        self
    }

    /// Set the username.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.username = Some(username.into());
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    /// Set the request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set TLS configuration.
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.config.tls = Some(tls);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}

/// TLS configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Path to a PEM encoded CA certificate.
    #[serde(default)]
    pub ca_cert: Option<String>,
    /// Skip certificate verification.
    #[serde(default)]
    pub danger_accept_invalid_certs: bool,
}

impl TlsConfig {
    /// Create TLS config with CA certificate.
    pub fn with_ca_cert(ca_cert: impl Into<String>) -> Self {
        Self {
            ca_cert: Some(ca_cert.into()),
            ..Default::default()
        }
    }

    /// Skip certificate verification (development only).
    pub fn danger_accept_invalid_certs(mut self) -> Self {
        self.danger_accept_invalid_certs = true;
        self
    }
}

/// Connection settings keyed by alias, as loaded from a file.
///
/// ```toml
/// [default]
/// hosts = ["http://localhost:9200"]
///
/// [analytics]
/// hosts = ["https://analytics:9200"]
/// request_timeout = 10
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionsConfig {
    /// Alias to settings.
    pub connections: BTreeMap<String, ConnectionConfig>,
}

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// JSON.
    Json,
    /// TOML.
    Toml,
}

impl FileFormat {
    /// Detect the format from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            _ => None,
        }
    }
}

impl ConnectionsConfig {
    /// Parse from a string.
    pub fn parse(content: &str, format: FileFormat) -> Result<Self> {
        match format {
            FileFormat::Json => serde_json::from_str(content)
                .map_err(|e| OdmError::Config(format!("JSON parse error: {}", e))),
            FileFormat::Toml => toml::from_str(content)
                .map_err(|e| OdmError::Config(format!("TOML parse error: {}", e))),
        }
    }

    /// Load from a file, detecting the format from its extension.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| OdmError::Config("No file extension found".to_string()))?;
        let format = FileFormat::from_extension(ext)
            .ok_or_else(|| OdmError::Config(format!("Unsupported format: {}", ext)))?;

        let content = std::fs::read_to_string(path)
            .map_err(|e| OdmError::Config(format!("Failed to read file: {}", e)))?;

        Self::parse(&content, format)
    }

    /// Settings for an alias.
    pub fn get(&self, alias: &str) -> Option<&ConnectionConfig> {
        self.connections.get(alias)
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
