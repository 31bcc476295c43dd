//! Server configuration, read from TOML.
//!
//! ```toml
//! listen = "0.0.0.0:5000"
//! bucket = "models"
//! redirect = "unknown-length"
//! presign-expiry = 900
//!
//! [storage.local]
//! path = "/var/lib/registry"
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use storage::{StorageConfig, StorageError};

use crate::api::RegistryBuilder;
use crate::storage::RedirectPolicy;

/// Errors loading configuration or building the service from it.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("reading {path}: {source}")]
    Io {
        /// The file that failed.
        path: Utf8PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration is not valid TOML, or does not match the schema.
    #[error("parsing configuration: {0}")]
    Parse(#[from] toml_edit::de::Error),

    /// The storage backend could not be set up.
    #[error("configuring storage: {0}")]
    Storage(#[from] StorageError),
}

/// Registry server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RegistryConfig {
    /// Address to listen on.
    #[serde(default = "RegistryConfig::default_listen")]
    pub listen: SocketAddr,

    /// Bucket holding all registry content.
    #[serde(default = "RegistryConfig::default_bucket")]
    pub bucket: String,

    /// Storage backend.
    #[serde(default = "RegistryConfig::default_storage")]
    pub storage: StorageConfig,

    /// When to redirect clients to presigned backend URLs.
    #[serde(default)]
    pub redirect: RedirectPolicy,

    /// Lifetime of presigned URLs, in seconds.
    #[serde(default = "RegistryConfig::default_presign_expiry")]
    pub presign_expiry: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            listen: Self::default_listen(),
            bucket: Self::default_bucket(),
            storage: Self::default_storage(),
            redirect: RedirectPolicy::default(),
            presign_expiry: Self::default_presign_expiry(),
        }
    }
}

impl RegistryConfig {
    fn default_listen() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 5000))
    }

    fn default_bucket() -> String {
        "registry".to_owned()
    }

    fn default_storage() -> StorageConfig {
        StorageConfig::Memory
    }

    fn default_presign_expiry() -> u64 {
        3600
    }

    /// Parse configuration from a TOML document.
    pub fn from_toml(document: &str) -> Result<Self, ConfigError> {
        Ok(toml_edit::de::from_str(document)?)
    }

    /// Read configuration from a TOML file.
    pub async fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let document = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_owned(),
                source,
            })?;
        Self::from_toml(&document)
    }

    /// How long presigned URLs stay valid.
    pub fn presign_expiry(&self) -> Duration {
        Duration::from_secs(self.presign_expiry)
    }

    /// Set up storage and build the registry router.
    pub async fn build(self) -> Result<Router, ConfigError> {
        let presign_expiry = self.presign_expiry();
        let storage = self.storage.build().await?;
        tracing::info!(driver = storage.name(), bucket = %self.bucket, "configured storage");

        Ok(RegistryBuilder::new()
            .storage(storage)
            .bucket(self.bucket)
            .redirect(self.redirect)
            .presign_expiry(presign_expiry)
            .build())
    }
}
