//! Configuration management for ragvault
//!
//! Layering, lowest precedence first: built-in defaults, an optional
//! TOML file, then `RAGVAULT_*` environment variable overrides.
//! Credentials are only ever read from the environment, never from the
//! TOML layer.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Environment variable prefix.
const ENV_PREFIX: &str = "RAGVAULT_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {message}")]
    Io { path: String, message: String },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

/// Bearer-token verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// OIDC issuer URL whose JWKS endpoint signs tokens.
    pub issuer: String,
    pub audience: String,
    /// Claim namespace for `<namespace>/tenant_id` style claims.
    pub claim_namespace: String,
    /// JWKS cache TTL in seconds.
    pub jwks_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: "https://auth.example.com/".to_string(),
            audience: "ragvault-api".to_string(),
            claim_namespace: "https://ragvault.dev".to_string(),
            jwks_ttl_secs: 3600,
        }
    }
}

/// Object storage settings. Access credentials come from the ambient
/// environment of the storage SDK, not from here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub bucket: String,
    pub region: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: "ragvault-documents".to_string(),
            region: "us-east-1".to_string(),
        }
    }
}

/// Message broker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub url: String,
    pub result_backend_url: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "amqp://localhost:5672/".to_string(),
            result_backend_url: "redis://localhost:6379/0".to_string(),
        }
    }
}

/// Embedding model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub model: String,
    pub dimensions: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
        }
    }
}

/// OCR backend choice for the extraction cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OcrBackend {
    /// Layout-aware in-process OCR.
    #[default]
    Local,
    /// External managed OCR service with async jobs.
    Managed,
}

/// Vector store backend choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    /// One shared index with per-tenant namespaces.
    #[default]
    Namespaced,
    /// One collection per tenant.
    Collection,
}

/// Worker runtime knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub soft_timeout_secs: u64,
    pub hard_timeout_secs: u64,
    pub max_retries: u32,
    pub scanner_interval_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            soft_timeout_secs: 270,
            hard_timeout_secs: 330,
            max_retries: 3,
            scanner_interval_secs: 60,
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagVaultConfig {
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    pub broker: BrokerConfig,
    pub embedding: EmbeddingSettings,
    pub ocr_backend: OcrBackend,
    pub vector_backend: VectorBackend,
    pub worker: WorkerSettings,
}

impl RagVaultConfig {
    /// Load from an optional TOML file, then apply environment overrides.
    ///
    /// # Errors
    /// Returns an error when the file exists but cannot be read or
    /// parsed, or when an override value is malformed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let config: Self = toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        debug!(path = %path.display(), "loaded configuration file");
        Ok(config)
    }

    /// Apply `RAGVAULT_*` environment variable overrides.
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = read_env("AUTH_ISSUER") {
            self.auth.issuer = v;
        }
        if let Some(v) = read_env("AUTH_AUDIENCE") {
            self.auth.audience = v;
        }
        if let Some(v) = read_env("AUTH_CLAIM_NAMESPACE") {
            self.auth.claim_namespace = v;
        }
        if let Some(v) = read_env("STORAGE_BUCKET") {
            self.storage.bucket = v;
        }
        if let Some(v) = read_env("STORAGE_REGION") {
            self.storage.region = v;
        }
        if let Some(v) = read_env("BROKER_URL") {
            self.broker.url = v;
        }
        if let Some(v) = read_env("RESULT_BACKEND_URL") {
            self.broker.result_backend_url = v;
        }
        if let Some(v) = read_env("EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = read_env("EMBEDDING_DIMENSIONS") {
            self.embedding.dimensions = v.parse().map_err(|_| ConfigError::Invalid {
                message: format!("EMBEDDING_DIMENSIONS must be an integer, got {v:?}"),
            })?;
        }
        if let Some(v) = read_env("OCR_BACKEND") {
            self.ocr_backend = match v.to_lowercase().as_str() {
                "local" => OcrBackend::Local,
                "managed" => OcrBackend::Managed,
                other => {
                    return Err(ConfigError::Invalid {
                        message: format!("unknown OCR backend {other:?}"),
                    })
                }
            };
        }
        if let Some(v) = read_env("VECTOR_BACKEND") {
            self.vector_backend = match v.to_lowercase().as_str() {
                "namespaced" => VectorBackend::Namespaced,
                "collection" => VectorBackend::Collection,
                other => {
                    return Err(ConfigError::Invalid {
                        message: format!("unknown vector backend {other:?}"),
                    })
                }
            };
        }
        Ok(())
    }
}

fn read_env(suffix: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{suffix}"))
        .ok()
        .filter(|v| !v.is_empty())
}
