use crate::error::{Result, StoreError};
use crate::vectors::VectorStoreOptions;
use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for layered environment overrides, e.g. `ANALYST_RESULTS__PERSIST=true`
const ENV_PREFIX: &str = "ANALYST";

/// Bare variables understood for compatibility with existing deployments
const LEGACY_API_KEY: &str = "PINECONE_API_KEY";
const LEGACY_INDEX_HOST: &str = "PINECONE_INDEX_HOST";
const LEGACY_NAMESPACE: &str = "PINECONE_NAMESPACE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub results: ResultStoreConfig,

    #[serde(default)]
    pub vectors: VectorStoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultStoreConfig {
    #[serde(default)]
    pub persist: bool,
    #[serde(default = "default_persist_path")]
    pub persist_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    pub api_key: Option<String>,
    /// Data-plane host of the index, e.g. `stock-analyst-abc123.svc.us-east1-gcp.pinecone.io`
    pub index_host: Option<String>,
    pub namespace: Option<String>,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,
    #[serde(default)]
    pub mirror_local: bool,
    #[serde(default)]
    pub health_probe_interval_secs: Option<u64>,
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    10
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "analyst", "analyst-store")
}

fn default_persist_path() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().join("results.json"))
        .unwrap_or_else(|| PathBuf::from("results.json"))
}

impl Default for ResultStoreConfig {
    fn default() -> Self {
        Self {
            persist: false,
            persist_path: default_persist_path(),
        }
    }
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            index_host: None,
            namespace: None,
            request_timeout_secs: default_timeout(),
            fallback_enabled: true,
            mirror_local: false,
            health_probe_interval_secs: None,
        }
    }
}

impl VectorStoreConfig {
    /// Remote credentials, if both the key and the host are present
    pub fn remote_credentials(&self) -> Option<(&str, &str)> {
        let api_key = self.api_key.as_deref().filter(|k| !k.trim().is_empty())?;
        let host = self.index_host.as_deref().filter(|h| !h.trim().is_empty())?;
        Some((api_key, host))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn options(&self) -> VectorStoreOptions {
        VectorStoreOptions {
            request_timeout: self.request_timeout(),
            fallback_enabled: self.fallback_enabled,
            mirror_local: self.mirror_local,
            health_probe_interval: self
                .health_probe_interval_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }
}

impl AppConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from the default file (if any) and the process environment.
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_path().as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        Self::build(path, std::env::vars().collect())
    }

    /// Layer defaults, the optional file, and `env`, in increasing precedence.
    fn build(path: Option<&Path>, env: config::Map<String, String>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(Some(env.clone())),
            )
            .build()?;

        let mut config: AppConfig = settings
            .try_deserialize()
            .map_err(|e| StoreError::Configuration(format!("Failed to deserialize config: {}", e)))?;

        config.apply_legacy_env(&env);
        Ok(config)
    }

    fn apply_legacy_env(&mut self, env: &config::Map<String, String>) {
        let lookup = |name: &str| env.get(name).filter(|v| !v.trim().is_empty()).cloned();

        let vectors = &mut self.vectors;
        if vectors.api_key.is_none() {
            vectors.api_key = lookup(LEGACY_API_KEY);
        }
        if vectors.index_host.is_none() {
            vectors.index_host = lookup(LEGACY_INDEX_HOST);
        }
        if vectors.namespace.is_none() {
            vectors.namespace = lookup(LEGACY_NAMESPACE);
        }
    }

    /// Copy safe to print
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.vectors.api_key.is_some() {
            config.vectors.api_key = Some("<redacted>".to_string());
        }
        config
    }
}
