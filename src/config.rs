use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::db::ConnectionConfig;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MemoryConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub local: LocalConfig,
    pub remote: RemoteConfig,
    pub reaper: ReaperConfig,
    pub recall: RecallConfig,
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
}

/// Which memory backend is active.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Local,
    Remote,
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(format!("unknown memory backend: {other}")),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: Backend,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LocalConfig {
    pub dir: String,
    pub recent_cap: usize,
    pub min_similarity: Option<f64>,
    pub reject_duplicates: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RemoteConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    pub namespace: String,
    pub database: String,
    pub dimension: usize,
    pub recent_cap: usize,
    pub min_similarity: Option<f64>,
    pub request_timeout_secs: u64,
    pub reconnect_interval_secs: u64,
    pub keepalive_interval_secs: u64,
    pub fail_pending_on_reconnect: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReaperConfig {
    pub enabled: bool,
    pub sweep_interval_secs: u64,
    pub idle_threshold_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RecallConfig {
    pub limit: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub url: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        let dir = default_nino_dir()
            .join("memory")
            .to_string_lossy()
            .into_owned();
        Self {
            dir,
            recent_cap: 5,
            min_similarity: None,
            reject_duplicates: true,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            password: String::new(),
            namespace: "nino".into(),
            database: "memory".into(),
            dimension: 768,
            recent_cap: 15,
            min_similarity: Some(0.6),
            request_timeout_secs: 10,
            reconnect_interval_secs: 5,
            keepalive_interval_secs: 30,
            fail_pending_on_reconnect: false,
        }
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_secs: 60,
            idle_threshold_secs: 30 * 60,
        }
    }
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self { limit: 5 }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            timeout_secs: 30,
        }
    }
}

impl RemoteConfig {
    /// Connection settings, with the host normalized to an RPC endpoint.
    pub fn connection_config(&self) -> Result<ConnectionConfig> {
        anyhow::ensure!(
            !self.url.trim().is_empty(),
            "no remote store configured. Set [remote] url or SURREAL_DB_HOST"
        );
        anyhow::ensure!(
            !self.username.is_empty() && !self.password.is_empty(),
            "remote store credentials missing. Set SURREAL_DB_USER and SURREAL_DB_PASS"
        );

        let mut config = ConnectionConfig::new(
            crate::db::rpc_url(&self.url),
            &self.username,
            &self.password,
        );
        config.namespace = self.namespace.clone();
        config.database = self.database.clone();
        config.request_timeout = Duration::from_secs(self.request_timeout_secs);
        config.reconnect_interval = Duration::from_secs(self.reconnect_interval_secs);
        config.keepalive_interval = Duration::from_secs(self.keepalive_interval_secs);
        config.fail_pending_on_reconnect = self.fail_pending_on_reconnect;
        Ok(config)
    }
}

/// Returns `~/.nino/`, or `./.nino/` when no home directory is known.
pub fn default_nino_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".nino")
}

/// Returns the default config file path: `~/.nino/config.toml`
pub fn default_config_path() -> PathBuf {
    default_nino_dir().join("config.toml")
}

impl MemoryConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            MemoryConfig::default()
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`; a remote host in the environment also
    /// selects the remote backend unless the backend is set explicitly.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(val) = lookup("NINO_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Some(val) = lookup("NINO_MEMORY_DIR") {
            self.local.dir = val;
        }
        if let Some(val) = lookup("SURREAL_DB_HOST") {
            self.remote.url = val;
            self.storage.backend = Backend::Remote;
        }
        if let Some(val) = lookup("SURREAL_DB_USER") {
            self.remote.username = val;
        }
        if let Some(val) = lookup("SURREAL_DB_PASS") {
            self.remote.password = val;
        }
        if let Some(val) = lookup("NINO_MEMORY_BACKEND") {
            self.storage.backend = val
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("invalid NINO_MEMORY_BACKEND")?;
        }
        if let Some(val) = lookup("EMBEDDING_API_URL") {
            self.embedding.url = val;
        }
        if let Some(val) = lookup("EMBEDDING_API_KEY") {
            self.embedding.api_key = val;
        }
        Ok(())
    }

    /// Resolve the local store directory, expanding `~` if needed.
    pub fn resolved_local_dir(&self) -> PathBuf {
        expand_tilde(&self.local.dir)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
