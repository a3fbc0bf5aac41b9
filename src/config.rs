//! Configuration management
//!
//! The run is configured from a YAML file whose settings live under the
//! `image-sync` key. A handful of settings can be overridden from the
//! environment and the command line; [`AppConfig::validate`] runs last.

use crate::error::{MigratorError, Result};
use crate::ledger::LedgerMode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Credentials for one registry host, as stored in the transfer tool's auth file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(rename = "Username", default)]
    pub username: String,
    #[serde(rename = "Password", default)]
    pub password: String,
}

impl AuthConfig {
    pub fn new(username: String, password: String) -> Self {
        Self { username, password }
    }

    /// Read the auth file and pick the entry for `registry_host`.
    pub fn for_registry(auth_path: &Path, registry_host: &str) -> Result<Self> {
        let content = std::fs::read_to_string(auth_path).map_err(|e| {
            MigratorError::Config(format!("cannot read auth file {}: {}", auth_path.display(), e))
        })?;
        Self::from_yaml(&content, registry_host)
    }

    pub fn from_yaml(content: &str, registry_host: &str) -> Result<Self> {
        let mut entries: HashMap<String, AuthConfig> = serde_yaml::from_str(content)?;
        entries.remove(registry_host).ok_or_else(|| {
            MigratorError::Config(format!("auth file has no entry for registry {}", registry_host))
        })
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(rename = "image-sync")]
    image_sync: AppConfig,
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub source_registry: String,
    pub target_registry: String,
    pub output_path: PathBuf,
    #[serde(default)]
    pub image_list_path: Option<PathBuf>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub db_dsn: Option<String>,
    #[serde(default = "default_proc")]
    pub proc: usize,
    #[serde(default)]
    pub sync_method: LedgerMode,
    pub syncer_path: PathBuf,
    pub auth_path: PathBuf,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_verify_timeout_secs")]
    pub verify_timeout_secs: u64,
    #[serde(default = "default_manifest_dir")]
    pub manifest_dir: PathBuf,
    #[serde(default)]
    pub target_az_id: Option<String>,
    #[serde(default = "default_true")]
    pub insecure_skip_tls: bool,
    #[serde(default = "default_scheme")]
    pub registry_scheme: String,
    #[serde(default = "default_normal_status")]
    pub normal_status: i32,
    #[serde(default)]
    pub record_to_catalog: bool,
}

fn default_proc() -> usize {
    1
}

fn default_retries() -> u32 {
    3
}

fn default_verify_timeout_secs() -> u64 {
    5
}

fn default_manifest_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_true() -> bool {
    true
}

fn default_scheme() -> String {
    "https".to_string()
}

fn default_normal_status() -> i32 {
    1
}

impl AppConfig {
    /// Load the `image-sync` section of a YAML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MigratorError::Config(format!("cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: ConfigFile = serde_yaml::from_str(content)
            .map_err(|e| MigratorError::Config(format!("invalid config: {}", e)))?;
        Ok(file.image_sync)
    }

    /// Apply `IMAGE_MIGRATOR_*` environment overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("IMAGE_MIGRATOR_PROC") {
            if let Ok(proc) = val.parse() {
                self.proc = proc;
            }
        }
        if let Ok(val) = std::env::var("IMAGE_MIGRATOR_OUTPUT_PATH") {
            self.output_path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("IMAGE_MIGRATOR_DB_DSN") {
            self.db_dsn = Some(val);
        }
        if let Ok(val) = std::env::var("IMAGE_MIGRATOR_SYNCER_PATH") {
            self.syncer_path = PathBuf::from(val);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.proc == 0 {
            return Err(MigratorError::Config("proc must be greater than 0".to_string()));
        }
        if self.source_registry.is_empty() || self.target_registry.is_empty() {
            return Err(MigratorError::Config(
                "source_registry and target_registry are required".to_string(),
            ));
        }
        if self.verify_timeout_secs == 0 {
            return Err(MigratorError::Config(
                "verify_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if !matches!(self.registry_scheme.as_str(), "http" | "https") {
            return Err(MigratorError::Config(format!(
                "registry_scheme must be http or https, got {}",
                self.registry_scheme
            )));
        }
        if self.image_list_path.is_none() {
            if self.db_dsn.is_none() {
                return Err(MigratorError::Config(
                    "db_dsn is required when no image_list_path is given".to_string(),
                ));
            }
            if self.start_time.is_none() || self.end_time.is_none() {
                return Err(MigratorError::Config(
                    "start_time and end_time are required when no image_list_path is given"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs)
    }

    /// Base URL of the target registry, e.g. `https://harbor.example.com`
    pub fn target_registry_url(&self) -> String {
        format!("{}://{}", self.registry_scheme, self.target_registry)
    }
}
