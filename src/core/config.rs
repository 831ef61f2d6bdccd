//! Hive configuration (`hive.yaml`).
//!
//! The file is looked up in this order: the `--config` flag, `$HIVE_CONFIG`,
//! then `$HOME/.hive/hive.yaml`.

use crate::core::assets;
use crate::core::error::HiveError;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "HIVE_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "hive.yaml";

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize, ValueEnum)]
pub enum PlatformType {
    #[default]
    #[serde(rename = "k8s")]
    #[value(name = "k8s")]
    K8s,
    #[serde(rename = "on-prem")]
    #[value(name = "on-prem")]
    OnPrem,
}

impl fmt::Display for PlatformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformType::K8s => write!(f, "k8s"),
            PlatformType::OnPrem => write!(f, "on-prem"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepoConfig {
    /// Git URL (`https://...`) or local directory.
    #[serde(alias = "url")]
    pub source: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_evaluation_script")]
    pub evaluation_script: String,
    /// `file:1-10&20-30,other.py`
    #[serde(default)]
    pub evolve_files_and_ranges: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluatorConfig {
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub memory_limit_mb: Option<u64>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            memory_limit_mb: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SandboxConfig {
    /// Image repository without tag, e.g. `gcr.io/acme/hive-sandbox`.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default = "default_dockerfile")]
    pub dockerfile: String,
    #[serde(default = "default_platforms")]
    pub platforms: String,
    /// Name of an environment variable forwarded as a BuildKit secret.
    #[serde(default)]
    pub build_secret: Option<String>,
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
    #[serde(default)]
    pub push: bool,
    #[serde(default)]
    pub cloud_build: bool,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: None,
            dockerfile: default_dockerfile(),
            platforms: default_platforms(),
            build_secret: None,
            build_args: BTreeMap::new(),
            push: false,
            cloud_build: false,
            replicas: default_replicas(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WandbConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub project: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default)]
    pub upload: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            upload: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HiveConfig {
    #[serde(default)]
    pub platform: PlatformType,
    #[serde(default)]
    pub token_path: Option<PathBuf>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub repo: RepoConfig,
    #[serde(default)]
    pub evaluator: EvaluatorConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub wandb: WandbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_evaluation_script() -> String {
    "evaluator.py".to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_dockerfile() -> String {
    "Dockerfile".to_string()
}

fn default_platforms() -> String {
    "linux/amd64".to_string()
}

fn default_replicas() -> u32 {
    1
}

fn default_bucket() -> String {
    "hi-artifacts".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

impl HiveConfig {
    pub fn from_yaml(content: &str) -> Result<Self, HiveError> {
        let config: HiveConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), HiveError> {
        if self.repo.source.trim().is_empty() {
            return Err(HiveError::ConfigError(
                "'repo.source' must not be empty".to_string(),
            ));
        }
        if self.evaluator.timeout == 0 {
            return Err(HiveError::ConfigError(
                "'evaluator.timeout' must be greater than zero".to_string(),
            ));
        }
        if self.sandbox.replicas == 0 {
            return Err(HiveError::ConfigError(
                "'sandbox.replicas' must be at least 1".to_string(),
            ));
        }
        if let Some(secret) = &self.sandbox.build_secret {
            if !is_env_var_name(secret) {
                return Err(HiveError::ConfigError(format!(
                    "'sandbox.build_secret' must name an environment variable, got '{}'",
                    secret
                )));
            }
        }
        Ok(())
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_env_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Load configuration from a YAML file.
pub fn load_config(path: &Path) -> Result<HiveConfig, HiveError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(HiveError::ConfigNotFound(path.display().to_string()));
        }
        Err(err) => return Err(HiveError::IoError(err)),
    };
    let config = HiveConfig::from_yaml(&content)?;
    tracing::debug!(path = %path.display(), "configuration loaded");
    Ok(config)
}

pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hive")
        .join(DEFAULT_CONFIG_FILE)
}

pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path)
}

pub fn config_template() -> &'static str {
    assets::TEMPLATE_HIVE_CONFIG
}

/// Write the starter configuration; refuses to overwrite unless `force`.
pub fn write_config_template(path: &Path, force: bool) -> Result<(), HiveError> {
    if path.exists() && !force {
        return Err(HiveError::ValidationError(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, config_template())?;
    Ok(())
}
