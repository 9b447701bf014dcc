//! Configuration for the aedis pipeline.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (AEDIS_HOME, AEDIS_DB, AEDIS_LLM_ENDPOINT)
//! 2. Config file (.aedis/config.yaml)
//! 3. Defaults (~/.aedis)
//!
//! Config file discovery searches the current directory and parents for
//! .aedis/config.yaml; relative paths in the file resolve against the
//! project root (the parent of .aedis/).
//!
//! The loaded config is a plain value passed to whoever needs it. There is
//! no process-global cache; construct it once in main and hand it down.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::adapters::RetryPolicy;
use crate::core::{JudgeConfig, MergeConfig};

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub merge: Option<MergeConfig>,
    #[serde(default)]
    pub judge: Option<JudgeConfig>,
    #[serde(default)]
    pub llm: Option<LlmConfig>,
    #[serde(default)]
    pub limits: Option<LimitsConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .aedis/)
    pub home: Option<String>,
    /// Store path (relative to project root)
    pub db: Option<String>,
}

/// Remote LLM backend settings. Absent endpoint means the deterministic
/// local backend is used instead.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub endpoint: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the env var holding the API key, never the key itself
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_llm_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout_seconds: default_llm_timeout_seconds(),
            retry: RetryPolicy::default(),
        }
    }
}

impl LlmConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    pub max_input_bytes: Option<usize>,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "AEDIS_LLM_API_KEY".to_string()
}

fn default_llm_timeout_seconds() -> u64 {
    30
}

const DEFAULT_MAX_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// Resolved configuration with absolute paths and filled-in defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Absolute path to aedis home (engine state)
    pub home: PathBuf,
    /// Absolute path to the SQLite store
    pub db_path: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub merge: MergeConfig,
    pub judge: JudgeConfig,
    pub llm: LlmConfig,
    pub max_input_bytes: usize,
}

impl Config {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self> {
        let default_home = dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(".aedis");

        let config_file = find_config_file();

        let (file, base_dir) = match &config_file {
            Some(path) => {
                let parsed = load_config_file(path)?;
                let base = path
                    .parent() // .aedis/
                    .and_then(|p| p.parent()) // project root
                    .unwrap_or(Path::new("."))
                    .to_path_buf();
                (Some(parsed), base)
            }
            None => (None, PathBuf::from(".")),
        };

        let home = if let Ok(env_home) = std::env::var("AEDIS_HOME") {
            PathBuf::from(env_home)
        } else if let Some(home_path) = file.as_ref().and_then(|f| f.paths.home.as_ref()) {
            let aedis_dir = config_file
                .as_deref()
                .and_then(Path::parent)
                .unwrap_or(Path::new("."));
            resolve_path(aedis_dir, home_path)
        } else {
            default_home
        };

        let db_path = if let Ok(env_db) = std::env::var("AEDIS_DB") {
            PathBuf::from(env_db)
        } else if let Some(db) = file.as_ref().and_then(|f| f.paths.db.as_ref()) {
            resolve_path(&base_dir, db)
        } else {
            home.join("aedis.db")
        };

        let mut llm = file
            .as_ref()
            .and_then(|f| f.llm.clone())
            .unwrap_or_default();
        if let Ok(endpoint) = std::env::var("AEDIS_LLM_ENDPOINT") {
            llm.endpoint = Some(endpoint);
        }

        Ok(Self {
            home,
            db_path,
            config_file,
            merge: file
                .as_ref()
                .and_then(|f| f.merge.clone())
                .unwrap_or_default(),
            judge: file
                .as_ref()
                .and_then(|f| f.judge.clone())
                .unwrap_or_default(),
            llm,
            max_input_bytes: file
                .as_ref()
                .and_then(|f| f.limits.as_ref())
                .and_then(|l| l.max_input_bytes)
                .unwrap_or(DEFAULT_MAX_INPUT_BYTES),
        })
    }

    /// API key for the remote LLM backend, read from the configured env var.
    pub fn llm_api_key(&self) -> Option<String> {
        std::env::var(&self.llm.api_key_env).ok()
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".aedis").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let aedis_dir = temp.path().join(".aedis");
        std::fs::create_dir_all(&aedis_dir).unwrap();

        let config_path = aedis_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
paths:
  home: ./
  db: ./state/aedis.db
merge:
  validation_threshold: 0.6
llm:
  endpoint: http://localhost:8080/v1/chat/completions
  model: local-7b
  timeout_seconds: 10
limits:
  max_input_bytes: 4096
"#
        )
        .unwrap();

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.paths.db, Some("./state/aedis.db".to_string()));

        let merge = config.merge.unwrap();
        assert!((merge.validation_threshold - 0.6).abs() < 1e-9);
        // unspecified fields keep defaults
        assert!((merge.overlap_fraction - 0.5).abs() < 1e-9);

        let llm = config.llm.unwrap();
        assert_eq!(llm.model, "local-7b");
        assert_eq!(llm.timeout_seconds, 10);
        assert_eq!(llm.retry.max_attempts, 3);
        assert_eq!(config.limits.unwrap().max_input_bytes, Some(4096));
    }

    #[test]
    fn test_llm_config_defaults() {
        let llm = LlmConfig::default();
        assert!(llm.endpoint.is_none());
        assert_eq!(llm.api_key_env, "AEDIS_LLM_API_KEY");
        assert_eq!(llm.call_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/./subdir")
        );
    }
}
