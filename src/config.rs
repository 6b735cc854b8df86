use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::{tlog_debug, Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Command launched for `Command` worker kinds when the registry does
    /// not name one.
    pub worker_command: Option<String>,
    /// Per-task timeout in seconds. A task past this bound fails with a
    /// timeout kind so the batch barrier can complete.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Extra attempts allowed per task when the effort level retries.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Capability assigned to a bare-description request.
    pub default_capability: Option<String>,
    /// Capability used for follow-up tasks raised by the self-review pass.
    pub review_capability: Option<String>,
    #[serde(default = "default_audit_enabled")]
    pub audit_enabled: bool,
    pub audit_path: Option<String>,
    pub registry_path: Option<String>,
    /// Glob patterns no task may declare as a target scope. Overrides
    /// the built-in list (lock files, env files, secrets, git internals)
    /// when set.
    pub protected_scopes: Option<Vec<String>>,
}

/// Scopes blocked from being claimed by any task. Lock files belong to
/// their package manager, env and secret files hold credentials, and git
/// internals are off limits to workers.
const DEFAULT_PROTECTED_SCOPES: &[&str] = &[
    "Cargo.lock",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "Gemfile.lock",
    "poetry.lock",
    ".env",
    ".env.*",
    "**/secrets/*",
    "**/credentials/*",
    ".git/*",
];

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_command: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            default_capability: None,
            review_capability: None,
            audit_enabled: default_audit_enabled(),
            audit_path: None,
            registry_path: None,
            protected_scopes: None,
        }
    }
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_max_retries() -> u32 {
    1
}

fn default_audit_enabled() -> bool {
    true
}

impl Config {
    pub fn tandem_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".tandem"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::tandem_dir()?.join("tandem.toml"))
    }

    pub fn effective_worker_command(&self) -> &str {
        self.worker_command.as_deref().unwrap_or("tandem-worker")
    }

    pub fn effective_default_capability(&self) -> &str {
        self.default_capability.as_deref().unwrap_or("implement")
    }

    pub fn effective_review_capability(&self) -> &str {
        self.review_capability.as_deref().unwrap_or("review")
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn effective_protected_scopes(&self) -> Vec<String> {
        match &self.protected_scopes {
            Some(patterns) => patterns.clone(),
            None => DEFAULT_PROTECTED_SCOPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn audit_path(&self) -> Result<PathBuf> {
        match &self.audit_path {
            Some(path) => Ok(expand_tilde(path)),
            None => Ok(Self::tandem_dir()?.join("audit.jsonl")),
        }
    }

    pub fn registry_path(&self) -> Result<PathBuf> {
        match &self.registry_path {
            Some(path) => Ok(expand_tilde(path)),
            None => Ok(Self::tandem_dir()?.join("registry.toml")),
        }
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        tlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            tlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        tlog_debug!(
            "Config loaded: worker_command={:?}, timeout_secs={}, max_retries={}",
            config.worker_command,
            config.timeout_secs,
            config.max_retries
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let tandem_dir = Self::tandem_dir()?;
        tlog_debug!("Config::save tandem_dir={}", tandem_dir.display());
        if !tandem_dir.exists() {
            tlog_debug!("Creating tandem directory");
            fs::create_dir_all(&tandem_dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        tlog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn ensure_dirs() -> Result<()> {
        let tandem_dir = Self::tandem_dir()?;
        tlog_debug!("Config::ensure_dirs tandem={}", tandem_dir.display());
        if !tandem_dir.exists() {
            tlog_debug!("Creating tandem directory: {}", tandem_dir.display());
            fs::create_dir_all(&tandem_dir)?;
        }
        Ok(())
    }
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
