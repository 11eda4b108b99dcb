use crate::error::{RenderwatchError, Result};
use crate::history::DEFAULT_HISTORY_LIMIT;
use crate::step::StepKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.yml";
pub const ACTIONS_FILE: &str = "actions.yml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// DaemonConfig
// ---------------------------------------------------------------------------

/// What the daemon does when the render queue cannot be reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPolicy {
    #[default]
    Exit,
    Retry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Snapshots kept per job, oldest evicted first.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_source_timeout")]
    pub source_timeout_secs: u64,
    #[serde(default)]
    pub on_connection_error: ConnectionPolicy,
}

fn default_poll_interval() -> u64 {
    2
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

fn default_source_timeout() -> u64 {
    10
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            history_limit: default_history_limit(),
            source_timeout_secs: default_source_timeout(),
            on_connection_error: ConnectionPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// SourceConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// A helper program that prints a queue snapshot as JSON.
    Command {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// A queue snapshot file, re-read every poll.
    File { path: PathBuf },
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    pub source: SourceConfig,
    /// Per step type settings, keyed by step type name.
    #[serde(default)]
    pub steps: BTreeMap<String, Value>,
    /// Directory relative paths resolve against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Config {
    pub fn new(source: SourceConfig) -> Self {
        Self {
            daemon: DaemonConfig::default(),
            source,
            steps: BTreeMap::new(),
            base_dir: PathBuf::from("."),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RenderwatchError::ConfigNotFound(path.display().to_string()));
        }
        let data = std::fs::read_to_string(path)?;
        let mut cfg: Config = serde_yaml::from_str(&data)?;
        cfg.base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(cfg)
    }

    #[cfg(test)]
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Settings block for one step type, `Null` when absent.
    pub fn step_config(&self, kind: StepKind) -> &Value {
        static NONE: Value = Value::Null;
        self.steps.get(kind.as_str()).unwrap_or(&NONE)
    }

    /// Resolve `path` against the config directory. `~/` expands to home.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        resolve_path(&self.base_dir, path)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut error = |message: String| {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message,
            })
        };

        if self.daemon.poll_interval_secs == 0 {
            error("daemon.poll_interval_secs must be at least 1".to_string());
        }
        if self.daemon.history_limit == 0 {
            error("daemon.history_limit must be at least 1".to_string());
        }
        if self.daemon.source_timeout_secs == 0 {
            error("daemon.source_timeout_secs must be at least 1".to_string());
        }
        match &self.source {
            SourceConfig::Command { command, .. } if command.trim().is_empty() => {
                error("source.command is empty".to_string());
            }
            SourceConfig::File { path } if path.as_os_str().is_empty() => {
                error("source.path is empty".to_string());
            }
            _ => {}
        }

        for (name, value) in &self.steps {
            if name.parse::<StepKind>().is_err() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("unknown step type '{name}' in steps"),
                });
            } else if !(value.is_object() || value.is_null()) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("steps.{name} must be a mapping"),
                });
            }
        }

        warnings
    }
}

pub fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = home::home_dir() {
            return home.join(rest);
        }
    }
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
