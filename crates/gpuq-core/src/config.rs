//! Configuration types for gpuq

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Env var naming a shell initializer sourced before user commands
pub const SHELL_INIT_ENV: &str = "GPUQ_SHELL_INIT";

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// API server configuration
    pub api: ApiConfig,
    /// Scheduler configuration
    pub scheduler: SchedulerConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl DaemonConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, crate::GpuqError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::GpuqError::Config(format!("Failed to read config file: {}", e))
        })?;
        toml::from_str(&content)
            .map_err(|e| crate::GpuqError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Fold environment overrides into the configuration
    pub fn apply_env(&mut self) {
        if let Ok(path) = std::env::var(SHELL_INIT_ENV) {
            if !path.trim().is_empty() {
                self.scheduler.shell_init = Some(PathBuf::from(path));
            }
        }
    }
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address to bind the REST API server
    pub address: String,
    /// Port for the REST API server
    pub port: u16,
    /// Enable CORS
    pub cors_enabled: bool,
    /// Allowed CORS origins; `*` allows any
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 8095,
            cors_enabled: true,
            cors_origins: vec!["*".to_string()],
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Runtime root holding the task store and per-task work trees
    pub runtime_dir: PathBuf,
    /// Task store path; defaults to `<runtime_dir>/tasks.db`
    pub db_path: Option<PathBuf>,
    /// Scheduling tick interval in seconds
    pub poll_interval_secs: u64,
    /// Probe subprocess timeout in seconds
    pub probe_timeout_secs: u64,
    /// Log lines returned when the caller does not ask for a tail length
    pub default_log_tail: usize,
    /// Hard cap on the tail length a caller may request
    pub max_log_tail: usize,
    /// Shell initializer sourced in run.sh before the user command
    pub shell_init: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            runtime_dir: PathBuf::from("runtime"),
            db_path: None,
            poll_interval_secs: 2,
            probe_timeout_secs: 5,
            default_log_tail: 100,
            max_log_tail: 10_000,
            shell_init: None,
        }
    }
}

impl SchedulerConfig {
    /// Effective task store path
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.runtime_dir.join("tasks.db"))
    }

    /// Root of the per-task work trees
    pub fn tasks_dir(&self) -> PathBuf {
        self.runtime_dir.join("tasks")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }

    /// Clamp a requested tail length to the configured bounds
    pub fn clamp_tail(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_log_tail)
            .min(self.max_log_tail)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_daemon_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.api.port, 8095);
        assert_eq!(config.scheduler.poll_interval_secs, 2);
        assert_eq!(config.scheduler.default_log_tail, 100);
        assert_eq!(config.scheduler.db_path(), PathBuf::from("runtime/tasks.db"));
        assert_eq!(config.scheduler.tasks_dir(), PathBuf::from("runtime/tasks"));
    }

    #[test]
    fn test_config_parse() {
        let toml_str = r#"
[api]
address = "127.0.0.1"
port = 9000
cors_origins = ["http://localhost:1895"]

[scheduler]
runtime_dir = "/var/lib/gpuq"
poll_interval_secs = 5
max_log_tail = 500

[logging]
level = "debug"
"#;
        let config: DaemonConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.api.address, "127.0.0.1");
        assert_eq!(config.api.port, 9000);
        assert_eq!(config.scheduler.runtime_dir, PathBuf::from("/var/lib/gpuq"));
        assert_eq!(config.scheduler.poll_interval_secs, 5);
        assert_eq!(config.scheduler.db_path(), PathBuf::from("/var/lib/gpuq/tasks.db"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_clamp_tail() {
        let config = SchedulerConfig::default();
        assert_eq!(config.clamp_tail(None), 100);
        assert_eq!(config.clamp_tail(Some(50)), 50);
        assert_eq!(config.clamp_tail(Some(1_000_000)), 10_000);
    }
}
