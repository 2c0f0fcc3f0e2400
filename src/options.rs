//! Host and supervisor options

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use crate::error::{TunwarpError, TunwarpResult};

/// Options for the embedding host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostOptions {
    /// Supervisor settings
    #[serde(default)]
    pub supervisor: SupervisorOptions,
    /// Redirect stdout/stderr into the log sink on start
    #[serde(default = "default_true")]
    pub capture_stdio: bool,
    /// Install the process-wide `tracing` subscriber on start
    #[serde(default = "default_true")]
    pub install_logger: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorOptions {
    /// How long shutdown waits for session cleanup before abandoning it
    #[serde(default = "default_cleanup_timeout_ms")]
    pub cleanup_timeout_ms: u64,
    /// Shut down on SIGINT/SIGTERM
    #[serde(default = "default_true")]
    pub handle_signals: bool,
}

fn default_true() -> bool {
    true
}

fn default_cleanup_timeout_ms() -> u64 {
    5000
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            cleanup_timeout_ms: default_cleanup_timeout_ms(),
            handle_signals: default_true(),
        }
    }
}

impl SupervisorOptions {
    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_millis(self.cleanup_timeout_ms)
    }
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            supervisor: SupervisorOptions::default(),
            capture_stdio: default_true(),
            install_logger: default_true(),
        }
    }
}

impl HostOptions {
    /// Load options from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> TunwarpResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| TunwarpError::ConfigError(format!("Failed to read options: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| TunwarpError::ConfigError(format!("Failed to parse options: {}", e)))
    }

    /// Save options to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> TunwarpResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| TunwarpError::ConfigError(format!("Failed to serialize options: {}", e)))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| TunwarpError::ConfigError(format!("Failed to write options: {}", e)))?;

        Ok(())
    }
}
