use crate::error::{ErrorCode, SandboxExecError};
use crate::lifecycle::ProbePolicy;
use anyhow::{anyhow, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub mod loader;


pub use loader::ConfigLoader;

/// Directory holding the user-level `config.toml`
pub fn get_config_dir() -> Result<PathBuf> {
    ProjectDirs::from("com", "sandbox-exec", "sandbox-exec")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or_else(|| anyhow!("Could not determine home directory"))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub sandbox: SandboxConfig,
    pub probe: ProbePolicy,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Parent directory of every local sandbox
    pub root_dir: PathBuf,
    /// Lifetime of a sandbox created without an explicit timeout
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,
    pub shell: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            root_dir: std::env::temp_dir().join("sandbox-exec"),
            default_timeout: Duration::from_millis(600_000),
            shell: "sh".to_string(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `SANDBOX_EXEC_*` overrides from the process environment
    pub fn merge_env_vars(&mut self) -> Result<(), SandboxExecError> {
        self.merge_vars(|name| std::env::var(name).ok())
    }

    pub(crate) fn merge_vars<F>(&mut self, lookup: F) -> Result<(), SandboxExecError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("SANDBOX_EXEC_HOST") {
            self.server.host = host;
        }

        if let Some(port) = lookup("SANDBOX_EXEC_PORT") {
            self.server.port = port.trim().parse().map_err(|_| {
                SandboxExecError::config_with_code(
                    ErrorCode::CONFIG_INVALID_VALUE,
                    format!("SANDBOX_EXEC_PORT must be a port number, got '{}'", port),
                )
            })?;
        }

        if let Some(root) = lookup("SANDBOX_EXEC_ROOT") {
            self.sandbox.root_dir = PathBuf::from(root);
        }

        if let Some(level) = lookup("SANDBOX_EXEC_LOG_LEVEL") {
            self.log_level = Some(level);
        }

        Ok(())
    }

    /// `host:port` the HTTP server binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
