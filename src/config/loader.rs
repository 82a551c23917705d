use super::Config;
use crate::error::{ErrorCode, ErrorExt, SandboxExecError};
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::fs;

pub struct ConfigLoader {
    config: Arc<RwLock<Config>>,
}

impl ConfigLoader {
    pub async fn new() -> Result<Self> {
        Ok(Self {
            config: Arc::new(RwLock::new(Config::new())),
        })
    }

    /// Load `explicit_path` if given, else the user config file when present,
    /// then apply environment overrides.
    pub async fn load_with_explicit_path(&self, explicit_path: Option<&Path>) -> Result<()> {
        let path = match explicit_path {
            Some(path) => {
                if !path.exists() {
                    return Err(SandboxExecError::config_with_code(
                        ErrorCode::CONFIG_NOT_FOUND,
                        format!("Configuration file not found: {}", path.display()),
                    )
                    .into());
                }
                Some(path.to_path_buf())
            }
            None => Self::default_path().filter(|path| path.exists()),
        };

        let mut loaded = match path {
            Some(path) => {
                tracing::debug!("Loading configuration from {}", path.display());
                Self::parse_file(&path).await?
            }
            None => Config::new(),
        };
        loaded.merge_env_vars()?;

        *self.config.write().unwrap_or_else(PoisonError::into_inner) = loaded;
        Ok(())
    }

    pub fn get_config(&self) -> Config {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn default_path() -> Option<PathBuf> {
        super::get_config_dir()
            .ok()
            .map(|dir| dir.join("config.toml"))
    }

    async fn parse_file(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path)
            .await
            .to_config_error(format!("Failed to read {}", path.display()))?;
        let config = toml::from_str::<Config>(&content).map_err(|e| {
            SandboxExecError::config_with_code(
                ErrorCode::CONFIG_PARSE_ERROR,
                format!("Failed to parse {}: {}", path.display(), e),
            )
            .with_source(e)
        })?;
        Ok(config)
    }
}
