use crate::config::types::Config;
use crate::utils::validation::is_empty_or_whitespace;
use anyhow::Result;
use log::{debug, error, trace, warn};
use std::path::Path;

impl Config {
    /// Resolve the config path from a command line argument
    pub fn resolve_config_path(arg: Option<String>) -> String {
        #[allow(clippy::collapsible_if)]
        if let Some(s) = arg {
            if !is_empty_or_whitespace(&s) {
                return s;
            }
        }
        "./tunnelpx.json".to_string()
    }

    /// Load configuration from a file, updating global state and broadcasting changes
    pub async fn try_load(path: impl AsRef<Path>) -> Result<Self> {
        let config = Self::load(path).await?;
        config.publish().await;
        Ok(config)
    }

    /// Read the configuration file without touching global state. A missing file is
    /// created with defaults and a corrupted one is backed up first.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading config from: {}", path.display());
        let config = if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            match serde_json::from_str::<Config>(&content) {
                Ok(mut cfg) => {
                    cfg.path = path.to_owned();
                    cfg
                }
                Err(e) => {
                    error!("Failed to parse config file: {}", e);
                    // Move the corrupted config file to a backup
                    let mut number_of_corruptions = 1;
                    let mut backup_path = path.with_extension(format!("corrupted.{}", number_of_corruptions));
                    while backup_path.exists() {
                        number_of_corruptions += 1;
                        backup_path = path.with_extension(format!("corrupted.{}", number_of_corruptions));
                    }
                    tokio::fs::rename(path, &backup_path).await?;

                    warn!("Config file corrupted, moved to {} and using default config", backup_path.display());
                    Self::save_default(path).await?;
                    Self::at(path)
                }
            }
        } else {
            warn!("Config file not found, using default config");
            Self::save_default(path).await?;
            Self::at(path)
        };
        trace!("Loaded config: {:#?}", config);
        Ok(config)
    }

    /// Save the current configuration to its file
    pub async fn save(&self) -> Result<()> {
        debug!("Saving config to: {}", self.path.display());
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }

    /// Save a default configuration to the specified path
    pub async fn save_default(path: impl AsRef<Path>) -> Result<()> {
        debug!("Saving default config to: {}", path.as_ref().display());
        Self::at(path).save().await
    }

    // Default config that keeps the exact path it was loaded from.
    fn at(path: impl AsRef<Path>) -> Self {
        let mut config = Self::new(path.as_ref());
        config.path = path.as_ref().to_owned();
        config
    }
}
