use crate::config::types::Config;
use anyhow::Result;
use log::{debug, error, info, trace, warn};
use std::path::Path;

impl Config {
    /// Re-read the file and publish it only if it validates. On any failure the
    /// previously published config stays in effect.
    pub async fn reload(path: impl AsRef<Path>) -> Result<Self> {
        let config = Self::load(path).await?;
        config.validate()?;
        config.publish().await;
        info!("Reloaded config: remote {}", config.get_remote());
        Ok(config)
    }

    /// Start watching the configuration file for changes and reload automatically
    pub fn watch_config_file(&self) {
        use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
        let path = self.path.clone();
        tokio::spawn(async move {
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
            let mut watcher = match RecommendedWatcher::new(
                move |res: notify::Result<Event>| {
                    let _ = tx.send(res);
                },
                NotifyConfig::default(),
            ) {
                Ok(watcher) => watcher,
                Err(e) => {
                    error!("Failed to create config watcher: {}", e);
                    return;
                }
            };
            if let Err(e) = watcher.watch(&path, RecursiveMode::NonRecursive) {
                error!("Failed to watch {}: {}", path.display(), e);
                return;
            }
            while let Some(res) = rx.recv().await {
                match res {
                    Ok(event) if event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove() => {
                        trace!("Config file changed: {:?}", event);
                        debug!("Config file changed, reloading");
                        if let Err(e) = Self::reload(&path).await {
                            warn!("Config reload rejected, keeping the previous config: {:#}", e);
                        }
                    }
                    Ok(event) => trace!("Config file event: {:?}", event),
                    Err(e) => warn!("Failed to receive config file event: {:?}", e),
                }
            }
        });
    }
}
