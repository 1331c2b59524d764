use crate::proxy::{StandardForwardingHeaders, StandardResponseFilter};
use crate::tunnel::{BackendConnector, RelaySettings, Remote, TunnelController};
use anyhow::{Context, Result, anyhow};
use log::warn;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt::Display;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip)]
    pub(crate) path: PathBuf,
    // Address the proxy listens on
    #[serde(deserialize_with = "listen_or_default", default = "default_listen")]
    pub(crate) listen: String,
    // Backend every request is sent to
    #[serde(deserialize_with = "remote_or_default", default = "default_remote")]
    pub(crate) remote: String,
    // 0 disables the timeout
    #[serde(deserialize_with = "connect_timeout_or_default", default = "default_connect_timeout_ms")]
    pub(crate) connect_timeout_ms: u64,
    #[serde(deserialize_with = "drain_timeout_or_default", default = "default_drain_timeout_ms")]
    pub(crate) drain_timeout_ms: u64,
    #[serde(deserialize_with = "max_head_bytes_or_default", default = "default_max_head_bytes")]
    pub(crate) max_head_bytes: usize,
    // Forward the client's Host header instead of the backend authority
    #[serde(deserialize_with = "preserve_host_or_default", default)]
    pub(crate) preserve_host: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::new("./tunnelpx.json")
    }
}

impl Config {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().with_extension("json"),
            listen: default_listen(),
            remote: default_remote(),
            connect_timeout_ms: default_connect_timeout_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            max_head_bytes: default_max_head_bytes(),
            preserve_host: false,
        }
    }

    pub fn get_path(&self) -> &PathBuf {
        &self.path
    }

    pub fn get_listen(&self) -> &str {
        &self.listen
    }

    pub fn set_listen(&mut self, listen: String) {
        self.listen = listen;
    }

    pub fn get_remote(&self) -> &str {
        &self.remote
    }

    pub fn set_remote(&mut self, remote: String) {
        self.remote = remote;
    }

    pub fn set_preserve_host(&mut self, preserve_host: bool) {
        self.preserve_host = preserve_host;
    }

    pub fn get_connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms))
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen.trim().parse().map_err(|e| anyhow!("Invalid listen address '{}': {}", self.listen, e))
    }

    pub fn parse_remote(&self) -> Result<Remote> {
        Remote::parse(self.remote.trim()).with_context(|| format!("Invalid remote '{}'", self.remote))
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings { max_head_bytes: self.max_head_bytes, drain_timeout: Duration::from_millis(self.drain_timeout_ms) }
    }

    /// Builds a controller for the current settings. Cheap enough to do per request,
    /// which is how a reloaded config takes effect.
    pub fn build_controller(&self) -> Result<TunnelController> {
        let remote = self.parse_remote()?;
        Ok(TunnelController::new(remote, Arc::new(StandardForwardingHeaders::new(self.preserve_host)), Arc::new(StandardResponseFilter))
            .with_connector(BackendConnector::new(self.get_connect_timeout()))
            .with_settings(self.relay_settings()))
    }
}

impl Display for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let json = serde_json::to_string_pretty(self).map_err(|_| std::fmt::Error)?;
        writeln!(f, "{}", json)
    }
}

// Helper functions for deserialization. A value of the wrong type is logged and replaced
// by the field's own default, never by the type's zero value.
fn or_default<'de, D, T>(deserializer: D, field: &str, default: fn() -> T) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    match T::deserialize(deserializer) {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!("Failed to deserialize {}: {}, using default", field, e);
            Ok(default())
        }
    }
}

fn listen_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    or_default(deserializer, "listen", default_listen)
}

fn remote_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    or_default(deserializer, "remote", default_remote)
}

fn connect_timeout_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    or_default(deserializer, "connect_timeout_ms", default_connect_timeout_ms)
}

fn drain_timeout_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    or_default(deserializer, "drain_timeout_ms", default_drain_timeout_ms)
}

fn max_head_bytes_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<usize, D::Error> {
    or_default(deserializer, "max_head_bytes", default_max_head_bytes)
}

fn preserve_host_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    or_default(deserializer, "preserve_host", bool::default)
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_remote() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_drain_timeout_ms() -> u64 {
    5_000
}

fn default_max_head_bytes() -> usize {
    crate::tunnel::parser::DEFAULT_MAX_HEAD_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::RemoteError;

    #[test]
    fn test_config_new() {
        let config = Config::new("/tmp/tunnelpx_test_config");
        assert_eq!(config.get_path(), &PathBuf::from("/tmp/tunnelpx_test_config.json"));
        assert_eq!(config.get_listen(), "0.0.0.0:8080");
        assert_eq!(config.get_remote(), "http://127.0.0.1:3000");
        assert_eq!(config.get_connect_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(config.relay_settings(), RelaySettings::default());
        assert!(!config.preserve_host);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: Config = serde_json::from_str(r#"{ "remote": "http://10.0.0.2:9000" }"#).unwrap();
        assert_eq!(config.get_remote(), "http://10.0.0.2:9000");
        assert_eq!(config.get_listen(), "0.0.0.0:8080");
        assert_eq!(config.max_head_bytes, 64 * 1024);
    }

    #[test]
    fn test_wrong_types_fall_back_to_field_defaults() {
        let config: Config = serde_json::from_str(r#"{ "listen": 42, "remote": false, "connect_timeout_ms": "soon", "preserve_host": "yes" }"#).unwrap();
        assert_eq!(config.get_listen(), "0.0.0.0:8080");
        assert_eq!(config.get_remote(), "http://127.0.0.1:3000");
        assert_eq!(config.get_connect_timeout(), Some(Duration::from_secs(10)));
        assert!(!config.preserve_host);
    }

    #[test]
    fn test_unit_suffixed_values_keep_usable_limits() {
        let config: Config = serde_json::from_str(r#"{ "max_head_bytes": "64KB", "drain_timeout_ms": "5s" }"#).unwrap();
        assert_eq!(config.max_head_bytes, 64 * 1024);
        assert_eq!(config.relay_settings(), RelaySettings::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_listen_addr() {
        let mut config = Config::new("/tmp/tunnelpx_test_config");
        config.set_listen("127.0.0.1:9999".to_string());
        assert_eq!(config.listen_addr().unwrap(), "127.0.0.1:9999".parse::<SocketAddr>().unwrap());
        config.set_listen("localhost".to_string());
        assert!(config.listen_addr().is_err());
    }

    #[test]
    fn test_build_controller() {
        let mut config = Config::new("/tmp/tunnelpx_test_config");
        config.set_remote("ws://chat.internal:7000/rooms/".to_string());
        let controller = config.build_controller().unwrap();
        assert_eq!(controller.remote().host(), "chat.internal");
        assert_eq!(controller.remote().port(), 7000);
        assert_eq!(controller.remote().path(), "/rooms");

        config.set_remote("ftp://chat.internal".to_string());
        let err = config.build_controller().unwrap_err();
        assert!(matches!(err.downcast_ref::<RemoteError>(), Some(RemoteError::UnsupportedScheme(_))));
        assert!(format!("{err:#}").contains("unsupported remote scheme 'ftp'"));
    }
}
