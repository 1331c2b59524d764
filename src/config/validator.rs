use crate::config::types::Config;
use crate::utils::validation::{is_empty_or_whitespace, validate_hostname_chars, validate_port_range};
use anyhow::{Result, bail};

impl Config {
    /// Check the settings a server needs before it binds. Returns the first problem found.
    pub fn validate(&self) -> Result<()> {
        if is_empty_or_whitespace(&self.listen) {
            bail!("Listen address must not be empty");
        }
        self.listen_addr()?;

        if is_empty_or_whitespace(&self.remote) {
            bail!("Remote must not be empty");
        }
        let remote = self.parse_remote()?;
        // IPv6 literals are checked by the URL parser already.
        if !remote.host().contains(':') && !Self::validate_remote_host(remote.host()) {
            bail!("Remote host '{}' contains invalid characters", remote.host());
        }
        validate_port_range(remote.port()).map_err(anyhow::Error::msg)?;

        if self.max_head_bytes == 0 {
            bail!("max_head_bytes must be greater than zero");
        }
        Ok(())
    }

    /// Backends are dialed directly, so wildcards make no sense here.
    pub fn validate_remote_host(host: &str) -> bool {
        validate_hostname_chars(host) && !host.contains('*') && !host.split('.').any(|label| label.is_empty() || label.len() > 63)
    }
}
