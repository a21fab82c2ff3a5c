use std::path::PathBuf;
use std::time::Duration;

use libssapctl::DialConfig;
use serde::Deserialize;

/// Main configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device host name or address
    pub host: Option<String>,

    /// Key issued by `ssapctl auth`
    pub client_key: Option<String>,

    /// Use wss:// on port 3001 (default) or ws:// on port 3000
    pub secure: bool,

    /// Check the device certificate against the webpki roots
    pub verify_certificates: bool,

    pub connect_timeout_secs: u64,
    pub handshake_timeout_secs: u64,

    /// Give up on a command after this long (no limit when unset)
    pub command_timeout_secs: Option<u64>,

    /// `volume set` refuses anything louder unless forced
    pub max_volume: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: None,
            client_key: None,
            secure: true,
            verify_certificates: false,
            connect_timeout_secs: 5,
            handshake_timeout_secs: 10,
            command_timeout_secs: None,
            max_volume: 20,
        }
    }
}

impl Config {
    /// Load config from default location (~/.config/ssapctl/config.toml)
    pub fn load() -> Self {
        Self::config_path()
            .and_then(|path| std::fs::read_to_string(&path).ok())
            .and_then(|content| Self::parse(&content))
            .unwrap_or_default()
    }

    fn parse(content: &str) -> Option<Self> {
        match toml::from_str(content) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!("ignoring invalid config file: {e}");
                None
            }
        }
    }

    /// Get config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ssapctl/config.toml"))
    }

    pub fn dial_config(&self) -> DialConfig {
        DialConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            secure: self.secure,
            verify_certificates: self.verify_certificates,
        }
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert!(config.secure);
        assert_eq!(config.max_volume, 20);
        assert!(config.host.is_none());
    }

    #[test]
    fn partial_file_overrides_some_fields() {
        let config = Config::parse(
            r#"
host = "192.168.1.20"
client_key = "abc"
secure = false
command_timeout_secs = 3
"#,
        )
        .unwrap();
        assert_eq!(config.host.as_deref(), Some("192.168.1.20"));
        assert_eq!(config.client_key.as_deref(), Some("abc"));
        assert_eq!(config.command_timeout(), Some(Duration::from_secs(3)));

        let dial = config.dial_config();
        assert!(!dial.secure);
        assert_eq!(dial.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn invalid_file_is_ignored() {
        assert!(Config::parse("max_volume = \"loud\"").is_none());
    }
}
