//! Relay configuration
//!
//! Read from `relay.toml`, either the path given on the command line or
//! the platform config directory. A missing file means defaults.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;

/// Error type for config loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Invalid PORT value '{0}'")]
    InvalidPort(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
    /// Connected users accepted at once
    pub max_users: usize,
    /// Filter used when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: peerlink_net::DEFAULT_PORT,
            max_users: 256,
            log_filter: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// `port` from the environment overrides the file.
    pub fn load(path: Option<&Path>, port: Option<&str>) -> Result<Self, ConfigError> {
        let path = path.map(Path::to_path_buf).or_else(default_path);

        let mut config = match path {
            Some(path) if path.exists() => Self::from_toml(&std::fs::read_to_string(&path)?)?,
            _ => Self::default(),
        };

        if let Some(port) = port {
            config.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPort(port.to_string()))?;
        }

        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

/// `<config dir>/relay.toml`
fn default_path() -> Option<PathBuf> {
    ProjectDirs::from("dev", "onyx", "peerlink").map(|dirs| dirs.config_dir().join("relay.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.socket_addr().to_string(), "0.0.0.0:3000");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = RelayConfig::from_toml("port = 4100\nlog_filter = \"debug\"\n").unwrap();
        assert_eq!(config.port, 4100);
        assert_eq!(config.log_filter, "debug");
        assert_eq!(config.max_users, 256);
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("relay.toml");
        fs::write(&path, "bind_addr = \"127.0.0.1\"\nmax_users = 4\n").unwrap();

        let config = RelayConfig::load(Some(&path), None).unwrap();
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1");
        assert_eq!(config.max_users, 4);
    }

    #[test]
    fn test_missing_file_means_defaults() {
        let dir = TempDir::new().unwrap();
        let config = RelayConfig::load(Some(&dir.path().join("nope.toml")), None).unwrap();
        assert_eq!(config, RelayConfig::default());
    }

    #[test]
    fn test_port_override() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("relay.toml");
        fs::write(&path, "port = 4100\n").unwrap();

        let config = RelayConfig::load(Some(&path), Some("5000")).unwrap();
        assert_eq!(config.port, 5000);

        assert!(matches!(
            RelayConfig::load(Some(&path), Some("http")),
            Err(ConfigError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_bad_toml_is_error() {
        assert!(matches!(
            RelayConfig::from_toml("port = \"many\""),
            Err(ConfigError::ParseError(_))
        ));
    }
}
