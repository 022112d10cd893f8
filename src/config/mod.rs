//! Configuration management

use std::net::Ipv4Addr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cidr::Ipv4Net;
use crate::tunnel::SessionConfig;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Client configuration
    pub client: ClientConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, crate::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), crate::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| crate::Error::Config(format!("Failed to write config: {}", e)))
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Relay server endpoint (`host:port`)
    pub server: String,
    /// Address assigned to the tunnel adapter
    #[serde(default = "default_tunnel_addr")]
    pub tunnel_addr: Ipv4Addr,
    /// Prefix length for the adapter address
    #[serde(default = "default_tunnel_prefix_len")]
    pub tunnel_prefix_len: u8,
    /// DNS resolvers kept off the tunnel
    #[serde(default)]
    pub dns_resolvers: Vec<Ipv4Addr>,
    /// Local interface subnets kept off the tunnel (`a.b.c.d/p`)
    #[serde(default)]
    pub exclude_subnets: Vec<String>,
    /// Opaque configuration passed verbatim to the server in the handshake
    pub config_data: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1:20240".to_string(),
            tunnel_addr: default_tunnel_addr(),
            tunnel_prefix_len: default_tunnel_prefix_len(),
            dns_resolvers: Vec::new(),
            exclude_subnets: Vec::new(),
            config_data: None,
        }
    }
}

impl ClientConfig {
    /// Translate into the engine's session configuration, parsing the
    /// excluded subnet notation.
    pub fn session_config(&self) -> Result<SessionConfig, crate::Error> {
        let local_subnets = self
            .exclude_subnets
            .iter()
            .map(|s| {
                s.parse::<Ipv4Net>()
                    .map_err(|e| crate::Error::Config(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut session = SessionConfig::new(self.server.clone());
        session.client_addr = self.tunnel_addr;
        session.client_prefix_len = self.tunnel_prefix_len;
        session.dns_resolvers = self.dns_resolvers.clone();
        session.local_subnets = local_subnets;
        session.config_data = self.config_data.clone();
        Ok(session)
    }
}

fn default_tunnel_addr() -> Ipv4Addr {
    Ipv4Addr::new(10, 1, 10, 1)
}

fn default_tunnel_prefix_len() -> u8 {
    24
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (pretty, json, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config: Config = toml::from_str(
            r#"
            [client]
            server = "vpn.example.net:20240"
            "#,
        )
        .unwrap();

        assert_eq!(config.client.server, "vpn.example.net:20240");
        assert_eq!(config.client.tunnel_addr, Ipv4Addr::new(10, 1, 10, 1));
        assert_eq!(config.client.tunnel_prefix_len, 24);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_session_config_translation() {
        let config: Config = toml::from_str(
            r#"
            [client]
            server = "203.0.113.9:443"
            dns_resolvers = ["8.8.8.8", "1.1.1.1"]
            exclude_subnets = ["192.168.1.0/24"]
            config_data = "token=abc"
            "#,
        )
        .unwrap();

        let session = config.client.session_config().unwrap();
        assert_eq!(session.server, "203.0.113.9:443");
        assert_eq!(session.dns_resolvers.len(), 2);
        assert_eq!(session.local_subnets, vec!["192.168.1.0/24".parse().unwrap()]);
        assert_eq!(session.config_data.as_deref(), Some("token=abc"));
    }

    #[test]
    fn test_bad_subnet_notation_is_a_config_error() {
        let client = ClientConfig {
            exclude_subnets: vec!["not-a-subnet".to_string()],
            ..ClientConfig::default()
        };
        assert!(matches!(
            client.session_config(),
            Err(crate::Error::Config(_))
        ));
    }

    #[test]
    fn test_roundtrip_through_file() {
        let dir = std::env::temp_dir().join("tunrelay-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        let mut config = Config::default();
        config.client.server = "198.51.100.2:20240".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.client.server, "198.51.100.2:20240");

        std::fs::remove_file(&path).ok();
    }
}
