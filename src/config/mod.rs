//! Configuration management

use crate::crypto::{Keypair, PublicKey};
use crate::protocol::{NetworkId, DEFAULT_NETWORK_ID, HANDSHAKE_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Network identifier shared by every peer (base64)
    #[serde(default = "default_network_id")]
    pub network_id: String,
    /// Server configuration
    pub server: Option<ServerConfig>,
    /// Client configuration
    pub client: Option<ClientConfig>,
    /// Handshake configuration
    #[serde(default)]
    pub handshake: HandshakeConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_network_id() -> String {
    DEFAULT_NETWORK_ID.to_base64()
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, crate::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, crate::Error> {
        toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), crate::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| crate::Error::Config(format!("Failed to write config: {}", e)))
    }

    /// Decode the network identifier
    pub fn network_id(&self) -> Result<NetworkId, crate::Error> {
        NetworkId::from_base64(&self.network_id)
            .map_err(|e| crate::Error::Config(format!("Invalid network_id: {}", e)))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network_id: default_network_id(),
            server: None,
            client: None,
            handshake: HandshakeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn parse_secret(field: &str, value: &str) -> Result<Keypair, crate::Error> {
    if value.is_empty() {
        return Err(crate::Error::Config(format!(
            "{} is not set; run with --generate-key",
            field
        )));
    }
    Keypair::from_base64(value).map_err(|e| crate::Error::Config(format!("Invalid {}: {}", field, e)))
}

fn parse_public(field: &str, value: &str) -> Result<PublicKey, crate::Error> {
    PublicKey::from_base64(value).map_err(|e| crate::Error::Config(format!("Invalid {}: {}", field, e)))
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    pub listen: String,
    /// Server secret key (base64)
    #[serde(default)]
    pub secret_key: String,
    /// Server public key (base64) - derived from the secret key, stored for convenience
    #[serde(default)]
    pub public_key: String,
    /// Client identities allowed to connect (base64); empty allows any
    #[serde(default)]
    pub allowed_clients: Vec<String>,
    /// Maximum concurrent connections
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: format!("0.0.0.0:{}", crate::DEFAULT_PORT),
            secret_key: String::new(),
            public_key: String::new(),
            allowed_clients: Vec::new(),
            max_connections: 1000,
        }
    }
}

impl ServerConfig {
    /// Decode the server's identity
    pub fn keypair(&self) -> Result<Keypair, crate::Error> {
        parse_secret("server.secret_key", &self.secret_key)
    }

    /// Decode the allow-list
    pub fn allowed_clients(&self) -> Result<Vec<PublicKey>, crate::Error> {
        self.allowed_clients
            .iter()
            .map(|key| parse_public("server.allowed_clients", key))
            .collect()
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server address
    pub server: String,
    /// Server public key (base64)
    pub server_public_key: String,
    /// Client secret key (base64)
    #[serde(default)]
    pub secret_key: String,
    /// Client public key (base64) - share this with the server admin
    #[serde(default)]
    pub public_key: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: format!("127.0.0.1:{}", crate::DEFAULT_PORT),
            server_public_key: String::new(),
            secret_key: String::new(),
            public_key: String::new(),
        }
    }
}

impl ClientConfig {
    /// Decode the client's identity
    pub fn keypair(&self) -> Result<Keypair, crate::Error> {
        parse_secret("client.secret_key", &self.secret_key)
    }

    /// Decode the identity the server must prove
    pub fn server_public_key(&self) -> Result<PublicKey, crate::Error> {
        parse_public("client.server_public_key", &self.server_public_key)
    }
}

/// Handshake configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeConfig {
    /// Seconds allowed for the whole handshake
    pub timeout_secs: u64,
}

impl HandshakeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: HANDSHAKE_TIMEOUT,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (pretty, json, compact)
    pub format: String,
    /// Log file path (optional)
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file: None,
        }
    }
}

/// Generate example configuration
pub fn generate_example_config() -> Config {
    Config {
        server: Some(ServerConfig::default()),
        client: Some(ClientConfig::default()),
        ..Config::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_round_trips_through_toml() {
        let config = generate_example_config();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed = Config::parse(&text).unwrap();

        assert_eq!(parsed.network_id().unwrap(), DEFAULT_NETWORK_ID);
        assert_eq!(parsed.handshake.timeout(), Duration::from_secs(HANDSHAKE_TIMEOUT));
        assert_eq!(parsed.server.unwrap().max_connections, 1000);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::parse(
            r#"
            [client]
            server = "127.0.0.1:9000"
            server_public_key = ""
            "#,
        )
        .unwrap();

        assert_eq!(config.network_id().unwrap(), DEFAULT_NETWORK_ID);
        assert_eq!(config.handshake.timeout_secs, HANDSHAKE_TIMEOUT);
        assert_eq!(config.logging.level, "info");
        assert!(config.server.is_none());
    }

    #[test]
    fn test_keys_decode() {
        let server = Keypair::generate().unwrap();
        let client = Keypair::generate().unwrap();

        let server_config = ServerConfig {
            secret_key: server.secret_to_base64(),
            public_key: server.public.to_base64(),
            allowed_clients: vec![client.public.to_base64()],
            ..ServerConfig::default()
        };
        assert_eq!(server_config.keypair().unwrap().public, server.public);
        assert_eq!(server_config.allowed_clients().unwrap(), vec![client.public]);

        let client_config = ClientConfig {
            server_public_key: server.public.to_base64(),
            secret_key: client.secret_to_base64(),
            ..ClientConfig::default()
        };
        assert_eq!(client_config.keypair().unwrap().public, client.public);
        assert_eq!(client_config.server_public_key().unwrap(), server.public);
    }

    #[test]
    fn test_missing_or_bad_keys_rejected() {
        let config = ServerConfig::default();
        assert!(matches!(config.keypair(), Err(crate::Error::Config(_))));

        let config = ServerConfig {
            allowed_clients: vec!["not base64!".to_string()],
            ..ServerConfig::default()
        };
        assert!(config.allowed_clients().is_err());

        let config = Config {
            network_id: "c2hvcnQ=".to_string(),
            ..Config::default()
        };
        assert!(config.network_id().is_err());
    }
}
