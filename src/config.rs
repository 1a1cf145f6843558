//! Configuration management for satogram
//!
//! Configuration is loaded from a TOML file and then overridden by command
//! line flags.
//!
//! # Example Configuration File
//!
//! ```toml
//! [node]
//! host = "localhost:10001"
//! tls_cert_path = "./tls.cert"
//! macaroon_path = "./admin.macaroon"
//! network = "regtest"
//!
//! [broadcast]
//! amount_sats = 1
//! message = "gm lightning network!"
//! fee_limit_sat = 20
//! timeout_seconds = 60
//! stagger_ms = 50
//! max_in_flight = 64
//! exclude_pubkeys_path = "exclude-pubkeys.txt"
//! exclude_paid_peers = false
//!
//! [database]
//! path = "satogram.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Lightning node connection configuration
    #[serde(default)]
    pub node: NodeConfig,

    /// Broadcast behaviour
    #[serde(default)]
    pub broadcast: BroadcastConfig,

    /// Peer directory database
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Lightning node (LND) connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// REST endpoint of the node, `host:port`
    #[serde(default = "default_host")]
    pub host: String,

    /// Path to the node's TLS certificate
    #[serde(default = "default_tls_cert_path")]
    pub tls_cert_path: PathBuf,

    /// Path to the admin macaroon
    #[serde(default = "default_macaroon_path")]
    pub macaroon_path: PathBuf,

    /// Network the node runs on (mainnet, testnet, signet, regtest, simnet)
    #[serde(default = "default_network")]
    pub network: String,

    /// Timeout for unary requests (graph, info, payment history)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            tls_cert_path: default_tls_cert_path(),
            macaroon_path: default_macaroon_path(),
            network: default_network(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_host() -> String {
    "localhost:10001".to_string()
}

fn default_tls_cert_path() -> PathBuf {
    PathBuf::from("./tls.cert")
}

fn default_macaroon_path() -> PathBuf {
    PathBuf::from("./admin.macaroon")
}

fn default_network() -> String {
    "regtest".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

/// Broadcast configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Amount sent to each peer (satoshis)
    #[serde(default = "default_amount_sats")]
    pub amount_sats: i64,

    /// Message carried in the keysend custom records
    #[serde(default = "default_message")]
    pub message: String,

    /// Routing fee ceiling per attempt (satoshis)
    #[serde(default = "default_fee_limit_sat")]
    pub fee_limit_sat: i64,

    /// Payment timeout handed to the node for each attempt
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: i32,

    /// Delay between successive launches (milliseconds)
    #[serde(default = "default_stagger_ms")]
    pub stagger_ms: u64,

    /// Maximum number of attempts in flight at once
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Newline-delimited list of pubkeys that are never paid
    #[serde(default = "default_exclude_pubkeys_path")]
    pub exclude_pubkeys_path: PathBuf,

    /// Also skip peers that already received a message in a past run
    #[serde(default)]
    pub exclude_paid_peers: bool,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            amount_sats: default_amount_sats(),
            message: default_message(),
            fee_limit_sat: default_fee_limit_sat(),
            timeout_seconds: default_timeout_seconds(),
            stagger_ms: default_stagger_ms(),
            max_in_flight: default_max_in_flight(),
            exclude_pubkeys_path: default_exclude_pubkeys_path(),
            exclude_paid_peers: false,
        }
    }
}

fn default_amount_sats() -> i64 {
    1
}

fn default_message() -> String {
    "gm lightning network!".to_string()
}

fn default_fee_limit_sat() -> i64 {
    20
}

fn default_timeout_seconds() -> i32 {
    60
}

fn default_stagger_ms() -> u64 {
    50
}

fn default_max_in_flight() -> usize {
    64
}

fn default_exclude_pubkeys_path() -> PathBuf {
    PathBuf::from("exclude-pubkeys.txt")
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path of the SQLite file holding the peer directory
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("satogram.db")
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Parse a configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("Invalid configuration: {}", e))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.node.host.trim().is_empty() {
            return Err("Node host cannot be empty".to_string());
        }

        let valid_networks = ["mainnet", "testnet", "signet", "regtest", "simnet"];
        if !valid_networks.contains(&self.node.network.as_str()) {
            return Err(format!(
                "Invalid network: {}. Must be one of: {:?}",
                self.node.network, valid_networks
            ));
        }

        if self.broadcast.amount_sats <= 0 {
            return Err("Broadcast amount must be at least 1 sat".to_string());
        }

        if self.broadcast.fee_limit_sat < 0 {
            return Err("Fee limit cannot be negative".to_string());
        }

        if self.broadcast.timeout_seconds <= 0 {
            return Err("Payment timeout must be positive".to_string());
        }

        if self.broadcast.max_in_flight == 0 {
            return Err("max_in_flight must be at least 1".to_string());
        }

        let valid_formats = ["pretty", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(format!(
                "Invalid log format: {}. Must be one of: {:?}",
                self.logging.format, valid_formats
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.broadcast.fee_limit_sat, 20);
        assert_eq!(config.broadcast.timeout_seconds, 60);
        assert_eq!(config.broadcast.stagger_ms, 50);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = Config::from_toml(
            r#"
            [node]
            host = "10.0.0.2:8080"
            network = "mainnet"

            [broadcast]
            amount_sats = 10
            exclude_paid_peers = true
            "#,
        )
        .unwrap();

        assert_eq!(config.node.host, "10.0.0.2:8080");
        assert_eq!(config.node.macaroon_path, PathBuf::from("./admin.macaroon"));
        assert_eq!(config.broadcast.amount_sats, 10);
        assert_eq!(config.broadcast.message, "gm lightning network!");
        assert!(config.broadcast.exclude_paid_peers);
        assert_eq!(config.database.path, PathBuf::from("satogram.db"));
    }

    #[test]
    fn test_validate_config() {
        let mut config = Config::default();

        config.broadcast.amount_sats = 0;
        assert!(config.validate().is_err());

        config.broadcast.amount_sats = 1;
        config.node.network = "bitcoin-cash".to_string();
        assert!(config.validate().is_err());

        config.node.network = "testnet".to_string();
        config.broadcast.max_in_flight = 0;
        assert!(config.validate().is_err());

        config.broadcast.max_in_flight = 8;
        config.logging.format = "json".to_string();
        assert!(config.validate().is_err());
    }
}
