//! Daemon configuration file

use semver::VersionReq;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use vsp_core::Network;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_network")]
    pub network: Network,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,

    pub dcrd: PeerConfig,
    pub wallets: WalletsConfig,

    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,
    /// Safety timer for the update pipeline
    #[serde(default = "default_update_interval")]
    pub update_interval_secs: u64,
    #[serde(default = "default_consistency_interval")]
    pub consistency_interval_secs: u64,
    #[serde(default = "default_block_poll_interval")]
    pub block_poll_interval_secs: u64,

    #[serde(default = "default_chain_version_req")]
    pub chain_version_req: String,
    #[serde(default = "default_wallet_version_req")]
    pub wallet_version_req: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    pub host: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
    /// PEM certificate; plain http when absent
    #[serde(default)]
    pub cert: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletsConfig {
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
    #[serde(default)]
    pub cert: Option<PathBuf>,
}

fn default_network() -> Network {
    Network::Mainnet
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rpc_timeout() -> u64 {
    30
}

fn default_update_interval() -> u64 {
    300
}

fn default_consistency_interval() -> u64 {
    1800
}

fn default_block_poll_interval() -> u64 {
    5
}

fn default_chain_version_req() -> String {
    "^8.0.0".to_string()
}

fn default_wallet_version_req() -> String {
    "^9.0.0".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dcrd.host.is_empty() {
            return Err(ConfigError::Invalid("dcrd.host is required".to_string()));
        }
        if self.wallets.hosts.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one voting wallet host is required".to_string(),
            ));
        }

        for (name, value) in [
            ("rpc_timeout_secs", self.rpc_timeout_secs),
            ("update_interval_secs", self.update_interval_secs),
            ("consistency_interval_secs", self.consistency_interval_secs),
            ("block_poll_interval_secs", self.block_poll_interval_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be non-zero", name)));
            }
        }

        self.chain_version_req()?;
        self.wallet_version_req()?;
        Ok(())
    }

    pub fn chain_version_req(&self) -> Result<VersionReq, ConfigError> {
        parse_version_req("chain_version_req", &self.chain_version_req)
    }

    pub fn wallet_version_req(&self) -> Result<VersionReq, ConfigError> {
        parse_version_req("wallet_version_req", &self.wallet_version_req)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    pub fn consistency_interval(&self) -> Duration {
        Duration::from_secs(self.consistency_interval_secs)
    }

    pub fn block_poll_interval(&self) -> Duration {
        Duration::from_secs(self.block_poll_interval_secs)
    }
}

fn parse_version_req(key: &str, value: &str) -> Result<VersionReq, ConfigError> {
    VersionReq::parse(value).map_err(|e| ConfigError::Invalid(format!("{}: {}", key, e)))
}

/// Read an optional PEM certificate
pub fn read_cert(path: Option<&Path>) -> Result<Option<Vec<u8>>, ConfigError> {
    path.map(|p| {
        std::fs::read(p).map_err(|source| ConfigError::Read {
            path: p.to_path_buf(),
            source,
        })
    })
    .transpose()
}
