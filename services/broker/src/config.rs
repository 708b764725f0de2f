//! Broker configuration loading. TOML is the sole source; every field has
//! a default so an empty file is a valid config.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub port: u16,
    pub max_partitions: u32,
    pub passkey: Option<[u8; 16]>,
    pub cert_path: PathBuf,
    pub store_path: PathBuf,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            max_partitions: 100,
            passkey: None,
            cert_path: PathBuf::from("./.cert"),
            store_path: PathBuf::from("./.store/binq.db"),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    port: Option<u16>,
    max_partitions: Option<u32>,
    passkey: Option<String>,
    cert_path: Option<String>,
    store_path: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("maxPartitions must be at least 1")]
    InvalidMaxPartitions,
    #[error("passkey must be a UUID (16 bytes): {0}")]
    InvalidPasskey(#[from] uuid::Error),
}

pub fn load(path: &Path) -> Result<BrokerConfig, ConfigError> {
    if !path.exists() {
        return Ok(BrokerConfig::default());
    }
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_owned(),
        source,
    })?;
    parse(&raw)
}

fn parse(raw_toml: &str) -> Result<BrokerConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(raw_toml)?;
    let defaults = BrokerConfig::default();

    let max_partitions = raw.max_partitions.unwrap_or(defaults.max_partitions);
    if max_partitions < 1 {
        return Err(ConfigError::InvalidMaxPartitions);
    }

    let passkey = raw
        .passkey
        .map(|s| Uuid::parse_str(&s).map(|uuid| *uuid.as_bytes()))
        .transpose()?;

    Ok(BrokerConfig {
        port: raw.port.unwrap_or(defaults.port),
        max_partitions,
        passkey,
        cert_path: raw.cert_path.map(PathBuf::from).unwrap_or(defaults.cert_path),
        store_path: raw.store_path.map(PathBuf::from).unwrap_or(defaults.store_path),
    })
}
