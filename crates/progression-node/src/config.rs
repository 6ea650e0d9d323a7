//! Daemon configuration from the environment.

use progression_engine::{EngineConfig, HOUR_MS};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Configuration for a progression daemon.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Data directory for storage
    pub data_dir: PathBuf,

    /// HTTP API listen address
    pub api_addr: SocketAddr,

    /// Admin socket path (for progression-admin CLI)
    pub admin_socket: PathBuf,

    /// Progression tree JSON file
    pub tree_file: PathBuf,

    /// How often expired voting sessions are looked for
    pub session_check_interval: Duration,

    /// Engine tuning
    pub engine: EngineConfig,
}

impl NodeConfig {
    /// Read `PROGRESSION_*` environment variables, with defaults.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `PROGRESSION_DATA_DIR` | `./progression-data` |
    /// | `PROGRESSION_API_ADDR` | `0.0.0.0:8080` |
    /// | `PROGRESSION_ADMIN_SOCKET` | `<data dir>/admin.sock` |
    /// | `PROGRESSION_TREE_FILE` | `./config/progression_tree.json` |
    /// | `PROGRESSION_ENGINE_CONFIG` | unset (JSON file with `EngineConfig` fields) |
    /// | `PROGRESSION_VOTING_HOURS` | 24 |
    /// | `PROGRESSION_MIN_SAMPLE_HOURS` | 6 |
    /// | `PROGRESSION_MAX_VOTING_OPTIONS` | 4 |
    /// | `PROGRESSION_SESSION_CHECK_SECS` | 30 |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = PathBuf::from(
            lookup("PROGRESSION_DATA_DIR").unwrap_or_else(|| "./progression-data".to_string()),
        );

        let api_addr = parse_var::<SocketAddr>(&lookup, "PROGRESSION_API_ADDR")?
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080)));

        let admin_socket = lookup("PROGRESSION_ADMIN_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("admin.sock"));

        let tree_file = PathBuf::from(
            lookup("PROGRESSION_TREE_FILE")
                .unwrap_or_else(|| "./config/progression_tree.json".to_string()),
        );

        let mut engine = match lookup("PROGRESSION_ENGINE_CONFIG") {
            Some(path) => {
                let json = std::fs::read_to_string(&path)?;
                serde_json::from_str(&json)?
            }
            None => EngineConfig::default(),
        };

        if let Some(hours) = parse_var::<f64>(&lookup, "PROGRESSION_VOTING_HOURS")? {
            if hours <= 0.0 {
                return Err(Error::Config("PROGRESSION_VOTING_HOURS must be positive".into()));
            }
            engine.voting_duration_ms = (hours * HOUR_MS as f64) as u64;
        }
        if let Some(hours) = parse_var::<f64>(&lookup, "PROGRESSION_MIN_SAMPLE_HOURS")? {
            engine.min_sample_hours = hours.max(0.0);
        }
        if let Some(max) = parse_var::<usize>(&lookup, "PROGRESSION_MAX_VOTING_OPTIONS")? {
            if max == 0 {
                return Err(Error::Config(
                    "PROGRESSION_MAX_VOTING_OPTIONS must be at least 1".into(),
                ));
            }
            engine.max_voting_options = max;
        }

        let check_secs = parse_var::<u64>(&lookup, "PROGRESSION_SESSION_CHECK_SECS")?
            .unwrap_or(30)
            .max(1);

        Ok(Self {
            data_dir,
            api_addr,
            admin_socket,
            tree_file,
            session_check_interval: Duration::from_secs(check_secs),
            engine,
        })
    }

    /// RocksDB directory inside the data dir.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("db")
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("invalid {key} '{raw}': {e}"))),
        None => Ok(None),
    }
}
