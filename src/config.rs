//! JSON configuration file shared by both processes.
//!
//! The file supplies bus and store connection parameters plus operation
//! defaults that sit underneath the probe CLI flags.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("config file has no \"postgresql\" section")]
    MissingPostgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub kafka: KafkaConfig,
    /// Only required by the ingestion process.
    #[serde(default)]
    pub postgresql: Option<PgConfig>,
    /// Probe defaults, overridden by CLI flags.
    #[serde(default)]
    pub operation: Operation,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    /// Comma-separated bootstrap broker list.
    pub hosts: String,
    pub topic: String,
    /// TLS material; all three present enables SSL to the brokers.
    pub cafile: Option<PathBuf>,
    pub certfile: Option<PathBuf>,
    pub keyfile: Option<PathBuf>,
    /// Consumer group for the ingestion process.
    #[serde(default = "default_group")]
    pub group: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PgConfig {
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub dbname: String,
}

impl PgConfig {
    pub fn connect_config(&self) -> tokio_postgres::Config {
        let mut cfg = tokio_postgres::Config::new();
        cfg.host(&self.host)
            .port(self.port)
            .user(&self.user)
            .dbname(&self.dbname);
        if let Some(password) = &self.password {
            cfg.password(password);
        }
        cfg
    }
}

/// Operation defaults from the config file. Every field is optional; CLI
/// flags win when both are given.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Operation {
    pub delay: Option<u64>,
    pub follow_redirect: Option<bool>,
    pub search_in_content: Option<String>,
}

/// Effective probe settings after layering CLI flags over config defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub delay: u64,
    pub follow_redirect: bool,
    pub search_in_content: Option<String>,
}

impl Operation {
    pub fn resolve(
        &self,
        cli_delay: Option<u64>,
        cli_follow_redirect: bool,
        cli_search_in_content: Option<String>,
    ) -> Resolved {
        Resolved {
            // Cycles inside the same second would collide on the wire
            // timestamp's second precision, so the cadence floor is 1s.
            delay: cli_delay.or(self.delay).unwrap_or(60).max(1),
            follow_redirect: cli_follow_redirect || self.follow_redirect.unwrap_or(false),
            search_in_content: cli_search_in_content.or_else(|| self.search_in_content.clone()),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// The postgresql section, which the ingestion process cannot run without.
    pub fn postgresql(&self) -> Result<&PgConfig, ConfigError> {
        self.postgresql.as_ref().ok_or(ConfigError::MissingPostgres)
    }
}

fn default_group() -> String {
    "webping-ingest".to_string()
}

fn default_pg_port() -> u16 {
    5432
}
