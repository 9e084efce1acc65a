//! Server configuration read from `LEAVEDESK_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::dispatch::RetryPolicy;

const PREFIX: &str = "LEAVEDESK_";

/// Custom `Debug` redacts the password.
#[derive(Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    /// Login name that always acts as Admin.
    pub admin_user: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    /// JSON object mapping person ids to display names.
    pub directory_file: Option<PathBuf>,
    pub retry: RetryPolicy,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind", &self.bind)
            .field("port", &self.port)
            .field("data_dir", &self.data_dir)
            .field("password", &"[REDACTED]")
            .field("admin_user", &self.admin_user)
            .field("max_connections", &self.max_connections)
            .field("compact_threshold", &self.compact_threshold)
            .field("metrics_port", &self.metrics_port)
            .field("tls_cert", &self.tls_cert)
            .field("tls_key", &self.tls_key)
            .field("directory_file", &self.directory_file)
            .field("retry", &self.retry)
            .finish()
    }
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// Variables (all prefixed `LEAVEDESK_`):
    /// - `BIND` (default `0.0.0.0`), `PORT` (default `5433`)
    /// - `DATA_DIR` (default `./data`)
    /// - `PASSWORD` (default `leavedesk`), `ADMIN_USER` (default `admin`)
    /// - `MAX_CONNECTIONS` (default 256), `COMPACT_THRESHOLD` (default 1000)
    /// - `METRICS_PORT`, `TLS_CERT`, `TLS_KEY`, `DIRECTORY_FILE` (optional)
    /// - `NOTIFY_ATTEMPTS` (default 3), `NOTIFY_BACKOFF_MS` (default 500)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(&format!("{PREFIX}{name}")).filter(|v| !v.trim().is_empty());

        let tls_cert = var("TLS_CERT");
        let tls_key = var("TLS_KEY");
        if tls_cert.is_some() != tls_key.is_some() {
            return Err(ConfigError::HalfTls);
        }

        let max_connections: usize = parse_or(&var, "MAX_CONNECTIONS", 256)?;
        if max_connections == 0 {
            return Err(ConfigError::Invalid("MAX_CONNECTIONS", "0".into()));
        }
        let attempts: u32 = parse_or(&var, "NOTIFY_ATTEMPTS", 3)?;
        if attempts == 0 {
            return Err(ConfigError::Invalid("NOTIFY_ATTEMPTS", "0".into()));
        }

        Ok(Self {
            bind: var("BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&var, "PORT", 5433)?,
            data_dir: var("DATA_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("./data")),
            password: var("PASSWORD").unwrap_or_else(|| "leavedesk".into()),
            admin_user: var("ADMIN_USER").unwrap_or_else(|| "admin".into()),
            max_connections,
            compact_threshold: parse_or(&var, "COMPACT_THRESHOLD", 1000)?,
            metrics_port: var("METRICS_PORT")
                .map(|raw| parse_value("METRICS_PORT", &raw))
                .transpose()?,
            tls_cert,
            tls_key,
            directory_file: var("DIRECTORY_FILE").map(PathBuf::from),
            retry: RetryPolicy {
                attempts,
                backoff: Duration::from_millis(parse_or(&var, "NOTIFY_BACKOFF_MS", 500)?),
            },
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse_or<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match var(name) {
        Some(raw) => parse_value(name, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(name, raw.to_string()))
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for LEAVEDESK_{0}: {1:?}")]
    Invalid(&'static str, String),
    #[error("both LEAVEDESK_TLS_CERT and LEAVEDESK_TLS_KEY must be set, or neither")]
    HalfTls,
}
