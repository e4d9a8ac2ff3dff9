//! Configuration management for the evidence orchestrator.
//!
//! Configuration can be set via environment variables:
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `8000`.
//! - `ORCHESTRATOR_STORE` - Optional. `sqlite` (default) or `memory`.
//! - `ORCHESTRATOR_DATA_DIR` - Optional. Where the SQLite file lives. Defaults to `./data`.
//! - `ORCHESTRATOR_DISPATCH_INTERVAL_MS` - Optional. Scheduler tick. Defaults to `1000`.
//! - `ORCHESTRATOR_DISPATCH_TIMEOUT_SECS` - Optional. How long a ready task may wait
//!   for worker capacity. Defaults to `3600`.
//! - `ORCHESTRATOR_API_TOKEN` - Optional. Bearer token required outside dev mode.
//! - `DEV_MODE` - Optional. Disables the auth gate. Defaults to `false`.
//! - `ORCHESTRATOR_JOBS_ALLOWLIST` / `ORCHESTRATOR_JOBS_DENYLIST` - Optional. Comma
//!   separated task types.
//! - `ORCHESTRATOR_LOCAL_WORKERS` - Optional. In-process dry-run workers. Defaults to `0`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::store::StoreType;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// API auth configuration.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Expected bearer token
    pub api_token: Option<String>,
}

impl AuthConfig {
    /// Whether requests must carry a token.
    pub fn auth_required(&self, dev_mode: bool) -> bool {
        !dev_mode
    }
}

/// Scheduler and job configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Interval between scheduler passes
    pub interval: Duration,

    /// Time a ready task may wait for capacity before its request fails
    pub timeout: Duration,

    /// Task types to enable (empty = all built-in jobs)
    pub jobs_allowlist: Vec<String>,

    /// Task types to disable
    pub jobs_denylist: Vec<String>,

    /// Dry-run workers spawned in-process
    pub local_workers: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            timeout: Duration::from_secs(3600),
            jobs_allowlist: Vec::new(),
            jobs_denylist: Vec::new(),
            local_workers: 0,
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Storage backend
    pub store_type: StoreType,

    /// Directory for persistent state
    pub data_dir: PathBuf,

    /// Disables auth checks
    pub dev_mode: bool,

    pub auth: AuthConfig,

    pub dispatch: DispatchConfig,
}

fn env_parse<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e))),
        _ => Ok(default),
    }
}

fn env_bool(name: &str) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => parse_bool(&raw)
            .ok_or_else(|| ConfigError::InvalidValue(name.to_string(), raw.clone())),
        Err(_) => Ok(false),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_list(name: &str) -> Vec<String> {
    std::env::var(name)
        .map(|raw| parse_list(&raw))
        .unwrap_or_default()
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a numeric, boolean or store type
    /// variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env_parse("PORT", 8000u16)?;

        let store_type = env_parse("ORCHESTRATOR_STORE", StoreType::default())?;
        let data_dir = std::env::var("ORCHESTRATOR_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        let dispatch = DispatchConfig {
            interval: Duration::from_millis(env_parse("ORCHESTRATOR_DISPATCH_INTERVAL_MS", 1000)?),
            timeout: Duration::from_secs(env_parse("ORCHESTRATOR_DISPATCH_TIMEOUT_SECS", 3600)?),
            jobs_allowlist: env_list("ORCHESTRATOR_JOBS_ALLOWLIST"),
            jobs_denylist: env_list("ORCHESTRATOR_JOBS_DENYLIST"),
            local_workers: env_parse("ORCHESTRATOR_LOCAL_WORKERS", 0)?,
        };
        if dispatch.interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "ORCHESTRATOR_DISPATCH_INTERVAL_MS".to_string(),
                "must be greater than 0".to_string(),
            ));
        }

        let auth = AuthConfig {
            api_token: std::env::var("ORCHESTRATOR_API_TOKEN")
                .ok()
                .filter(|t| !t.trim().is_empty()),
        };

        Ok(Self {
            host,
            port,
            store_type,
            data_dir,
            dev_mode: env_bool("DEV_MODE")?,
            auth,
            dispatch,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            store_type: StoreType::Memory,
            data_dir,
            dev_mode: true,
            auth: AuthConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" 1 "), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_parse_list_skips_blanks() {
        assert_eq!(
            parse_list("PlasoParserTask, ,GrepTask,"),
            vec!["PlasoParserTask".to_string(), "GrepTask".to_string()]
        );
    }

    #[test]
    fn test_unknown_store_type_is_rejected() {
        std::env::set_var("ORCHESTRATOR_STORE", "bogus");
        let err = Config::from_env().unwrap_err();
        std::env::remove_var("ORCHESTRATOR_STORE");
        assert!(matches!(
            err,
            ConfigError::InvalidValue(ref name, _) if name == "ORCHESTRATOR_STORE"
        ));
    }

    #[test]
    fn test_defaults() {
        let config = Config::new(PathBuf::from("/tmp/orchestrator"));
        assert!(config.dev_mode);
        assert!(!config.auth.auth_required(config.dev_mode));
        assert_eq!(config.dispatch.interval, Duration::from_millis(1000));
        assert_eq!(config.dispatch.timeout, Duration::from_secs(3600));
    }
}
