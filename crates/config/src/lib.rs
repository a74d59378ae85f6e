//! Configuration loading and validation for the Agent Door gateway.
//!
//! The entire configuration surface is environment variables — the binary
//! takes no positional arguments and reads no config file. Every key is
//! validated at startup; a bad value fails the process before it binds a
//! port.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which request origins receive CORS headers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CorsOrigins {
    /// Advertise `Access-Control-Allow-Origin: *`.
    Any,
    /// Echo the request origin only when it appears in this list.
    List(Vec<String>),
}

impl CorsOrigins {
    fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "*" {
            return Self::Any;
        }
        Self::List(
            trimmed
                .split(',')
                .map(|s| s.trim().trim_end_matches('/').to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }

    /// The `Access-Control-Allow-Origin` value for a request from `origin`,
    /// or `None` when the origin is not allowed.
    pub fn allow_value(&self, origin: Option<&str>) -> Option<String> {
        match self {
            Self::Any => Some("*".to_string()),
            Self::List(allowed) => {
                let origin = origin?;
                allowed
                    .iter()
                    .any(|a| a == origin)
                    .then(|| origin.to_string())
            }
        }
    }
}

/// The resolved gateway configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Listen port (`PORT`, default 3000).
    pub port: u16,

    /// Admin bearer key (`ADMIN_API_KEY`). Unset means the admin surface is
    /// fail-closed: every admin endpoint answers 503 until a key is set.
    pub admin_api_key: Option<String>,

    /// Base URL used in registration responses (`BASE_URL`). When unset the
    /// gateway derives one from the request only under `TRUSTED_PROXY`,
    /// falling back to the loopback listen address.
    pub base_url: Option<String>,

    /// CORS allowlist (`CORS_ORIGINS`, default `*`).
    pub cors_origins: CorsOrigins,

    /// Honor `X-Forwarded-*` headers (`TRUSTED_PROXY`, default off).
    pub trusted_proxy: bool,

    /// Maximum concurrent tenant registrations (`MAX_REGISTRATIONS`, default 500).
    pub max_registrations: usize,

    /// OpenAPI spec fetch deadline in milliseconds (`FETCH_TIMEOUT_MS`, default 10000).
    pub fetch_timeout_ms: u64,

    /// Directory holding the registration store (`DATA_DIR`, default `./data`).
    pub data_dir: PathBuf,

    /// Let the URL guard admit private and loopback addresses
    /// (`ALLOW_PRIVATE_NETWORKS`, default off). For development and tests only.
    pub allow_private_networks: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            admin_api_key: None,
            base_url: None,
            cors_origins: CorsOrigins::Any,
            trusted_proxy: false,
            max_registrations: 500,
            fetch_timeout_ms: 10_000,
            data_dir: PathBuf::from("./data"),
            allow_private_networks: false,
        }
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field("admin_api_key", &redact(&self.admin_api_key))
            .field("base_url", &self.base_url)
            .field("cors_origins", &self.cors_origins)
            .field("trusted_proxy", &self.trusted_proxy)
            .field("max_registrations", &self.max_registrations)
            .field("fetch_timeout_ms", &self.fetch_timeout_ms)
            .field("data_dir", &self.data_dir)
            .field("allow_private_networks", &self.allow_private_networks)
            .finish()
    }
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

/// A configuration key that failed validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Load configuration from an explicit key/value map. Split out from
    /// [`from_env`] so tests never mutate process-global state.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = parse_or(vars, "PORT", defaults.port)?;
        let max_registrations = parse_or(vars, "MAX_REGISTRATIONS", defaults.max_registrations)?;
        let fetch_timeout_ms = parse_or(vars, "FETCH_TIMEOUT_MS", defaults.fetch_timeout_ms)?;
        if fetch_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "FETCH_TIMEOUT_MS".into(),
                reason: "must be greater than zero".into(),
            });
        }

        let admin_api_key = non_empty(vars.get("ADMIN_API_KEY"));
        let base_url = non_empty(vars.get("BASE_URL")).map(|u| u.trim_end_matches('/').to_string());

        let cors_origins = vars
            .get("CORS_ORIGINS")
            .map(|raw| CorsOrigins::parse(raw))
            .unwrap_or(defaults.cors_origins);

        let trusted_proxy = flag(vars, "TRUSTED_PROXY")?;
        let allow_private_networks = flag(vars, "ALLOW_PRIVATE_NETWORKS")?;

        let data_dir = vars
            .get("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        Ok(Self {
            port,
            admin_api_key,
            base_url,
            cors_origins,
            trusted_proxy,
            max_registrations,
            fetch_timeout_ms,
            data_dir,
            allow_private_networks,
        })
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_or<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key: key.into(),
            reason: format!("could not parse {raw:?}"),
        }),
    }
}

/// Boolean env flags accept 1/true/yes/on (case-insensitive); 0/false/no/off
/// and unset mean disabled.
fn flag(vars: &HashMap<String, String>, key: &str) -> Result<bool, ConfigError> {
    match vars.get(key).map(|s| s.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) if v.is_empty() => Ok(false),
        Some(v) if ["1", "true", "yes", "on"].contains(&v.as_str()) => Ok(true),
        Some(v) if ["0", "false", "no", "off"].contains(&v.as_str()) => Ok(false),
        Some(v) => Err(ConfigError::Invalid {
            key: key.into(),
            reason: format!("expected a boolean, got {v:?}"),
        }),
    }
}
