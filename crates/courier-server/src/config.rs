use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use courier_api::AuthConfig;
use courier_api::state::{DEFAULT_ACCESS_TTL_SECS, DEFAULT_SESSION_TTL_SECS};

pub const PLACEHOLDER_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} must be a {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub auth: AuthConfig,
    pub session_cleanup_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup, so tests need not touch the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = get("COURIER_JWT_SECRET", PLACEHOLDER_SECRET);
        let admin_emails = get("COURIER_ADMIN_EMAILS", "");

        let mut auth = AuthConfig::new(jwt_secret).with_admin_emails(admin_emails.split(','));
        auth.access_ttl_secs = parse(
            "COURIER_ACCESS_TTL_SECS",
            lookup("COURIER_ACCESS_TTL_SECS"),
            DEFAULT_ACCESS_TTL_SECS,
            "positive number of seconds",
        )?;
        auth.session_ttl_secs = parse(
            "COURIER_SESSION_TTL_SECS",
            lookup("COURIER_SESSION_TTL_SECS"),
            DEFAULT_SESSION_TTL_SECS,
            "positive number of seconds",
        )?;
        for (var, value) in [
            ("COURIER_ACCESS_TTL_SECS", auth.access_ttl_secs),
            ("COURIER_SESSION_TTL_SECS", auth.session_ttl_secs),
        ] {
            if value <= 0 {
                return Err(ConfigError::Invalid {
                    var,
                    expected: "positive number of seconds",
                    value: value.to_string(),
                });
            }
        }

        let cleanup_secs: u64 = parse(
            "COURIER_SESSION_CLEANUP_SECS",
            lookup("COURIER_SESSION_CLEANUP_SECS"),
            3600,
            "positive number of seconds",
        )?;
        if cleanup_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "COURIER_SESSION_CLEANUP_SECS",
                expected: "positive number of seconds",
                value: "0".into(),
            });
        }

        Ok(Self {
            host: get("COURIER_HOST", "0.0.0.0"),
            port: parse("COURIER_PORT", lookup("COURIER_PORT"), 3000, "port number")?,
            data_dir: PathBuf::from(get("COURIER_DATA_DIR", "./data")),
            auth,
            session_cleanup_interval: Duration::from_secs(cleanup_secs),
        })
    }

    pub fn uses_placeholder_secret(&self) -> bool {
        self.auth.jwt_secret == PLACEHOLDER_SECRET || self.auth.jwt_secret.is_empty()
    }
}

fn parse<T: FromStr>(
    var: &'static str,
    raw: Option<String>,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, expected, value }),
    }
}
