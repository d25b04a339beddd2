//! Validated startup configuration.
//!
//! Built once from the [`Cli`] and passed by value into the app; nothing
//! reads the environment after this point.

use crate::cli::Cli;
use reqwest::Url;
use std::{fmt, net::SocketAddr, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing configuration: {0}")]
    Missing(&'static str),

    #[error("invalid configuration {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub authority_url: Url,
    pub introspection_path: String,
    pub service_token: String,
    pub backend_url: Url,
    pub introspection_timeout: Duration,
    pub backend_timeout: Duration,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("listen", &self.listen)
            .field("authority_url", &self.authority_url.as_str())
            .field("introspection_path", &self.introspection_path)
            .field("service_token", &"<redacted>")
            .field("backend_url", &self.backend_url.as_str())
            .field("introspection_timeout", &self.introspection_timeout)
            .field("backend_timeout", &self.backend_timeout)
            .finish()
    }
}

impl TryFrom<Cli> for Config {
    type Error = ConfigError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let service_token = cli.service_token.trim().to_string();
        if service_token.is_empty() {
            return Err(ConfigError::Missing("ORY_API_KEY"));
        }

        Ok(Self {
            listen: cli.listen,
            authority_url: http_url("ORY_HOST", &cli.authority_url)?,
            introspection_path: cli.introspection_path,
            service_token,
            backend_url: http_url("PORTER_BACKEND_URL", &cli.backend_url)?,
            introspection_timeout: timeout(
                "PORTER_INTROSPECTION_TIMEOUT_SECS",
                cli.introspection_timeout_secs,
            )?,
            backend_timeout: timeout("PORTER_BACKEND_TIMEOUT_SECS", cli.backend_timeout_secs)?,
        })
    }
}

fn http_url(key: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ConfigError::Missing(key));
    }

    let url = Url::parse(raw).map_err(|e| ConfigError::invalid(key, e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::invalid(key, "scheme must be http or https"));
    }
    if url.host_str().is_none() {
        return Err(ConfigError::invalid(key, "missing host"));
    }
    Ok(url)
}

fn timeout(key: &'static str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(secs))
}
