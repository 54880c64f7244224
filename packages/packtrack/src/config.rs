use anyhow::{anyhow, bail, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::kernel::jobs::{BackoffPolicy, ClaimSettings};

/// Node configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Required by the store-backed modes only
    pub database_url: Option<String>,
    pub bring_tracking_url: String,
    pub fetch_timeout: Duration,
    pub lease: Duration,
    /// `None` retries failed fetches forever
    pub max_attempts: Option<u32>,
    pub backoff: BackoffPolicy,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_vars(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let max_attempts: u32 = parse_or(&var, "MAX_ATTEMPTS", 25)?;

        let config = Self {
            database_url: var("DATABASE_URL").filter(|url| !url.is_empty()),
            bring_tracking_url: var("BRING_TRACKING_URL")
                .unwrap_or_else(|| bring_client::DEFAULT_TRACKING_URL.to_string()),
            fetch_timeout: Duration::from_secs(parse_or(&var, "FETCH_TIMEOUT_SECS", 30)?),
            lease: Duration::from_secs(parse_or(&var, "LEASE_SECS", 300)?),
            max_attempts: (max_attempts > 0).then_some(max_attempts),
            backoff: BackoffPolicy {
                idle: Duration::from_millis(parse_or(&var, "BACKOFF_IDLE_MILLIS", 1000)?),
                empty_queue: Duration::from_secs(parse_or(&var, "BACKOFF_EMPTY_SECS", 3)?),
                rate_limited: Duration::from_secs(parse_or(
                    &var,
                    "BACKOFF_RATE_LIMITED_SECS",
                    600,
                )?),
                error: Duration::from_secs(parse_or(&var, "BACKOFF_ERROR_SECS", 10)?),
            },
        };

        if config.fetch_timeout >= config.lease {
            bail!(
                "FETCH_TIMEOUT_SECS ({}) must be shorter than LEASE_SECS ({})",
                config.fetch_timeout.as_secs(),
                config.lease.as_secs()
            );
        }

        Ok(config)
    }

    pub fn database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| anyhow!("DATABASE_URL must be set"))
    }

    /// Claim settings for `node_id` under this configuration
    pub fn claim_settings(&self, node_id: &str) -> Result<ClaimSettings> {
        let settings = ClaimSettings {
            node_id: node_id.to_string(),
            lease: self.lease,
            fetch_timeout: self.fetch_timeout,
            max_attempts: self.max_attempts,
        };
        settings.validate()?;
        Ok(settings)
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number", key)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();

        assert!(config.database_url.is_none());
        assert!(config.database_url().is_err());
        assert_eq!(config.bring_tracking_url, bring_client::DEFAULT_TRACKING_URL);
        assert_eq!(config.fetch_timeout, Duration::from_secs(30));
        assert_eq!(config.lease, Duration::from_secs(300));
        assert_eq!(config.max_attempts, Some(25));
        assert_eq!(config.backoff, BackoffPolicy::default());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/packtrack"),
            ("MAX_ATTEMPTS", "0"),
            ("BACKOFF_RATE_LIMITED_SECS", "60"),
            ("LEASE_SECS", "45"),
        ])
        .unwrap();

        assert_eq!(config.database_url().unwrap(), "postgres://localhost/packtrack");
        assert_eq!(config.max_attempts, None);
        assert_eq!(config.backoff.rate_limited, Duration::from_secs(60));

        let settings = config.claim_settings("node-a").unwrap();
        assert_eq!(settings.node_id, "node-a");
        assert_eq!(settings.lease, Duration::from_secs(45));
    }

    #[test]
    fn test_fetch_timeout_must_be_shorter_than_lease() {
        let err = config_from(&[("FETCH_TIMEOUT_SECS", "60"), ("LEASE_SECS", "60")]).unwrap_err();
        assert!(err.to_string().contains("LEASE_SECS"));

        let err = config_from(&[("LEASE_SECS", "20")]).unwrap_err();
        assert!(err.to_string().contains("FETCH_TIMEOUT_SECS"));

        let config = config_from(&[("FETCH_TIMEOUT_SECS", "59"), ("LEASE_SECS", "60")]).unwrap();
        assert!(config.claim_settings("node-a").is_ok());

        let mut config = config;
        config.fetch_timeout = Duration::from_secs(90);
        assert!(config.claim_settings("node-a").is_err());
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = config_from(&[("FETCH_TIMEOUT_SECS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("FETCH_TIMEOUT_SECS"));
    }
}
