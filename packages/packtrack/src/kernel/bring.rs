//! Bring adapter for the `BaseTrackingProvider` seam.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bring_client::{BringClient, BringError};

use super::traits::{BaseTrackingProvider, FetchError, Fetched};

/// Tracker name Bring jobs are enqueued under.
pub const BRING_TRACKER: &str = "bring";

pub struct BringProvider {
    client: BringClient,
}

impl BringProvider {
    pub fn new(client: BringClient) -> Self {
        Self { client }
    }

    /// Build a provider against `base_url` with a per-request timeout.
    pub fn with_config(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = BringClient::with_config(base_url, timeout)?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl BaseTrackingProvider for BringProvider {
    fn tracker_name(&self) -> &str {
        BRING_TRACKER
    }

    async fn fetch(&self, identifier: &str) -> Result<Fetched, FetchError> {
        let resp = self.client.track(identifier).await?;
        Ok(Fetched {
            body: resp.body,
            rate_limited: resp.rate_limited,
        })
    }
}

impl From<BringError> for FetchError {
    fn from(error: BringError) -> Self {
        match error {
            BringError::Timeout { .. } => FetchError::Timeout,
            BringError::Read { .. } => FetchError::Read(error.to_string()),
            BringError::Transport { .. } | BringError::Config(_) => {
                FetchError::Transport(error.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bring_errors_map_to_fetch_errors() {
        let err = FetchError::from(BringError::Timeout {
            identifier: "1000001".into(),
        });
        assert_eq!(err, FetchError::Timeout);

        let err = FetchError::from(BringError::Config("bad url".into()));
        assert!(matches!(err, FetchError::Transport(msg) if msg.contains("bad url")));
    }

    #[test]
    fn test_provider_serves_bring() {
        let provider = BringProvider::new(BringClient::new().unwrap());
        assert_eq!(provider.tracker_name(), "bring");
    }
}
