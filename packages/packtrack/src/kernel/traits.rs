// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only. The claim protocol and the worker
// pool talk to carriers through `BaseTrackingProvider` and never see the
// concrete HTTP client.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

// =============================================================================
// Tracking Provider Trait
// =============================================================================

/// Raw document returned by a provider.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub body: Bytes,
    /// The provider signalled throttling (in-body code or HTTP status).
    pub rate_limited: bool,
}

impl Fetched {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            rate_limited: false,
        }
    }

    pub fn rate_limited(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            rate_limited: true,
        }
    }
}

/// Why a fetch produced no document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Connection failed or the request could not be sent
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body could not be read
    #[error("read error: {0}")]
    Read(String),

    /// The fetch did not finish within the configured timeout
    #[error("fetch timed out")]
    Timeout,
}

#[async_trait]
pub trait BaseTrackingProvider: Send + Sync {
    /// Name of the tracker this provider serves (matches `trackers.name`)
    fn tracker_name(&self) -> &str;

    /// Fetch the tracking document for one shipment identifier
    async fn fetch(&self, identifier: &str) -> Result<Fetched, FetchError>;
}
