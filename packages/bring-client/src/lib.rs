//! Pure Bring tracking REST client.
//!
//! One GET per shipment identifier. The body is returned as raw bytes; only
//! the consignment error codes are ever decoded (see [`types::ErrorEnvelope`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use bring_client::BringClient;
//!
//! let client = BringClient::new()?;
//!
//! let resp = client.track("70438101015432113").await?;
//! if resp.rate_limited {
//!     // back off
//! }
//! ```

pub mod error;
pub mod types;

pub use error::{BringError, Result};
pub use types::{is_rate_limited, BodySignal, ErrorEnvelope, RATE_LIMIT_CODE};

use bytes::Bytes;
use std::time::Duration;

/// Public tracking endpoint.
pub const DEFAULT_TRACKING_URL: &str = "https://tracking.bring.com/api/v2/tracking.json";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct BringClient {
    client: reqwest::Client,
    base_url: String,
}

impl BringClient {
    /// Client against the public endpoint with the default timeout.
    pub fn new() -> Result<Self> {
        Self::with_config(DEFAULT_TRACKING_URL, DEFAULT_TIMEOUT)
    }

    /// Client against a custom endpoint with a per-request timeout.
    pub fn with_config(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BringError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the raw tracking document for `identifier`.
    ///
    /// HTTP status codes are not treated as failures: Bring reports most
    /// problems inside the body. The response is flagged as rate limited on
    /// HTTP 429 or the in-body rate-limit code; anything else is left to the
    /// caller (see [`ErrorEnvelope`]).
    pub async fn track(&self, identifier: &str) -> Result<TrackResponse> {
        tracing::debug!(identifier, "Fetching tracking document");

        let resp = self
            .client
            .get(&self.base_url)
            .query(&[("q", identifier)])
            .send()
            .await
            .map_err(|e| BringError::from_send(identifier, e))?;

        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| BringError::from_read(identifier, e))?;

        tracing::debug!(
            identifier,
            status = status.as_u16(),
            bytes = body.len(),
            "Fetched tracking document"
        );

        let rate_limited = status == reqwest::StatusCode::TOO_MANY_REQUESTS || is_rate_limited(&body);
        if rate_limited {
            tracing::warn!(identifier, "Bring signalled rate limiting");
        }

        Ok(TrackResponse { body, rate_limited })
    }
}

/// Body plus the throttling verdict from [`BringClient::track`].
#[derive(Debug, Clone)]
pub struct TrackResponse {
    pub body: Bytes,
    pub rate_limited: bool,
}
