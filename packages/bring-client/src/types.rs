use serde::Deserialize;

/// Error code Bring embeds in a consignment when the caller is throttled.
pub const RATE_LIMIT_CODE: i64 = 503;

/// Error code for an identifier Bring does not know about.
pub const NOT_FOUND_CODE: i64 = 404;

/// The slice of a tracking response we inspect.
///
/// Everything else in the body is kept as raw bytes by the caller.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(rename = "apiVersion", default)]
    pub api_version: Option<String>,
    #[serde(rename = "consignmentSet", default)]
    pub consignment_set: Vec<ConsignmentError>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsignmentError {
    #[serde(default)]
    pub error: Option<ErrorDetail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: Option<String>,
}

/// What a response body says about the request that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodySignal {
    /// No consignment carried a meaningful error code.
    Clean,
    /// At least one consignment carried the rate-limit code.
    RateLimited,
    /// Some other non-zero code. Passed through without classification.
    Other(i64),
}

impl ErrorEnvelope {
    /// Parse the envelope. Bodies that are not JSON objects yield `None`.
    pub fn parse(body: &[u8]) -> Option<Self> {
        serde_json::from_slice(body).ok()
    }

    /// Classify the consignment error codes.
    ///
    /// `0` and `404` count as clean. The rate-limit code wins over any
    /// other code present in the same body.
    pub fn signal(&self) -> BodySignal {
        let mut signal = BodySignal::Clean;
        for code in self
            .consignment_set
            .iter()
            .filter_map(|c| c.error.as_ref().map(|e| e.code))
        {
            match code {
                0 | NOT_FOUND_CODE => {}
                RATE_LIMIT_CODE => return BodySignal::RateLimited,
                other => signal = BodySignal::Other(other),
            }
        }
        signal
    }
}

/// Shortcut for callers that only care about throttling.
pub fn is_rate_limited(body: &[u8]) -> bool {
    ErrorEnvelope::parse(body)
        .map(|envelope| envelope.signal() == BodySignal::RateLimited)
        .unwrap_or(false)
}
