// Test dependencies - mock tracking provider
//
// Scripted stand-in for a carrier API, usable by the claim protocol, the
// lifecycle driver and the worker pool alike.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use super::traits::{BaseTrackingProvider, FetchError, Fetched};

// =============================================================================
// Mock Tracking Provider
// =============================================================================

/// One scripted fetch outcome.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// A clean document
    Body(Bytes),
    /// A document carrying the rate-limit signal
    RateLimited,
    /// A failed fetch
    Error(FetchError),
    /// The default document, after a delay
    Delayed(Duration),
    /// Never completes; exercises fetch timeouts
    Hang,
}

impl MockResponse {
    pub fn body(body: impl Into<Bytes>) -> Self {
        MockResponse::Body(body.into())
    }
}

#[derive(Clone)]
pub struct MockTrackingProvider {
    tracker: String,
    queued: Arc<Mutex<Vec<MockResponse>>>,
    by_identifier: Arc<Mutex<HashMap<String, MockResponse>>>,
    calls: Arc<Mutex<Vec<(String, Instant)>>>,
}

impl MockTrackingProvider {
    pub fn new(tracker: impl Into<String>) -> Self {
        Self {
            tracker: tracker.into(),
            queued: Arc::new(Mutex::new(Vec::new())),
            by_identifier: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue a response for the next fetch that has no identifier override
    pub fn with_response(self, response: MockResponse) -> Self {
        self.queued.lock().unwrap().push(response);
        self
    }

    /// Always answer `identifier` with `response`
    pub fn with_response_for(self, identifier: &str, response: MockResponse) -> Self {
        self.by_identifier
            .lock()
            .unwrap()
            .insert(identifier.to_string(), response);
        self
    }

    /// Identifiers fetched so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(identifier, _)| identifier.clone())
            .collect()
    }

    /// When each fetch started, in call order
    pub fn call_starts(&self) -> Vec<(String, Instant)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Default document for an identifier without a scripted response.
    pub fn default_body(identifier: &str) -> Bytes {
        Bytes::from(format!(
            r#"{{"apiVersion":"2","consignmentSet":[{{"consignmentId":"{}"}}]}}"#,
            identifier
        ))
    }

    fn next_response(&self, identifier: &str) -> MockResponse {
        if let Some(response) = self.by_identifier.lock().unwrap().get(identifier) {
            return response.clone();
        }

        let mut queued = self.queued.lock().unwrap();
        if !queued.is_empty() {
            queued.remove(0)
        } else {
            MockResponse::Body(Self::default_body(identifier))
        }
    }
}

#[async_trait]
impl BaseTrackingProvider for MockTrackingProvider {
    fn tracker_name(&self) -> &str {
        &self.tracker
    }

    async fn fetch(&self, identifier: &str) -> Result<Fetched, FetchError> {
        self.calls
            .lock()
            .unwrap()
            .push((identifier.to_string(), Instant::now()));

        match self.next_response(identifier) {
            MockResponse::Body(body) => Ok(Fetched::new(body)),
            MockResponse::RateLimited => Ok(Fetched::rate_limited(
                r#"{"consignmentSet":[{"error":{"code":503,"message":"Too many requests"}}]}"#,
            )),
            MockResponse::Error(e) => Err(e),
            MockResponse::Delayed(delay) => {
                tokio::time::sleep(delay).await;
                Ok(Fetched::new(Self::default_body(identifier)))
            }
            MockResponse::Hang => std::future::pending().await,
        }
    }
}
