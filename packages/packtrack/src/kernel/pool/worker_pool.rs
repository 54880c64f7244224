//! Fixed-size pool of fetch workers behind a rate limiter.
//!
//! Callers must drain both [`PoolStreams`] receivers while submitting: every
//! channel is bounded, so an undrained stream eventually blocks the workers
//! and then [`WorkerPool::submit`].

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use super::rate_limiter::spawn_rate_limiter;
use crate::kernel::traits::{BaseTrackingProvider, FetchError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    pub workers: usize,
    pub input_buffer: usize,
    pub output_buffer: usize,
    pub error_buffer: usize,
    /// Minimum spacing between two dispatched requests
    pub min_interval: Duration,
    pub fetch_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            input_buffer: 16,
            output_buffer: 16,
            error_buffer: 16,
            min_interval: Duration::from_secs(1),
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

/// A successful fetch.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlResponse {
    pub input: String,
    pub worker: String,
    #[serde(serialize_with = "serialize_body")]
    pub output: Bytes,
    pub rate_limited: bool,
}

/// A failed fetch. The worker that produced it keeps running.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlError {
    pub input: String,
    pub worker: String,
    #[serde(serialize_with = "serialize_error")]
    pub error: FetchError,
}

fn serialize_body<S: serde::Serializer>(body: &Bytes, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&String::from_utf8_lossy(body))
}

fn serialize_error<S: serde::Serializer>(error: &FetchError, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&error.to_string())
}

/// Receiving ends of the pool. Both close once the last worker exits.
#[derive(Debug)]
pub struct PoolStreams {
    pub outputs: mpsc::Receiver<CrawlResponse>,
    pub errors: mpsc::Receiver<CrawlError>,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("worker pool is closed")]
pub struct PoolClosed;

pub struct WorkerPool {
    input: Option<mpsc::Sender<String>>,
    tasks: JoinSet<()>,
}

impl WorkerPool {
    /// Spawn the limiter and `config.workers` workers.
    pub fn start(
        config: WorkerPoolConfig,
        provider: Arc<dyn BaseTrackingProvider>,
    ) -> (Self, PoolStreams) {
        let (input_tx, input_rx) = mpsc::channel(config.input_buffer.max(1));
        let (output_tx, output_rx) = mpsc::channel(config.output_buffer.max(1));
        let (error_tx, error_rx) = mpsc::channel(config.error_buffer.max(1));

        let mut tasks = JoinSet::new();

        let (limited_rx, limiter) = spawn_rate_limiter(input_rx, config.min_interval);
        tasks.spawn(async move {
            if let Err(e) = limiter.await {
                error!(error = %e, "rate limiter task failed");
            }
        });

        let limited_rx = Arc::new(Mutex::new(limited_rx));
        let workers = config.workers.max(1);
        for index in 0..workers {
            let worker = Worker {
                name: format!("worker-{:02}", index),
                input: limited_rx.clone(),
                outputs: output_tx.clone(),
                errors: error_tx.clone(),
                provider: provider.clone(),
                fetch_timeout: config.fetch_timeout,
            };
            tasks.spawn(worker.run());
        }

        // Only the workers hold senders now; the streams close with the last one.
        drop(output_tx);
        drop(error_tx);

        info!(
            workers,
            min_interval_ms = config.min_interval.as_millis() as u64,
            tracker = provider.tracker_name(),
            "worker pool started"
        );

        (
            Self {
                input: Some(input_tx),
                tasks,
            },
            PoolStreams {
                outputs: output_rx,
                errors: error_rx,
            },
        )
    }

    /// A clone of the input sender. The pool only drains after every clone
    /// is dropped.
    pub fn inputs(&self) -> Option<mpsc::Sender<String>> {
        self.input.clone()
    }

    /// Queue one identifier, waiting for buffer space.
    pub async fn submit(&self, identifier: impl Into<String>) -> Result<(), PoolClosed> {
        let input = self.input.as_ref().ok_or(PoolClosed)?;
        input.send(identifier.into()).await.map_err(|_| PoolClosed)
    }

    /// Stop accepting input and wait for every queued request to finish.
    pub async fn close(mut self) {
        self.input.take();

        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                if e.is_panic() {
                    error!(error = %e, "worker pool task panicked");
                } else {
                    debug!(error = %e, "worker pool task cancelled");
                }
            }
        }

        info!("worker pool drained");
    }
}

struct Worker {
    name: String,
    input: Arc<Mutex<mpsc::Receiver<String>>>,
    outputs: mpsc::Sender<CrawlResponse>,
    errors: mpsc::Sender<CrawlError>,
    provider: Arc<dyn BaseTrackingProvider>,
    fetch_timeout: Duration,
}

impl Worker {
    async fn run(self) {
        let mut handled = 0u64;

        loop {
            let next = self.input.lock().await.recv().await;
            let Some(identifier) = next else {
                break;
            };

            let result = match tokio::time::timeout(
                self.fetch_timeout,
                self.provider.fetch(&identifier),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout),
            };

            let delivered = match result {
                Ok(fetched) => self
                    .outputs
                    .send(CrawlResponse {
                        input: identifier,
                        worker: self.name.clone(),
                        output: fetched.body,
                        rate_limited: fetched.rate_limited,
                    })
                    .await
                    .is_ok(),
                Err(error) => {
                    debug!(worker = %self.name, identifier = %identifier, error = %error, "fetch failed");
                    self.errors
                        .send(CrawlError {
                            input: identifier,
                            worker: self.name.clone(),
                            error,
                        })
                        .await
                        .is_ok()
                }
            };

            if !delivered {
                debug!(worker = %self.name, "result stream dropped by caller");
            }
            handled += 1;
        }

        debug!(worker = %self.name, handled, "worker exiting");
    }
}
