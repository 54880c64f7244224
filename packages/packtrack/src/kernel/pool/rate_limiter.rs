//! Single-task rate limiter.
//!
//! One task owns the last-dispatch instant and forwards items one at a time
//! onto a capacity-1 channel. A dispatch only counts once a consumer has
//! taken the item off that channel, so consecutive receives are never closer
//! than the configured interval no matter how many consumers read from it.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Spacing state for one dispatch stream.
#[derive(Debug, Clone)]
pub struct Pacer {
    interval: Duration,
    last: Option<Instant>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// When the next dispatch may happen. `None` before the first dispatch.
    pub fn next_slot(&self) -> Option<Instant> {
        self.last.map(|last| last + self.interval)
    }

    /// Sleep until the next slot opens.
    pub async fn wait(&self) {
        if let Some(slot) = self.next_slot() {
            tokio::time::sleep_until(slot).await;
        }
    }

    /// Record a completed dispatch.
    pub fn mark(&mut self) {
        self.last = Some(Instant::now());
    }
}

/// Forward `input` onto a new capacity-1 channel, at most one received item
/// per `interval`.
///
/// The returned receiver closes once `input` is exhausted and the last item
/// was received.
pub fn spawn_rate_limiter<T>(
    mut input: mpsc::Receiver<T>,
    interval: Duration,
) -> (mpsc::Receiver<T>, JoinHandle<()>)
where
    T: Send + 'static,
{
    let (tx, rx) = mpsc::channel(1);

    let handle = tokio::spawn(async move {
        let mut pacer = Pacer::new(interval);
        let mut dispatched = 0u64;

        while let Some(item) = input.recv().await {
            pacer.wait().await;
            if tx.send(item).await.is_err() {
                debug!(dispatched, "rate limiter output dropped, stopping");
                return;
            }
            // Capacity only frees up once a consumer has received the item.
            match tx.reserve().await {
                Ok(permit) => drop(permit),
                Err(_) => {
                    debug!(dispatched, "rate limiter output dropped, stopping");
                    return;
                }
            }
            pacer.mark();
            dispatched += 1;
        }

        debug!(dispatched, "rate limiter input exhausted");
    });

    (rx, handle)
}
