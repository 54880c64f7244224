//! Tracker capabilities served by this node.
//!
//! Jobs carry a tracker id; the node only runs providers for the trackers it
//! was configured with. The registry is built once at startup by matching
//! each provider's `tracker_name()` against the `trackers` table.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::kernel::jobs::{JobError, Tracker};
use crate::kernel::traits::BaseTrackingProvider;

#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    providers: HashMap<i32, Arc<dyn BaseTrackingProvider>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `tracker_id` with `provider`, replacing any earlier entry.
    pub fn register(&mut self, tracker_id: i32, provider: Arc<dyn BaseTrackingProvider>) {
        self.providers.insert(tracker_id, provider);
    }

    /// Bind each provider to the tracker row carrying its name.
    ///
    /// A provider whose tracker is not registered is a configuration error.
    pub fn resolve(
        trackers: &[Tracker],
        providers: Vec<Arc<dyn BaseTrackingProvider>>,
    ) -> Result<Self, JobError> {
        let mut registry = Self::new();
        for provider in providers {
            let tracker = trackers
                .iter()
                .find(|t| t.name == provider.tracker_name())
                .ok_or_else(|| JobError::UnknownTracker {
                    name: provider.tracker_name().to_string(),
                })?;

            info!(tracker_id = tracker.id, tracker = %tracker.name, "serving tracker");
            registry.register(tracker.id, provider);
        }
        Ok(registry)
    }

    pub fn get(&self, tracker_id: i32) -> Option<Arc<dyn BaseTrackingProvider>> {
        self.providers.get(&tracker_id).cloned()
    }

    pub fn serves(&self, tracker_id: i32) -> bool {
        self.providers.contains_key(&tracker_id)
    }

    /// Served tracker ids in ascending order
    pub fn tracker_ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.providers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("tracker_ids", &self.tracker_ids())
            .finish()
    }
}
