//! Kernel module - job queue, worker pool and provider plumbing.

pub mod bring;
pub mod capabilities;
pub mod jobs;
pub mod pool;
pub mod test_dependencies;
pub mod traits;

pub use bring::BringProvider;
pub use capabilities::CapabilityRegistry;
pub use test_dependencies::{MockResponse, MockTrackingProvider};
pub use traits::*;
