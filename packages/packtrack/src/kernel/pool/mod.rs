//! Rate-limited concurrent fetch engine.
//!
//! ```text
//! submit ─► [input_buffer] ─► rate limiter ─► [1] ─► worker-00 ─┬─► [output_buffer] ─► CrawlResponse
//!                                                   worker-01 ─┤
//!                                                   worker-NN ─┴─► [error_buffer]  ─► CrawlError
//! ```

pub mod rate_limiter;
pub mod worker_pool;

pub use rate_limiter::{spawn_rate_limiter, Pacer};
pub use worker_pool::{CrawlError, CrawlResponse, PoolClosed, PoolStreams, WorkerPool, WorkerPoolConfig};
