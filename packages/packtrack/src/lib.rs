// packtrack - distributed shipment tracking scraper
//
// Nodes share one Postgres job queue. Each node claims jobs with
// `FOR UPDATE SKIP LOCKED`, fetches tracking documents outside the row lock
// and writes the outcome back. A rate-limited worker pool covers the
// standalone crawl mode.

pub mod config;
pub mod kernel;

pub use config::*;
