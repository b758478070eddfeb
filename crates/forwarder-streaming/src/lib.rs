//! # Forwarder Streaming
//!
//! Forwarding consumer for the ingest topics. Pulls bounded batches from the
//! broker, stages each payload in the cache, schedules preprocessing and only
//! then commits the batch's offsets.
//!
//! Backends are feature gated: `kafka` enables the rdkafka consumer and
//! `redis` the Redis cache and task queue. The in-memory backends are always
//! available.

pub mod cache;
pub mod config;
pub mod consumer;
pub mod error;
pub mod forwarder;
pub mod memory;
pub mod retry;
pub mod scheduler;
pub mod stats;

pub use cache::*;
pub use config::*;
pub use consumer::*;
pub use error::*;
pub use forwarder::*;
pub use memory::*;
pub use retry::*;
pub use scheduler::*;
pub use stats::*;
