//! Terrain Analysis Client
//!
//! This library manages the lifecycle of asynchronous terrain analysis jobs
//! against an external backend: submission, authenticated status polling
//! (single jobs and batches), TTL-cached results, and validation/metrics for
//! the polygon artifacts those jobs consume and produce.

pub mod config;
pub mod models;
pub mod services;
