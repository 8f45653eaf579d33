//! Telemetry for the georeport pipeline.
//!
//! Structured logging through `tracing`, lock-free in-process counters, and
//! a health registry read by the HTTP health checks.

pub mod health;
pub mod metrics;
pub mod tracing_setup;

pub use health::*;
pub use metrics::*;
pub use tracing_setup::*;
