//! Metric names for the connection broker.
//!
//! The broker only records through the `metrics` crate facade. Installing a
//! recorder/exporter is the host application's job.
//!
//! # Usage
//!
//! ```rust,ignore
//! use bridgeway_metrics::{counter, connect, labels};
//!
//! counter!(connect::HANDSHAKES_STARTED_TOTAL, labels::PROVIDER => "chat").increment(1);
//! ```

mod definitions;

pub use definitions::*;

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
