//! Metrics collection and export for waigaya.
//!
//! Library crates record through the `metrics` facade macros re-exported
//! here, behind their own optional `metrics` feature. The binary decides
//! whether a recorder is installed; with the `prometheus` feature the
//! handle can render the Prometheus text format.
//!
//! ```rust,ignore
//! use waigaya_metrics::{counter, ingest};
//!
//! counter!(ingest::MESSAGES_DROPPED_TOTAL, "reason" => "unwatched").increment(1);
//! ```

mod definitions;
mod error;
mod recorder;

pub use {
    definitions::*,
    error::{Error, Result},
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
