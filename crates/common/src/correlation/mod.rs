//! Correlation tracking for governed operations
//!
//! A [`CorrelationContext`] records one operation from creation to a
//! terminal status: traces, events, errors, checkpoints and metrics. The
//! [`CorrelationTracker`] owns active contexts, retains a bounded history of
//! finished ones, sweeps expired ones and optionally persists snapshots.

pub mod context;
pub mod tracker;

pub use context::{CorrelationContext, CorrelationEvent, CorrelationStatus, CorrelationUpdate};
pub use tracker::{
    global_tracker, init_global_tracker, CorrelationError, CorrelationTracker, TrackerConfig,
    TrackerConfigBuilder, TrackerStatistics,
};
