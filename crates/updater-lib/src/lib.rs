//! Updater library for vertical pod autoscaling
//!
//! This crate provides the core functionality for:
//! - Resource quantities and the pod/autoscaler object model
//! - Bounding recommendations by per-container resource policies
//! - Admitting pod evictions within a per-workload disruption budget
//! - Running update passes against pluggable cluster collaborators
//! - Metrics and structured logging

pub mod config;
pub mod error;
pub mod eviction;
pub mod models;
pub mod observability;
pub mod processor;
pub mod quantity;
pub mod source;
pub mod updater;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::UpdaterConfig;
pub use error::{EvictionError, PolicyError, QuantityError};
pub use eviction::{
    AdmissionDecision, DenialReason, EvictionAdmissionController, PodEvictor,
    PodsEvictionRestriction,
};
pub use models::*;
pub use observability::{StructuredLogger, UpdaterMetrics};
pub use processor::{PolicyBoundsApplier, RecommendationProcessor};
pub use quantity::Quantity;
pub use source::{PodLister, Recommender, VpaLister};
pub use updater::{PassSummary, Updater};
