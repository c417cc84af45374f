//! Error types for policy bounding and eviction admission

use crate::models::PodId;
use crate::quantity::Quantity;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while parsing a resource quantity string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("quantity is empty")]
    Empty,

    #[error("invalid quantity {input:?}: {reason}")]
    Invalid { input: String, reason: &'static str },

    #[error("unknown suffix {suffix:?} in quantity {input:?}")]
    UnknownSuffix { input: String, suffix: String },

    #[error("quantity {input:?} is out of range")]
    Overflow { input: String },
}

/// Errors raised while applying a resource policy to a recommendation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error(
        "invalid resource policy for container {container:?}: \
         min allowed {resource} ({min}) exceeds max allowed ({max})"
    )]
    InvalidPolicy {
        container: String,
        resource: String,
        min: Quantity,
        max: Quantity,
    },
}

/// Errors raised by the eviction admission controller
#[derive(Debug, Error)]
pub enum EvictionError {
    /// Eviction attempted without a prior admission in the current epoch
    #[error("eviction of pod {pod} was not admitted in the current registration epoch")]
    NotPermitted { pod: PodId },

    /// The delegated eviction call failed
    #[error("eviction of pod {pod} failed: {source}")]
    External {
        pod: PodId,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// The delegated eviction call did not finish in time
    #[error("eviction of pod {pod} timed out after {timeout:?}")]
    Timeout { pod: PodId, timeout: Duration },
}

impl EvictionError {
    /// Wrap a failure reported by the external eviction primitive
    pub fn external(pod: PodId, source: anyhow::Error) -> Self {
        EvictionError::External {
            pod,
            source: source.into(),
        }
    }

    /// True when the failure came from the delegated eviction call
    /// rather than from a caller contract violation.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            EvictionError::External { .. } | EvictionError::Timeout { .. }
        )
    }

    pub fn pod(&self) -> &PodId {
        match self {
            EvictionError::NotPermitted { pod }
            | EvictionError::External { pod, .. }
            | EvictionError::Timeout { pod, .. } => pod,
        }
    }
}
