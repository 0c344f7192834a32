//! Engine error taxonomy.
//!
//! Every failure inside a solve maps onto one of the [`EngineError`] kinds.
//! Path selection has its own enum because its four failure modes are
//! meaningful to callers (and to tests) individually.
//!
//! Errors inside one evaluator iteration are accumulated as diagnostics and
//! never abort sibling work; only [`KbError::Inconsistency`] short-circuits
//! a run.

use thiserror::Error;

use stratus_core::{GraphError, PropertyError, ResourceId};
use stratus_kb::KbError;

/// Failure modes of edge expansion.
#[derive(Debug, Error)]
pub enum PathSelectionError {
    #[error("no path between {from} and {target}")]
    NoPath {
        from: ResourceId,
        target: ResourceId,
    },

    /// Non-fatal: two candidate paths tied on weight and length; the
    /// lexicographically first was chosen and the tie is surfaced as a
    /// warning.
    #[error("multiple equal-weight shortest paths between {from} and {target}")]
    AmbiguousShortest {
        from: ResourceId,
        target: ResourceId,
    },

    #[error("no valid path candidates between {from} and {target}")]
    ValidityFailed {
        from: ResourceId,
        target: ResourceId,
    },

    #[error(
        "cannot connect {from} to {requested}: edge uniqueness already binds {blocked} to {existing}"
    )]
    UniquenessViolation {
        from: ResourceId,
        requested: ResourceId,
        /// The endpoint whose uniqueness flag blocked the connection.
        blocked: ResourceId,
        /// The resource it is already bound to.
        existing: ResourceId,
    },
}

/// Errors produced during a solve.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("constraints unsatisfied after solve")]
    ConstraintUnsatisfied,

    #[error(transparent)]
    Kb(#[from] KbError),

    #[error(transparent)]
    PathSelection(#[from] PathSelectionError),

    #[error(transparent)]
    Property(#[from] PropertyError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("construct {id} could not be expanded: {reason}")]
    ExpansionFailed { id: ResourceId, reason: String },

    #[error("construct expansion produced {count} combinations, over the cap of {cap}")]
    TooManyCombinations { count: usize, cap: usize },

    #[error("run canceled")]
    Canceled,
}

impl EngineError {
    /// Fatal errors abort the whole run instead of accumulating.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Kb(KbError::Inconsistency { .. })
                | EngineError::Canceled
                | EngineError::TooManyCombinations { .. }
        )
    }
}
