//! Solve diagnostics.
//!
//! A [`Diagnostic`] is the user-visible record of one failure: a stable
//! code, a one-line summary, and the offending resource or edge. Errors
//! within one evaluator iteration accumulate; a later clean iteration
//! discards them, so the diagnostics a caller finally sees are the union
//! from the last iteration only.

use std::fmt;

use serde::Serialize;

use stratus_core::ResourceId;

use crate::error::{EngineError, PathSelectionError};

/// One user-visible problem.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    /// Stable machine-readable code (`no-path`, `required-missing`, ...).
    pub code: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge: Option<(ResourceId, ResourceId)>,
}

impl Diagnostic {
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Diagnostic {
            code: code.into(),
            summary: summary.into(),
            resource: None,
            edge: None,
        }
    }

    pub fn for_resource(mut self, id: ResourceId) -> Self {
        self.resource = Some(id);
        self
    }

    pub fn for_edge(mut self, source: ResourceId, target: ResourceId) -> Self {
        self.edge = Some((source, target));
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.summary)?;
        if let Some(id) = &self.resource {
            write!(f, " ({id})")?;
        }
        if let Some((s, t)) = &self.edge {
            write!(f, " ({s} -> {t})")?;
        }
        Ok(())
    }
}

/// Accumulated diagnostics for one solve.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    pub items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.items.push(diagnostic);
    }

    /// Folds an engine error into a diagnostic with a stable code.
    pub fn push_error(&mut self, error: &EngineError) {
        self.items.push(diagnostic_for(error));
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for item in &self.items {
            writeln!(f, "{item}")?;
        }
        Ok(())
    }
}

fn diagnostic_for(error: &EngineError) -> Diagnostic {
    let summary = error.to_string();
    match error {
        EngineError::ConstraintUnsatisfied => Diagnostic::new("constraint-unsatisfied", summary),
        EngineError::Kb(_) => Diagnostic::new("kb-inconsistency", summary),
        EngineError::PathSelection(inner) => {
            let code = match inner {
                PathSelectionError::NoPath { .. } => "no-path",
                PathSelectionError::AmbiguousShortest { .. } => "ambiguous-shortest",
                PathSelectionError::ValidityFailed { .. } => "validity-failed",
                PathSelectionError::UniquenessViolation { .. } => "uniqueness-violation",
            };
            let diagnostic = Diagnostic::new(code, summary);
            match inner {
                PathSelectionError::NoPath { from, target }
                | PathSelectionError::AmbiguousShortest { from, target }
                | PathSelectionError::ValidityFailed { from, target } => {
                    diagnostic.for_edge(from.clone(), target.clone())
                }
                PathSelectionError::UniquenessViolation {
                    from, requested, ..
                } => diagnostic.for_edge(from.clone(), requested.clone()),
            }
        }
        EngineError::Property(_) => Diagnostic::new("property-error", summary),
        EngineError::Graph(_) => Diagnostic::new("graph-error", summary),
        EngineError::ExpansionFailed { id, .. } => {
            Diagnostic::new("expansion-failed", summary).for_resource(id.clone())
        }
        EngineError::TooManyCombinations { .. } => {
            Diagnostic::new("too-many-combinations", summary)
        }
        EngineError::Canceled => Diagnostic::new("canceled", summary),
    }
}
