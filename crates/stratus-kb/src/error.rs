//! Knowledge base errors.
//!
//! [`KbError::Inconsistency`] is the fatal class: a catalogue that fails its
//! boot-time consistency check cannot be used for any synthesis run.

use thiserror::Error;

use stratus_core::PropertyError;

/// Errors produced while loading or querying the knowledge base.
#[derive(Debug, Error)]
pub enum KbError {
    /// The catalogue violates its own invariants (dangling edge endpoint,
    /// duplicate edge template, duplicate resource template).
    #[error("knowledge base inconsistency: {reason}")]
    Inconsistency { reason: String },

    /// No resource template is registered for the qualified type.
    #[error("no resource template for '{qualified_type}'")]
    TemplateNotFound { qualified_type: String },

    /// A property type expression could not be parsed.
    #[error("invalid property type '{spec}'")]
    InvalidType { spec: String },

    /// A templated expression failed to render or evaluate.
    #[error("template evaluation failed for '{expr}': {reason}")]
    Eval { expr: String, reason: String },

    #[error(transparent)]
    Property(#[from] PropertyError),

    #[error("failed to read knowledge base files: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse knowledge base yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
}

impl KbError {
    pub fn eval(expr: impl Into<String>, err: impl std::fmt::Display) -> Self {
        KbError::Eval {
            expr: expr.into(),
            reason: err.to_string(),
        }
    }
}
