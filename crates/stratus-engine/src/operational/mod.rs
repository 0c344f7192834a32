//! Operational rule evaluation.
//!
//! [`evaluator`] drives a solution graph to its operational fixed point;
//! [`rule`] holds the step and configuration machinery shared with path
//! selection.

pub mod evaluator;
pub mod rule;

pub use evaluator::{solve, EvaluatorConfig};
pub use rule::RuleRunner;
