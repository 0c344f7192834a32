pub mod constraints;
pub mod diagnostics;
pub mod error;
pub mod expansion;
pub mod operational;
pub mod orchestrator;
pub mod path_selection;
pub mod solution;

// Re-export commonly used types
pub use constraints::{Constraint, ConstraintScope};
pub use diagnostics::{Diagnostic, Diagnostics};
pub use error::{EngineError, PathSelectionError};
pub use expansion::{expand_constructs, generate_combinations, ExpansionSolution};
pub use operational::{solve, EvaluatorConfig};
pub use orchestrator::{
    FailureKind, Orchestrator, OrchestratorConfig, SolveFailure, SolveOutput, PLAN_ITERATIONS_ENV,
};
pub use path_selection::{expand_edge, ExpansionInput, ExpansionResult, PHANTOM_PREFIX};
pub use solution::{CancellationToken, Decision, SolutionContext};
