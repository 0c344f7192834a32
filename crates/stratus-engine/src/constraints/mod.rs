//! Typed constraints over a solve.
//!
//! Constraints arrive in four scopes -- application, construct, edge, and
//! resource -- and are applied at different points of a run: application
//! and edge constraints mutate the working construct graph up front,
//! construct constraints steer expansion, and resource constraints
//! configure resources before the evaluator runs.
//!
//! Every constraint answers [`Constraint::is_satisfied`] against the final
//! graph; satisfaction checks never error, they only report.

pub mod application;
pub mod construct;
pub mod edge;
pub mod resource;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use stratus_core::{ResourceGraph, ResourceId};
use stratus_kb::KnowledgeBase;

pub use application::{ApplicationConstraint, ApplicationOperator};
pub use construct::{ConstructConstraint, ConstructOperator};
pub use edge::{EdgeConstraint, EdgeOperator, EdgeTarget};
pub use resource::{ResourceConstraint, ResourceOperator};

/// Constraint scopes, in application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintScope {
    Application,
    Construct,
    Edge,
    Resource,
}

/// A constraint of any scope.
///
/// Serialized with the scope as the tag, matching the constraints file
/// format. Unsupported scope/operator combinations (such as a resource
/// `must_not_exist`) are rejected at deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "lowercase")]
pub enum Constraint {
    Application(ApplicationConstraint),
    Construct(ConstructConstraint),
    Edge(EdgeConstraint),
    Resource(ResourceConstraint),
}

impl Constraint {
    pub fn scope(&self) -> ConstraintScope {
        match self {
            Constraint::Application(_) => ConstraintScope::Application,
            Constraint::Construct(_) => ConstraintScope::Construct,
            Constraint::Edge(_) => ConstraintScope::Edge,
            Constraint::Resource(_) => ConstraintScope::Resource,
        }
    }

    /// Whether the final graph satisfies this constraint.
    pub fn is_satisfied(
        &self,
        graph: &ResourceGraph,
        kb: &KnowledgeBase,
        construct_map: &IndexMap<ResourceId, Vec<ResourceId>>,
    ) -> bool {
        match self {
            Constraint::Application(c) => c.is_satisfied(graph, construct_map),
            Constraint::Construct(c) => c.is_satisfied(graph, construct_map),
            Constraint::Edge(c) => c.is_satisfied(graph, construct_map),
            Constraint::Resource(c) => c.is_satisfied(graph, kb),
        }
    }
}

/// Resolves an endpoint that may still name a construct to the concrete
/// resources it mapped to.
pub(crate) fn resolve_endpoint(
    id: &ResourceId,
    graph: &ResourceGraph,
    construct_map: &IndexMap<ResourceId, Vec<ResourceId>>,
) -> Vec<ResourceId> {
    if let Some(mapped) = construct_map.get(id) {
        return mapped.clone();
    }
    if graph.contains(id) {
        return vec![id.clone()];
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_tag_selects_variant() {
        let yaml = r#"
scope: construct
operator: equals
target: abstract:execution_unit::api
type: lambda_function
"#;
        let constraint: Constraint = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(constraint.scope(), ConstraintScope::Construct);
    }

    #[test]
    fn resource_must_not_exist_is_rejected() {
        let yaml = r#"
scope: resource
operator: must_not_exist
target: aws:lambda_function::api
property: MemorySize
value: 512
"#;
        assert!(serde_yaml::from_str::<Constraint>(yaml).is_err());
    }
}
