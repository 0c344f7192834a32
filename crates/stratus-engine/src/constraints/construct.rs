//! Construct-scope constraints: pin a construct to a concrete type with
//! attribute requirements.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use stratus_core::{ResourceGraph, ResourceId, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstructOperator {
    Equals,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstructConstraint {
    pub operator: ConstructOperator,
    /// The abstract construct being pinned.
    pub target: ResourceId,
    /// Concrete resource type name (`lambda_function`, `rds_instance`).
    #[serde(rename = "type")]
    pub construct_type: String,
    /// Attribute requirements; keys are classification attributes the
    /// expansion must cover.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub attributes: IndexMap<String, Value>,
}

impl ConstructConstraint {
    pub fn is_satisfied(
        &self,
        graph: &ResourceGraph,
        construct_map: &IndexMap<ResourceId, Vec<ResourceId>>,
    ) -> bool {
        let Some(mapped) = construct_map.get(&self.target) else {
            return false;
        };
        mapped
            .iter()
            .any(|id| id.rtype == self.construct_type && graph.contains(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_core::Resource;

    #[test]
    fn satisfied_when_mapped_resource_has_type() {
        let mut graph = ResourceGraph::new();
        let lambda: ResourceId = "aws:lambda_function::api".parse().unwrap();
        graph.add_resource(Resource::new(lambda.clone())).unwrap();
        let mut map = IndexMap::new();
        map.insert(
            "abstract:execution_unit::api".parse().unwrap(),
            vec![lambda],
        );
        let constraint = ConstructConstraint {
            operator: ConstructOperator::Equals,
            target: "abstract:execution_unit::api".parse().unwrap(),
            construct_type: "lambda_function".to_string(),
            attributes: IndexMap::new(),
        };
        assert!(constraint.is_satisfied(&graph, &map));
    }

    #[test]
    fn unsatisfied_without_mapping() {
        let graph = ResourceGraph::new();
        let constraint = ConstructConstraint {
            operator: ConstructOperator::Equals,
            target: "abstract:execution_unit::api".parse().unwrap(),
            construct_type: "lambda_function".to_string(),
            attributes: IndexMap::new(),
        };
        assert!(!constraint.is_satisfied(&graph, &IndexMap::new()));
    }
}
