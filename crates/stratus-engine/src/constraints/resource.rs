//! Resource-scope constraints: pin, extend, or trim property values.

use serde::{Deserialize, Serialize};

use stratus_core::{PropertyPath, ResourceGraph, ResourceId, Value};
use stratus_kb::KnowledgeBase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceOperator {
    Equals,
    Add,
    Remove,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConstraint {
    pub operator: ResourceOperator,
    pub target: ResourceId,
    pub property: PropertyPath,
    pub value: Value,
}

impl ResourceConstraint {
    /// The expected value, parsed against the declared property type when
    /// the template declares one (so `"aws:vpc::vpc"` compares as an id).
    pub fn typed_value(&self, kb: &KnowledgeBase) -> Value {
        let Some(root) = self.property.root_field() else {
            return self.value.clone();
        };
        kb.resource_template(&self.target)
            .ok()
            .and_then(|t| t.property(root))
            .and_then(|p| p.property_type().ok())
            .and_then(|t| t.parse_value(self.value.clone()).ok())
            .unwrap_or_else(|| self.value.clone())
    }

    pub fn is_satisfied(&self, graph: &ResourceGraph, kb: &KnowledgeBase) -> bool {
        let Some(resource) = graph.resource(&self.target) else {
            return false;
        };
        let current = resource.get_property(&self.property);
        let expected = self.typed_value(kb);
        match self.operator {
            ResourceOperator::Equals => current == Some(&expected),
            ResourceOperator::Add => match current {
                Some(Value::List(items)) => items.contains(&expected),
                Some(value) => value == &expected,
                None => false,
            },
            ResourceOperator::Remove => match current {
                Some(Value::List(items)) => !items.contains(&expected),
                Some(value) => value != &expected,
                None => true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_core::Resource;

    #[test]
    fn equals_compares_current_value() {
        let mut graph = ResourceGraph::new();
        let id: ResourceId = "aws:lambda_function::api".parse().unwrap();
        let mut lambda = Resource::new(id.clone());
        lambda
            .set_property(&"MemorySize".parse().unwrap(), Value::Int(1024))
            .unwrap();
        graph.add_resource(lambda).unwrap();
        let kb = KnowledgeBase::empty();

        let constraint = ResourceConstraint {
            operator: ResourceOperator::Equals,
            target: id,
            property: "MemorySize".parse().unwrap(),
            value: Value::Int(1024),
        };
        assert!(constraint.is_satisfied(&graph, &kb));
    }

    #[test]
    fn remove_is_satisfied_when_value_absent() {
        let mut graph = ResourceGraph::new();
        let id: ResourceId = "aws:lambda_function::api".parse().unwrap();
        graph.add_resource(Resource::new(id.clone())).unwrap();
        let kb = KnowledgeBase::empty();

        let constraint = ResourceConstraint {
            operator: ResourceOperator::Remove,
            target: id,
            property: "Subnets".parse().unwrap(),
            value: Value::from("anything"),
        };
        assert!(constraint.is_satisfied(&graph, &kb));
    }
}
