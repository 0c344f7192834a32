//! Application-scope constraints: add, remove, replace, and import nodes.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use stratus_core::{ResourceGraph, ResourceId};

use super::resolve_endpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationOperator {
    Add,
    Remove,
    Replace,
    Import,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConstraint {
    pub operator: ApplicationOperator,
    pub node: ResourceId,
    /// Only meaningful for `replace`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement_node: Option<ResourceId>,
    /// Only meaningful for `import`: the provider-side identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

impl ApplicationConstraint {
    pub fn is_satisfied(
        &self,
        graph: &ResourceGraph,
        construct_map: &IndexMap<ResourceId, Vec<ResourceId>>,
    ) -> bool {
        match self.operator {
            ApplicationOperator::Add => {
                !resolve_endpoint(&self.node, graph, construct_map).is_empty()
            }
            ApplicationOperator::Remove => {
                resolve_endpoint(&self.node, graph, construct_map).is_empty()
            }
            ApplicationOperator::Replace => {
                let old_gone = resolve_endpoint(&self.node, graph, construct_map).is_empty();
                let new_present = self
                    .replacement_node
                    .as_ref()
                    .map(|new| !resolve_endpoint(new, graph, construct_map).is_empty())
                    .unwrap_or(false);
                old_gone && new_present
            }
            ApplicationOperator::Import => graph
                .resource(&self.node)
                .map(|r| r.imported.as_deref() == self.external_id.as_deref())
                .unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_core::Resource;

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    #[test]
    fn add_satisfied_when_node_present() {
        let mut graph = ResourceGraph::new();
        graph
            .add_resource(Resource::new(id("aws:vpc::vpc")))
            .unwrap();
        let constraint = ApplicationConstraint {
            operator: ApplicationOperator::Add,
            node: id("aws:vpc::vpc"),
            replacement_node: None,
            external_id: None,
        };
        assert!(constraint.is_satisfied(&graph, &IndexMap::new()));
    }

    #[test]
    fn replace_requires_old_gone_and_new_present() {
        let mut graph = ResourceGraph::new();
        graph
            .add_resource(Resource::new(id("aws:ecs_service::api")))
            .unwrap();
        let constraint = ApplicationConstraint {
            operator: ApplicationOperator::Replace,
            node: id("abstract:execution_unit::api"),
            replacement_node: Some(id("aws:ecs_service::api")),
            external_id: None,
        };
        assert!(constraint.is_satisfied(&graph, &IndexMap::new()));
    }

    #[test]
    fn import_checks_external_id() {
        let mut graph = ResourceGraph::new();
        let mut vpc = Resource::new(id("aws:vpc::vpc"));
        vpc.imported = Some("vpc-12345".to_string());
        graph.add_resource(vpc).unwrap();
        let constraint = ApplicationConstraint {
            operator: ApplicationOperator::Import,
            node: id("aws:vpc::vpc"),
            replacement_node: None,
            external_id: Some("vpc-12345".to_string()),
        };
        assert!(constraint.is_satisfied(&graph, &IndexMap::new()));
    }
}
