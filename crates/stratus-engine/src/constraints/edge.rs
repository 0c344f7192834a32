//! Edge-scope constraints: require, forbid, or shape the path between two
//! endpoints.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use stratus_core::{ResourceGraph, ResourceId};

use super::resolve_endpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeOperator {
    MustExist,
    MustNotExist,
    MustContain,
    MustNotContain,
}

/// The dependency an edge constraint talks about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeTarget {
    pub source: ResourceId,
    pub destination: ResourceId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeConstraint {
    pub operator: EdgeOperator,
    pub target: EdgeTarget,
    /// For `must_contain`/`must_not_contain`: a type selector the expanded
    /// path must (not) include.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<ResourceId>,
}

impl EdgeConstraint {
    pub fn is_satisfied(
        &self,
        graph: &ResourceGraph,
        construct_map: &IndexMap<ResourceId, Vec<ResourceId>>,
    ) -> bool {
        let sources = resolve_endpoint(&self.target.source, graph, construct_map);
        let targets = resolve_endpoint(&self.target.destination, graph, construct_map);
        match self.operator {
            EdgeOperator::MustExist => any_pair(&sources, &targets, |s, t| {
                !graph.all_paths(s, t).is_empty()
            }),
            EdgeOperator::MustNotExist => {
                !any_pair(&sources, &targets, |s, t| graph.edge(s, t).is_some())
            }
            EdgeOperator::MustContain => {
                let Some(node) = &self.node else { return false };
                any_pair(&sources, &targets, |s, t| {
                    graph
                        .all_paths(s, t)
                        .iter()
                        .any(|path| path.iter().any(|id| node.matches(id)))
                })
            }
            EdgeOperator::MustNotContain => {
                let Some(node) = &self.node else { return true };
                !any_pair(&sources, &targets, |s, t| {
                    graph
                        .all_paths(s, t)
                        .iter()
                        .any(|path| path.iter().any(|id| node.matches(id)))
                })
            }
        }
    }
}

fn any_pair<F>(sources: &[ResourceId], targets: &[ResourceId], mut check: F) -> bool
where
    F: FnMut(&ResourceId, &ResourceId) -> bool,
{
    sources
        .iter()
        .any(|s| targets.iter().any(|t| check(s, t)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_core::{EdgeProps, Resource};

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    fn chain() -> ResourceGraph {
        let mut graph = ResourceGraph::new();
        for s in [
            "aws:lambda_function::api",
            "aws:rds_proxy::api-db",
            "aws:rds_instance::db",
        ] {
            graph.add_resource(Resource::new(id(s))).unwrap();
        }
        graph
            .add_edge(
                &id("aws:lambda_function::api"),
                &id("aws:rds_proxy::api-db"),
                EdgeProps::default(),
            )
            .unwrap();
        graph
            .add_edge(
                &id("aws:rds_proxy::api-db"),
                &id("aws:rds_instance::db"),
                EdgeProps::default(),
            )
            .unwrap();
        graph
    }

    #[test]
    fn must_contain_matches_type_selector() {
        let graph = chain();
        let constraint = EdgeConstraint {
            operator: EdgeOperator::MustContain,
            target: EdgeTarget {
                source: id("aws:lambda_function::api"),
                destination: id("aws:rds_instance::db"),
            },
            node: Some(id("aws:rds_proxy")),
        };
        assert!(constraint.is_satisfied(&graph, &IndexMap::new()));
    }

    #[test]
    fn must_exist_follows_paths_not_just_edges() {
        let graph = chain();
        let constraint = EdgeConstraint {
            operator: EdgeOperator::MustExist,
            target: EdgeTarget {
                source: id("aws:lambda_function::api"),
                destination: id("aws:rds_instance::db"),
            },
            node: None,
        };
        assert!(constraint.is_satisfied(&graph, &IndexMap::new()));
    }
}
