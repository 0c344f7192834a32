//! Construct expansion.
//!
//! Turns each abstract construct into the set of concrete resource
//! sub-graphs that could realize it: a base resource providing the
//! construct's functionality, plus one covering resource per requested
//! attribute. The orchestrator forms the cartesian product of the
//! per-construct solution lists and solves each combination in order.

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use stratus_core::{EdgeProps, Resource, ResourceGraph, ResourceId};
use stratus_kb::{KnowledgeBase, ResourceTemplate};

use crate::constraints::{Constraint, ConstructConstraint};
use crate::error::EngineError;

/// One way to realize a construct.
#[derive(Debug, Clone)]
pub struct ExpansionSolution {
    /// The concrete sub-graph: base resource plus attribute resources.
    pub graph: ResourceGraph,
    /// Resources construct-level edges attach to (the base resource).
    pub directly_mapped: Vec<ResourceId>,
}

/// Candidate solutions for every construct in the working graph, keyed by
/// construct id in reverse topological order so leaves expand first.
pub fn expand_constructs(
    working: &ResourceGraph,
    constraints: &[Constraint],
    kb: &KnowledgeBase,
) -> Result<IndexMap<ResourceId, Vec<ExpansionSolution>>, EngineError> {
    let mut order = working.topological_order()?;
    order.reverse();

    let mut result = IndexMap::new();
    for id in order {
        if !id.is_abstract() {
            continue;
        }
        let construct = working
            .resource(&id)
            .ok_or_else(|| EngineError::ExpansionFailed {
                id: id.clone(),
                reason: "construct vanished from the working graph".to_string(),
            })?;
        let constraint = construct_constraint_for(&id, constraints);
        let solutions = expand_one(construct, constraint, kb)?;
        if solutions.is_empty() {
            return Err(EngineError::ExpansionFailed {
                id: id.clone(),
                reason: match constraint {
                    Some(c) => format!("no '{}' candidate covers the requested attributes", c.construct_type),
                    None => "no resource type provides the required functionality".to_string(),
                },
            });
        }
        debug!(construct = %id, count = solutions.len(), "expanded construct");
        result.insert(id, solutions);
    }
    Ok(result)
}

fn construct_constraint_for<'a>(
    id: &ResourceId,
    constraints: &'a [Constraint],
) -> Option<&'a ConstructConstraint> {
    constraints.iter().find_map(|c| match c {
        Constraint::Construct(c) if &c.target == id => Some(c),
        _ => None,
    })
}

fn expand_one(
    construct: &Resource,
    constraint: Option<&ConstructConstraint>,
    kb: &KnowledgeBase,
) -> Result<Vec<ExpansionSolution>, EngineError> {
    let capability = construct.id.rtype.as_str();
    let functionality = kb
        .functionality_for_capability(capability)
        .ok_or_else(|| EngineError::ExpansionFailed {
            id: construct.id.clone(),
            reason: format!("unknown construct capability '{capability}'"),
        })?
        .to_string();

    let mut bases: Vec<&ResourceTemplate> = kb.templates_with_classification(&functionality);
    bases.sort_by(|a, b| a.qualified_type.cmp(&b.qualified_type));
    if let Some(constraint) = constraint {
        bases.retain(|t| t.type_name() == constraint.construct_type);
    }

    let attributes: Vec<String> = constraint
        .map(|c| c.attributes.keys().cloned().collect())
        .unwrap_or_default();

    let mut solutions = Vec::new();
    let mut seen: IndexSet<String> = IndexSet::new();
    for base in bases {
        let base_id = ResourceId::new(
            base.provider(),
            base.type_name(),
            "",
            construct.id.name.clone(),
        );
        let mut base_resource = base.create_resource(base_id.clone())?;
        copy_construct_metadata(construct, base, &mut base_resource)?;

        let mut graph = ResourceGraph::new();
        graph.add_resource(base_resource)?;

        let unsatisfied: Vec<String> = attributes
            .iter()
            .filter(|a| !base.has_classification(a))
            .cloned()
            .collect();
        for candidate in find_expansions(&unsatisfied, graph, base, &construct.id.name, &functionality, kb)? {
            if seen.insert(canonical_form(&candidate)) {
                solutions.push(ExpansionSolution {
                    graph: candidate,
                    directly_mapped: vec![base_id.clone()],
                });
            }
        }
    }
    Ok(solutions)
}

/// Construct parameters whose names match template properties carry over to
/// the base resource (e.g. a `Dockerfile` hint onto the image property is a
/// renderer concern, but memory and timeout land directly).
fn copy_construct_metadata(
    construct: &Resource,
    template: &ResourceTemplate,
    base: &mut Resource,
) -> Result<(), EngineError> {
    for (name, value) in &construct.properties {
        let Some(property) = template.property(name) else {
            continue;
        };
        let parsed = property
            .property_type()
            .map_err(EngineError::Kb)?
            .parse_value(value.clone())
            .map_err(EngineError::Property)?;
        base.set_property(&name.parse().map_err(EngineError::Property)?, parsed)
            .map_err(EngineError::Property)?;
    }
    Ok(())
}

/// Recursive attribute cover: attach one resource per unsatisfied
/// attribute, restricted to types with a knowledge-base path to the base.
fn find_expansions(
    attributes: &[String],
    graph: ResourceGraph,
    base: &ResourceTemplate,
    construct_name: &str,
    functionality: &str,
    kb: &KnowledgeBase,
) -> Result<Vec<ResourceGraph>, EngineError> {
    if attributes.is_empty() {
        return Ok(vec![graph]);
    }
    let base_id = ResourceId::new(base.provider(), base.type_name(), "", construct_name);
    let mut expansions = Vec::new();
    for attribute in attributes {
        let mut candidates: Vec<&ResourceTemplate> = kb
            .templates()
            .filter(|t| t.qualified_type != base.qualified_type)
            .filter(|t| t.gives_attribute(attribute, functionality))
            .filter(|t| !kb.type_paths(&base.qualified_type, &t.qualified_type, "").is_empty())
            .collect();
        candidates.sort_by(|a, b| a.qualified_type.cmp(&b.qualified_type));
        for candidate in candidates {
            let mut extended = graph.clone();
            let candidate_id = ResourceId::new(
                candidate.provider(),
                candidate.type_name(),
                "",
                format!("{construct_name}-{}", candidate.type_name()),
            );
            extended.add_resource_if_missing(candidate.create_resource(candidate_id.clone())?);
            if extended.edge(&base_id, &candidate_id).is_none() {
                let reversed = kb
                    .edge_template(&base.qualified_type, &candidate.qualified_type)
                    .map(|t| t.deployment_order_reversed)
                    .unwrap_or(false);
                extended.add_edge(
                    &base_id,
                    &candidate_id,
                    EdgeProps {
                        deployment_order_reversed: reversed,
                        ..Default::default()
                    },
                )?;
            }
            let remaining: Vec<String> = attributes
                .iter()
                .filter(|a| *a != attribute)
                .cloned()
                .collect();
            expansions.extend(find_expansions(
                &remaining,
                extended,
                base,
                construct_name,
                functionality,
                kb,
            )?);
        }
    }
    Ok(expansions)
}

/// Canonical string of a sub-graph, used to deduplicate equivalent
/// expansions.
fn canonical_form(graph: &ResourceGraph) -> String {
    let nodes: Vec<String> = graph.sorted_ids().iter().map(|id| id.to_string()).collect();
    let edges: Vec<String> = graph
        .edges()
        .iter()
        .map(|(s, t, _)| format!("{s}->{t}"))
        .collect();
    format!("{}|{}", nodes.join(","), edges.join(","))
}

/// The cartesian product of per-construct solution choices, as index
/// vectors aligned with `expansions` iteration order. Fails once the
/// product exceeds `cap` rather than silently truncating.
pub fn generate_combinations(
    expansions: &IndexMap<ResourceId, Vec<ExpansionSolution>>,
    cap: usize,
) -> Result<Vec<IndexMap<ResourceId, usize>>, EngineError> {
    let mut count: usize = 1;
    for solutions in expansions.values() {
        count = count.saturating_mul(solutions.len());
        if count > cap {
            return Err(EngineError::TooManyCombinations { count, cap });
        }
    }
    let mut combinations: Vec<IndexMap<ResourceId, usize>> = vec![IndexMap::new()];
    for (construct, solutions) in expansions {
        let mut next = Vec::with_capacity(combinations.len() * solutions.len());
        for combination in &combinations {
            for index in 0..solutions.len() {
                let mut extended = combination.clone();
                extended.insert(construct.clone(), index);
                next.push(extended);
            }
        }
        combinations = next;
    }
    Ok(combinations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn kb() -> Arc<KnowledgeBase> {
        Arc::new(KnowledgeBase::embedded().unwrap())
    }

    fn construct(name: &str, capability: &str) -> Resource {
        Resource::new(ResourceId::new("abstract", capability, "", name))
    }

    #[test]
    fn unconstrained_compute_yields_all_compute_bases() {
        let kb = kb();
        let mut working = ResourceGraph::new();
        working
            .add_resource(construct("api", "execution_unit"))
            .unwrap();
        let expansions = expand_constructs(&working, &[], &kb).unwrap();
        let solutions = &expansions[&"abstract:execution_unit::api".parse::<ResourceId>().unwrap()];
        // ecs_service and lambda_function both classify as compute.
        assert_eq!(solutions.len(), 2);
        for solution in solutions {
            assert_eq!(solution.directly_mapped.len(), 1);
            assert_eq!(solution.graph.len(), 1);
        }
    }

    #[test]
    fn constraint_pins_base_type() {
        let kb = kb();
        let mut working = ResourceGraph::new();
        working
            .add_resource(construct("api", "execution_unit"))
            .unwrap();
        let constraint: Constraint = serde_yaml::from_str(
            r#"
scope: construct
operator: equals
target: abstract:execution_unit::api
type: lambda_function
"#,
        )
        .unwrap();
        let expansions = expand_constructs(&working, &[constraint], &kb).unwrap();
        let solutions = &expansions[&"abstract:execution_unit::api".parse::<ResourceId>().unwrap()];
        assert_eq!(solutions.len(), 1);
        assert!(solutions[0]
            .graph
            .contains(&"aws:lambda_function::api".parse().unwrap()));
    }

    #[test]
    fn attributes_attach_covering_resources() {
        let kb = kb();
        let mut working = ResourceGraph::new();
        working
            .add_resource(construct("api", "execution_unit"))
            .unwrap();
        let constraint: Constraint = serde_yaml::from_str(
            r#"
scope: construct
operator: equals
target: abstract:execution_unit::api
type: ecs_service
attributes:
  scalability: true
"#,
        )
        .unwrap();
        let expansions = expand_constructs(&working, &[constraint], &kb).unwrap();
        let solutions = &expansions[&"abstract:execution_unit::api".parse::<ResourceId>().unwrap()];
        assert_eq!(solutions.len(), 1);
        let graph = &solutions[0].graph;
        assert_eq!(graph.len(), 2);
        assert!(graph.contains(&"aws:ecs_cluster::api-ecs_cluster".parse().unwrap()));
    }

    #[test]
    fn unknown_capability_fails_expansion() {
        let kb = kb();
        let mut working = ResourceGraph::new();
        working.add_resource(construct("x", "teleporter")).unwrap();
        let err = expand_constructs(&working, &[], &kb).unwrap_err();
        assert!(matches!(err, EngineError::ExpansionFailed { .. }));
    }

    #[test]
    fn combination_cap_is_enforced() {
        let mut expansions: IndexMap<ResourceId, Vec<ExpansionSolution>> = IndexMap::new();
        let solution = ExpansionSolution {
            graph: ResourceGraph::new(),
            directly_mapped: vec![],
        };
        for i in 0..4 {
            expansions.insert(
                ResourceId::new("abstract", "execution_unit", "", format!("c{i}")),
                vec![solution.clone(), solution.clone(), solution.clone()],
            );
        }
        // 3^4 = 81 combinations over a cap of 10.
        let err = generate_combinations(&expansions, 10).unwrap_err();
        assert!(matches!(err, EngineError::TooManyCombinations { .. }));
        let ok = generate_combinations(&expansions, 100).unwrap();
        assert_eq!(ok.len(), 81);
    }
}
