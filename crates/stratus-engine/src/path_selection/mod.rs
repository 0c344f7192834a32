//! Edge expansion: synthesizing a valid resource path for a dependency.
//!
//! Given a dataflow dependency `source -> target`, expansion builds a
//! *path-selection graph* containing the two endpoints, phantom placeholder
//! vertices for every type on any knowledge-base path between them, and
//! every reusable in-graph resource of those types. Candidate edges are
//! weighted (reuse preferred, validity failures demoted, uniqueness
//! violations excluded), the stable shortest path is selected, phantoms on
//! it are renamed `"<source>-<target>"` and materialized from their
//! templates, and the path's properties are configured in reverse order so
//! namespaces settle before the references pointing at them.
//!
//! Intermediates that declare their own path-satisfaction classes enqueue
//! sub-expansions, which the evaluator drives on the next pass.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use tracing::{debug, warn};

use stratus_core::{EdgeData, EdgeProps, Resource, ResourceGraph, ResourceId};
use stratus_kb::{DynamicData, Layer};

use crate::error::{EngineError, PathSelectionError};
use crate::operational::rule::{edges_of_type_pair, selector_matches, set_field};
use crate::solution::{Decision, SolutionContext};

/// Name prefix of placeholder vertices in the selection graph.
pub const PHANTOM_PREFIX: &str = "phantom-";

/// Reuse bonus applied to edges touching an existing in-graph resource.
const REUSE_WEIGHT: i64 = 10;
/// Per-edge cost keeping shorter paths preferred at equal reuse.
const HOP_WEIGHT: i64 = -1;
/// Demotion for candidates failing their template validity checks; they
/// stay selectable as a last resort.
const INVALID_WEIGHT: i64 = -1000;

/// One edge-expansion request.
#[derive(Debug, Clone)]
pub struct ExpansionInput {
    pub source: ResourceId,
    pub target: ResourceId,
    /// Path-satisfaction class every intermediate must carry ("" for none).
    pub classification: String,
    pub data: EdgeData,
}

impl ExpansionInput {
    pub fn new(source: ResourceId, target: ResourceId) -> Self {
        ExpansionInput {
            source,
            target,
            classification: String::new(),
            data: EdgeData::default(),
        }
    }
}

/// Outcome of one expansion.
#[derive(Debug, Default)]
pub struct ExpansionResult {
    /// The materialized path, source and target included. Empty when the
    /// dependency was already direct or satisfied through a namespace.
    pub path: Vec<ResourceId>,
    /// Dependencies whose expansion the path requires next.
    pub sub_expansions: Vec<(ResourceId, ResourceId)>,
}

/// Expands one dependency into the solution graph.
pub fn expand_edge(
    ctx: &mut SolutionContext,
    input: &ExpansionInput,
) -> Result<ExpansionResult, EngineError> {
    if connect_through_namespace(ctx, input)? {
        return Ok(ExpansionResult::default());
    }

    let (mut temp, mut conflicts) = build_selection_graph(ctx, input)?;
    add_reuse_candidates(ctx, input, &mut temp, &mut conflicts)?;

    let Some(selected) = temp.shortest_path_stable(&input.source, &input.target) else {
        // Conflicts between two concrete resources name the actual ids;
        // prefer those over ones involving an unnamed phantom.
        let concrete = conflicts.iter().position(|c| match c {
            PathSelectionError::UniquenessViolation {
                requested, blocked, ..
            } => {
                !requested.name.starts_with(PHANTOM_PREFIX)
                    && !blocked.name.starts_with(PHANTOM_PREFIX)
            }
            _ => false,
        });
        let conflict = match concrete {
            Some(i) => Some(conflicts.swap_remove(i)),
            None => conflicts.into_iter().next(),
        };
        return Err(EngineError::PathSelection(match conflict {
            Some(conflict) => conflict,
            None => PathSelectionError::NoPath {
                from: input.source.clone(),
                target: input.target.clone(),
            },
        }));
    };
    if selected.ambiguous {
        warn!(source = %input.source, target = %input.target,
            "multiple equal-weight shortest paths; picking the lexicographically first");
        ctx.decisions.push(Decision::AmbiguousPath {
            source: input.source.clone(),
            target: input.target.clone(),
        });
    }
    if selected.nodes.len() == 2 {
        // Direct dependency; nothing to materialize.
        return Ok(ExpansionResult::default());
    }
    debug!(source = %input.source, target = %input.target, len = selected.nodes.len(),
        "selected expansion path");

    let path = rename_phantoms(ctx, &mut temp, selected.nodes, input)?;
    materialize_path(ctx, &path)?;

    // The direct edge is replaced by the materialized path.
    if ctx.graph.edge(&input.source, &input.target).is_some() {
        ctx.graph.remove_edge(&input.source, &input.target)?;
        ctx.decisions.push(Decision::EdgeRemoved {
            source: input.source.clone(),
            target: input.target.clone(),
        });
    }

    let path = handle_properties(ctx, path)?;
    let sub_expansions = find_sub_expansions(ctx, &path)?;
    Ok(ExpansionResult {
        path,
        sub_expansions,
    })
}

/// Tries to satisfy the dependency by routing through a resource already
/// namespaced to the target's namespace. Success short-circuits expansion.
fn connect_through_namespace(
    ctx: &mut SolutionContext,
    input: &ExpansionInput,
) -> Result<bool, EngineError> {
    let Some(namespace) = ctx.kb.namespace_resource(&ctx.graph, &input.target) else {
        return Ok(false);
    };
    let siblings = stratus_kb::query::downstream(&ctx.graph, &ctx.kb, &input.source, Layer::Local);
    for sibling in siblings {
        if sibling == input.target {
            continue;
        }
        if ctx.kb.namespace_resource(&ctx.graph, &sibling) == Some(namespace.clone())
            && ctx.kb.edge_template_for(&sibling, &input.target).is_some()
            && ctx.graph.edge(&sibling, &input.target).is_none()
        {
            debug!(source = %input.source, target = %input.target, via = %sibling,
                "connected through namespace sibling");
            ctx.add_dependency(&sibling, &input.target, EdgeData::default())?;
            return Ok(true);
        }
    }
    Ok(false)
}

/// Builds the phantom skeleton of the selection graph: endpoints plus one
/// phantom per intermediate type on any admissible knowledge-base path.
fn build_selection_graph(
    ctx: &SolutionContext,
    input: &ExpansionInput,
) -> Result<(ResourceGraph, Vec<PathSelectionError>), EngineError> {
    let source_type = input.source.qualified_type();
    let target_type = input.target.qualified_type();
    let type_paths = admissible_type_paths(ctx, input, &source_type, &target_type);
    if type_paths.is_empty() {
        return Err(EngineError::PathSelection(PathSelectionError::NoPath {
            from: input.source.clone(),
            target: input.target.clone(),
        }));
    }

    let mut temp = ResourceGraph::new();
    let source_resource = ctx
        .graph
        .resource(&input.source)
        .cloned()
        .unwrap_or_else(|| Resource::new(input.source.clone()));
    let target_resource = ctx
        .graph
        .resource(&input.target)
        .cloned()
        .unwrap_or_else(|| Resource::new(input.target.clone()));
    temp.add_resource(source_resource)?;
    temp.add_resource(target_resource)?;

    // One phantom per intermediate type, shared across paths.
    let mut phantoms: IndexMap<String, ResourceId> = IndexMap::new();
    let mut conflicts = Vec::new();
    for path in &type_paths {
        for qualified in &path[1..path.len() - 1] {
            if phantoms.contains_key(qualified) {
                continue;
            }
            let template = ctx.kb.get_template(qualified)?;
            let id = ResourceId::new(
                template.provider(),
                template.type_name(),
                "",
                format!("{PHANTOM_PREFIX}{}", phantoms.len()),
            );
            temp.add_resource(Resource::new(id.clone()))?;
            phantoms.insert(qualified.clone(), id);
        }
    }

    // Path endpoints map to the concrete source/target; everything in
    // between maps to its type's phantom.
    let resolve = |qualified: &str, position: usize, len: usize| -> ResourceId {
        if position == 0 {
            input.source.clone()
        } else if position == len - 1 {
            input.target.clone()
        } else {
            phantoms[qualified].clone()
        }
    };

    for path in &type_paths {
        for (i, pair) in path.windows(2).enumerate() {
            let u = resolve(&pair[0], i, path.len());
            let v = resolve(&pair[1], i + 1, path.len());
            if temp.edge(&u, &v).is_some() {
                continue;
            }
            if !uniqueness_allows(ctx, &u, &v, &mut conflicts) {
                continue;
            }
            let weight = HOP_WEIGHT + phantom_validity_weight(ctx, input, &u)?
                + phantom_validity_weight(ctx, input, &v)?;
            // An edge the temp graph rejects (cycle among shared phantoms)
            // just means that hop is unusable on this path.
            let _ = temp.add_edge(&u, &v, EdgeProps::with_weight(weight));
        }
    }
    Ok((temp, conflicts))
}

/// Type paths filtered by the edge data's must-exist / must-not-exist
/// entries.
fn admissible_type_paths(
    ctx: &SolutionContext,
    input: &ExpansionInput,
    source_type: &str,
    target_type: &str,
) -> Vec<Vec<String>> {
    let must_exist: Vec<String> = input
        .data
        .must_exist
        .iter()
        .map(|id| id.qualified_type())
        .collect();
    let must_not_exist: Vec<String> = input
        .data
        .must_not_exist
        .iter()
        .map(|id| id.qualified_type())
        .collect();
    ctx.kb
        .type_paths(source_type, target_type, &input.classification)
        .into_iter()
        .filter(|path| must_exist.iter().all(|t| path.contains(t)))
        .filter(|path| !must_not_exist.iter().any(|t| path.contains(t)))
        .collect()
}

/// Existing in-graph resources become reuse candidates alongside the
/// phantom of their type: same adjacency, boosted weight.
fn add_reuse_candidates(
    ctx: &SolutionContext,
    input: &ExpansionInput,
    temp: &mut ResourceGraph,
    conflicts: &mut Vec<PathSelectionError>,
) -> Result<(), EngineError> {
    let target_namespace = ctx.kb.namespace_resource(&ctx.graph, &input.target);

    // Snapshot the phantom skeleton before inserting candidates.
    let phantom_ids: Vec<ResourceId> = temp
        .sorted_ids()
        .into_iter()
        .filter(|id| id.name.starts_with(PHANTOM_PREFIX))
        .collect();
    let skeleton: Vec<(ResourceId, ResourceId, i64)> = temp
        .edges()
        .into_iter()
        .map(|(s, t, props)| (s, t, props.weight))
        .collect();

    // Candidates per phantom slot, each with its validity adjustment.
    let mut candidate_map: IndexMap<ResourceId, Vec<(ResourceId, i64)>> = IndexMap::new();
    for phantom in &phantom_ids {
        let mut slot = Vec::new();
        for candidate in ctx.graph.sorted_ids() {
            if candidate.qualified_type() != phantom.qualified_type()
                || candidate == input.source
                || candidate == input.target
            {
                continue;
            }
            // Namespace validity: a candidate bound to a different
            // namespace than the target cannot carry the path.
            if let (Some(candidate_ns), Some(target_ns)) = (
                ctx.kb.namespace_resource(&ctx.graph, &candidate),
                target_namespace.as_ref(),
            ) {
                if &candidate_ns != target_ns {
                    continue;
                }
            }
            let validity = validity_weight(ctx, input, &candidate)?;
            temp.add_resource_if_missing(
                ctx.graph
                    .resource(&candidate)
                    .cloned()
                    .unwrap_or_else(|| Resource::new(candidate.clone())),
            );
            slot.push((candidate, validity));
        }
        candidate_map.insert(phantom.clone(), slot);
    }

    // Mirror the skeleton adjacency onto every candidate combination.
    // `None` marks the phantom itself; `Some` carries a candidate's
    // validity adjustment on top of the reuse bonus.
    let empty: Vec<(ResourceId, i64)> = Vec::new();
    for (s, t, weight) in &skeleton {
        let variants = |id: &ResourceId| -> Vec<(ResourceId, Option<i64>)> {
            std::iter::once((id.clone(), None))
                .chain(
                    candidate_map
                        .get(id)
                        .unwrap_or(&empty)
                        .iter()
                        .map(|(c, v)| (c.clone(), Some(*v))),
                )
                .collect()
        };
        for (u, u_validity) in variants(s) {
            for (v, v_validity) in variants(t) {
                if u == *s && v == *t {
                    continue; // skeleton edge itself, already present
                }
                if temp.edge(&u, &v).is_some() {
                    continue;
                }
                if !uniqueness_allows(ctx, &u, &v, conflicts) {
                    continue;
                }
                let edge_weight = weight
                    + u_validity.map(|v| REUSE_WEIGHT + v).unwrap_or(0)
                    + v_validity.map(|v| REUSE_WEIGHT + v).unwrap_or(0);
                let _ = temp.add_edge(&u, &v, EdgeProps::with_weight(edge_weight));
            }
        }
    }
    Ok(())
}

/// Checks the edge template uniqueness flags against the concrete edges
/// already in the solution graph, recording the conflict when blocked.
fn uniqueness_allows(
    ctx: &SolutionContext,
    source: &ResourceId,
    target: &ResourceId,
    conflicts: &mut Vec<PathSelectionError>,
) -> bool {
    let Some(template) = ctx.kb.edge_template_for(source, target) else {
        // Every adjacent pair on a selected path must have an edge
        // template; pairs without one never enter the selection graph.
        return false;
    };
    let existing = edges_of_type_pair(ctx, &template.source, &template.target);
    // A dedicated (phantom) endpoint only conflicts through its concrete
    // partner; both concrete means the edge would land as-is.
    let source_probe = if source.name.starts_with(PHANTOM_PREFIX) {
        None
    } else {
        Some(source)
    };
    let target_probe = if target.name.starts_with(PHANTOM_PREFIX) {
        None
    } else {
        Some(target)
    };
    match (source_probe, target_probe) {
        (Some(s), Some(t)) => {
            if template.unique.can_add(&existing, s, t) {
                true
            } else {
                let (blocked, existing_partner) = existing
                    .iter()
                    .find(|(es, et)| (es == s && et != t) || (et == t && es != s))
                    .map(|(es, et)| if es == s { (es.clone(), et.clone()) } else { (et.clone(), es.clone()) })
                    .unwrap_or((s.clone(), t.clone()));
                conflicts.push(PathSelectionError::UniquenessViolation {
                    from: s.clone(),
                    requested: t.clone(),
                    blocked,
                    existing: existing_partner,
                });
                false
            }
        }
        (Some(s), None) => {
            if template.unique.source && existing.iter().any(|(es, _)| es == s) {
                let partner = existing
                    .iter()
                    .find(|(es, _)| es == s)
                    .map(|(_, et)| et.clone())
                    .unwrap_or_else(|| target.clone());
                conflicts.push(PathSelectionError::UniquenessViolation {
                    from: s.clone(),
                    requested: target.clone(),
                    blocked: s.clone(),
                    existing: partner,
                });
                false
            } else {
                true
            }
        }
        (None, Some(t)) => {
            if template.unique.target && existing.iter().any(|(_, et)| et == t) {
                let partner = existing
                    .iter()
                    .find(|(_, et)| et == t)
                    .map(|(es, _)| es.clone())
                    .unwrap_or_else(|| source.clone());
                conflicts.push(PathSelectionError::UniquenessViolation {
                    from: source.clone(),
                    requested: t.clone(),
                    blocked: t.clone(),
                    existing: partner,
                });
                false
            } else {
                true
            }
        }
        (None, None) => true,
    }
}

fn phantom_validity_weight(
    ctx: &SolutionContext,
    input: &ExpansionInput,
    id: &ResourceId,
) -> Result<i64, EngineError> {
    if id == &input.source || id == &input.target {
        return Ok(0);
    }
    validity_weight(ctx, input, id)
}

/// Template validity checks demote a candidate instead of excluding it.
fn validity_weight(
    ctx: &SolutionContext,
    input: &ExpansionInput,
    candidate: &ResourceId,
) -> Result<i64, EngineError> {
    let template = ctx.kb.resource_template(candidate)?;
    if template.validity_checks.is_empty() {
        return Ok(0);
    }
    let dynamic = ctx.dynamic();
    let mut data = DynamicData::for_edge(input.source.clone(), input.target.clone());
    data.resource = Some(candidate.clone());
    for check in &template.validity_checks {
        if !dynamic.eval_condition(Some(check), &data)? {
            return Ok(INVALID_WEIGHT);
        }
    }
    Ok(0)
}

/// Assigns concrete names to the phantoms on the selected path:
/// `"<source>-<target>"`, suffixed `-N` on collision. The temp graph is
/// updated in place so sub-expansions observe the final ids.
fn rename_phantoms(
    ctx: &SolutionContext,
    temp: &mut ResourceGraph,
    nodes: Vec<ResourceId>,
    input: &ExpansionInput,
) -> Result<Vec<ResourceId>, EngineError> {
    let base = format!("{}-{}", input.source.name, input.target.name);
    let mut renamed = Vec::with_capacity(nodes.len());
    for id in nodes {
        if !id.name.starts_with(PHANTOM_PREFIX) {
            renamed.push(id);
            continue;
        }
        let name = ctx.unused_name(&id, &base);
        let new = ResourceId {
            name,
            ..id.clone()
        };
        temp.update_resource_id(&id, &new)?;
        if let Some(props) = temp
            .edges_to(&new)
            .first()
            .map(|(s, _)| s.clone())
            .and_then(|s| temp.edge_mut(&s, &new))
        {
            // Back-pointer for later lookups against the temp graph.
            props
                .attributes
                .insert("new_id".to_string(), new.to_string());
        }
        renamed.push(new);
    }
    Ok(renamed)
}

/// Creates missing path resources from their templates and wires the path
/// edges into the solution graph.
fn materialize_path(ctx: &mut SolutionContext, path: &[ResourceId]) -> Result<(), EngineError> {
    for id in path {
        if !ctx.graph.contains(id) {
            let resource = ctx.kb.create_resource(id)?;
            ctx.add_resource(resource)?;
        }
    }
    for pair in path.windows(2) {
        ctx.add_dependency(&pair[0], &pair[1], EdgeData::default())?;
    }
    Ok(())
}

/// Runs property rules against path neighbors in reverse path order so
/// downstream ids (namespaces) settle before upstream references bind.
/// Returns the path with any namespace renames applied.
fn handle_properties(
    ctx: &mut SolutionContext,
    mut path: Vec<ResourceId>,
) -> Result<Vec<ResourceId>, EngineError> {
    for i in (0..path.len()).rev() {
        let id = path[i].clone();
        let template = ctx.kb.resource_template(&id)?.clone();
        let data = DynamicData::for_resource(id.clone());
        let mut owner = id.clone();
        for property in template.properties_in_order() {
            let Some(rule) = &property.operational_rule else {
                continue;
            };
            let step = &rule.step;
            let neighbor = match step.direction {
                stratus_kb::Direction::Downstream if i + 1 < path.len() => path[i + 1].clone(),
                stratus_kb::Direction::Upstream if i > 0 => path[i - 1].clone(),
                _ => continue,
            };
            let usable = step
                .resources
                .iter()
                .map(|selector| selector_matches(ctx, &neighbor, selector, &data))
                .collect::<Result<Vec<bool>, _>>()?
                .into_iter()
                .any(|ok| ok);
            if !usable {
                continue;
            }
            if let Some(new) = set_field(ctx, &owner, property, &neighbor, step)? {
                // Propagate the rename into the remaining path positions.
                for slot in path.iter_mut() {
                    if *slot == owner {
                        *slot = new.clone();
                    }
                }
                owner = new;
            }
        }
    }
    Ok(path)
}

/// Intermediates that declare path-satisfaction classes request their own
/// expansions against the nearest satisfying partner along the path.
fn find_sub_expansions(
    ctx: &SolutionContext,
    path: &[ResourceId],
) -> Result<Vec<(ResourceId, ResourceId)>, EngineError> {
    let mut result = Vec::new();
    let mut added: BTreeSet<(ResourceId, ResourceId)> = BTreeSet::new();
    for (i, id) in path.iter().enumerate() {
        if i == 0 || i == path.len() - 1 {
            continue;
        }
        let template = ctx.kb.resource_template(id)?;
        if !template.path_satisfaction.as_source.is_empty() {
            for target in path.iter().skip(i + 2) {
                let target_template = ctx.kb.resource_template(target)?;
                let terminal = target == path.last().unwrap_or(target);
                if !target_template.path_satisfaction.as_target.is_empty() || terminal {
                    if added.insert((id.clone(), target.clone())) {
                        result.push((id.clone(), target.clone()));
                    }
                }
            }
        }
        if !template.path_satisfaction.as_target.is_empty() {
            for source in path.iter().take(i.saturating_sub(1)) {
                let source_template = ctx.kb.resource_template(source)?;
                let initial = path.first().map(|p| p == source).unwrap_or(false);
                if !source_template.path_satisfaction.as_source.is_empty() || initial {
                    if added.insert((source.clone(), id.clone())) {
                        result.push((source.clone(), id.clone()));
                    }
                }
            }
        }
    }
    Ok(result)
}
