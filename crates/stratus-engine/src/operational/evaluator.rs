//! The operational evaluator: a bounded fixed-point loop over one solution.
//!
//! Each iteration expands unexpanded edges, configures edges from their
//! templates, runs property rules until the graph stops changing, and
//! validates. Errors inside an iteration accumulate as diagnostics and
//! never abort independent work; a later clean iteration discards them, so
//! the diagnostics returned to the caller are from the last iteration only.
//! Fatal errors (knowledge-base inconsistency, cancellation) short-circuit.

use std::collections::BTreeSet;

use tracing::debug;

use stratus_core::{PropertyPath, PropertyRef, ResourceId, Value};
use stratus_kb::DynamicData;

use crate::constraints::Constraint;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::EngineError;
use crate::operational::rule::RuleRunner;
use crate::path_selection::{expand_edge, ExpansionInput};
use crate::solution::{CancellationToken, SolutionContext};

/// Evaluator tuning.
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Outer iteration bound; a retry budget, not a convergence proof.
    pub max_iterations: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        EvaluatorConfig { max_iterations: 5 }
    }
}

/// Upper bound on property-resolution passes inside one iteration. The
/// pass loop stops as soon as nothing changes; this only guards against a
/// rule set that never stops creating resources.
const MAX_PROPERTY_PASSES: usize = 50;

/// Drives `ctx` to an operational state. Returns the last iteration's
/// diagnostics -- empty means the solve converged and validated.
pub fn solve(
    ctx: &mut SolutionContext,
    constraints: &[Constraint],
    config: &EvaluatorConfig,
    cancel: &CancellationToken,
) -> Result<Diagnostics, EngineError> {
    let mut expanded: BTreeSet<(ResourceId, ResourceId)> = BTreeSet::new();
    let mut pending_expansions: Vec<(ResourceId, ResourceId)> = Vec::new();
    let mut diagnostics = Diagnostics::new();

    for iteration in 0..config.max_iterations.max(1) {
        if cancel.is_canceled() {
            return Err(EngineError::Canceled);
        }
        diagnostics = Diagnostics::new();
        debug!(iteration, resources = ctx.graph.len(), "evaluator iteration");

        expand_edges(ctx, &mut expanded, &mut pending_expansions, &mut diagnostics, cancel)?;
        configure_edges(ctx, &mut diagnostics)?;
        make_operational(ctx, &mut diagnostics)?;
        validate(ctx, constraints, &mut diagnostics);

        // Queued sub-expansions are unfinished work even when validation
        // is clean; give them the next iteration.
        if diagnostics.is_empty() && pending_expansions.is_empty() {
            debug!(iteration, "solve converged");
            return Ok(diagnostics);
        }
    }
    Ok(diagnostics)
}

/// Whether a dependency still needs path expansion: it carries path
/// constraints, or no direct edge template covers it.
fn needs_expansion(ctx: &SolutionContext, source: &ResourceId, target: &ResourceId) -> bool {
    let Some(props) = ctx.graph.edge(source, target) else {
        return false;
    };
    if !props.data.must_exist.is_empty() || !props.data.must_not_exist.is_empty() {
        return true;
    }
    ctx.kb.edge_template_for(source, target).is_none()
}

fn expand_edges(
    ctx: &mut SolutionContext,
    expanded: &mut BTreeSet<(ResourceId, ResourceId)>,
    pending: &mut Vec<(ResourceId, ResourceId)>,
    diagnostics: &mut Diagnostics,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    let mut queue: Vec<ExpansionInput> = Vec::new();
    for (source, target, props) in ctx.graph.edges() {
        if !needs_expansion(ctx, &source, &target) {
            continue;
        }
        if expanded.contains(&(source.clone(), target.clone())) {
            continue;
        }
        queue.push(ExpansionInput {
            source,
            target,
            classification: String::new(),
            data: props.data.clone(),
        });
    }
    for (source, target) in pending.drain(..) {
        if expanded.contains(&(source.clone(), target.clone())) {
            continue;
        }
        let classification = shared_classification(ctx, &source, &target);
        queue.push(ExpansionInput {
            source,
            target,
            classification,
            data: Default::default(),
        });
    }

    for input in queue {
        if cancel.is_canceled() {
            return Err(EngineError::Canceled);
        }
        let key = (input.source.clone(), input.target.clone());
        match expand_edge(ctx, &input) {
            Ok(result) => {
                expanded.insert(key);
                for sub in result.sub_expansions {
                    if !expanded.contains(&sub) {
                        pending.push(sub);
                    }
                }
            }
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => diagnostics.push_error(&err),
        }
    }
    Ok(())
}

/// The classification a sub-expansion runs under: the first class the
/// source offers as a path source that the target also accepts as a path
/// target.
fn shared_classification(ctx: &SolutionContext, source: &ResourceId, target: &ResourceId) -> String {
    let Ok(source_template) = ctx.kb.resource_template(source) else {
        return String::new();
    };
    let Ok(target_template) = ctx.kb.resource_template(target) else {
        return String::new();
    };
    source_template
        .path_satisfaction
        .as_source
        .iter()
        .find(|c| target_template.path_satisfaction.as_target.contains(c))
        .cloned()
        .unwrap_or_default()
}

fn configure_edges(
    ctx: &mut SolutionContext,
    diagnostics: &mut Diagnostics,
) -> Result<(), EngineError> {
    let edges: Vec<(ResourceId, ResourceId, stratus_core::EdgeData)> = ctx
        .graph
        .edges()
        .into_iter()
        .map(|(s, t, props)| (s, t, props.data.clone()))
        .collect();
    for (source, target, data) in edges {
        let Some(template) = ctx.kb.edge_template_for(&source, &target).cloned() else {
            continue;
        };
        let rule_data = DynamicData::for_edge(source.clone(), target.clone());
        let mut runner = RuleRunner::new(ctx);
        for rule in &template.operational_rules {
            if let Err(err) = runner.handle_rule(rule, &rule_data) {
                if err.is_fatal() {
                    return Err(err);
                }
                diagnostics.push_error(&err);
            }
        }
        for configuration in &template.configuration_rules {
            if let Err(err) = runner.apply_configuration(configuration, &rule_data) {
                if err.is_fatal() {
                    return Err(err);
                }
                diagnostics.push_error(&err);
            }
        }
        if let Err(err) = apply_env_vars(ctx, &source, &target, &data) {
            if err.is_fatal() {
                return Err(err);
            }
            diagnostics.push_error(&err);
        }
    }
    Ok(())
}

/// Environment-variable requests on an edge bind the named variables on the
/// source to property references into the target.
fn apply_env_vars(
    ctx: &mut SolutionContext,
    source: &ResourceId,
    target: &ResourceId,
    data: &stratus_core::EdgeData,
) -> Result<(), EngineError> {
    for env_var in &data.env_vars {
        let path: PropertyPath = format!("EnvironmentVariables[\"{}\"]", env_var.name)
            .parse()
            .map_err(EngineError::Property)?;
        let value = Value::Ref(PropertyRef::new(
            target.clone(),
            env_var.property.parse().map_err(EngineError::Property)?,
        ));
        let Some(resource) = ctx.graph.resource_mut(source) else {
            continue;
        };
        resource.set_property(&path, value).map_err(EngineError::Property)?;
    }
    Ok(())
}

/// Property resolution: rules then defaults, repeated until the graph stops
/// changing.
fn make_operational(
    ctx: &mut SolutionContext,
    diagnostics: &mut Diagnostics,
) -> Result<(), EngineError> {
    for _pass in 0..MAX_PROPERTY_PASSES {
        let mut changed = false;
        for id in ctx.graph.sorted_ids() {
            if id.is_abstract() || !ctx.graph.contains(&id) {
                // Renames earlier in this pass may have retired the id.
                continue;
            }
            match resolve_resource(ctx, &id) {
                Ok(resource_changed) => changed |= resource_changed,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => diagnostics.push_error(&err),
            }
        }
        if !changed {
            return Ok(());
        }
    }
    diagnostics.push(Diagnostic::new(
        "property-passes-exhausted",
        format!("property resolution did not settle within {MAX_PROPERTY_PASSES} passes"),
    ));
    Ok(())
}

/// Runs every property rule and default for one resource. Returns whether
/// anything changed.
fn resolve_resource(ctx: &mut SolutionContext, id: &ResourceId) -> Result<bool, EngineError> {
    let template = ctx.kb.resource_template(id)?.clone();
    let mut owner = id.clone();
    let mut changed = false;
    for property in template.properties_in_order() {
        let mut runner = RuleRunner::new(ctx);
        let outcome = runner.handle_property_rule(&owner, property)?;
        changed |= outcome.changed;
        owner = outcome.owner;

        // Defaults fill whatever the rules left unset.
        if let Some(default) = &property.default_value {
            let unset = ctx
                .graph
                .resource(&owner)
                .and_then(|r| property.value_on(r))
                .map(Value::is_null)
                .unwrap_or(true);
            if unset {
                let rendered = match default {
                    Value::String(s) if s.contains("{{") => {
                        let dynamic = ctx.dynamic();
                        Value::String(
                            dynamic.render(s, &DynamicData::for_resource(owner.clone()))?,
                        )
                    }
                    other => other.clone(),
                };
                let value = property
                    .property_type()?
                    .parse_value(rendered)
                    .map_err(EngineError::Property)?;
                let path: PropertyPath =
                    property.name.parse().map_err(EngineError::Property)?;
                if let Some(resource) = ctx.graph.resource_mut(&owner) {
                    resource.set_property(&path, value).map_err(EngineError::Property)?;
                    changed = true;
                }
            }
        }
    }
    Ok(changed)
}

/// End-of-iteration validation: required properties, edge uniqueness, and
/// every constraint.
fn validate(ctx: &SolutionContext, constraints: &[Constraint], diagnostics: &mut Diagnostics) {
    for id in ctx.graph.sorted_ids() {
        if id.is_abstract() {
            continue;
        }
        let Ok(template) = ctx.kb.resource_template(&id) else {
            diagnostics.push(
                Diagnostic::new("kb-inconsistency", format!("no template for {id}"))
                    .for_resource(id.clone()),
            );
            continue;
        };
        let Some(resource) = ctx.graph.resource(&id) else {
            continue;
        };
        for property in template.missing_required(resource) {
            diagnostics.push(
                Diagnostic::new(
                    "required-missing",
                    format!("required property '{}' is not set", property.name),
                )
                .for_resource(id.clone()),
            );
        }
    }

    validate_edge_uniqueness(ctx, diagnostics);

    for constraint in constraints {
        if !constraint.is_satisfied(&ctx.graph, &ctx.kb, &ctx.construct_map) {
            diagnostics.push(Diagnostic::new(
                "constraint-unsatisfied",
                format!("constraint not satisfied: {}", constraint_summary(constraint)),
            ));
        }
    }
}

fn validate_edge_uniqueness(ctx: &SolutionContext, diagnostics: &mut Diagnostics) {
    for (source, target, _) in ctx.graph.edges() {
        let Some(template) = ctx.kb.edge_template_for(&source, &target) else {
            continue;
        };
        if template.unique.source {
            let fanout = ctx
                .graph
                .edges_from(&source)
                .into_iter()
                .filter(|(t, _)| t.qualified_type() == template.target)
                .count();
            if fanout > 1 {
                diagnostics.push(
                    Diagnostic::new(
                        "unique-violated",
                        format!("{source} has {fanout} outgoing {} edges", template.target),
                    )
                    .for_edge(source.clone(), target.clone()),
                );
            }
        }
        if template.unique.target {
            let fanin = ctx
                .graph
                .edges_to(&target)
                .into_iter()
                .filter(|(s, _)| s.qualified_type() == template.source)
                .count();
            if fanin > 1 {
                diagnostics.push(
                    Diagnostic::new(
                        "unique-violated",
                        format!("{target} has {fanin} incoming {} edges", template.source),
                    )
                    .for_edge(source.clone(), target.clone()),
                );
            }
        }
    }
}

fn constraint_summary(constraint: &Constraint) -> String {
    match constraint {
        Constraint::Application(c) => format!("application {:?} {}", c.operator, c.node),
        Constraint::Construct(c) => format!("construct equals {} = {}", c.target, c.construct_type),
        Constraint::Edge(c) => format!(
            "edge {:?} {} -> {}",
            c.operator, c.target.source, c.target.destination
        ),
        Constraint::Resource(c) => {
            format!("resource {:?} {}.{}", c.operator, c.target, c.property)
        }
    }
}
