//! The orchestrator: owns one synthesis run.
//!
//! Applies application and edge constraints to the working construct
//! graph, expands constructs, forms the cartesian product of expansion
//! solutions, and solves each combination in stable order until one
//! converges with every constraint satisfied. The first satisfying graph
//! wins; if none does, the first combination's graph and diagnostics are
//! returned for inspection.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, info};

use stratus_core::{EdgeData, EdgeProps, Resource, ResourceGraph, ResourceId, Value};
use stratus_kb::{KbError, KnowledgeBase};

use crate::constraints::{
    ApplicationConstraint, ApplicationOperator, Constraint, EdgeConstraint, EdgeOperator,
    ResourceConstraint, ResourceOperator,
};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::EngineError;
use crate::expansion::{expand_constructs, generate_combinations, ExpansionSolution};
use crate::operational::{solve, EvaluatorConfig};
use crate::solution::{CancellationToken, Decision, SolutionContext};

/// Environment variable overriding the evaluator iteration bound.
pub const PLAN_ITERATIONS_ENV: &str = "PLAN_ITERATIONS";

/// Run-wide tuning.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub evaluator: EvaluatorConfig,
    /// Cap on the cartesian product of expansion solutions.
    pub combination_cap: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            evaluator: EvaluatorConfig::default(),
            combination_cap: 100,
        }
    }
}

impl OrchestratorConfig {
    /// Defaults with the `PLAN_ITERATIONS` override applied.
    pub fn from_env() -> Self {
        let mut config = OrchestratorConfig::default();
        if let Ok(raw) = std::env::var(PLAN_ITERATIONS_ENV) {
            if let Ok(n) = raw.parse::<usize>() {
                if n > 0 {
                    config.evaluator.max_iterations = n;
                }
            }
        }
        config
    }
}

/// Why a run failed, mapped by callers onto exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The solve finished but constraints remain unsatisfied (or no
    /// combination converged).
    ConstraintUnsatisfied,
    /// The knowledge base is unusable.
    KbInconsistency,
    Canceled,
}

/// A failed run: the kind, the diagnostics from the reported combination,
/// and that combination's partial graph for inspection.
#[derive(Debug)]
pub struct SolveFailure {
    pub kind: FailureKind,
    pub diagnostics: Diagnostics,
    pub partial: Option<ResourceGraph>,
}

/// A successful run.
#[derive(Debug)]
pub struct SolveOutput {
    pub graph: ResourceGraph,
    pub construct_map: IndexMap<ResourceId, Vec<ResourceId>>,
    pub decisions: Vec<Decision>,
}

/// One synthesis run's owner. The knowledge base is shared and read-only;
/// all mutable state (working graphs, decision log) lives on the instance.
pub struct Orchestrator {
    kb: Arc<KnowledgeBase>,
    config: OrchestratorConfig,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(kb: Arc<KnowledgeBase>, config: OrchestratorConfig) -> Self {
        Orchestrator {
            kb,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// The token callers can use to cancel this run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Lowers the input construct graph to a provider-ready resource graph.
    pub fn run(
        &self,
        input: &ResourceGraph,
        constraints: &[Constraint],
    ) -> Result<SolveOutput, SolveFailure> {
        let mut working = input.clone();
        self.apply_application_constraints(&mut working, constraints)
            .map_err(|e| self.failure_from(e, None))?;
        self.apply_edge_constraints(&mut working, constraints)
            .map_err(|e| self.failure_from(e, None))?;

        let expansions = expand_constructs(&working, constraints, &self.kb)
            .map_err(|e| self.failure_from(e, None))?;
        let combinations = generate_combinations(&expansions, self.config.combination_cap)
            .map_err(|e| self.failure_from(e, None))?;
        info!(
            constructs = expansions.len(),
            combinations = combinations.len(),
            "expanded constructs"
        );

        let mut reported: Option<(ResourceGraph, Diagnostics)> = None;
        for combination in &combinations {
            if self.cancel.is_canceled() {
                return Err(self.failure_from(EngineError::Canceled, None));
            }
            let mut ctx = match self.build_context(&working, &expansions, combination, constraints)
            {
                Ok(ctx) => ctx,
                Err(e) => return Err(self.failure_from(e, None)),
            };
            match solve(&mut ctx, constraints, &self.config.evaluator, &self.cancel) {
                Ok(diagnostics) if diagnostics.is_empty() => {
                    debug!("combination solved");
                    return Ok(SolveOutput {
                        graph: ctx.graph,
                        construct_map: ctx.construct_map,
                        decisions: ctx.decisions,
                    });
                }
                Ok(diagnostics) => {
                    debug!(%diagnostics, "combination failed, trying next");
                    if reported.is_none() {
                        reported = Some((ctx.graph, diagnostics));
                    }
                }
                Err(e) => return Err(self.failure_from(e, Some(ctx.graph))),
            }
        }

        let (partial, diagnostics) = match reported {
            Some((graph, diagnostics)) => (Some(graph), diagnostics),
            None => {
                let mut diagnostics = Diagnostics::new();
                diagnostics.push(Diagnostic::new(
                    "no-combinations",
                    "construct expansion produced no solvable combinations",
                ));
                (None, diagnostics)
            }
        };
        Err(SolveFailure {
            kind: FailureKind::ConstraintUnsatisfied,
            diagnostics,
            partial,
        })
    }

    fn failure_from(&self, error: EngineError, partial: Option<ResourceGraph>) -> SolveFailure {
        let kind = match &error {
            EngineError::Canceled => FailureKind::Canceled,
            EngineError::Kb(KbError::Inconsistency { .. }) => FailureKind::KbInconsistency,
            _ => FailureKind::ConstraintUnsatisfied,
        };
        let mut diagnostics = Diagnostics::new();
        diagnostics.push_error(&error);
        SolveFailure {
            kind,
            diagnostics,
            partial,
        }
    }

    fn apply_application_constraints(
        &self,
        working: &mut ResourceGraph,
        constraints: &[Constraint],
    ) -> Result<(), EngineError> {
        for constraint in constraints {
            let Constraint::Application(c) = constraint else {
                continue;
            };
            self.apply_application_constraint(working, c)?;
        }
        Ok(())
    }

    fn apply_application_constraint(
        &self,
        working: &mut ResourceGraph,
        constraint: &ApplicationConstraint,
    ) -> Result<(), EngineError> {
        match constraint.operator {
            ApplicationOperator::Add => {
                if !working.contains(&constraint.node) {
                    working.add_resource(self.instantiate(&constraint.node)?)?;
                }
            }
            ApplicationOperator::Remove => {
                if working.contains(&constraint.node) {
                    self.check_removable(working, &constraint.node)?;
                    working.remove_resource(&constraint.node, true)?;
                }
            }
            ApplicationOperator::Replace => {
                let new = constraint.replacement_node.as_ref().ok_or_else(|| {
                    EngineError::ExpansionFailed {
                        id: constraint.node.clone(),
                        reason: "replace constraint without a replacement node".to_string(),
                    }
                })?;
                if !working.contains(new) {
                    working.add_resource(self.instantiate(new)?)?;
                }
                if working.contains(&constraint.node) {
                    // Rewire before removing so the dependency structure
                    // survives the swap.
                    let outgoing: Vec<(ResourceId, EdgeProps)> = working
                        .edges_from(&constraint.node)
                        .into_iter()
                        .map(|(target, props)| (target, props.clone()))
                        .collect();
                    for (target, props) in outgoing {
                        if working.edge(new, &target).is_none() && *new != target {
                            working.add_edge(new, &target, props)?;
                        }
                    }
                    let incoming: Vec<(ResourceId, EdgeProps)> = working
                        .edges_to(&constraint.node)
                        .into_iter()
                        .map(|(source, props)| (source, props.clone()))
                        .collect();
                    for (source, props) in incoming {
                        if working.edge(&source, new).is_none() && source != *new {
                            working.add_edge(&source, new, props)?;
                        }
                    }
                    working.remove_resource(&constraint.node, true)?;
                }
            }
            ApplicationOperator::Import => {
                if !working.contains(&constraint.node) {
                    working.add_resource(self.instantiate(&constraint.node)?)?;
                }
                if let Some(resource) = working.resource_mut(&constraint.node) {
                    resource.imported = constraint.external_id.clone();
                }
            }
        }
        Ok(())
    }

    /// Honors the template's delete context: some types refuse removal
    /// while dependents or dependencies remain.
    fn check_removable(
        &self,
        working: &ResourceGraph,
        id: &ResourceId,
    ) -> Result<(), EngineError> {
        if id.is_abstract() {
            return Ok(());
        }
        let Some(delete_context) = self
            .kb
            .resource_template(id)
            .ok()
            .and_then(|t| t.delete_context.clone())
        else {
            return Ok(());
        };
        let blocked = (delete_context.requires_no_upstream && !working.edges_to(id).is_empty())
            || (delete_context.requires_no_downstream && !working.edges_from(id).is_empty());
        if blocked {
            return Err(EngineError::Graph(
                stratus_core::GraphError::EdgesRemain { id: id.clone() },
            ));
        }
        Ok(())
    }

    fn instantiate(&self, id: &ResourceId) -> Result<Resource, EngineError> {
        if id.is_abstract() {
            Ok(Resource::new(id.clone()))
        } else {
            Ok(self.kb.create_resource(id)?)
        }
    }

    fn apply_edge_constraints(
        &self,
        working: &mut ResourceGraph,
        constraints: &[Constraint],
    ) -> Result<(), EngineError> {
        for constraint in constraints {
            let Constraint::Edge(c) = constraint else {
                continue;
            };
            self.apply_edge_constraint(working, c)?;
        }
        Ok(())
    }

    fn apply_edge_constraint(
        &self,
        working: &mut ResourceGraph,
        constraint: &EdgeConstraint,
    ) -> Result<(), EngineError> {
        let source = &constraint.target.source;
        let target = &constraint.target.destination;
        let ensure_edge = |working: &mut ResourceGraph| -> Result<(), EngineError> {
            if working.edge(source, target).is_none() {
                let data = EdgeData {
                    source: Some(source.clone()),
                    target: Some(target.clone()),
                    ..Default::default()
                };
                working.add_edge(
                    source,
                    target,
                    stratus_core::EdgeProps::with_data(data),
                )?;
            }
            Ok(())
        };
        match constraint.operator {
            EdgeOperator::MustExist => ensure_edge(working)?,
            EdgeOperator::MustNotExist => {
                if working.edge(source, target).is_some() {
                    working.remove_edge(source, target)?;
                }
            }
            EdgeOperator::MustContain | EdgeOperator::MustNotContain => {
                let Some(node) = constraint.node.clone() else {
                    return Ok(());
                };
                ensure_edge(working)?;
                if let Some(props) = working.edge_mut(source, target) {
                    match constraint.operator {
                        EdgeOperator::MustContain => {
                            if !props.data.must_exist.contains(&node) {
                                props.data.must_exist.push(node);
                            }
                        }
                        EdgeOperator::MustNotContain => {
                            if !props.data.must_not_exist.contains(&node) {
                                props.data.must_not_exist.push(node);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }

    /// Builds the base resource graph for one combination: concrete
    /// resources, chosen expansion sub-graphs, translated construct edges,
    /// and resource-constraint configuration.
    fn build_context(
        &self,
        working: &ResourceGraph,
        expansions: &IndexMap<ResourceId, Vec<ExpansionSolution>>,
        combination: &IndexMap<ResourceId, usize>,
        constraints: &[Constraint],
    ) -> Result<SolutionContext, EngineError> {
        let mut ctx = SolutionContext::new(ResourceGraph::new(), self.kb.clone());

        // Concrete resources carry over as-is; constructs are erased.
        for id in working.sorted_ids() {
            if id.is_abstract() {
                continue;
            }
            if let Some(resource) = working.resource(&id) {
                ctx.graph.add_resource(resource.clone())?;
            }
        }

        for (construct, index) in combination {
            let solution = &expansions[construct][*index];
            for id in solution.graph.sorted_ids() {
                if let Some(resource) = solution.graph.resource(&id) {
                    ctx.graph.add_resource_if_missing(resource.clone());
                }
            }
            for (s, t, props) in solution.graph.edges() {
                if ctx.graph.edge(&s, &t).is_none() {
                    ctx.graph.add_edge(&s, &t, props.clone())?;
                }
            }
            ctx.construct_map
                .insert(construct.clone(), solution.directly_mapped.clone());
        }

        // Construct-level dependencies become resource edges between every
        // directly-mapped pair, carrying the original edge data.
        for (u, v, props) in working.edges() {
            let sources = self.mapped_endpoints(&u, &ctx);
            let targets = self.mapped_endpoints(&v, &ctx);
            for s in &sources {
                for t in &targets {
                    if s == t {
                        continue;
                    }
                    let mut data = props.data.clone();
                    data.source = Some(s.clone());
                    data.target = Some(t.clone());
                    ctx.add_dependency(s, t, data)?;
                }
            }
        }

        self.apply_resource_constraints(&mut ctx, constraints)?;
        Ok(ctx)
    }

    fn mapped_endpoints(&self, id: &ResourceId, ctx: &SolutionContext) -> Vec<ResourceId> {
        if let Some(mapped) = ctx.construct_map.get(id) {
            return mapped.clone();
        }
        if ctx.graph.contains(id) {
            return vec![id.clone()];
        }
        Vec::new()
    }

    fn apply_resource_constraints(
        &self,
        ctx: &mut SolutionContext,
        constraints: &[Constraint],
    ) -> Result<(), EngineError> {
        for constraint in constraints {
            let Constraint::Resource(c) = constraint else {
                continue;
            };
            self.apply_resource_constraint(ctx, c)?;
        }
        Ok(())
    }

    fn apply_resource_constraint(
        &self,
        ctx: &mut SolutionContext,
        constraint: &ResourceConstraint,
    ) -> Result<(), EngineError> {
        let value = constraint.typed_value(&ctx.kb);
        let Some(resource) = ctx.graph.resource_mut(&constraint.target) else {
            // Satisfaction reports the miss after the solve.
            return Ok(());
        };
        match constraint.operator {
            ResourceOperator::Equals => {
                resource
                    .set_property(&constraint.property, value)
                    .map_err(EngineError::Property)?;
            }
            ResourceOperator::Add => {
                let present = resource
                    .get_property(&constraint.property)
                    .and_then(Value::as_list)
                    .map(|items| items.contains(&value))
                    .unwrap_or(false);
                if !present {
                    resource
                        .append_property(&constraint.property, value)
                        .map_err(EngineError::Property)?;
                }
            }
            ResourceOperator::Remove => {
                let _ = resource.remove_property(&constraint.property, Some(&value));
            }
        }
        ctx.decisions.push(Decision::PropertySet {
            resource: constraint.target.clone(),
            path: constraint.property.to_string(),
        });
        Ok(())
    }
}
