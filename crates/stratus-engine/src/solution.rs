//! The solution context: one candidate resource graph being driven to an
//! operational state, plus the decision log describing how it got there.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;

use stratus_core::{EdgeData, EdgeProps, GraphError, Resource, ResourceGraph, ResourceId};
use stratus_kb::{DynamicContext, KnowledgeBase};

/// Cooperative cancellation flag shared between the orchestrator and its
/// caller. Checked between evaluator iterations and between path
/// expansions.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// One engine decision, kept for the run's decision log.
#[derive(Debug, Clone)]
pub enum Decision {
    ResourceAdded { id: ResourceId },
    ResourceRemoved { id: ResourceId },
    ResourceRenamed { old: ResourceId, new: ResourceId },
    EdgeAdded { source: ResourceId, target: ResourceId },
    EdgeRemoved { source: ResourceId, target: ResourceId },
    PropertySet { resource: ResourceId, path: String },
    AmbiguousPath { source: ResourceId, target: ResourceId },
}

/// A candidate solution being solved.
pub struct SolutionContext {
    pub graph: ResourceGraph,
    pub kb: Arc<KnowledgeBase>,
    /// Construct id -> the resources it directly mapped to during expansion.
    pub construct_map: IndexMap<ResourceId, Vec<ResourceId>>,
    pub decisions: Vec<Decision>,
}

impl SolutionContext {
    pub fn new(graph: ResourceGraph, kb: Arc<KnowledgeBase>) -> Self {
        SolutionContext {
            graph,
            kb,
            construct_map: IndexMap::new(),
            decisions: Vec::new(),
        }
    }

    /// A fresh dynamic context over the current graph state. Rules take a
    /// snapshot; construct one per evaluation point.
    pub fn dynamic(&self) -> DynamicContext {
        DynamicContext::new(&self.graph, &self.kb)
    }

    /// Adds a dataflow dependency, picking up the deployment direction flag
    /// from the edge template. Existing edges are left untouched.
    pub fn add_dependency(
        &mut self,
        source: &ResourceId,
        target: &ResourceId,
        data: EdgeData,
    ) -> Result<(), GraphError> {
        if self.graph.edge(source, target).is_some() {
            return Ok(());
        }
        let reversed = self
            .kb
            .edge_template_for(source, target)
            .map(|t| t.deployment_order_reversed)
            .unwrap_or(false);
        let props = EdgeProps {
            data,
            deployment_order_reversed: reversed,
            ..Default::default()
        };
        self.graph.add_edge(source, target, props)?;
        self.decisions.push(Decision::EdgeAdded {
            source: source.clone(),
            target: target.clone(),
        });
        Ok(())
    }

    /// Adds a resource and logs the decision.
    pub fn add_resource(&mut self, resource: Resource) -> Result<(), GraphError> {
        let id = resource.id.clone();
        self.graph.add_resource(resource)?;
        self.decisions.push(Decision::ResourceAdded { id });
        Ok(())
    }

    /// Renames a resource; every reference observes the new id atomically.
    pub fn rename_resource(
        &mut self,
        old: &ResourceId,
        new: &ResourceId,
    ) -> Result<(), GraphError> {
        if old == new {
            return Ok(());
        }
        self.graph.update_resource_id(old, new)?;
        self.decisions.push(Decision::ResourceRenamed {
            old: old.clone(),
            new: new.clone(),
        });
        Ok(())
    }

    /// Picks a name that does not collide with any vertex: `base`, then
    /// `base-0`, `base-1`, ...
    pub fn unused_name(&self, template_id: &ResourceId, base: &str) -> String {
        let mut candidate = base.to_string();
        let mut suffix = 0;
        loop {
            let probe = ResourceId {
                name: candidate.clone(),
                ..template_id.clone()
            };
            // Names must be unique across namespaces of the same type to
            // keep rename bookkeeping unambiguous.
            let taken = self
                .graph
                .ids()
                .any(|id| id.qualified_type() == probe.qualified_type() && id.name == candidate);
            if !taken {
                return candidate;
            }
            candidate = format!("{base}-{suffix}");
            suffix += 1;
        }
    }
}
