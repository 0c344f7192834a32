//! Classification-aware dependency queries.
//!
//! The core graph knows direct and transitive reachability; the knowledge
//! base adds the *local* layer, which traverses glue resources (those with
//! no functionality classification of their own) and stops at functional
//! boundaries. Operational rules and namespace routing use the local layer
//! so that, for example, a lambda's "local downstream" includes its subnets
//! and route tables but not the database behind them.

use std::collections::BTreeSet;

use stratus_core::{DependencyLayer, ResourceGraph, ResourceId};

use crate::kb::KnowledgeBase;

/// Reach of a dependency query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Direct,
    /// Through glue resources, stopping at (but including) functional ones.
    Local,
    All,
}

impl Layer {
    pub fn parse(s: &str) -> Option<Layer> {
        match s {
            "direct" => Some(Layer::Direct),
            "local" => Some(Layer::Local),
            "all" => Some(Layer::All),
            _ => None,
        }
    }
}

pub fn downstream(
    graph: &ResourceGraph,
    kb: &KnowledgeBase,
    id: &ResourceId,
    layer: Layer,
) -> Vec<ResourceId> {
    collect(graph, kb, id, layer, false)
}

pub fn upstream(
    graph: &ResourceGraph,
    kb: &KnowledgeBase,
    id: &ResourceId,
    layer: Layer,
) -> Vec<ResourceId> {
    collect(graph, kb, id, layer, true)
}

fn collect(
    graph: &ResourceGraph,
    kb: &KnowledgeBase,
    id: &ResourceId,
    layer: Layer,
    reverse: bool,
) -> Vec<ResourceId> {
    let step = |current: &ResourceId| -> Vec<ResourceId> {
        if reverse {
            graph.upstream(current, DependencyLayer::Direct)
        } else {
            graph.downstream(current, DependencyLayer::Direct)
        }
    };
    match layer {
        Layer::Direct => step(id),
        Layer::All => {
            if reverse {
                graph.upstream(id, DependencyLayer::All)
            } else {
                graph.downstream(id, DependencyLayer::All)
            }
        }
        Layer::Local => {
            let mut seen: BTreeSet<ResourceId> = BTreeSet::new();
            let mut queue = step(id);
            while let Some(next) = queue.pop() {
                if !seen.insert(next.clone()) {
                    continue;
                }
                let glue = kb
                    .resource_template(&next)
                    .map(|t| t.is_glue())
                    .unwrap_or(false);
                if glue {
                    queue.extend(step(&next));
                }
            }
            seen.into_iter().collect()
        }
    }
}
