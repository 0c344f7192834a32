//! The resource graph: an id-keyed arena of resources with typed edges.
//!
//! [`ResourceGraph`] is the single container both the construct graph and
//! the resource graph live in (constructs are just resources under the
//! reserved `abstract` provider). Vertices are owned by the graph --
//! cross-resource pointers inside property values are always ids or
//! [`crate::value::PropertyRef`]s, never shared references.
//!
//! # Two views, one edge set
//!
//! Edges are stored in dataflow direction ("depends on at runtime"). The
//! *deployment view* is the same edge set with direction flipped for edges
//! whose [`EdgeProps::deployment_order_reversed`] flag is set. Cycle
//! detection on insert and topological ordering run on the deployment view;
//! path enumeration runs on the dataflow view.
//!
//! # Determinism
//!
//! All listing operations are deterministic: vertices iterate in stable
//! insertion order (or sorted by id where documented), edge listings sort by
//! endpoint ids, and path enumeration sorts by length then lexicographic
//! node ids. Every tie in the engine breaks on [`ResourceId`] ordering.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::{Directed, Direction};

use crate::edge::EdgeProps;
use crate::error::GraphError;
use crate::id::ResourceId;
use crate::resource::Resource;

/// How far a dependency query reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyLayer {
    /// Immediate neighbors only.
    Direct,
    /// Everything reachable.
    All,
}

/// A path chosen by [`ResourceGraph::shortest_path_stable`].
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedPath {
    pub nodes: Vec<ResourceId>,
    pub weight: i64,
    /// Another path tied on weight and length; the lexicographically first
    /// one was chosen. Callers surface this as a warning.
    pub ambiguous: bool,
}

/// Directed graph of resources with edge properties.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    graph: StableGraph<Resource, EdgeProps, Directed, u32>,
    ids: IndexMap<ResourceId, NodeIndex<u32>>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.ids.contains_key(id)
    }

    /// Ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = &ResourceId> {
        self.ids.keys()
    }

    /// Ids sorted by the total [`ResourceId`] order.
    pub fn sorted_ids(&self) -> Vec<ResourceId> {
        let mut out: Vec<ResourceId> = self.ids.keys().cloned().collect();
        out.sort();
        out
    }

    pub fn resource(&self, id: &ResourceId) -> Option<&Resource> {
        self.ids.get(id).map(|idx| &self.graph[*idx])
    }

    /// Mutable access to a resource. The resource's `id` field must not be
    /// changed through this handle; use [`ResourceGraph::update_resource_id`].
    pub fn resource_mut(&mut self, id: &ResourceId) -> Option<&mut Resource> {
        self.ids.get(id).map(|idx| &mut self.graph[*idx])
    }

    /// Resources in sorted id order.
    pub fn resources_sorted(&self) -> Vec<&Resource> {
        let mut out: Vec<&Resource> = self.ids.values().map(|idx| &self.graph[*idx]).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn add_resource(&mut self, resource: Resource) -> Result<(), GraphError> {
        if self.ids.contains_key(&resource.id) {
            return Err(GraphError::VertexExists { id: resource.id });
        }
        let id = resource.id.clone();
        let idx = self.graph.add_node(resource);
        self.ids.insert(id, idx);
        Ok(())
    }

    /// Adds the resource unless a vertex with the same id already exists.
    pub fn add_resource_if_missing(&mut self, resource: Resource) {
        if !self.ids.contains_key(&resource.id) {
            let _ = self.add_resource(resource);
        }
    }

    /// Removes a resource. Fails with [`GraphError::EdgesRemain`] when edges
    /// are still attached unless `cascade` is set, in which case the edges
    /// are removed and every surviving resource has its property references
    /// to the removed id dropped.
    pub fn remove_resource(&mut self, id: &ResourceId, cascade: bool) -> Result<Resource, GraphError> {
        let idx = *self
            .ids
            .get(id)
            .ok_or_else(|| GraphError::VertexMissing { id: id.clone() })?;
        let has_edges = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .next()
            .is_some()
            || self
                .graph
                .edges_directed(idx, Direction::Incoming)
                .next()
                .is_some();
        if has_edges && !cascade {
            return Err(GraphError::EdgesRemain { id: id.clone() });
        }
        self.ids.shift_remove(id);
        let resource = self
            .graph
            .remove_node(idx)
            .ok_or_else(|| GraphError::VertexMissing { id: id.clone() })?;
        if cascade {
            for idx in self.ids.values() {
                // Leaf removal on well-formed trees cannot fail here.
                let _ = self.graph[*idx].remove_references(id);
            }
        }
        Ok(resource)
    }

    pub fn add_edge(
        &mut self,
        source: &ResourceId,
        target: &ResourceId,
        props: EdgeProps,
    ) -> Result<(), GraphError> {
        let src = *self
            .ids
            .get(source)
            .ok_or_else(|| GraphError::VertexMissing { id: source.clone() })?;
        let dst = *self
            .ids
            .get(target)
            .ok_or_else(|| GraphError::VertexMissing { id: target.clone() })?;
        if self.graph.find_edge(src, dst).is_some() {
            return Err(GraphError::EdgeExists {
                from: source.clone(),
                target: target.clone(),
            });
        }
        let (dep_src, dep_dst) = if props.deployment_order_reversed {
            (dst, src)
        } else {
            (src, dst)
        };
        if self.deployment_reaches(dep_dst, dep_src) {
            return Err(GraphError::CycleIntroduced {
                from: source.clone(),
                target: target.clone(),
            });
        }
        self.graph.add_edge(src, dst, props);
        Ok(())
    }

    pub fn remove_edge(
        &mut self,
        source: &ResourceId,
        target: &ResourceId,
    ) -> Result<EdgeProps, GraphError> {
        let (src, dst) = self.endpoints(source, target)?;
        let edge = self
            .graph
            .find_edge(src, dst)
            .ok_or_else(|| GraphError::EdgeMissing {
                from: source.clone(),
                target: target.clone(),
            })?;
        self.graph
            .remove_edge(edge)
            .ok_or_else(|| GraphError::EdgeMissing {
                from: source.clone(),
                target: target.clone(),
            })
    }

    pub fn edge(&self, source: &ResourceId, target: &ResourceId) -> Option<&EdgeProps> {
        let (src, dst) = self.endpoints(source, target).ok()?;
        self.graph.find_edge(src, dst).map(|e| &self.graph[e])
    }

    pub fn edge_mut(&mut self, source: &ResourceId, target: &ResourceId) -> Option<&mut EdgeProps> {
        let (src, dst) = self.endpoints(source, target).ok()?;
        self.graph
            .find_edge(src, dst)
            .map(|e| &mut self.graph[e])
    }

    /// All edges as `(source, target, props)`, sorted by source then target.
    pub fn edges(&self) -> Vec<(ResourceId, ResourceId, &EdgeProps)> {
        let mut out: Vec<(ResourceId, ResourceId, &EdgeProps)> = self
            .graph
            .edge_references()
            .map(|e| {
                (
                    self.graph[e.source()].id.clone(),
                    self.graph[e.target()].id.clone(),
                    e.weight(),
                )
            })
            .collect();
        out.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
        out
    }

    /// Outgoing dataflow neighbors of `id`, sorted by target id.
    pub fn edges_from(&self, id: &ResourceId) -> Vec<(ResourceId, &EdgeProps)> {
        self.directed_edges(id, Direction::Outgoing)
    }

    /// Incoming dataflow neighbors of `id`, sorted by source id.
    pub fn edges_to(&self, id: &ResourceId) -> Vec<(ResourceId, &EdgeProps)> {
        self.directed_edges(id, Direction::Incoming)
    }

    fn directed_edges(&self, id: &ResourceId, dir: Direction) -> Vec<(ResourceId, &EdgeProps)> {
        let Some(idx) = self.ids.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<(ResourceId, &EdgeProps)> = self
            .graph
            .edges_directed(*idx, dir)
            .map(|e| {
                let other = if dir == Direction::Outgoing {
                    e.target()
                } else {
                    e.source()
                };
                (self.graph[other].id.clone(), e.weight())
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Adjacency map of the dataflow view: id -> sorted successor ids.
    pub fn adjacency(&self) -> IndexMap<ResourceId, Vec<ResourceId>> {
        let mut out = IndexMap::new();
        for id in self.sorted_ids() {
            let next = self
                .edges_from(&id)
                .into_iter()
                .map(|(t, _)| t)
                .collect();
            out.insert(id, next);
        }
        out
    }

    /// Predecessor map of the dataflow view: id -> sorted predecessor ids.
    pub fn predecessors(&self) -> IndexMap<ResourceId, Vec<ResourceId>> {
        let mut out = IndexMap::new();
        for id in self.sorted_ids() {
            let prev = self.edges_to(&id).into_iter().map(|(s, _)| s).collect();
            out.insert(id, prev);
        }
        out
    }

    /// All simple dataflow paths from `source` to `target`, sorted by
    /// length then lexicographic node ids.
    pub fn all_paths(&self, source: &ResourceId, target: &ResourceId) -> Vec<Vec<ResourceId>> {
        let mut paths = Vec::new();
        if !self.contains(source) || !self.contains(target) {
            return paths;
        }
        let mut stack = vec![source.clone()];
        let mut visited: BTreeSet<ResourceId> = BTreeSet::new();
        visited.insert(source.clone());
        self.collect_paths(source, target, &mut stack, &mut visited, &mut paths);
        paths.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        paths
    }

    fn collect_paths(
        &self,
        current: &ResourceId,
        target: &ResourceId,
        stack: &mut Vec<ResourceId>,
        visited: &mut BTreeSet<ResourceId>,
        paths: &mut Vec<Vec<ResourceId>>,
    ) {
        if current == target {
            paths.push(stack.clone());
            return;
        }
        for (next, _) in self.edges_from(current) {
            if visited.contains(&next) {
                continue;
            }
            visited.insert(next.clone());
            stack.push(next.clone());
            self.collect_paths(&next, target, stack, visited, paths);
            stack.pop();
            visited.remove(&next);
        }
    }

    /// Picks the preferred path from `source` to `target`: maximum total
    /// edge weight, then fewest hops, then lexicographically smallest node
    /// sequence. `ambiguous` is set when a second path ties on weight and
    /// length and only the lexicographic order decided.
    pub fn shortest_path_stable(
        &self,
        source: &ResourceId,
        target: &ResourceId,
    ) -> Option<SelectedPath> {
        let paths = self.all_paths(source, target);
        let mut best: Option<SelectedPath> = None;
        for nodes in paths {
            let weight = nodes
                .windows(2)
                .filter_map(|w| self.edge(&w[0], &w[1]))
                .map(|p| p.weight)
                .sum();
            match &mut best {
                None => {
                    best = Some(SelectedPath {
                        nodes,
                        weight,
                        ambiguous: false,
                    })
                }
                Some(current) => {
                    if weight > current.weight
                        || (weight == current.weight && nodes.len() < current.nodes.len())
                    {
                        current.nodes = nodes;
                        current.weight = weight;
                        current.ambiguous = false;
                    } else if weight == current.weight
                        && nodes.len() == current.nodes.len()
                        && nodes != current.nodes
                    {
                        // all_paths orders lexicographically within a length
                        // class, so the incumbent is the preferred one.
                        current.ambiguous = true;
                    }
                }
            }
        }
        best
    }

    /// Kahn's algorithm over the deployment view with a sorted ready set.
    pub fn topological_order(&self) -> Result<Vec<ResourceId>, GraphError> {
        let mut in_degree: IndexMap<ResourceId, usize> =
            self.sorted_ids().into_iter().map(|id| (id, 0)).collect();
        let deployment: Vec<(ResourceId, ResourceId)> = self
            .edges()
            .into_iter()
            .map(|(s, t, props)| {
                if props.deployment_order_reversed {
                    (t, s)
                } else {
                    (s, t)
                }
            })
            .collect();
        for (_, t) in &deployment {
            if let Some(d) = in_degree.get_mut(t) {
                *d += 1;
            }
        }
        let mut ready: BTreeSet<ResourceId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| id.clone())
            .collect();
        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(id) = ready.iter().next().cloned() {
            ready.remove(&id);
            for (s, t) in &deployment {
                if *s == id {
                    if let Some(d) = in_degree.get_mut(t) {
                        *d -= 1;
                        if *d == 0 {
                            ready.insert(t.clone());
                        }
                    }
                }
            }
            order.push(id);
        }
        if order.len() != in_degree.len() {
            let (s, t) = deployment
                .into_iter()
                .find(|(s, _)| !order.contains(s))
                .unwrap_or_default();
            return Err(GraphError::CycleIntroduced {
                from: s,
                target: t,
            });
        }
        Ok(order)
    }

    /// Dataflow-reachable resources from `id`, excluding `id` itself,
    /// in sorted order.
    pub fn downstream(&self, id: &ResourceId, layer: DependencyLayer) -> Vec<ResourceId> {
        self.reach(id, layer, Direction::Outgoing)
    }

    /// Resources that can reach `id` through dataflow edges, sorted.
    pub fn upstream(&self, id: &ResourceId, layer: DependencyLayer) -> Vec<ResourceId> {
        self.reach(id, layer, Direction::Incoming)
    }

    fn reach(&self, id: &ResourceId, layer: DependencyLayer, dir: Direction) -> Vec<ResourceId> {
        let direct = |id: &ResourceId| -> Vec<ResourceId> {
            match dir {
                Direction::Outgoing => self.edges_from(id).into_iter().map(|(t, _)| t).collect(),
                Direction::Incoming => self.edges_to(id).into_iter().map(|(s, _)| s).collect(),
            }
        };
        match layer {
            DependencyLayer::Direct => direct(id),
            DependencyLayer::All => {
                let mut seen = BTreeSet::new();
                let mut queue: Vec<ResourceId> = direct(id);
                while let Some(next) = queue.pop() {
                    if seen.insert(next.clone()) {
                        queue.extend(direct(&next));
                    }
                }
                seen.into_iter().collect()
            }
        }
    }

    /// Atomically renames a vertex: the resource's own id, the id index,
    /// every property reference in every resource, and edge data endpoints
    /// all observe the new id together.
    pub fn update_resource_id(
        &mut self,
        old: &ResourceId,
        new: &ResourceId,
    ) -> Result<(), GraphError> {
        if old == new {
            return Ok(());
        }
        if self.ids.contains_key(new) {
            return Err(GraphError::VertexExists { id: new.clone() });
        }
        let idx = self
            .ids
            .shift_remove(old)
            .ok_or_else(|| GraphError::VertexMissing { id: old.clone() })?;
        self.graph[idx].id = new.clone();
        self.ids.insert(new.clone(), idx);
        for idx in self.ids.values() {
            self.graph[*idx].rewrite_references(old, new);
        }
        let edge_ids: Vec<petgraph::graph::EdgeIndex<u32>> =
            self.graph.edge_indices().collect();
        for edge in edge_ids {
            let props = &mut self.graph[edge];
            if props.data.source.as_ref() == Some(old) {
                props.data.source = Some(new.clone());
            }
            if props.data.target.as_ref() == Some(old) {
                props.data.target = Some(new.clone());
            }
        }
        Ok(())
    }

    fn endpoints(
        &self,
        source: &ResourceId,
        target: &ResourceId,
    ) -> Result<(NodeIndex<u32>, NodeIndex<u32>), GraphError> {
        let src = *self
            .ids
            .get(source)
            .ok_or_else(|| GraphError::VertexMissing { id: source.clone() })?;
        let dst = *self
            .ids
            .get(target)
            .ok_or_else(|| GraphError::VertexMissing { id: target.clone() })?;
        Ok((src, dst))
    }

    /// Reachability in the deployment view, used for cycle checks on insert.
    fn deployment_reaches(&self, from: NodeIndex<u32>, to: NodeIndex<u32>) -> bool {
        if from == to {
            return true;
        }
        let mut seen = BTreeSet::new();
        let mut queue = vec![from];
        while let Some(current) = queue.pop() {
            if !seen.insert(current) {
                continue;
            }
            if current == to {
                return true;
            }
            for edge in self.graph.edges_directed(current, Direction::Outgoing) {
                if !edge.weight().deployment_order_reversed {
                    queue.push(edge.target());
                }
            }
            for edge in self.graph.edges_directed(current, Direction::Incoming) {
                if edge.weight().deployment_order_reversed {
                    queue.push(edge.source());
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::EdgeProps;

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    fn graph_with(ids: &[&str]) -> ResourceGraph {
        let mut g = ResourceGraph::new();
        for s in ids {
            g.add_resource(Resource::new(id(s))).unwrap();
        }
        g
    }

    #[test]
    fn add_edge_rejects_dataflow_cycle() {
        let mut g = graph_with(&["aws:a::1", "aws:b::2"]);
        g.add_edge(&id("aws:a::1"), &id("aws:b::2"), EdgeProps::default())
            .unwrap();
        let err = g
            .add_edge(&id("aws:b::2"), &id("aws:a::1"), EdgeProps::default())
            .unwrap_err();
        assert!(matches!(err, GraphError::CycleIntroduced { .. }));
    }

    #[test]
    fn reversed_edge_flips_deployment_direction() {
        // a -> b reversed and b -> a plain agree in the deployment view,
        // so both may coexist without a deployment cycle.
        let mut g = graph_with(&["aws:a::1", "aws:b::2"]);
        let reversed = EdgeProps {
            deployment_order_reversed: true,
            ..Default::default()
        };
        g.add_edge(&id("aws:a::1"), &id("aws:b::2"), reversed)
            .unwrap();
        g.add_edge(&id("aws:b::2"), &id("aws:a::1"), EdgeProps::default())
            .unwrap();
        let order = g.topological_order().unwrap();
        assert_eq!(order, vec![id("aws:b::2"), id("aws:a::1")]);
    }

    #[test]
    fn remove_requires_cascade_when_edges_remain() {
        let mut g = graph_with(&["aws:a::1", "aws:b::2"]);
        g.add_edge(&id("aws:a::1"), &id("aws:b::2"), EdgeProps::default())
            .unwrap();
        assert!(matches!(
            g.remove_resource(&id("aws:b::2"), false),
            Err(GraphError::EdgesRemain { .. })
        ));
        g.remove_resource(&id("aws:b::2"), true).unwrap();
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn cascade_removal_fixes_neighbor_properties() {
        let mut g = graph_with(&["aws:a::1", "aws:b::2"]);
        let gone = id("aws:b::2");
        g.resource_mut(&id("aws:a::1"))
            .unwrap()
            .set_property(&"Target".parse().unwrap(), crate::value::Value::Id(gone.clone()))
            .unwrap();
        g.add_edge(&id("aws:a::1"), &gone, EdgeProps::default())
            .unwrap();
        g.remove_resource(&gone, true).unwrap();
        let a = g.resource(&id("aws:a::1")).unwrap();
        assert!(a.get_property(&"Target".parse().unwrap()).is_none());
    }

    #[test]
    fn all_paths_sorted_by_length_then_lex() {
        let mut g = graph_with(&["aws:s::s", "aws:m::1", "aws:m::2", "aws:t::t"]);
        for mid in ["aws:m::1", "aws:m::2"] {
            g.add_edge(&id("aws:s::s"), &id(mid), EdgeProps::default())
                .unwrap();
            g.add_edge(&id(mid), &id("aws:t::t"), EdgeProps::default())
                .unwrap();
        }
        g.add_edge(&id("aws:s::s"), &id("aws:t::t"), EdgeProps::default())
            .unwrap();
        let paths = g.all_paths(&id("aws:s::s"), &id("aws:t::t"));
        assert_eq!(paths.len(), 3);
        assert_eq!(paths[0].len(), 2);
        assert_eq!(paths[1][1], id("aws:m::1"));
        assert_eq!(paths[2][1], id("aws:m::2"));
    }

    #[test]
    fn shortest_path_prefers_weight_then_length() {
        let mut g = graph_with(&["aws:s::s", "aws:m::1", "aws:t::t"]);
        g.add_edge(&id("aws:s::s"), &id("aws:t::t"), EdgeProps::default())
            .unwrap();
        g.add_edge(&id("aws:s::s"), &id("aws:m::1"), EdgeProps::with_weight(5))
            .unwrap();
        g.add_edge(&id("aws:m::1"), &id("aws:t::t"), EdgeProps::with_weight(5))
            .unwrap();
        let best = g
            .shortest_path_stable(&id("aws:s::s"), &id("aws:t::t"))
            .unwrap();
        assert_eq!(best.nodes.len(), 3);
        assert_eq!(best.weight, 10);
        assert!(!best.ambiguous);
    }

    #[test]
    fn equal_weight_paths_flag_ambiguity_and_pick_lex_first() {
        let mut g = graph_with(&["aws:s::s", "aws:m::1", "aws:m::2", "aws:t::t"]);
        for mid in ["aws:m::1", "aws:m::2"] {
            g.add_edge(&id("aws:s::s"), &id(mid), EdgeProps::default())
                .unwrap();
            g.add_edge(&id(mid), &id("aws:t::t"), EdgeProps::default())
                .unwrap();
        }
        let best = g
            .shortest_path_stable(&id("aws:s::s"), &id("aws:t::t"))
            .unwrap();
        assert!(best.ambiguous);
        assert_eq!(best.nodes[1], id("aws:m::1"));
    }

    #[test]
    fn update_resource_id_rewrites_references() {
        let mut g = graph_with(&["aws:subnet::private0", "aws:lambda_function::api"]);
        let old = id("aws:subnet::private0");
        let new = id("aws:subnet:vpc:private0");
        g.resource_mut(&id("aws:lambda_function::api"))
            .unwrap()
            .append_property(&"Subnets".parse().unwrap(), crate::value::Value::Id(old.clone()))
            .unwrap();
        g.add_edge(&id("aws:lambda_function::api"), &old, EdgeProps::default())
            .unwrap();
        g.update_resource_id(&old, &new).unwrap();
        assert!(g.contains(&new));
        assert!(!g.contains(&old));
        let lambda = g.resource(&id("aws:lambda_function::api")).unwrap();
        assert_eq!(
            lambda.get_property(&"Subnets".parse().unwrap()).unwrap(),
            &crate::value::Value::List(vec![crate::value::Value::Id(new.clone())])
        );
        assert!(g.edge(&id("aws:lambda_function::api"), &new).is_some());
    }

    #[test]
    fn topological_order_is_deterministic() {
        let mut g = graph_with(&["aws:c::3", "aws:a::1", "aws:b::2"]);
        g.add_edge(&id("aws:a::1"), &id("aws:c::3"), EdgeProps::default())
            .unwrap();
        g.add_edge(&id("aws:b::2"), &id("aws:c::3"), EdgeProps::default())
            .unwrap();
        let order = g.topological_order().unwrap();
        assert_eq!(order, vec![id("aws:a::1"), id("aws:b::2"), id("aws:c::3")]);
    }
}
