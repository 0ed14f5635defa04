//! Reference-counted dependency graph.
//!
//! Every edge holds one reference on its source. Culling starts from the nodes nobody
//! references and walks producers until only nodes reachable backwards from a target
//! are left.

use std::collections::HashSet;
use std::fmt;

use petgraph::Direction;
use petgraph::dot::Dot;
use petgraph::graph::{DiGraph, EdgeReference, NodeIndex};
use petgraph::visit::EdgeRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(NodeIndex<u32>);

impl NodeId {
    #[inline]
    pub fn index(&self) -> usize {
        self.0.index()
    }
}

/// Edge direction encodes "must happen before".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Source version -> pass or version consuming its content.
    Read,
    /// Pass or subresource version -> resource version it produces.
    Write,
    /// Replaced resource version -> version of the resource forwarded over it.
    Forward,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeKind::Read => f.write_str("read"),
            EdgeKind::Write => f.write_str("write"),
            EdgeKind::Forward => f.write_str("forward"),
        }
    }
}

struct NodeEntry<N> {
    payload: N,
    ref_count: u32,
    side_effect: bool,
    culled: bool,
}

pub struct DependencyGraph<N> {
    graph: DiGraph<NodeEntry<N>, EdgeKind>,
    culled: bool,
}

impl<N> DependencyGraph<N> {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            culled: false,
        }
    }

    pub fn add_node(&mut self, payload: N) -> NodeId {
        NodeId(self.graph.add_node(NodeEntry {
            payload,
            ref_count: 0,
            side_effect: false,
            culled: false,
        }))
    }

    /// Adds `from -> to`. Each outgoing edge is one reference held on `from`.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId, kind: EdgeKind) {
        debug_assert!(from != to, "self edge on {from:?}");
        debug_assert!(!self.culled, "edge added after cull()");
        self.graph[from.0].ref_count += 1;
        self.graph.add_edge(from.0, to.0, kind);
    }

    /// Marks a node as observable on its own; it survives culling without consumers.
    pub fn make_target(&mut self, node: NodeId) {
        self.graph[node.0].side_effect = true;
    }

    pub fn is_target(&self, node: NodeId) -> bool {
        self.graph[node.0].side_effect
    }

    pub fn cull(&mut self) {
        let mut stack: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|index| {
                let entry = &self.graph[*index];
                entry.ref_count == 0 && !entry.side_effect
            })
            .collect();

        while let Some(index) = stack.pop() {
            self.graph[index].culled = true;

            let producers: Vec<NodeIndex> = self
                .graph
                .edges_directed(index, Direction::Incoming)
                .map(|edge| edge.source())
                .collect();
            for producer in producers {
                let entry = &mut self.graph[producer];
                debug_assert!(entry.ref_count > 0);
                entry.ref_count -= 1;
                if entry.ref_count == 0 && !entry.side_effect {
                    stack.push(producer);
                }
            }
        }
        self.culled = true;
    }

    pub fn is_culled(&self, node: NodeId) -> bool {
        self.graph[node.0].culled
    }

    /// Live consumers of `node`, plus one if it is a target.
    pub fn ref_count(&self, node: NodeId) -> u32 {
        let entry = &self.graph[node.0];
        if entry.side_effect {
            entry.ref_count.max(1)
        } else {
            entry.ref_count
        }
    }

    /// True when `to` depends on `from`, directly or not. Only visits what `from`
    /// reaches, so asking from a pass being declared walks just the versions it wrote.
    pub fn has_path(&self, from: NodeId, to: NodeId) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![from.0];
        while let Some(index) = stack.pop() {
            if index == to.0 {
                return true;
            }
            if visited.insert(index) {
                stack.extend(self.graph.neighbors_directed(index, Direction::Outgoing));
            }
        }
        false
    }

    pub fn node(&self, node: NodeId) -> &N {
        &self.graph[node.0].payload
    }

    pub fn incoming(&self, node: NodeId) -> impl Iterator<Item = (NodeId, EdgeKind)> + '_ {
        self.graph
            .edges_directed(node.0, Direction::Incoming)
            .map(|edge| (NodeId(edge.source()), *edge.weight()))
    }

    pub fn outgoing(&self, node: NodeId) -> impl Iterator<Item = (NodeId, EdgeKind)> + '_ {
        self.graph
            .edges_directed(node.0, Direction::Outgoing)
            .map(|edge| (NodeId(edge.target()), *edge.weight()))
    }

    /// Non-culled nodes in declaration order.
    pub fn active_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.graph
            .node_indices()
            .filter(|index| !self.graph[*index].culled)
            .map(NodeId)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn clear(&mut self) {
        self.graph.clear();
        self.culled = false;
    }

    /// Renders the graph in `dot` format. `describe` returns a label and whether the
    /// node is a pass (drawn as a box) or a resource.
    pub fn dot(&self, describe: impl Fn(NodeId, &N) -> (String, bool)) -> String {
        let graph = self.graph.map(
            |index, entry| {
                let (label, is_pass) = describe(NodeId(index), &entry.payload);
                DotNode {
                    label,
                    is_pass,
                    culled: entry.culled,
                    refs: self.ref_count(NodeId(index)),
                }
            },
            |_, kind| *kind,
        );
        format!(
            "{}",
            Dot::with_attr_getters(&graph, &[], &dot_edge_attributes, &dot_node_attributes)
        )
    }
}

impl<N> Default for DependencyGraph<N> {
    fn default() -> Self {
        Self::new()
    }
}

struct DotNode {
    label: String,
    is_pass: bool,
    culled: bool,
    refs: u32,
}

impl fmt::Display for DotNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\nrefs: {}", self.label, self.refs)
    }
}

fn dot_edge_attributes(_: &DiGraph<DotNode, EdgeKind>, edge: EdgeReference<EdgeKind>) -> String {
    match edge.weight() {
        EdgeKind::Read => String::from("color=darkolivegreen"),
        EdgeKind::Write => String::from("color=red"),
        EdgeKind::Forward => String::from("color=blue style=dashed"),
    }
}

fn dot_node_attributes(_: &DiGraph<DotNode, EdgeKind>, node: (NodeIndex, &DotNode)) -> String {
    let node = node.1;
    let shape = if node.is_pass { "box" } else { "ellipse" };
    let color = match (node.is_pass, node.culled) {
        (_, true) => "gray",
        (true, false) => "darkorange",
        (false, false) => "skyblue",
    };
    format!("shape={shape} style=filled fillcolor={color}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> (DependencyGraph<&'static str>, [NodeId; 4]) {
        let mut graph = DependencyGraph::new();
        let pass_a = graph.add_node("a");
        let resource = graph.add_node("r");
        let pass_b = graph.add_node("b");
        let output = graph.add_node("out");
        graph.add_edge(pass_a, resource, EdgeKind::Write);
        graph.add_edge(resource, pass_b, EdgeKind::Read);
        graph.add_edge(pass_b, output, EdgeKind::Write);
        (graph, [pass_a, resource, pass_b, output])
    }

    #[test]
    fn chain_without_target_is_fully_culled() {
        let (mut graph, nodes) = chain();
        graph.cull();
        assert!(nodes.iter().all(|node| graph.is_culled(*node)));
        assert_eq!(graph.active_nodes().count(), 0);
    }

    #[test]
    fn target_keeps_its_producers_alive() {
        let (mut graph, [pass_a, resource, pass_b, output]) = chain();
        graph.make_target(pass_b);
        graph.cull();

        assert!(!graph.is_culled(pass_a));
        assert!(!graph.is_culled(resource));
        assert!(!graph.is_culled(pass_b));
        assert!(graph.is_culled(output));
        assert_eq!(graph.ref_count(pass_b), 1);
        assert_eq!(graph.ref_count(resource), 1);
    }

    #[test]
    fn culling_one_reader_does_not_cull_the_other() {
        let mut graph = DependencyGraph::new();
        let producer = graph.add_node("producer");
        let resource = graph.add_node("resource");
        let dead_reader = graph.add_node("dead");
        let live_reader = graph.add_node("live");
        graph.add_edge(producer, resource, EdgeKind::Write);
        graph.add_edge(resource, dead_reader, EdgeKind::Read);
        graph.add_edge(resource, live_reader, EdgeKind::Read);
        graph.make_target(live_reader);

        assert_eq!(graph.ref_count(resource), 2);
        graph.cull();

        assert!(graph.is_culled(dead_reader));
        assert!(!graph.is_culled(live_reader));
        assert!(!graph.is_culled(resource));
        assert!(!graph.is_culled(producer));
        assert_eq!(graph.ref_count(resource), 1);
        let order: Vec<_> = graph.active_nodes().map(|node| *graph.node(node)).collect();
        assert_eq!(order, vec!["producer", "resource", "live"]);
    }

    #[test]
    fn culling_does_not_depend_on_declaration_order() {
        let mut graph = DependencyGraph::new();
        let pass = graph.add_node("pass");
        let late_input = graph.add_node("input");
        let producer = graph.add_node("producer");
        graph.add_edge(producer, late_input, EdgeKind::Write);
        graph.add_edge(late_input, pass, EdgeKind::Read);
        graph.make_target(pass);
        graph.cull();

        assert!(!graph.is_culled(producer));
        assert!(!graph.is_culled(late_input));
        assert!(graph.has_path(producer, pass));
        assert!(!graph.has_path(pass, producer));
    }

    #[test]
    fn has_path_follows_edge_direction_only() {
        let (mut graph, [pass_a, resource, pass_b, output]) = chain();
        let sibling = graph.add_node("sibling");
        graph.add_edge(resource, sibling, EdgeKind::Read);

        assert!(graph.has_path(pass_a, output));
        assert!(graph.has_path(resource, sibling));
        assert!(!graph.has_path(pass_b, sibling));
        assert!(!graph.has_path(output, pass_a));
    }

    #[test]
    fn edges_are_reported_in_both_directions() {
        let (graph, [pass_a, resource, pass_b, _]) = chain();
        let incoming: Vec<_> = graph.incoming(pass_b).collect();
        assert_eq!(incoming, vec![(resource, EdgeKind::Read)]);
        let outgoing: Vec<_> = graph.outgoing(pass_a).collect();
        assert_eq!(outgoing, vec![(resource, EdgeKind::Write)]);
        assert_eq!(graph.edge_count(), 3);
    }

    #[test]
    fn dot_output_marks_culled_nodes() {
        let (mut graph, _) = chain();
        graph.cull();
        let dot = graph.dot(|_, name| (name.to_string(), name.len() == 1));
        assert!(dot.contains("digraph"));
        assert!(dot.contains("fillcolor=gray"));
        assert!(dot.contains("shape=box"));
    }

    #[test]
    fn clear_resets_everything() {
        let (mut graph, _) = chain();
        graph.cull();
        graph.clear();
        assert_eq!(graph.node_count(), 0);
        let node = graph.add_node("fresh");
        assert_eq!(node.index(), 0);
        assert!(!graph.is_culled(node));
    }
}
