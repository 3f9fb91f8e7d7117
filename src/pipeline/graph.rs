//! Named node container using daggy.
//!
//! The [`Graph`] mirrors the live edges of its nodes in a `daggy` DAG so
//! that cycles are rejected at wiring time and lifecycle operations can
//! walk the topology: `start` brings sinks up first so no buffer is sent
//! into a node that is not running yet, and `stop` drains sources first so
//! each downstream node sees everything its upstream flushed.

use super::events::{EventChannel, EventReceiver};
use super::factory::NodeFactory;
use super::node::{Node, NodeBuilder};
use crate::element::Process;
use crate::error::{Error, Result};
use daggy::petgraph::algo::toposort;
use daggy::{Dag, EdgeIndex, NodeIndex, Walker};
use std::collections::HashMap;
use std::fmt::Write as _;

/// One edge of the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeInfo {
    /// Upstream node.
    pub src: String,
    /// Upstream output slot.
    pub src_slot: usize,
    /// Downstream node.
    pub dst: String,
    /// Downstream input slot.
    pub dst_slot: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotPair {
    src_slot: usize,
    dst_slot: usize,
}

/// A set of named nodes and the edges between them.
///
/// # Example
///
/// ```rust
/// use mediagraph::pipeline::{Graph, NodeFactory};
///
/// let factory = NodeFactory::with_builtins();
/// let mut graph = Graph::new();
/// graph.add_from_factory(&factory, "src", "app_source", "")?;
/// graph.add_from_factory(&factory, "sink", "null_sink", "mode=sync")?;
/// graph.connect("src", 0, "sink", 0)?;
///
/// graph.start()?;
/// graph.stop()?;
/// # Ok::<(), mediagraph::error::Error>(())
/// ```
pub struct Graph {
    nodes: HashMap<String, Node>,
    dag: Dag<String, SlotPair>,
    index: HashMap<String, NodeIndex>,
    events: EventChannel,
}

impl Graph {
    /// Create an empty graph with its own event channel.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            dag: Dag::new(),
            index: HashMap::new(),
            events: EventChannel::new(),
        }
    }

    /// The graph's event channel.
    pub fn events(&self) -> &EventChannel {
        &self.events
    }

    /// A receiver on the graph's event channel.
    pub fn event_receiver(&self) -> EventReceiver {
        self.events.receiver()
    }

    /// Start a node builder already attached to the graph's events.
    pub fn node_builder(&self, name: impl Into<String>, process: impl Process) -> NodeBuilder {
        NodeBuilder::new(name, process).events(self.events.sender())
    }

    /// Add a built node.
    pub fn add_node(&mut self, node: Node) -> Result<Node> {
        let name = node.name().to_string();
        if self.nodes.contains_key(&name) {
            return Err(Error::Config(format!("duplicate node name '{name}'")));
        }
        let idx = self.dag.add_node(name.clone());
        self.index.insert(name.clone(), idx);
        self.nodes.insert(name, node.clone());
        Ok(node)
    }

    /// Build a node from a factory kind and configuration string and add it.
    pub fn add_from_factory(
        &mut self,
        factory: &NodeFactory,
        name: &str,
        kind: &str,
        config: &str,
    ) -> Result<Node> {
        if self.nodes.contains_key(name) {
            return Err(Error::Config(format!("duplicate node name '{name}'")));
        }
        let node = factory.create(name, kind, config, Some(self.events.sender()))?;
        self.add_node(node)
    }

    /// Look up a node by name.
    pub fn node(&self, name: &str) -> Result<&Node> {
        self.nodes
            .get(name)
            .ok_or_else(|| Error::NodeNotFound(name.to_string()))
    }

    /// Node names.
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Connect `src:src_slot -> dst:dst_slot`.
    ///
    /// Fails on unknown nodes, invalid slots, duplicate edges and edges that
    /// would close a cycle. May be called while the graph runs.
    pub fn connect(&mut self, src: &str, src_slot: usize, dst: &str, dst_slot: usize) -> Result<()> {
        let (src_node, src_idx) = self.lookup(src)?;
        let (dst_node, dst_idx) = self.lookup(dst)?;

        let edge = self
            .dag
            .add_edge(src_idx, dst_idx, SlotPair { src_slot, dst_slot })
            .map_err(|_| {
                Error::Config(format!("connecting '{src}' to '{dst}' would create a cycle"))
            })?;

        if let Err(err) = src_node.add_down_flow(src_slot, &dst_node, dst_slot) {
            self.dag.remove_edge(edge);
            return Err(err);
        }
        Ok(())
    }

    /// Remove every edge from `src` to `dst`; returns how many were removed.
    pub fn disconnect(&mut self, src: &str, dst: &str) -> Result<usize> {
        let (src_node, src_idx) = self.lookup(src)?;
        let (dst_node, dst_idx) = self.lookup(dst)?;

        let removed = src_node.remove_down_flow(&dst_node);
        let mut edges = self.edges_between(src_idx, dst_idx);
        // Edge removal moves the last edge into the freed index
        edges.sort_unstable_by(|a, b| b.cmp(a));
        for edge in edges {
            self.dag.remove_edge(edge);
        }
        Ok(removed)
    }

    /// Stop a node, unwire it and drop it from the graph.
    pub fn remove_node(&mut self, name: &str) -> Result<Node> {
        let (node, idx) = self.lookup(name)?;

        let parents: Vec<NodeIndex> = self
            .dag
            .parents(idx)
            .iter(&self.dag)
            .map(|(_, parent)| parent)
            .collect();
        for parent in parents {
            self.nodes[&self.dag[parent]].remove_down_flow(&node);
        }
        node.stop()?;
        let children: Vec<NodeIndex> = self
            .dag
            .children(idx)
            .iter(&self.dag)
            .map(|(_, child)| child)
            .collect();
        for child in children {
            node.remove_down_flow(&self.nodes[&self.dag[child]]);
        }

        self.dag.remove_node(idx);
        self.nodes.remove(name);
        // Removal moves the last node into the freed index
        self.index = self
            .dag
            .graph()
            .node_indices()
            .map(|i| (self.dag[i].clone(), i))
            .collect();
        Ok(node)
    }

    /// Every edge of the graph.
    pub fn edges(&self) -> Vec<EdgeInfo> {
        self.dag
            .graph()
            .edge_indices()
            .filter_map(|edge| {
                let (a, b) = self.dag.graph().edge_endpoints(edge)?;
                let slots = self.dag.edge_weight(edge)?;
                Some(EdgeInfo {
                    src: self.dag[a].clone(),
                    src_slot: slots.src_slot,
                    dst: self.dag[b].clone(),
                    dst_slot: slots.dst_slot,
                })
            })
            .collect()
    }

    /// Start every node, downstream before upstream.
    pub fn start(&self) -> Result<()> {
        for node in self.ordered().into_iter().rev() {
            node.start()?;
        }
        tracing::info!(nodes = self.nodes.len(), "graph started");
        Ok(())
    }

    /// Stop every node, upstream before downstream.
    ///
    /// Each stop drains and joins its node, so when this returns every
    /// buffer the sources emitted has been processed. Every node is stopped
    /// even if one fails; the first error is returned.
    pub fn stop(&self) -> Result<()> {
        let mut first_err = None;
        for node in self.ordered() {
            if let Err(err) = node.stop() {
                tracing::warn!(node = %node.name(), error = %err, "stop failed");
                first_err.get_or_insert(err);
            }
        }
        tracing::info!(nodes = self.nodes.len(), "graph stopped");
        first_err.map_or(Ok(()), Err)
    }

    /// Render the topology in Graphviz DOT format.
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph mediagraph {\n    rankdir=LR;\n");
        let mut names: Vec<&String> = self.nodes.keys().collect();
        names.sort();
        for name in names {
            let node = &self.nodes[name];
            let _ = writeln!(
                dot,
                "    \"{name}\" [label=\"{name}\\n{} {}/{}\"];",
                node.model().name(),
                node.input_count(),
                node.output_count()
            );
        }
        let mut edges = self.edges();
        edges.sort_by(|a, b| (&a.src, a.src_slot, &a.dst).cmp(&(&b.src, b.src_slot, &b.dst)));
        for e in edges {
            let _ = writeln!(
                dot,
                "    \"{}\" -> \"{}\" [label=\"{}:{}\"];",
                e.src, e.dst, e.src_slot, e.dst_slot
            );
        }
        dot.push_str("}\n");
        dot
    }

    fn lookup(&self, name: &str) -> Result<(Node, NodeIndex)> {
        let node = self.node(name)?.clone();
        let idx = self.index[name];
        Ok((node, idx))
    }

    fn edges_between(&self, src: NodeIndex, dst: NodeIndex) -> Vec<EdgeIndex> {
        self.dag
            .children(src)
            .iter(&self.dag)
            .filter(|&(_, child)| child == dst)
            .map(|(edge, _)| edge)
            .collect()
    }

    /// Nodes in topological order, sources first.
    fn ordered(&self) -> Vec<Node> {
        match toposort(self.dag.graph(), None) {
            Ok(order) => order
                .into_iter()
                .map(|i| self.nodes[&self.dag[i]].clone())
                .collect(),
            // Unreachable: edges are only added through the DAG
            Err(_) => self.nodes.values().cloned().collect(),
        }
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            tracing::warn!(error = %err, "graph teardown reported an error");
        }
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes.len())
            .field("edges", &self.dag.edge_count())
            .finish()
    }
}
