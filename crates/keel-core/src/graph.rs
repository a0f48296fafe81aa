//! The dependency graph.
//!
//! An arena of nodes addressed by stable [`NodeId`] handles, with edges as
//! index pairs tagged by requirement kind. Back-references are kept per
//! node, so parent/child navigation never needs ownership cycles. The
//! graph starts as a single synthetic root (the user's request) and grows
//! as the manager expands requirements.

use std::collections::BTreeMap;

use keel_schema::{Blake3Hash, RecipeReference};

use crate::recipe::Recipe;

/// Stable handle to a node in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Index into the arena.
    pub fn index(self) -> usize {
        self.0
    }
}

/// How a requirement edge behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Regular runtime requirement, exposed to consumers.
    Normal,
    /// Needed only while building the requester; never in public closures.
    BuildTime,
    /// Runtime requirement hidden from the requester's consumers.
    Private,
}

impl EdgeKind {
    /// Whether this edge contributes to public closures.
    pub fn is_public(self) -> bool {
        matches!(self, EdgeKind::Normal)
    }

    /// Whether the dependency is needed at the requester's runtime.
    pub fn is_runtime(self) -> bool {
        !matches!(self, EdgeKind::BuildTime)
    }
}

/// An outgoing requirement edge.
#[derive(Debug, Clone, Copy)]
pub struct Edge {
    /// The dependency node.
    pub target: NodeId,
    /// Requirement kind of this edge.
    pub kind: EdgeKind,
}

/// One resolved recipe instantiation in the graph.
///
/// The synthetic root has no reference and no recipe.
#[derive(Debug)]
pub struct Node {
    /// Revision-resolved reference; `None` only for the synthetic root.
    pub reference: Option<RecipeReference>,
    /// The evaluated recipe; `None` only for the synthetic root.
    pub recipe: Option<Recipe>,
    /// Package identity, filled in by the binaries analyzer.
    pub package_id: Option<Blake3Hash>,
    /// Package revision, filled in once the binary is realized.
    pub prev: Option<Blake3Hash>,
    /// Public closure: ordered, deduplicated dependency nodes reachable
    /// via non-private, non-build-time edges, dependency-first.
    pub closure: Vec<NodeId>,
    /// Version overrides inherited from requesters above this node.
    pub overrides: BTreeMap<String, RecipeReference>,
    edges: Vec<Edge>,
    inverse: Vec<NodeId>,
}

impl Node {
    /// Display name for reports; the root renders as `<root>`.
    pub fn display(&self) -> String {
        self.reference
            .as_ref()
            .map_or_else(|| "<root>".to_string(), ToString::to_string)
    }

    /// Outgoing edges in requirement declaration order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Nodes that require this one.
    pub fn inverse_neighbors(&self) -> &[NodeId] {
        &self.inverse
    }
}

/// Arena-backed dependency DAG with one synthetic root.
#[derive(Debug)]
pub struct DependencyGraph {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyGraph {
    /// Create a graph containing only the synthetic root.
    pub fn new() -> Self {
        let root = Node {
            reference: None,
            recipe: None,
            package_id: None,
            prev: None,
            closure: Vec::new(),
            overrides: BTreeMap::new(),
            edges: Vec::new(),
            inverse: Vec::new(),
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    /// The synthetic root node.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Add a resolved recipe node and return its handle.
    pub fn add_node(
        &mut self,
        reference: RecipeReference,
        recipe: Recipe,
        overrides: BTreeMap<String, RecipeReference>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            reference: Some(reference),
            recipe: Some(recipe),
            package_id: None,
            prev: None,
            closure: Vec::new(),
            overrides,
            edges: Vec::new(),
            inverse: Vec::new(),
        });
        id
    }

    /// Add a requirement edge. The caller must have ruled out cycles with
    /// [`DependencyGraph::would_cycle`] first.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId, kind: EdgeKind) {
        self.nodes[from.0].edges.push(Edge { target: to, kind });
        if !self.nodes[to.0].inverse.contains(&from) {
            self.nodes[to.0].inverse.push(from);
        }
    }

    /// Whether adding an edge `from -> to` would close a cycle, i.e.
    /// whether `from` is reachable from `to` along existing edges.
    pub fn would_cycle(&self, from: NodeId, to: NodeId) -> bool {
        if from == to {
            return true;
        }
        let mut stack = vec![to];
        let mut seen = vec![false; self.nodes.len()];
        while let Some(current) = stack.pop() {
            if current == from {
                return true;
            }
            if std::mem::replace(&mut seen[current.0], true) {
                continue;
            }
            for edge in &self.nodes[current.0].edges {
                stack.push(edge.target);
            }
        }
        false
    }

    /// Borrow a node.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Mutably borrow a node.
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    /// All node handles, root included, in insertion order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Number of nodes excluding the synthetic root.
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Whether the graph holds only the synthetic root.
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Direct children of the synthetic root.
    pub fn root_children(&self) -> Vec<NodeId> {
        self.nodes[self.root.0]
            .edges
            .iter()
            .map(|e| e.target)
            .collect()
    }

    /// Find a non-root node by package name.
    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        self.node_ids().find(|id| {
            self.nodes[id.0]
                .reference
                .as_ref()
                .is_some_and(|r| r.name == name)
        })
    }

    /// Topological order with children before parents (dependencies
    /// first). The synthetic root is excluded.
    pub fn topo_children_first(&self) -> Vec<NodeId> {
        self.layers_children_first().into_iter().flatten().collect()
    }

    /// Topological layers, children first: every node's dependencies
    /// appear in strictly earlier layers. Kahn's algorithm over reversed
    /// edges; ids within a layer are sorted for deterministic output.
    /// The synthetic root is excluded.
    pub fn layers_children_first(&self) -> Vec<Vec<NodeId>> {
        // out_degree counts unprocessed dependencies of each node.
        let mut out_degree: Vec<usize> = self.nodes.iter().map(|n| n.edges.len()).collect();
        let mut ready: Vec<NodeId> = self
            .node_ids()
            .filter(|id| *id != self.root && out_degree[id.0] == 0)
            .collect();
        ready.sort();

        let mut layers = Vec::new();
        while !ready.is_empty() {
            let layer = std::mem::take(&mut ready);
            for &id in &layer {
                for &parent in &self.nodes[id.0].inverse {
                    out_degree[parent.0] -= 1;
                    if out_degree[parent.0] == 0 && parent != self.root {
                        ready.push(parent);
                    }
                }
            }
            ready.sort();
            layers.push(layer);
        }
        layers
    }

    /// Compute every node's public closure.
    ///
    /// Processed children-first so each closure can splice in the already
    /// final closures of its children. Order within a closure is
    /// dependency-first with first-seen deduplication: information from a
    /// dependency always precedes information from anything depending on
    /// it, so later entries can override earlier ones when merged.
    pub fn compute_closures(&mut self) {
        for id in self.topo_children_first() {
            let mut closure: Vec<NodeId> = Vec::new();
            for edge in self.nodes[id.0].edges.clone() {
                if !edge.kind.is_public() {
                    continue;
                }
                for &dep in &self.nodes[edge.target.0].closure {
                    if !closure.contains(&dep) {
                        closure.push(dep);
                    }
                }
                if !closure.contains(&edge.target) {
                    closure.push(edge.target);
                }
            }
            self.nodes[id.0].closure = closure;
        }
    }
}
