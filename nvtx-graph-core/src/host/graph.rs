use std::fmt;
use std::sync::Arc;

use crate::{HostMarker, MarkerKind, NodeRef};

/// Host function executed by a kernel node.
pub type HostKernel = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
pub(crate) enum NodeOp {
    Kernel { name: Arc<str>, func: HostKernel },
    Marker(HostMarker),
}

#[derive(Clone)]
pub(crate) struct GraphNode {
    pub(crate) id: NodeRef,
    pub(crate) deps: Vec<NodeRef>,
    pub(crate) op: NodeOp,
}

impl GraphNode {
    fn run(&self) {
        match &self.op {
            NodeOp::Kernel { func, .. } => func(),
            NodeOp::Marker(marker) => marker.fire(),
        }
    }

    fn label(&self) -> NodeLabel {
        match &self.op {
            NodeOp::Kernel { name, .. } => NodeLabel::Kernel(name.to_string()),
            NodeOp::Marker(marker) => NodeLabel::Marker(marker.kind(), marker.name().to_string()),
        }
    }
}

/// What a captured node does, for inspection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeLabel {
    /// Computational work launched during capture
    Kernel(String),
    /// Zero-effect range marker
    Marker(MarkerKind, String),
}

/// Read-only view of one node of a [`HostGraph`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: NodeRef,
    pub deps: Vec<NodeRef>,
    pub label: NodeLabel,
}

/// A graph produced by ending a host capture.
///
/// Nodes are stored in capture order, which is a topological order: every
/// node only depends on nodes captured before it.
#[derive(Clone, Default)]
pub struct HostGraph {
    nodes: Vec<GraphNode>,
}

impl HostGraph {
    pub(crate) fn from_nodes(nodes: Vec<GraphNode>) -> Self {
        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in capture order.
    pub fn nodes(&self) -> Vec<NodeInfo> {
        self.nodes
            .iter()
            .map(|node| NodeInfo {
                id: node.id,
                deps: node.deps.clone(),
                label: node.label(),
            })
            .collect()
    }

    /// Node labels in capture order.
    pub fn labels(&self) -> Vec<NodeLabel> {
        self.nodes.iter().map(GraphNode::label).collect()
    }

    /// Position of `node` in capture order.
    pub fn position(&self, node: NodeRef) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == node)
    }

    /// Whether `later` transitively depends on `earlier`.
    pub fn depends_on(&self, later: NodeRef, earlier: NodeRef) -> bool {
        let mut pending = vec![later];
        let mut seen = Vec::new();
        while let Some(id) = pending.pop() {
            if seen.contains(&id) {
                continue;
            }
            seen.push(id);
            if let Some(node) = self.nodes.iter().find(|n| n.id == id) {
                for dep in &node.deps {
                    if *dep == earlier {
                        return true;
                    }
                    pending.push(*dep);
                }
            }
        }
        false
    }

    /// Produce an executable graph. The graph itself stays inspectable.
    pub fn instantiate(&self) -> HostGraphExec {
        HostGraphExec {
            nodes: self.nodes.clone().into(),
        }
    }
}

impl fmt::Debug for HostGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostGraph")
            .field("nodes", &self.labels())
            .finish()
    }
}

/// Executable form of a [`HostGraph`]. Replays run on the calling thread.
#[derive(Clone)]
pub struct HostGraphExec {
    nodes: Arc<[GraphNode]>,
}

impl HostGraphExec {
    /// Execute every node once, in dependency order.
    ///
    /// No capture-time host code runs here: only kernel functions and
    /// marker nodes recorded in the graph.
    pub fn replay(&self) {
        for node in self.nodes.iter() {
            node.run();
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl fmt::Debug for HostGraphExec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostGraphExec({} nodes)", self.nodes.len())
    }
}
