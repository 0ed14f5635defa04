use crate::dependency_graph::{DependencyGraph, EdgeKind, NodeId};
use crate::handle::RawHandle;

/// One version of a resource in the dependency graph.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResourceNode {
    /// Resource id (index into the frame graph's resource list).
    pub(crate) resource: u16,
    /// Handle this node was created for. Refreshing a subresource from its parent
    /// creates a node without bumping the version.
    pub(crate) handle: RawHandle,
    pub(crate) node: NodeId,
}

impl ResourceNode {
    /// True when this version holds content somebody wrote. Parent content a
    /// subresource was taken from, or a forwarded version, only counts if it was written.
    pub(crate) fn has_writer<N>(&self, graph: &DependencyGraph<N>) -> bool {
        written(graph, self.node)
    }

    /// True when a node that survived culling consumes this version.
    pub(crate) fn has_active_readers<N>(&self, graph: &DependencyGraph<N>) -> bool {
        graph
            .outgoing(self.node)
            .any(|(consumer, _)| !graph.is_culled(consumer))
    }

    /// True when `pass` already produced this version.
    pub(crate) fn is_written_by<N>(&self, graph: &DependencyGraph<N>, pass: NodeId) -> bool {
        graph.incoming(self.node).any(|(producer, _)| producer == pass)
    }

    /// True when `pass` already reads this version.
    pub(crate) fn is_read_by<N>(&self, graph: &DependencyGraph<N>, pass: NodeId) -> bool {
        graph.outgoing(self.node).any(|(consumer, _)| consumer == pass)
    }
}

/// Write edges come from a pass or from a written subresource version.
fn written<N>(graph: &DependencyGraph<N>, node: NodeId) -> bool {
    graph.incoming(node).any(|(source, kind)| match kind {
        EdgeKind::Write => true,
        EdgeKind::Read | EdgeKind::Forward => written(graph, source),
    })
}
