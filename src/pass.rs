use std::any::Any;
use std::fmt;
use std::ops::Deref;

use crate::dependency_graph::NodeId;
use crate::render_target::RenderTargetData;
use crate::resources::FrameGraphResources;

/// Upper bound on the size of an execute closure's captured state. Larger state belongs
/// in the pass data, which the setup closure fills in.
pub const MAX_EXECUTE_CAPTURE_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub(crate) u16);

impl PassId {
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pass#{}", self.0)
    }
}

/// Runs a pass once its resources are resolved.
pub(crate) trait PassExecutor<C> {
    fn execute(&mut self, resources: &FrameGraphResources<'_>, context: &mut C);
    fn data(&self) -> &dyn Any;
}

/// Pass data filled in by setup, handed back to the execute closure.
pub(crate) struct ClosureExecutor<D, E> {
    data: D,
    execute: Option<E>,
}

impl<D, E> ClosureExecutor<D, E> {
    pub(crate) fn new(data: D, execute: E) -> Self {
        Self {
            data,
            execute: Some(execute),
        }
    }
}

impl<C, D, E> PassExecutor<C> for ClosureExecutor<D, E>
where
    D: 'static,
    E: FnOnce(&FrameGraphResources<'_>, &D, &mut C),
{
    fn execute(&mut self, resources: &FrameGraphResources<'_>, context: &mut C) {
        if let Some(execute) = self.execute.take() {
            execute(resources, &self.data, context);
        }
    }

    fn data(&self) -> &dyn Any {
        &self.data
    }
}

pub(crate) enum PassKind<C> {
    Render {
        executor: Option<Box<dyn PassExecutor<C>>>,
        render_targets: Vec<RenderTargetData>,
    },
    /// Keeps its input alive and does nothing.
    Present,
}

pub(crate) struct PassNode<C> {
    pub(crate) name: String,
    pub(crate) node: NodeId,
    pub(crate) kind: PassKind<C>,
    /// Handle indices the pass declared, in declaration order.
    pub(crate) declared: Vec<u16>,
    /// Resource ids to resolve right before this pass, in resolve order.
    pub(crate) devirtualize: Vec<u16>,
    /// Resource ids to destroy right after this pass, in destroy order.
    pub(crate) destroy: Vec<u16>,
}

impl<C> PassNode<C> {
    pub(crate) fn render(name: &str, node: NodeId) -> Self {
        Self::new(
            name,
            node,
            PassKind::Render {
                executor: None,
                render_targets: Vec::new(),
            },
        )
    }

    pub(crate) fn present(node: NodeId) -> Self {
        Self::new("Present", node, PassKind::Present)
    }

    fn new(name: &str, node: NodeId, kind: PassKind<C>) -> Self {
        Self {
            name: name.to_string(),
            node,
            kind,
            declared: Vec::new(),
            devirtualize: Vec::new(),
            destroy: Vec::new(),
        }
    }

    pub(crate) fn declare(&mut self, handle: u16) {
        if !self.declared.contains(&handle) {
            self.declared.push(handle);
        }
    }

    pub(crate) fn render_targets(&self) -> &[RenderTargetData] {
        match &self.kind {
            PassKind::Render { render_targets, .. } => render_targets,
            PassKind::Present => &[],
        }
    }

    pub(crate) fn render_targets_mut(&mut self) -> &mut [RenderTargetData] {
        match &mut self.kind {
            PassKind::Render { render_targets, .. } => render_targets,
            PassKind::Present => &mut [],
        }
    }
}

/// A pass just added to the frame graph, dereferencing to the data its setup filled in.
pub struct Pass<'a, D> {
    id: PassId,
    data: &'a D,
}

impl<'a, D> Pass<'a, D> {
    pub(crate) fn new(id: PassId, data: &'a D) -> Self {
        Self { id, data }
    }

    pub fn id(&self) -> PassId {
        self.id
    }

    pub fn data(&self) -> &'a D {
        self.data
    }
}

impl<D> Deref for Pass<'_, D> {
    type Target = D;

    fn deref(&self) -> &D {
        self.data
    }
}

impl<D: fmt::Debug> fmt::Debug for Pass<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pass")
            .field("id", &self.id)
            .field("data", self.data)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declare_deduplicates() {
        let mut graph = crate::dependency_graph::DependencyGraph::new();
        let mut pass = PassNode::<()>::render("lighting", graph.add_node(()));
        pass.declare(3);
        pass.declare(1);
        pass.declare(3);
        assert_eq!(pass.declared, vec![3, 1]);
    }

    #[test]
    fn present_pass_has_no_render_targets() {
        let mut graph = crate::dependency_graph::DependencyGraph::new();
        let pass = PassNode::<()>::present(graph.add_node(()));
        assert_eq!(pass.name, "Present");
        assert!(pass.render_targets().is_empty());
    }
}
