use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::mem::size_of;

use log::{debug, error, trace, warn};

use crate::allocator::ResourceAllocator;
use crate::builder::Builder;
use crate::dependency_graph::{DependencyGraph, EdgeKind, NodeId};
use crate::error::{FrameGraphError, Result};
use crate::handle::{Handle, RawHandle, ResourceSlot};
use crate::pass::{
    ClosureExecutor, MAX_EXECUTE_CAPTURE_SIZE, Pass, PassExecutor, PassId, PassKind, PassNode,
};
use crate::render_target::{
    ATTACHMENT_SLOTS, ImportedRenderTarget, RenderTarget, RenderTargetData,
    RenderTargetDescriptor, RenderTargetInfo, TargetBufferFlags, TargetBufferInfo,
};
use crate::resource::{Resource, ResourceEntry, ResourceInfo, Usage, VirtualResource};
use crate::resource_node::ResourceNode;
use crate::resources::FrameGraphResources;
use crate::texture::{Texture, TextureDescriptor};

/// Payload of a dependency graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Vertex {
    Pass(PassId),
    /// Index into the resource node list.
    Resource(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameGraphState {
    /// Accepting passes and resources.
    Building,
    /// Culled, lifetimes computed and every live resource resolved.
    Compiled,
    /// Every live pass ran; only `reset` is allowed.
    Executed,
    /// `compile` failed to allocate; only `reset` is allowed.
    Failed,
}

/// A frame's worth of passes and the resources flowing between them.
///
/// Build it with [`add_pass`](Self::add_pass), then [`compile`](Self::compile),
/// [`execute`](Self::execute) and [`reset`](Self::reset) it before building the next frame.
/// `C` is whatever the passes record into, typically a command encoder.
pub struct FrameGraph<C = ()> {
    pub(crate) graph: DependencyGraph<Vertex>,
    pub(crate) slots: Vec<ResourceSlot>,
    pub(crate) resources: Vec<Box<dyn VirtualResource>>,
    pub(crate) resource_nodes: Vec<ResourceNode>,
    pub(crate) passes: Vec<PassNode<C>>,
    imported_targets: HashMap<u16, ImportedRenderTarget>,
    state: FrameGraphState,
}

fn checked_index(len: usize, what: &'static str) -> u16 {
    match u16::try_from(len) {
        Ok(index) if index < u16::MAX => index,
        _ => panic!(
            "{}",
            FrameGraphError::CapacityExceeded {
                what,
                limit: u16::MAX as usize
            }
        ),
    }
}

impl<C> FrameGraph<C> {
    pub fn new() -> Self {
        Self {
            graph: DependencyGraph::new(),
            slots: Vec::new(),
            resources: Vec::new(),
            resource_nodes: Vec::new(),
            passes: Vec::new(),
            imported_targets: HashMap::new(),
            state: FrameGraphState::Building,
        }
    }

    pub fn state(&self) -> FrameGraphState {
        self.state
    }

    /// Adds a pass. `setup` runs immediately to declare what the pass uses and fill in
    /// its data; `execute` runs during [`execute`](Self::execute) if the pass survives
    /// culling.
    pub fn add_pass<D, S, E>(&mut self, name: &str, setup: S, execute: E) -> Pass<'_, D>
    where
        D: Default + 'static,
        S: FnOnce(&mut Builder<'_, C>, &mut D),
        E: FnOnce(&FrameGraphResources<'_>, &D, &mut C) + 'static,
    {
        const {
            assert!(
                size_of::<E>() < MAX_EXECUTE_CAPTURE_SIZE,
                "execute closure captures too much state, move it into the pass data"
            )
        };
        self.expect_state(FrameGraphState::Building, "add a pass");

        let id = self.add_pass_node(|node| PassNode::render(name, node));
        let mut data = D::default();
        setup(&mut Builder::new(self, id), &mut data);

        let PassKind::Render { executor, .. } = &mut self.passes[id.index()].kind else {
            unreachable!("render pass node created above");
        };
        let executor: &mut Box<dyn PassExecutor<C>> =
            executor.insert(Box::new(ClosureExecutor::new(data, execute)));
        match executor.data().downcast_ref::<D>() {
            Some(data) => Pass::new(id, data),
            None => unreachable!("pass data keeps the type it was created with"),
        }
    }

    /// Adds a pass with no work that keeps `handle`, and everything producing it, alive.
    pub fn present<R: Resource>(&mut self, handle: Handle<R>) {
        self.expect_state(FrameGraphState::Building, "present");
        let id = self.add_pass_node(PassNode::present);
        self.graph.make_target(self.passes[id.index()].node);
        self.read_internal(handle, id, R::Usage::none());
    }

    /// Brings an externally owned resource into the graph. It is never created nor
    /// destroyed by the allocator.
    pub fn import<R: Resource>(
        &mut self,
        name: &str,
        descriptor: R::Descriptor,
        usage: R::Usage,
        concrete: R,
    ) -> Handle<R> {
        self.expect_state(FrameGraphState::Building, "import a resource");
        self.add_resource_internal(|id| {
            ResourceEntry::new_imported(name, id, descriptor, usage, concrete)
        })
    }

    /// Imports a texture together with the render target it belongs to. Passes using it
    /// as their first color attachment render into `target` instead of a new one.
    pub fn import_render_target(
        &mut self,
        name: &str,
        descriptor: TextureDescriptor,
        texture: Texture,
        target: ImportedRenderTarget,
    ) -> Handle<Texture> {
        let handle = self.import(
            name,
            descriptor,
            wgpu::TextureUsages::RENDER_ATTACHMENT,
            texture,
        );
        self.imported_targets.insert(handle.index(), target);
        handle
    }

    /// Makes every future reference to `replaced` name a new version of `subresource`
    /// instead. `replaced` is updated to that version; copies of its old value become
    /// invalid.
    pub fn forward_subresource<R: Resource>(
        &mut self,
        subresource: Handle<R>,
        replaced: &mut Handle<R>,
    ) -> Handle<R> {
        self.expect_state(FrameGraphState::Building, "forward a resource");
        let source = self.expect_valid(subresource.raw);
        let target = self.expect_valid(replaced.raw);
        if source.resource == target.resource {
            panic!(
                "{}",
                FrameGraphError::ForwardOntoItself {
                    resource: self.resource_name(source.resource).to_string(),
                }
            );
        }

        let replaced_usage = self.typed_entry::<R>(replaced.raw, target.resource).usage;
        let forwarded = subresource.raw.next_version();
        self.resources[source.resource as usize].info_mut().version = forwarded.version;
        let node = self.add_resource_node(source.resource, forwarded);
        self.graph
            .add_edge(self.node_id(source.node), self.node_id(node), EdgeKind::Forward);
        self.graph
            .add_edge(self.node_id(target.node), self.node_id(node), EdgeKind::Forward);
        self.typed_entry_mut::<R>(subresource.raw, source.resource)
            .merge_usage(replaced_usage);
        self.merge_usage_into_parents::<R>(source.resource, replaced_usage);

        self.slots[subresource.index() as usize].node = node;
        self.slots[replaced.index() as usize] = ResourceSlot {
            resource: source.resource,
            node,
            forwarded: true,
        };
        debug!(
            "forwarded '{}' onto '{}'",
            self.resource_name(source.resource),
            self.resource_name(target.resource)
        );

        let forwarded = Handle::from_raw(forwarded);
        *replaced = forwarded;
        forwarded
    }

    /// Culls unused passes and resources, computes resource lifetimes and walks the live
    /// passes in order, creating each resource before its first user and destroying it
    /// after its last.
    pub fn compile(&mut self, allocator: &mut dyn ResourceAllocator) -> Result<&mut Self> {
        self.expect_state(FrameGraphState::Building, "compile");

        self.graph.cull();
        self.compute_lifetimes();
        self.resolve_render_targets();

        if let Err(error) = self.devirtualize(allocator) {
            error!("Frame graph compilation failed: {error}");
            self.state = FrameGraphState::Failed;
            return Err(error);
        }

        self.state = FrameGraphState::Compiled;
        debug!(
            "compiled frame graph: {}/{} passes live, {}/{} resources used",
            self.live_passes().count(),
            self.passes.len(),
            self.resources
                .iter()
                .filter(|resource| resource.info().ref_count > 0)
                .count(),
            self.resources.len()
        );
        Ok(self)
    }

    /// Runs every live pass in declaration order.
    pub fn execute(&mut self, context: &mut C) {
        self.expect_state(FrameGraphState::Compiled, "execute");

        for index in self.live_pass_indices() {
            let executor = match &mut self.passes[index].kind {
                PassKind::Render { executor, .. } => executor.take(),
                PassKind::Present => None,
            };
            let Some(mut executor) = executor else {
                continue;
            };
            trace!("executing pass '{}'", self.passes[index].name);
            let resources = self.pass_resources(index);
            executor.execute(&resources, context);
        }

        self.state = FrameGraphState::Executed;
    }

    /// Returns anything still resolved to the allocator and empties the graph. Handles
    /// from before the reset must not be used afterwards.
    pub fn reset(&mut self, allocator: &mut dyn ResourceAllocator) {
        let mut released = 0;
        for resource in self.resources.iter_mut().rev() {
            if resource.is_resolved() && !resource.info().imported {
                trace!("releasing '{}' on reset", resource.info().name);
                resource.destroy(allocator);
                released += 1;
            }
        }
        if released > 0 {
            debug!("reset released {released} resources left over by a failed compile");
        }

        self.graph.clear();
        self.slots.clear();
        self.resources.clear();
        self.resource_nodes.clear();
        self.passes.clear();
        self.imported_targets.clear();
        self.state = FrameGraphState::Building;
    }

    /// True when `handle` names the newest version of its resource.
    pub fn is_valid<R: Resource>(&self, handle: Handle<R>) -> bool {
        self.check_handle(handle.raw).is_ok()
    }

    pub fn descriptor<R: Resource>(&self, handle: Handle<R>) -> &R::Descriptor {
        let slot = self.expect_known(handle.raw);
        &self.typed_entry::<R>(handle.raw, slot.resource).descriptor
    }

    /// Usage accumulated so far from every pass touching the resource.
    pub fn usage<R: Resource>(&self, handle: Handle<R>) -> R::Usage {
        let slot = self.expect_known(handle.raw);
        self.typed_entry::<R>(handle.raw, slot.resource).usage
    }

    pub fn resource_info<R: Resource>(&self, handle: Handle<R>) -> &ResourceInfo {
        let slot = self.expect_known(handle.raw);
        self.resources[slot.resource as usize].info()
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn pass_name(&self, pass: PassId) -> &str {
        &self.passes[pass.index()].name
    }

    /// Only meaningful once the graph is compiled.
    pub fn is_pass_culled(&self, pass: PassId) -> bool {
        self.graph.is_culled(self.passes[pass.index()].node)
    }

    /// Renders the dependency graph in graphviz `dot` format.
    pub fn export_graphviz(&self) -> String {
        self.graph.dot(|_, vertex| match *vertex {
            Vertex::Pass(id) => {
                let pass = &self.passes[id.index()];
                let mut label = pass.name.clone();
                for target in pass.render_targets() {
                    let discard = target.params.discard;
                    let _ = write!(label, "\nS: {:?}, E: {:?}", discard.start, discard.end);
                }
                (label, true)
            }
            Vertex::Resource(index) => {
                let node = &self.resource_nodes[index as usize];
                let resource = &self.resources[node.resource as usize];
                let label = format!(
                    "{}\nversion: {}, usage: {}",
                    resource.info().name,
                    node.handle.version(),
                    resource.usage_string()
                );
                (label, false)
            }
        })
    }

    pub(crate) fn create_internal<R: Resource>(
        &mut self,
        name: &str,
        descriptor: R::Descriptor,
        priority: u8,
    ) -> Handle<R> {
        let handle = self.add_resource_internal(|id| ResourceEntry::<R>::new(name, id, descriptor));
        self.resources[handle.index() as usize].info_mut().priority = priority;
        handle
    }

    pub(crate) fn create_subresource_internal<R: Resource>(
        &mut self,
        parent: Handle<R>,
        name: &str,
        sub_descriptor: R::SubResourceDescriptor,
    ) -> Handle<R> {
        let parent_slot = self.expect_valid(parent.raw);
        let parent_entry = self.typed_entry::<R>(parent.raw, parent_slot.resource);
        let entry = ResourceEntry::new_subresource(name, 0, parent_entry, sub_descriptor);
        let handle = self.add_resource_internal(|id| {
            let mut entry = entry;
            entry.info_mut().id = id;
            entry
        });
        let node = self.slots[handle.index() as usize].node;
        self.graph.add_edge(
            self.node_id(parent_slot.node),
            self.node_id(node),
            EdgeKind::Read,
        );
        handle
    }

    pub(crate) fn read_internal<R: Resource>(
        &mut self,
        handle: Handle<R>,
        pass: PassId,
        usage: R::Usage,
    ) -> Handle<R> {
        self.expect_valid(handle.raw);
        self.refresh_from_parent(handle.index());
        let slot = self.slots[handle.index() as usize];
        let pass_node = self.passes[pass.index()].node;
        let node = self.resource_nodes[slot.node as usize];

        if self.graph.has_path(pass_node, node.node) {
            panic!(
                "{}",
                FrameGraphError::ReadAfterWrite {
                    pass: self.passes[pass.index()].name.clone(),
                    resource: self.resource_name(slot.resource).to_string(),
                }
            );
        }

        if node.is_read_by(&self.graph, pass_node) {
            self.typed_entry_mut::<R>(handle.raw, slot.resource)
                .merge_usage(usage);
        } else {
            let Self {
                graph, resources, ..
            } = self;
            typed_entry_in::<R>(resources, handle.raw, slot.resource).connect(
                graph,
                node.node,
                pass_node,
                EdgeKind::Read,
                usage,
            );
        }
        self.merge_usage_into_parents::<R>(slot.resource, usage);
        self.passes[pass.index()].declare(handle.index());
        handle
    }

    pub(crate) fn write_internal<R: Resource>(
        &mut self,
        handle: Handle<R>,
        pass: PassId,
        usage: R::Usage,
    ) -> Handle<R> {
        let slot = self.expect_valid(handle.raw);
        let pass_node = self.passes[pass.index()].node;

        // Writing twice from the same pass yields the same version.
        if self.resource_nodes[slot.node as usize].is_written_by(&self.graph, pass_node) {
            self.typed_entry_mut::<R>(handle.raw, slot.resource)
                .merge_usage(usage);
            self.merge_usage_into_parents::<R>(slot.resource, usage);
            return handle;
        }

        let written = handle.raw.next_version();
        self.resources[slot.resource as usize].info_mut().version = written.version;
        let node = self.add_resource_node(slot.resource, written);
        self.slots[handle.index() as usize].node = node;
        let to = self.node_id(node);
        {
            let Self {
                graph, resources, ..
            } = self;
            typed_entry_in::<R>(resources, written, slot.resource).connect(
                graph,
                pass_node,
                to,
                EdgeKind::Write,
                usage,
            );
        }
        self.merge_usage_into_parents::<R>(slot.resource, usage);
        self.propagate_write_to_parents(slot.resource, node);
        self.passes[pass.index()].declare(handle.index());
        Handle::from_raw(written)
    }

    pub(crate) fn declare_render_target(
        &mut self,
        pass: PassId,
        descriptor: RenderTargetDescriptor,
    ) -> RenderTarget {
        let mut data = RenderTargetData::new(descriptor);
        let mut attachments = descriptor.attachments;
        let mut used = TargetBufferFlags::empty();
        for slot in 0..ATTACHMENT_SLOTS {
            let Some(handle) = attachments.slot(slot) else {
                continue;
            };
            used |= TargetBufferFlags::for_slot(slot);
            let incoming = self.expect_valid(handle.raw).node;
            let written =
                self.write_internal(handle, pass, wgpu::TextureUsages::RENDER_ATTACHMENT);
            let outgoing = self.slots[written.index() as usize];
            data.incoming[slot] = (incoming != outgoing.node).then_some(incoming);
            data.outgoing[slot] = Some(outgoing.node);
            data.handles[slot] = Some(written.index());
            attachments.set_slot(slot, written);
        }
        data.descriptor.attachments = attachments;

        if let Some(color) = attachments.color[0] {
            let resource = self.slots[color.index() as usize].resource;
            if let Some(imported) = self.imported_targets.get(&resource) {
                if imported.accepts(used, descriptor.samples) {
                    data.imported = Some(*imported);
                } else {
                    warn!(
                        "pass '{}' renders {:?} at {} samples, which imported target '{}' cannot take; creating a new target",
                        self.passes[pass.index()].name,
                        used,
                        descriptor.samples,
                        self.resource_name(resource)
                    );
                }
            }
        }

        let PassKind::Render { render_targets, .. } = &mut self.passes[pass.index()].kind else {
            unreachable!("only render passes have a builder");
        };
        let id = render_targets.len() as u32;
        render_targets.push(data);
        RenderTarget { attachments, id }
    }

    pub(crate) fn make_target(&mut self, pass: PassId) {
        self.graph.make_target(self.passes[pass.index()].node);
    }

    pub(crate) fn resource_name(&self, resource: u16) -> &str {
        &self.resources[resource as usize].info().name
    }

    /// Validity check that reports why a handle cannot be used.
    pub(crate) fn check_handle(&self, handle: RawHandle) -> Result<ResourceSlot> {
        let slot = self
            .slots
            .get(handle.index as usize)
            .copied()
            .ok_or(FrameGraphError::UnknownHandle { handle })?;
        if slot.forwarded {
            return Err(FrameGraphError::ForwardedHandle {
                resource: self.resource_name(handle.index).to_string(),
                handle,
            });
        }
        let current = self.resources[slot.resource as usize].info().version;
        if current != handle.version {
            return Err(FrameGraphError::StaleHandle {
                resource: self.resource_name(slot.resource).to_string(),
                handle,
                current,
            });
        }
        Ok(slot)
    }

    pub(crate) fn expect_valid(&self, handle: RawHandle) -> ResourceSlot {
        self.check_handle(handle)
            .unwrap_or_else(|error| panic!("{error}"))
    }

    /// Like [`expect_valid`](Self::expect_valid) but accepts any version.
    pub(crate) fn expect_known(&self, handle: RawHandle) -> ResourceSlot {
        match self.slots.get(handle.index as usize) {
            Some(slot) => *slot,
            None => panic!("{}", FrameGraphError::UnknownHandle { handle }),
        }
    }

    pub(crate) fn typed_entry<R: Resource>(
        &self,
        handle: RawHandle,
        resource: u16,
    ) -> &ResourceEntry<R> {
        match self.resources[resource as usize]
            .as_any()
            .downcast_ref::<ResourceEntry<R>>()
        {
            Some(entry) => entry,
            None => panic!(
                "{}",
                FrameGraphError::TypeMismatch {
                    handle,
                    expected: R::KIND,
                }
            ),
        }
    }

    fn typed_entry_mut<R: Resource>(
        &mut self,
        handle: RawHandle,
        resource: u16,
    ) -> &mut ResourceEntry<R> {
        typed_entry_in(&mut self.resources, handle, resource)
    }

    fn expect_state(&self, expected: FrameGraphState, operation: &'static str) {
        if self.state != expected {
            panic!(
                "{}",
                FrameGraphError::InvalidState {
                    operation,
                    state: self.state,
                }
            );
        }
    }

    fn node_id(&self, resource_node: u16) -> NodeId {
        self.resource_nodes[resource_node as usize].node
    }

    fn add_pass_node(&mut self, make: impl FnOnce(NodeId) -> PassNode<C>) -> PassId {
        let id = PassId(checked_index(self.passes.len(), "passes"));
        let node = self.graph.add_node(Vertex::Pass(id));
        self.passes.push(make(node));
        id
    }

    fn add_resource_internal<R: Resource>(
        &mut self,
        make: impl FnOnce(u16) -> ResourceEntry<R>,
    ) -> Handle<R> {
        let id = checked_index(self.resources.len(), "resources");
        self.resources.push(Box::new(make(id)));
        let handle = RawHandle::new(id, 0);
        let node = self.add_resource_node(id, handle);
        self.slots.push(ResourceSlot {
            resource: id,
            node,
            forwarded: false,
        });
        Handle::from_raw(handle)
    }

    fn add_resource_node(&mut self, resource: u16, handle: RawHandle) -> u16 {
        let index = checked_index(self.resource_nodes.len(), "resource nodes");
        let node = self.graph.add_node(Vertex::Resource(index));
        self.resource_nodes.push(ResourceNode {
            resource,
            handle,
            node,
        });
        index
    }

    /// A subresource's content comes from its parent. When the parent has a newer
    /// version than the subresource's current node, the subresource gets a fresh node
    /// depending on it. The handle version does not change.
    fn refresh_from_parent(&mut self, slot_index: u16) {
        let slot = self.slots[slot_index as usize];
        let Some(parent) = self.resources[slot.resource as usize].info().parent else {
            return;
        };
        self.refresh_from_parent(parent);
        let parent_node = self.slots[parent as usize].node;
        if parent_node < slot.node {
            return;
        }
        let handle = self.resource_nodes[slot.node as usize].handle;
        let node = self.add_resource_node(slot.resource, handle);
        self.graph.add_edge(
            self.node_id(parent_node),
            self.node_id(node),
            EdgeKind::Read,
        );
        self.slots[slot_index as usize].node = node;
    }

    /// Writing a subresource writes its parent: each ancestor gets a new node produced
    /// by the child's new node and carrying the ancestor's previous content.
    fn propagate_write_to_parents(&mut self, resource: u16, node: u16) {
        let (mut child, mut child_node) = (resource, node);
        while let Some(parent) = self.resources[child as usize].info().parent {
            let previous = self.slots[parent as usize].node;
            let handle = self.resource_nodes[previous as usize].handle;
            let node = self.add_resource_node(parent, handle);
            self.graph
                .add_edge(self.node_id(child_node), self.node_id(node), EdgeKind::Write);
            self.graph
                .add_edge(self.node_id(previous), self.node_id(node), EdgeKind::Read);
            self.slots[parent as usize].node = node;
            child = parent;
            child_node = node;
        }
    }

    fn merge_usage_into_parents<R: Resource>(&mut self, resource: u16, usage: R::Usage) {
        let mut current = self.resources[resource as usize].info().parent;
        while let Some(parent) = current {
            let entry = self
                .resources[parent as usize]
                .as_any_mut()
                .downcast_mut::<ResourceEntry<R>>();
            if let Some(entry) = entry {
                entry.merge_usage(usage);
            }
            current = self.resources[parent as usize].info().parent;
        }
    }

    /// Live passes in declaration order, which is a valid execution order.
    fn live_passes(&self) -> impl Iterator<Item = (usize, &PassNode<C>)> + '_ {
        self.graph
            .active_nodes()
            .filter_map(|node| match *self.graph.node(node) {
                Vertex::Pass(id) => Some((id.index(), &self.passes[id.index()])),
                Vertex::Resource(_) => None,
            })
    }

    fn live_pass_indices(&self) -> Vec<usize> {
        self.live_passes().map(|(index, _)| index).collect()
    }

    fn compute_lifetimes(&mut self) {
        let mut used_by_pass: Vec<(PassId, BTreeSet<u16>)> = Vec::new();
        for (index, pass) in self.live_passes() {
            let mut used = BTreeSet::new();
            let edges = self
                .graph
                .incoming(pass.node)
                .chain(self.graph.outgoing(pass.node));
            for (node, _) in edges {
                let Vertex::Resource(resource_node) = *self.graph.node(node) else {
                    continue;
                };
                // Through the slot, so users of a forwarded handle count for the
                // resource it was forwarded to.
                let handle = self.resource_nodes[resource_node as usize].handle;
                let mut resource = Some(self.slots[handle.index as usize].resource);
                while let Some(id) = resource {
                    if !used.insert(id) {
                        break;
                    }
                    resource = self.resources[id as usize].info().parent;
                }
            }
            used_by_pass.push((PassId(index as u16), used));
        }

        for (pass, used) in used_by_pass {
            for resource in used {
                self.resources[resource as usize]
                    .info_mut()
                    .needed_by_pass(pass);
            }
        }

        for id in 0..self.resources.len() {
            let info = self.resources[id].info();
            let (Some(first), Some(last)) = (info.first, info.last) else {
                debug!("culled resource '{}'", info.name);
                continue;
            };
            self.passes[first.index()].devirtualize.push(id as u16);
            self.passes[last.index()].destroy.push(id as u16);
        }

        for (index, pass) in self.passes.iter().enumerate() {
            if self.graph.is_culled(pass.node) {
                debug!("culled pass '{}' ({})", pass.name, PassId(index as u16));
            }
        }

        let resources = &self.resources;
        let depth = |id: u16| {
            let mut depth = 0usize;
            let mut current = resources[id as usize].info().parent;
            while let Some(parent) = current {
                depth += 1;
                current = resources[parent as usize].info().parent;
            }
            depth
        };
        for pass in &mut self.passes {
            // Parents before subresources, then higher priority first.
            pass.devirtualize.sort_by_key(|id| {
                (
                    depth(*id),
                    std::cmp::Reverse(resources[*id as usize].info().priority),
                    *id,
                )
            });
            pass.destroy
                .sort_by_key(|id| (std::cmp::Reverse(depth(*id)), *id));
        }
    }

    fn resolve_render_targets(&mut self) {
        let live = self.live_pass_indices();
        let Self {
            graph,
            slots,
            resources,
            resource_nodes,
            passes,
            ..
        } = self;
        let (graph, slots, resources, resource_nodes) =
            (&*graph, &*slots, &*resources, &*resource_nodes);
        for index in live {
            for target in passes[index].render_targets_mut() {
                let extent = attachment_extent(slots, resources, target);
                target.resolve(
                    |node| resource_nodes[node as usize].has_writer(graph),
                    |node| resource_nodes[node as usize].has_active_readers(graph),
                    extent,
                );
            }
        }
    }

    fn devirtualize(&mut self, allocator: &mut dyn ResourceAllocator) -> Result<()> {
        for index in self.live_pass_indices() {
            for id in self.passes[index].devirtualize.clone() {
                self.resolve_resource(id, allocator)?;
            }

            let targets = self.render_target_infos(index);
            for (target, info) in targets.into_iter().enumerate() {
                let Some(info) = info else {
                    continue;
                };
                let handle = allocator.create_render_target(&info).map_err(|source| {
                    FrameGraphError::Allocation {
                        resource: info.name.clone(),
                        source,
                    }
                })?;
                trace!("created render target '{}'", info.name);
                self.passes[index].render_targets_mut()[target].target = Some(handle);
                allocator.destroy_render_target(handle);
            }
            for target in self.passes[index].render_targets_mut() {
                if let Some(imported) = &target.imported {
                    target.target = Some(imported.target);
                }
            }

            for id in self.passes[index].destroy.clone() {
                trace!("destroying '{}'", self.resource_name(id));
                self.resources[id as usize].destroy(allocator);
            }
        }
        Ok(())
    }

    fn resolve_resource(&mut self, id: u16, allocator: &mut dyn ResourceAllocator) -> Result<()> {
        trace!("resolving '{}'", self.resource_name(id));
        let result = match self.resources[id as usize].info().parent {
            Some(parent) => {
                let (head, tail) = self.resources.split_at_mut(id as usize);
                tail[0].resolve(allocator, Some(head[parent as usize].as_ref()))
            }
            None => self.resources[id as usize].resolve(allocator, None),
        };
        result.map_err(|source| FrameGraphError::Allocation {
            resource: self.resource_name(id).to_string(),
            source,
        })
    }

    /// Render targets of pass `index` that need creating. Imported ones yield `None`.
    fn render_target_infos(&self, index: usize) -> Vec<Option<RenderTargetInfo>> {
        let pass = &self.passes[index];
        pass.render_targets()
            .iter()
            .enumerate()
            .map(|(target_index, target)| {
                if target.imported.is_some() {
                    return None;
                }
                let attachment = |slot: usize| {
                    target.handles[slot]
                        .and_then(|handle| texture_entry(&self.slots, &self.resources, handle))
                        .and_then(|entry| entry.concrete.as_ref())
                        .map(TargetBufferInfo::from)
                };
                let (width, height) = attachment_extent(&self.slots, &self.resources, target);
                Some(RenderTargetInfo {
                    name: format!("{}#{}", pass.name, target_index),
                    flags: target.flags,
                    width,
                    height,
                    samples: target.descriptor.samples,
                    color: std::array::from_fn(|slot| attachment(slot)),
                    depth: attachment(ATTACHMENT_SLOTS - 2),
                    stencil: attachment(ATTACHMENT_SLOTS - 1),
                })
            })
            .collect()
    }

    fn pass_resources(&self, index: usize) -> FrameGraphResources<'_> {
        let pass = &self.passes[index];
        FrameGraphResources::new(
            &pass.name,
            &pass.declared,
            &self.slots,
            &self.resources,
            pass.render_targets(),
        )
    }
}

impl<C> Default for FrameGraph<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Drop for FrameGraph<C> {
    fn drop(&mut self) {
        let leaked = self
            .resources
            .iter()
            .filter(|resource| resource.is_resolved() && !resource.info().imported)
            .count();
        if leaked > 0 {
            warn!("Frame graph dropped with {leaked} resources still resolved, call reset() first");
        }
    }
}

fn typed_entry_in<R: Resource>(
    resources: &mut [Box<dyn VirtualResource>],
    handle: RawHandle,
    resource: u16,
) -> &mut ResourceEntry<R> {
    match resources[resource as usize]
        .as_any_mut()
        .downcast_mut::<ResourceEntry<R>>()
    {
        Some(entry) => entry,
        None => panic!(
            "{}",
            FrameGraphError::TypeMismatch {
                handle,
                expected: R::KIND,
            }
        ),
    }
}

fn texture_entry<'a>(
    slots: &[ResourceSlot],
    resources: &'a [Box<dyn VirtualResource>],
    handle: u16,
) -> Option<&'a ResourceEntry<Texture>> {
    let resource = slots.get(handle as usize)?.resource;
    resources[resource as usize]
        .as_any()
        .downcast_ref::<ResourceEntry<Texture>>()
}

/// Size of the first attachment, used when a render target has no explicit viewport.
fn attachment_extent(
    slots: &[ResourceSlot],
    resources: &[Box<dyn VirtualResource>],
    target: &RenderTargetData,
) -> (u32, u32) {
    target
        .handles
        .iter()
        .flatten()
        .find_map(|handle| texture_entry(slots, resources, *handle))
        .map(|entry| (entry.descriptor.width, entry.descriptor.height))
        .unwrap_or((0, 0))
}
