//! Virtual resources: declared-but-not-yet-allocated textures, buffers and the like.
//!
//! A [`Resource`] kind is the concrete object the allocator hands back plus its
//! descriptor and usage types. The frame graph stores every declared resource as a
//! type-erased [`VirtualResource`] and only recovers the kind when a typed handle is used.

use std::any::Any;
use std::fmt;

use crate::allocator::ResourceAllocator;
use crate::dependency_graph::{DependencyGraph, EdgeKind, NodeId};
use crate::error::AllocationError;
use crate::pass::PassId;

/// Accumulated access flags. Every pass touching a resource contributes its usage and
/// the concrete resource is created with the union.
pub trait Usage: Copy + fmt::Debug + PartialEq + 'static {
    fn none() -> Self;
    fn union(self, other: Self) -> Self;
    fn contains_all(self, other: Self) -> bool;
}

impl Usage for wgpu::TextureUsages {
    fn none() -> Self {
        Self::empty()
    }

    fn union(self, other: Self) -> Self {
        self | other
    }

    fn contains_all(self, other: Self) -> bool {
        self.contains(other)
    }
}

impl Usage for wgpu::BufferUsages {
    fn none() -> Self {
        Self::empty()
    }

    fn union(self, other: Self) -> Self {
        self | other
    }

    fn contains_all(self, other: Self) -> bool {
        self.contains(other)
    }
}

/// A kind of resource the frame graph can virtualize.
pub trait Resource: Sized + 'static {
    /// Name used in diagnostics.
    const KIND: &'static str;

    type Descriptor: Clone + fmt::Debug + 'static;
    type SubResourceDescriptor: Clone + fmt::Debug + Default + 'static;
    type Usage: Usage;

    fn create(
        allocator: &mut dyn ResourceAllocator,
        name: &str,
        descriptor: &Self::Descriptor,
        usage: Self::Usage,
    ) -> Result<Self, AllocationError>;

    /// Returns the concrete resource to the allocator. `self` keeps naming it for commands
    /// recorded earlier in the frame.
    fn destroy(&self, allocator: &mut dyn ResourceAllocator);

    /// Descriptor of a subresource carved out of a resource described by `parent`.
    fn subresource_descriptor(
        parent: &Self::Descriptor,
        sub: &Self::SubResourceDescriptor,
    ) -> Self::Descriptor;

    /// Concrete view of `sub` inside the already created `parent`.
    fn subresource(parent: &Self, sub: &Self::SubResourceDescriptor) -> Self;
}

/// Identity and lifetime bookkeeping shared by every resource kind.
#[derive(Debug, Clone)]
pub struct ResourceInfo {
    pub name: String,
    pub id: u16,
    pub imported: bool,
    pub priority: u8,
    /// Version of the newest handle; any other version is stale.
    pub version: u16,
    /// Number of live passes using this resource or one of its subresources.
    pub ref_count: u32,
    pub first: Option<PassId>,
    pub last: Option<PassId>,
    pub parent: Option<u16>,
}

impl ResourceInfo {
    fn new(name: &str, id: u16, imported: bool, parent: Option<u16>) -> Self {
        Self {
            name: name.to_string(),
            id,
            imported,
            priority: 0,
            version: 0,
            ref_count: 0,
            first: None,
            last: None,
            parent,
        }
    }

    /// Records that `pass` (live, visited in execution order) uses this resource.
    pub(crate) fn needed_by_pass(&mut self, pass: PassId) {
        self.ref_count += 1;
        self.first.get_or_insert(pass);
        self.last = Some(pass);
    }
}

/// Type-erased view of a [`ResourceEntry`].
pub(crate) trait VirtualResource: Any {
    fn info(&self) -> &ResourceInfo;
    fn info_mut(&mut self) -> &mut ResourceInfo;
    fn usage_string(&self) -> String;

    fn is_resolved(&self) -> bool;

    /// Creates the concrete resource. Subresources take a view of `parent` instead.
    fn resolve(
        &mut self,
        allocator: &mut dyn ResourceAllocator,
        parent: Option<&dyn VirtualResource>,
    ) -> Result<(), AllocationError>;

    /// Gives the concrete resource back to the allocator. Imported resources and
    /// subresources never do. The concrete value stays readable until the frame is reset.
    fn destroy(&mut self, allocator: &mut dyn ResourceAllocator);

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub(crate) struct ResourceEntry<R: Resource> {
    info: ResourceInfo,
    pub(crate) descriptor: R::Descriptor,
    pub(crate) sub_descriptor: R::SubResourceDescriptor,
    pub(crate) usage: R::Usage,
    pub(crate) concrete: Option<R>,
    released: bool,
}

impl<R: Resource> ResourceEntry<R> {
    pub(crate) fn new(name: &str, id: u16, descriptor: R::Descriptor) -> Self {
        Self {
            info: ResourceInfo::new(name, id, false, None),
            descriptor,
            sub_descriptor: R::SubResourceDescriptor::default(),
            usage: R::Usage::none(),
            concrete: None,
            released: false,
        }
    }

    pub(crate) fn new_subresource(
        name: &str,
        id: u16,
        parent: &ResourceEntry<R>,
        sub_descriptor: R::SubResourceDescriptor,
    ) -> Self {
        Self {
            info: ResourceInfo::new(name, id, parent.info.imported, Some(parent.info.id)),
            descriptor: R::subresource_descriptor(&parent.descriptor, &sub_descriptor),
            sub_descriptor,
            usage: R::Usage::none(),
            concrete: None,
            released: false,
        }
    }

    pub(crate) fn new_imported(
        name: &str,
        id: u16,
        descriptor: R::Descriptor,
        usage: R::Usage,
        concrete: R,
    ) -> Self {
        Self {
            info: ResourceInfo::new(name, id, true, None),
            descriptor,
            sub_descriptor: R::SubResourceDescriptor::default(),
            usage,
            concrete: Some(concrete),
            released: false,
        }
    }

    /// Adds the read or write edge between a pass and a version of this resource and
    /// folds the pass's usage into the accumulated usage.
    pub(crate) fn connect<N>(
        &mut self,
        graph: &mut DependencyGraph<N>,
        from: NodeId,
        to: NodeId,
        kind: EdgeKind,
        usage: R::Usage,
    ) {
        graph.add_edge(from, to, kind);
        self.merge_usage(usage);
    }

    pub(crate) fn merge_usage(&mut self, usage: R::Usage) {
        self.usage = self.usage.union(usage);
    }
}

impl<R: Resource> VirtualResource for ResourceEntry<R> {
    fn info(&self) -> &ResourceInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut ResourceInfo {
        &mut self.info
    }

    fn usage_string(&self) -> String {
        format!("{:?}", self.usage)
    }

    fn is_resolved(&self) -> bool {
        self.concrete.is_some() && !self.released
    }

    fn resolve(
        &mut self,
        allocator: &mut dyn ResourceAllocator,
        parent: Option<&dyn VirtualResource>,
    ) -> Result<(), AllocationError> {
        if self.info.imported && self.info.parent.is_none() {
            return Ok(());
        }
        let concrete = match parent {
            Some(parent) => {
                let parent = parent
                    .as_any()
                    .downcast_ref::<ResourceEntry<R>>()
                    .and_then(|parent| parent.concrete.as_ref())
                    .ok_or_else(|| {
                        AllocationError::Backend(format!(
                            "parent of subresource '{}' is not resolved",
                            self.info.name
                        ))
                    })?;
                R::subresource(parent, &self.sub_descriptor)
            }
            None => R::create(allocator, &self.info.name, &self.descriptor, self.usage)?,
        };
        self.concrete = Some(concrete);
        Ok(())
    }

    fn destroy(&mut self, allocator: &mut dyn ResourceAllocator) {
        if self.info.imported || self.released {
            return;
        }
        self.released = true;
        if self.info.parent.is_some() {
            return;
        }
        if let Some(concrete) = &self.concrete {
            concrete.destroy(allocator);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
