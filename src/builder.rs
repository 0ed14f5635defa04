use wgpu::TextureUsages;

use crate::frame_graph::FrameGraph;
use crate::handle::Handle;
use crate::pass::PassId;
use crate::render_target::{Attachments, RenderTarget, RenderTargetDescriptor};
use crate::resource::Resource;
use crate::texture::Texture;

/// Handed to a pass's setup closure to declare what the pass creates, reads and writes.
pub struct Builder<'a, C> {
    frame_graph: &'a mut FrameGraph<C>,
    pass: PassId,
}

impl<'a, C> Builder<'a, C> {
    pub(crate) fn new(frame_graph: &'a mut FrameGraph<C>, pass: PassId) -> Self {
        Self { frame_graph, pass }
    }

    pub fn pass_id(&self) -> PassId {
        self.pass
    }

    /// Declares a new virtual resource. Nothing is allocated unless a live pass uses it.
    pub fn create<R: Resource>(&mut self, name: &str, descriptor: R::Descriptor) -> Handle<R> {
        self.frame_graph.create_internal(name, descriptor, 0)
    }

    /// Like [`create`](Self::create); among resources first used by the same pass,
    /// higher priorities are created first.
    pub fn create_with_priority<R: Resource>(
        &mut self,
        name: &str,
        descriptor: R::Descriptor,
        priority: u8,
    ) -> Handle<R> {
        self.frame_graph.create_internal(name, descriptor, priority)
    }

    /// Declares a view of part of `parent`, such as one mip level. It shares the
    /// parent's memory and writing it writes the parent.
    pub fn create_subresource<R: Resource>(
        &mut self,
        parent: Handle<R>,
        name: &str,
        descriptor: R::SubResourceDescriptor,
    ) -> Handle<R> {
        self.frame_graph
            .create_subresource_internal(parent, name, descriptor)
    }

    pub fn read<R: Resource>(&mut self, handle: Handle<R>, usage: R::Usage) -> Handle<R> {
        self.frame_graph.read_internal(handle, self.pass, usage)
    }

    /// Returns the handle of the new version. The handle passed in goes stale.
    pub fn write<R: Resource>(&mut self, handle: Handle<R>, usage: R::Usage) -> Handle<R> {
        self.frame_graph.write_internal(handle, self.pass, usage)
    }

    /// Writes every attachment of `descriptor` as a render attachment. The returned
    /// attachments are the new versions.
    pub fn use_as_render_target(&mut self, descriptor: RenderTargetDescriptor) -> RenderTarget {
        self.frame_graph.declare_render_target(self.pass, descriptor)
    }

    /// Renders into `color` alone and updates it to the written version. Returns the
    /// render target id.
    pub fn use_as_color_target(&mut self, color: &mut Handle<Texture>) -> u32 {
        let target =
            self.use_as_render_target(RenderTargetDescriptor::new(Attachments::color(*color)));
        if let Some(written) = target.attachments.color[0] {
            *color = written;
        }
        target.id
    }

    pub fn use_as_color_depth_target(
        &mut self,
        color: &mut Handle<Texture>,
        depth: &mut Handle<Texture>,
    ) -> u32 {
        let target = self.use_as_render_target(RenderTargetDescriptor::new(
            Attachments::color_depth(*color, *depth),
        ));
        if let Some(written) = target.attachments.color[0] {
            *color = written;
        }
        if let Some(written) = target.attachments.depth {
            *depth = written;
        }
        target.id
    }

    /// Reads `texture` for sampling in a shader.
    pub fn sample(&mut self, texture: Handle<Texture>) -> Handle<Texture> {
        self.read(texture, TextureUsages::TEXTURE_BINDING)
    }

    /// Keeps the pass alive even if nothing reads what it writes.
    pub fn side_effect(&mut self) {
        self.frame_graph.make_target(self.pass);
    }

    pub fn descriptor<R: Resource>(&self, handle: Handle<R>) -> &R::Descriptor {
        self.frame_graph.descriptor(handle)
    }

    pub fn name<R: Resource>(&self, handle: Handle<R>) -> &str {
        let slot = self.frame_graph.expect_known(handle.raw());
        self.frame_graph.resource_name(slot.resource)
    }

    pub fn is_valid<R: Resource>(&self, handle: Handle<R>) -> bool {
        self.frame_graph.is_valid(handle)
    }
}
