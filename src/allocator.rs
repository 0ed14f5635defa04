use crate::buffer::BufferDescriptor;
use crate::error::AllocationError;
use crate::render_target::RenderTargetInfo;
use crate::texture::TextureDescriptor;

/// Opaque id of a concrete texture owned by a [`ResourceAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u32);

/// Opaque id of a concrete buffer owned by a [`ResourceAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u32);

/// Opaque id of a concrete render target (a set of attachments).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderTargetHandle(pub u32);

/// Turns descriptors into concrete resources.
///
/// The frame graph calls `create_*` at a resource's first live use and `destroy_*` right
/// after its last live use, in execution order, once per frame. A destroyed object must
/// stay usable by commands recorded earlier in the same frame; implementations are free
/// to hand its memory to a resource created after the destroy.
pub trait ResourceAllocator {
    fn create_texture(
        &mut self,
        name: &str,
        descriptor: &TextureDescriptor,
        usage: wgpu::TextureUsages,
    ) -> Result<TextureHandle, AllocationError>;

    fn destroy_texture(&mut self, texture: TextureHandle);

    fn create_buffer(
        &mut self,
        name: &str,
        descriptor: &BufferDescriptor,
        usage: wgpu::BufferUsages,
    ) -> Result<BufferHandle, AllocationError>;

    fn destroy_buffer(&mut self, buffer: BufferHandle);

    fn create_render_target(
        &mut self,
        info: &RenderTargetInfo,
    ) -> Result<RenderTargetHandle, AllocationError>;

    fn destroy_render_target(&mut self, target: RenderTargetHandle);
}
