//! Frame graph for wgpu.
//!
//! Passes declare the virtual resources they create, read and write. On compile, passes
//! whose results nobody consumes are culled, every surviving resource gets a lifetime
//! spanning its first to last user, and a [`ResourceAllocator`] creates and destroys
//! the concrete objects in execution order so that resources with disjoint lifetimes
//! can share memory.

mod allocator;
mod buffer;
mod builder;
mod dependency_graph;
mod error;
mod frame_graph;
mod handle;
mod pass;
mod pool;
mod render_target;
mod resource;
mod resource_node;
mod resources;
mod texture;

pub use allocator::{BufferHandle, RenderTargetHandle, ResourceAllocator, TextureHandle};
pub use buffer::{Buffer, BufferDescriptor, BufferSubResourceDescriptor};
pub use builder::Builder;
pub use dependency_graph::{DependencyGraph, EdgeKind, NodeId};
pub use error::{AllocationError, FrameGraphError, Result};
pub use frame_graph::{FrameGraph, FrameGraphState};
pub use handle::{Handle, RawHandle};
pub use pass::{MAX_EXECUTE_CAPTURE_SIZE, Pass, PassId};
pub use pool::{GpuBackend, PoolConfig, PoolStatistics, PooledAllocator};
pub use render_target::{
    Attachments, DiscardFlags, ImportedRenderTarget, MAX_COLOR_ATTACHMENTS, RenderPassInfo,
    RenderPassParams, RenderTarget, RenderTargetDescriptor, RenderTargetInfo, TargetBufferFlags,
    TargetBufferInfo, Viewport,
};
pub use resource::{Resource, ResourceInfo, Usage};
pub use resources::FrameGraphResources;
pub use texture::{Texture, TextureDescriptor, TextureSubResourceDescriptor};
