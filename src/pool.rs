//! A [`ResourceAllocator`] that keeps released textures and buffers around and hands
//! them to later requests with a compatible descriptor, within the frame and across
//! frames.

use std::collections::BTreeMap;

use log::{debug, trace, warn};
use wgpu::{BufferUsages, TextureUsages};

use crate::allocator::{BufferHandle, RenderTargetHandle, ResourceAllocator, TextureHandle};
use crate::buffer::BufferDescriptor;
use crate::error::AllocationError;
use crate::render_target::RenderTargetInfo;
use crate::resource::Usage;
use crate::texture::TextureDescriptor;

/// Creates the GPU objects a [`PooledAllocator`] recycles.
pub trait GpuBackend {
    type Texture;
    type Buffer;

    fn create_texture(
        &mut self,
        descriptor: &wgpu::TextureDescriptor<'_>,
    ) -> Result<Self::Texture, AllocationError>;

    fn create_buffer(
        &mut self,
        descriptor: &wgpu::BufferDescriptor<'_>,
    ) -> Result<Self::Buffer, AllocationError>;
}

impl GpuBackend for wgpu::Device {
    type Texture = wgpu::Texture;
    type Buffer = wgpu::Buffer;

    fn create_texture(
        &mut self,
        descriptor: &wgpu::TextureDescriptor<'_>,
    ) -> Result<wgpu::Texture, AllocationError> {
        Ok(wgpu::Device::create_texture(self, descriptor))
    }

    fn create_buffer(
        &mut self,
        descriptor: &wgpu::BufferDescriptor<'_>,
    ) -> Result<wgpu::Buffer, AllocationError> {
        Ok(wgpu::Device::create_buffer(self, descriptor))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Released objects not reused for this many calls to [`PooledAllocator::gc`] are freed.
    pub max_unused_frames: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_unused_frames: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatistics {
    /// Objects created by the backend so far.
    pub created: usize,
    /// Requests served from the pool so far.
    pub reused: usize,
    /// Objects freed by `gc` or `purge` so far.
    pub freed: usize,
    pub in_use: usize,
    /// Released objects waiting to be reused.
    pub cached: usize,
}

struct PoolEntry<D, U, T> {
    descriptor: D,
    usage: U,
    object: T,
    in_use: bool,
    unused_frames: u32,
}

impl<D, U, T> PoolEntry<D, U, T> {
    fn new(descriptor: D, usage: U, object: T) -> Self {
        Self {
            descriptor,
            usage,
            object,
            in_use: true,
            unused_frames: 0,
        }
    }

    fn acquire(&mut self) {
        self.in_use = true;
        self.unused_frames = 0;
    }
}

fn can_alias_textures(
    pooled: &TextureDescriptor,
    pooled_usage: TextureUsages,
    requested: &TextureDescriptor,
    requested_usage: TextureUsages,
) -> bool {
    pooled == requested && pooled_usage.contains_all(requested_usage)
}

fn can_alias_buffers(
    pooled: &BufferDescriptor,
    pooled_usage: BufferUsages,
    requested: &BufferDescriptor,
    requested_usage: BufferUsages,
) -> bool {
    !requested.mapped_at_creation && pooled.size >= requested.size && pooled_usage == requested_usage
}

pub struct PooledAllocator<B: GpuBackend> {
    backend: B,
    config: PoolConfig,
    next_id: u32,
    textures: BTreeMap<TextureHandle, PoolEntry<TextureDescriptor, TextureUsages, B::Texture>>,
    buffers: BTreeMap<BufferHandle, PoolEntry<BufferDescriptor, BufferUsages, B::Buffer>>,
    /// Render targets and whether they were released this frame.
    render_targets: BTreeMap<RenderTargetHandle, (RenderTargetInfo, bool)>,
    statistics: PoolStatistics,
}

impl<B: GpuBackend> PooledAllocator<B> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, PoolConfig::default())
    }

    pub fn with_config(backend: B, config: PoolConfig) -> Self {
        Self {
            backend,
            config,
            next_id: 0,
            textures: BTreeMap::new(),
            buffers: BTreeMap::new(),
            render_targets: BTreeMap::new(),
            statistics: PoolStatistics::default(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    /// Looks up a texture. Released textures stay reachable until `gc` frees them.
    pub fn texture(&self, handle: TextureHandle) -> Option<&B::Texture> {
        self.textures.get(&handle).map(|entry| &entry.object)
    }

    pub fn buffer(&self, handle: BufferHandle) -> Option<&B::Buffer> {
        self.buffers.get(&handle).map(|entry| &entry.object)
    }

    pub fn render_target(&self, handle: RenderTargetHandle) -> Option<&RenderTargetInfo> {
        self.render_targets.get(&handle).map(|(info, _)| info)
    }

    pub fn statistics(&self) -> PoolStatistics {
        let in_use = self.textures.values().filter(|entry| entry.in_use).count()
            + self.buffers.values().filter(|entry| entry.in_use).count();
        let total = self.textures.len() + self.buffers.len();
        PoolStatistics {
            in_use,
            cached: total - in_use,
            ..self.statistics
        }
    }

    /// Call once per frame after the frame graph is reset. Ages released objects and
    /// frees the ones unused for longer than the configured limit. Returns how many
    /// objects were freed.
    pub fn gc(&mut self) -> usize {
        let max_unused_frames = self.config.max_unused_frames;
        let before = self.textures.len() + self.buffers.len();

        self.textures.retain(|_, entry| {
            if !entry.in_use {
                entry.unused_frames += 1;
            }
            entry.in_use || entry.unused_frames <= max_unused_frames
        });
        self.buffers.retain(|_, entry| {
            if !entry.in_use {
                entry.unused_frames += 1;
            }
            entry.in_use || entry.unused_frames <= max_unused_frames
        });
        self.render_targets.retain(|_, (_, released)| !*released);

        let freed = before - (self.textures.len() + self.buffers.len());
        if freed > 0 {
            debug!("resource pool freed {freed} unused objects");
        }
        self.statistics.freed += freed;
        freed
    }

    /// Frees every object not currently in use.
    pub fn purge(&mut self) -> usize {
        let before = self.textures.len() + self.buffers.len();
        self.textures.retain(|_, entry| entry.in_use);
        self.buffers.retain(|_, entry| entry.in_use);
        self.render_targets.retain(|_, (_, released)| !*released);
        let freed = before - (self.textures.len() + self.buffers.len());
        self.statistics.freed += freed;
        freed
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl<B: GpuBackend> ResourceAllocator for PooledAllocator<B> {
    fn create_texture(
        &mut self,
        name: &str,
        descriptor: &TextureDescriptor,
        usage: TextureUsages,
    ) -> Result<TextureHandle, AllocationError> {
        let reusable = self
            .textures
            .iter()
            .find(|(_, entry)| {
                !entry.in_use && can_alias_textures(&entry.descriptor, entry.usage, descriptor, usage)
            })
            .map(|(handle, _)| *handle);
        if let Some(handle) = reusable {
            if let Some(entry) = self.textures.get_mut(&handle) {
                entry.acquire();
            }
            self.statistics.reused += 1;
            trace!("reusing texture {handle:?} for '{name}'");
            return Ok(handle);
        }

        let object = self
            .backend
            .create_texture(&descriptor.to_wgpu_descriptor(Some(name), usage))?;
        let handle = TextureHandle(self.next_id());
        self.textures
            .insert(handle, PoolEntry::new(descriptor.clone(), usage, object));
        self.statistics.created += 1;
        trace!("created texture {handle:?} for '{name}'");
        Ok(handle)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        match self.textures.get_mut(&texture) {
            Some(entry) => entry.in_use = false,
            None => warn!("destroying unknown texture {texture:?}"),
        }
    }

    fn create_buffer(
        &mut self,
        name: &str,
        descriptor: &BufferDescriptor,
        usage: BufferUsages,
    ) -> Result<BufferHandle, AllocationError> {
        let reusable = self
            .buffers
            .iter()
            .find(|(_, entry)| {
                !entry.in_use && can_alias_buffers(&entry.descriptor, entry.usage, descriptor, usage)
            })
            .map(|(handle, _)| *handle);
        if let Some(handle) = reusable {
            if let Some(entry) = self.buffers.get_mut(&handle) {
                entry.acquire();
            }
            self.statistics.reused += 1;
            trace!("reusing buffer {handle:?} for '{name}'");
            return Ok(handle);
        }

        let object = self
            .backend
            .create_buffer(&descriptor.to_wgpu_descriptor(Some(name), usage))?;
        let handle = BufferHandle(self.next_id());
        self.buffers
            .insert(handle, PoolEntry::new(descriptor.clone(), usage, object));
        self.statistics.created += 1;
        trace!("created buffer {handle:?} for '{name}'");
        Ok(handle)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        match self.buffers.get_mut(&buffer) {
            Some(entry) => entry.in_use = false,
            None => warn!("destroying unknown buffer {buffer:?}"),
        }
    }

    fn create_render_target(
        &mut self,
        info: &RenderTargetInfo,
    ) -> Result<RenderTargetHandle, AllocationError> {
        let attached = info
            .color
            .iter()
            .chain([&info.depth, &info.stencil])
            .flatten()
            .all(|attachment| self.textures.contains_key(&attachment.texture));
        if !attached {
            return Err(AllocationError::Unsupported {
                name: info.name.clone(),
                reason: String::from("attachment was not created by this allocator"),
            });
        }
        let handle = RenderTargetHandle(self.next_id());
        self.render_targets.insert(handle, (info.clone(), false));
        Ok(handle)
    }

    fn destroy_render_target(&mut self, target: RenderTargetHandle) {
        match self.render_targets.get_mut(&target) {
            Some((_, released)) => *released = true,
            None => warn!("destroying unknown render target {target:?}"),
        }
    }
}
