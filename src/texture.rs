use wgpu::{Extent3d, TextureDimension, TextureFormat, TextureUsages};

use crate::allocator::{ResourceAllocator, TextureHandle};
use crate::error::AllocationError;
use crate::resource::Resource;

/// Concrete texture: the allocator's handle, plus the mip level and layer when this is
/// a subresource view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Texture {
    pub handle: TextureHandle,
    pub level: u8,
    pub layer: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    pub width: u32,
    pub height: u32,
    pub depth_or_array_layers: u32,
    pub mip_level_count: u32,
    pub sample_count: u32,
    pub dimension: TextureDimension,
    pub format: TextureFormat,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Rgba8UnormSrgb,
        }
    }
}

impl TextureDescriptor {
    pub fn new(format: TextureFormat, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format,
            ..Self::default()
        }
    }

    pub fn sample_count(mut self, count: u32) -> Self {
        self.sample_count = count;
        self
    }

    pub fn mip_levels(mut self, levels: u32) -> Self {
        self.mip_level_count = levels;
        self
    }

    pub fn array_layers(mut self, layers: u32) -> Self {
        self.depth_or_array_layers = layers;
        self
    }

    pub fn cube_map(mut self) -> Self {
        self.dimension = TextureDimension::D2;
        self.depth_or_array_layers = 6;
        self
    }

    pub fn dimension_3d(mut self, depth: u32) -> Self {
        self.dimension = TextureDimension::D3;
        self.depth_or_array_layers = depth;
        self
    }

    pub fn to_wgpu_descriptor<'a>(
        &self,
        label: Option<&'a str>,
        usage: TextureUsages,
    ) -> wgpu::TextureDescriptor<'a> {
        wgpu::TextureDescriptor {
            label,
            size: Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: self.depth_or_array_layers,
            },
            mip_level_count: self.mip_level_count,
            sample_count: self.sample_count,
            dimension: self.dimension,
            format: self.format,
            usage,
            view_formats: &[],
        }
    }
}

/// Selects one mip level of one layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TextureSubResourceDescriptor {
    pub level: u8,
    pub layer: u16,
}

impl Resource for Texture {
    const KIND: &'static str = "Texture";

    type Descriptor = TextureDescriptor;
    type SubResourceDescriptor = TextureSubResourceDescriptor;
    type Usage = TextureUsages;

    fn create(
        allocator: &mut dyn ResourceAllocator,
        name: &str,
        descriptor: &TextureDescriptor,
        usage: TextureUsages,
    ) -> Result<Self, AllocationError> {
        let handle = allocator.create_texture(name, descriptor, usage)?;
        Ok(Self {
            handle,
            level: 0,
            layer: 0,
        })
    }

    fn destroy(&self, allocator: &mut dyn ResourceAllocator) {
        allocator.destroy_texture(self.handle);
    }

    fn subresource_descriptor(
        parent: &TextureDescriptor,
        sub: &TextureSubResourceDescriptor,
    ) -> TextureDescriptor {
        let level = u32::from(sub.level);
        TextureDescriptor {
            width: (parent.width >> level).max(1),
            height: (parent.height >> level).max(1),
            depth_or_array_layers: 1,
            mip_level_count: 1,
            ..parent.clone()
        }
    }

    fn subresource(parent: &Self, sub: &TextureSubResourceDescriptor) -> Self {
        Self {
            handle: parent.handle,
            level: parent.level.saturating_add(sub.level),
            layer: parent.layer.saturating_add(sub.layer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subresource_descriptor_halves_per_level() {
        let parent = TextureDescriptor::new(TextureFormat::Rgba16Float, 512, 256)
            .mip_levels(10)
            .array_layers(4);
        let sub = Texture::subresource_descriptor(
            &parent,
            &TextureSubResourceDescriptor { level: 3, layer: 2 },
        );
        assert_eq!((sub.width, sub.height), (64, 32));
        assert_eq!(sub.mip_level_count, 1);
        assert_eq!(sub.depth_or_array_layers, 1);
        assert_eq!(sub.format, TextureFormat::Rgba16Float);

        let tiny = Texture::subresource_descriptor(
            &parent,
            &TextureSubResourceDescriptor { level: 9, layer: 0 },
        );
        assert_eq!((tiny.width, tiny.height), (1, 1));
    }

    #[test]
    fn nested_views_saturate_level_and_layer() {
        let base = Texture {
            handle: TextureHandle(3),
            level: 200,
            layer: u16::MAX - 1,
        };
        let sub = TextureSubResourceDescriptor { level: 100, layer: 5 };
        let view = Texture::subresource(&base, &sub);
        assert_eq!(view.handle, TextureHandle(3));
        assert_eq!(view.level, u8::MAX);
        assert_eq!(view.layer, u16::MAX);
    }

    #[test]
    fn wgpu_descriptor_carries_accumulated_usage() {
        let descriptor = TextureDescriptor::new(TextureFormat::Depth32Float, 64, 64);
        let usage = TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING;
        let wgpu_descriptor = descriptor.to_wgpu_descriptor(Some("depth"), usage);
        assert_eq!(wgpu_descriptor.label, Some("depth"));
        assert_eq!(wgpu_descriptor.usage, usage);
        assert_eq!(wgpu_descriptor.size.width, 64);
        assert_eq!(wgpu_descriptor.format, TextureFormat::Depth32Float);
    }
}
