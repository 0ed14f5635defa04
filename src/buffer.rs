use wgpu::BufferUsages;

use crate::allocator::{BufferHandle, ResourceAllocator};
use crate::error::AllocationError;
use crate::resource::Resource;

/// Concrete buffer, or a byte range of one for subresources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Buffer {
    pub handle: BufferHandle,
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferDescriptor {
    pub size: u64,
    pub mapped_at_creation: bool,
}

impl Default for BufferDescriptor {
    fn default() -> Self {
        Self {
            size: 256,
            mapped_at_creation: false,
        }
    }
}

impl BufferDescriptor {
    pub fn new(size: u64) -> Self {
        Self {
            size,
            mapped_at_creation: false,
        }
    }

    pub fn to_wgpu_descriptor<'a>(
        &self,
        label: Option<&'a str>,
        usage: BufferUsages,
    ) -> wgpu::BufferDescriptor<'a> {
        wgpu::BufferDescriptor {
            label,
            size: self.size,
            usage,
            mapped_at_creation: self.mapped_at_creation,
        }
    }
}

/// Byte range inside the parent. A zero `size` means "to the end of the parent".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BufferSubResourceDescriptor {
    pub offset: u64,
    pub size: u64,
}

impl Resource for Buffer {
    const KIND: &'static str = "Buffer";

    type Descriptor = BufferDescriptor;
    type SubResourceDescriptor = BufferSubResourceDescriptor;
    type Usage = BufferUsages;

    fn create(
        allocator: &mut dyn ResourceAllocator,
        name: &str,
        descriptor: &BufferDescriptor,
        usage: BufferUsages,
    ) -> Result<Self, AllocationError> {
        let handle = allocator.create_buffer(name, descriptor, usage)?;
        Ok(Self {
            handle,
            offset: 0,
            size: descriptor.size,
        })
    }

    fn destroy(&self, allocator: &mut dyn ResourceAllocator) {
        allocator.destroy_buffer(self.handle);
    }

    fn subresource_descriptor(
        parent: &BufferDescriptor,
        sub: &BufferSubResourceDescriptor,
    ) -> BufferDescriptor {
        let available = parent.size.saturating_sub(sub.offset);
        let size = if sub.size == 0 {
            available
        } else {
            sub.size.min(available)
        };
        BufferDescriptor {
            size,
            mapped_at_creation: false,
        }
    }

    fn subresource(parent: &Self, sub: &BufferSubResourceDescriptor) -> Self {
        let available = parent.size.saturating_sub(sub.offset);
        let size = if sub.size == 0 {
            available
        } else {
            sub.size.min(available)
        };
        Self {
            handle: parent.handle,
            offset: parent.offset + sub.offset,
            size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subresource_ranges_are_clamped_to_the_parent() {
        let parent = Buffer {
            handle: BufferHandle(4),
            offset: 0,
            size: 1024,
        };
        let tail = Buffer::subresource(
            &parent,
            &BufferSubResourceDescriptor {
                offset: 768,
                size: 0,
            },
        );
        assert_eq!((tail.offset, tail.size), (768, 256));

        let clamped = Buffer::subresource(
            &parent,
            &BufferSubResourceDescriptor {
                offset: 1000,
                size: 64,
            },
        );
        assert_eq!(clamped.size, 24);
        assert_eq!(clamped.handle, parent.handle);
    }
}
