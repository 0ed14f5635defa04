//! Render targets declared by passes and the per-attachment load/store decisions made
//! for them at compile time.

use bitflags::bitflags;

use crate::allocator::{RenderTargetHandle, TextureHandle};
use crate::handle::Handle;
use crate::texture::Texture;

pub const MAX_COLOR_ATTACHMENTS: usize = 4;

/// Color attachments, then depth, then stencil.
pub(crate) const ATTACHMENT_SLOTS: usize = MAX_COLOR_ATTACHMENTS + 2;
const DEPTH_SLOT: usize = MAX_COLOR_ATTACHMENTS;
const STENCIL_SLOT: usize = MAX_COLOR_ATTACHMENTS + 1;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TargetBufferFlags: u32 {
        const COLOR0 = 1 << 0;
        const COLOR1 = 1 << 1;
        const COLOR2 = 1 << 2;
        const COLOR3 = 1 << 3;
        const DEPTH = 1 << 4;
        const STENCIL = 1 << 5;
        const COLOR_ALL = Self::COLOR0.bits() | Self::COLOR1.bits() | Self::COLOR2.bits() | Self::COLOR3.bits();
        const DEPTH_AND_STENCIL = Self::DEPTH.bits() | Self::STENCIL.bits();
        const ALL = Self::COLOR_ALL.bits() | Self::DEPTH_AND_STENCIL.bits();
    }
}

impl TargetBufferFlags {
    pub(crate) fn for_slot(slot: usize) -> Self {
        Self::from_bits_truncate(1 << slot)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Attachments {
    pub color: [Option<Handle<Texture>>; MAX_COLOR_ATTACHMENTS],
    pub depth: Option<Handle<Texture>>,
    pub stencil: Option<Handle<Texture>>,
}

impl Attachments {
    pub fn color(handle: Handle<Texture>) -> Self {
        let mut attachments = Self::default();
        attachments.color[0] = Some(handle);
        attachments
    }

    pub fn color_depth(color: Handle<Texture>, depth: Handle<Texture>) -> Self {
        let mut attachments = Self::color(color);
        attachments.depth = Some(depth);
        attachments
    }

    pub(crate) fn slot(&self, slot: usize) -> Option<Handle<Texture>> {
        match slot {
            DEPTH_SLOT => self.depth,
            STENCIL_SLOT => self.stencil,
            _ => self.color[slot],
        }
    }

    pub(crate) fn set_slot(&mut self, slot: usize, handle: Handle<Texture>) {
        match slot {
            DEPTH_SLOT => self.depth = Some(handle),
            STENCIL_SLOT => self.stencil = Some(handle),
            _ => self.color[slot] = Some(handle),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderTargetDescriptor {
    pub attachments: Attachments,
    /// An empty viewport covers the whole first attachment.
    pub viewport: Viewport,
    pub clear_color: wgpu::Color,
    pub clear_flags: TargetBufferFlags,
    pub samples: u8,
}

impl Default for RenderTargetDescriptor {
    fn default() -> Self {
        Self {
            attachments: Attachments::default(),
            viewport: Viewport::default(),
            clear_color: wgpu::Color::TRANSPARENT,
            clear_flags: TargetBufferFlags::empty(),
            samples: 1,
        }
    }
}

impl RenderTargetDescriptor {
    pub fn new(attachments: Attachments) -> Self {
        Self {
            attachments,
            ..Self::default()
        }
    }

    pub fn clear(mut self, flags: TargetBufferFlags, color: wgpu::Color) -> Self {
        self.clear_flags = flags;
        self.clear_color = color;
        self
    }
}

/// Returned by the builder; `attachments` holds the new versions written by the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTarget {
    pub attachments: Attachments,
    pub id: u32,
}

/// Describes a render target that exists outside the frame graph, such as a swapchain.
/// It is used instead of creating one when its texture is a pass's first color attachment
/// and it [`accepts`](Self::accepts) the pass's attachments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImportedRenderTarget {
    pub target: RenderTargetHandle,
    pub attachments: TargetBufferFlags,
    pub viewport: Viewport,
    pub clear_color: wgpu::Color,
    pub clear_flags: TargetBufferFlags,
    pub samples: u8,
    /// Attachments whose previous content must be loaded regardless of the graph.
    pub keep_override_start: TargetBufferFlags,
    /// Attachments that must be stored regardless of the graph.
    pub keep_override_end: TargetBufferFlags,
}

impl ImportedRenderTarget {
    pub fn new(target: RenderTargetHandle, viewport: Viewport) -> Self {
        Self {
            target,
            attachments: TargetBufferFlags::COLOR0,
            viewport,
            clear_color: wgpu::Color::TRANSPARENT,
            clear_flags: TargetBufferFlags::empty(),
            samples: 1,
            keep_override_start: TargetBufferFlags::empty(),
            keep_override_end: TargetBufferFlags::empty(),
        }
    }

    /// True when a pass rendering into `attachments` with `samples` samples per pixel
    /// can render into this target.
    pub fn accepts(&self, attachments: TargetBufferFlags, samples: u8) -> bool {
        self.attachments.contains(attachments) && self.samples == samples
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscardFlags {
    /// Previous content is undefined and need not be loaded.
    pub start: TargetBufferFlags,
    /// Content is not read afterwards and need not be stored.
    pub end: TargetBufferFlags,
}

impl DiscardFlags {
    pub fn load_op<V: Default>(&self, flag: TargetBufferFlags, clear: Option<V>) -> wgpu::LoadOp<V> {
        match clear {
            Some(value) => wgpu::LoadOp::Clear(value),
            // wgpu has no "don't care" load; clearing is the cheapest valid choice.
            None if self.start.contains(flag) => wgpu::LoadOp::Clear(V::default()),
            None => wgpu::LoadOp::Load,
        }
    }

    pub fn store_op(&self, flag: TargetBufferFlags) -> wgpu::StoreOp {
        if self.end.contains(flag) {
            wgpu::StoreOp::Discard
        } else {
            wgpu::StoreOp::Store
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderPassParams {
    pub viewport: Viewport,
    pub clear_color: wgpu::Color,
    pub clear: TargetBufferFlags,
    pub discard: DiscardFlags,
}

impl Default for RenderPassParams {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            clear_color: wgpu::Color::TRANSPARENT,
            clear: TargetBufferFlags::empty(),
            discard: DiscardFlags::default(),
        }
    }
}

/// What a pass needs to begin rendering into one of its declared render targets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderPassInfo {
    pub target: RenderTargetHandle,
    pub params: RenderPassParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetBufferInfo {
    pub texture: TextureHandle,
    pub level: u8,
    pub layer: u16,
}

impl From<&Texture> for TargetBufferInfo {
    fn from(texture: &Texture) -> Self {
        Self {
            texture: texture.handle,
            level: texture.level,
            layer: texture.layer,
        }
    }
}

/// Everything an allocator needs to build a render target.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderTargetInfo {
    pub name: String,
    pub flags: TargetBufferFlags,
    pub width: u32,
    pub height: u32,
    pub samples: u8,
    pub color: [Option<TargetBufferInfo>; MAX_COLOR_ATTACHMENTS],
    pub depth: Option<TargetBufferInfo>,
    pub stencil: Option<TargetBufferInfo>,
}

/// Per-pass bookkeeping for one declared render target.
pub(crate) struct RenderTargetData {
    pub(crate) descriptor: RenderTargetDescriptor,
    /// Resource node each attachment had before the pass wrote it.
    pub(crate) incoming: [Option<u16>; ATTACHMENT_SLOTS],
    /// Resource node produced by the pass's write.
    pub(crate) outgoing: [Option<u16>; ATTACHMENT_SLOTS],
    /// Handle index of each attachment.
    pub(crate) handles: [Option<u16>; ATTACHMENT_SLOTS],
    pub(crate) imported: Option<ImportedRenderTarget>,
    pub(crate) flags: TargetBufferFlags,
    pub(crate) params: RenderPassParams,
    pub(crate) target: Option<RenderTargetHandle>,
}

impl RenderTargetData {
    pub(crate) fn new(descriptor: RenderTargetDescriptor) -> Self {
        Self {
            descriptor,
            incoming: [None; ATTACHMENT_SLOTS],
            outgoing: [None; ATTACHMENT_SLOTS],
            handles: [None; ATTACHMENT_SLOTS],
            imported: None,
            flags: TargetBufferFlags::empty(),
            params: RenderPassParams::default(),
            target: None,
        }
    }

    /// Decides which attachments must be loaded and stored.
    ///
    /// An attachment's previous content is discarded unless the incoming version was
    /// written by someone, and its new content is discarded unless a live node reads the
    /// outgoing version. Clearing always discards the previous content.
    pub(crate) fn resolve(
        &mut self,
        has_writer: impl Fn(u16) -> bool,
        has_active_readers: impl Fn(u16) -> bool,
        default_extent: (u32, u32),
    ) {
        let mut flags = TargetBufferFlags::empty();
        let mut discard = DiscardFlags::default();
        for slot in 0..ATTACHMENT_SLOTS {
            let Some(outgoing) = self.outgoing[slot] else {
                continue;
            };
            let bit = TargetBufferFlags::for_slot(slot);
            flags |= bit;
            discard.start |= bit;
            discard.end |= bit;
            if has_active_readers(outgoing) {
                discard.end.remove(bit);
            }
            if self.incoming[slot].is_some_and(&has_writer) {
                discard.start.remove(bit);
            }
        }

        let mut clear = self.descriptor.clear_flags & flags;
        let mut clear_color = self.descriptor.clear_color;
        let mut viewport = self.descriptor.viewport;

        if let Some(imported) = &self.imported {
            clear |= imported.clear_flags & flags;
            if !imported.clear_flags.is_empty() {
                clear_color = imported.clear_color;
            }
            if viewport.is_empty() {
                viewport = imported.viewport;
            }
            discard.start.remove(imported.keep_override_start);
            discard.end.remove(imported.keep_override_end);
        }
        discard.start |= clear;

        if viewport.is_empty() {
            viewport = Viewport::new(default_extent.0, default_extent.1);
        }

        self.flags = flags;
        self.params = RenderPassParams {
            viewport,
            clear_color,
            clear,
            discard,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color_depth_target() -> RenderTargetData {
        let mut data = RenderTargetData::new(RenderTargetDescriptor::default());
        data.incoming[0] = Some(0);
        data.outgoing[0] = Some(1);
        data.incoming[DEPTH_SLOT] = Some(2);
        data.outgoing[DEPTH_SLOT] = Some(3);
        data
    }

    #[test]
    fn fresh_unread_attachments_are_fully_discarded() {
        let mut data = color_depth_target();
        data.resolve(|_| false, |_| false, (800, 600));

        let expected = TargetBufferFlags::COLOR0 | TargetBufferFlags::DEPTH;
        assert_eq!(data.flags, expected);
        assert_eq!(data.params.discard.start, expected);
        assert_eq!(data.params.discard.end, expected);
        assert_eq!(data.params.viewport, Viewport::new(800, 600));
    }

    #[test]
    fn produced_and_read_attachments_are_kept() {
        let mut data = color_depth_target();
        // Color was produced earlier and is read later; depth is neither.
        data.resolve(|node| node == 0, |node| node == 1, (16, 16));

        assert_eq!(data.params.discard.start, TargetBufferFlags::DEPTH);
        assert_eq!(data.params.discard.end, TargetBufferFlags::DEPTH);
    }

    #[test]
    fn clear_implies_discard_start() {
        let mut data = color_depth_target();
        data.descriptor.clear_flags = TargetBufferFlags::COLOR0 | TargetBufferFlags::STENCIL;
        data.resolve(|_| true, |_| true, (16, 16));

        // Stencil is not attached, so its clear bit is dropped.
        assert_eq!(data.params.clear, TargetBufferFlags::COLOR0);
        assert_eq!(data.params.discard.start, TargetBufferFlags::COLOR0);
        assert!(data.params.discard.end.is_empty());
    }

    #[test]
    fn imported_target_overrides_apply() {
        let mut data = RenderTargetData::new(RenderTargetDescriptor::default());
        data.outgoing[0] = Some(1);
        let mut imported = ImportedRenderTarget::new(RenderTargetHandle(9), Viewport::new(1920, 1080));
        imported.keep_override_end = TargetBufferFlags::COLOR0;
        data.imported = Some(imported);
        data.resolve(|_| false, |_| false, (1, 1));

        assert_eq!(data.params.viewport, Viewport::new(1920, 1080));
        assert_eq!(data.params.discard.start, TargetBufferFlags::COLOR0);
        assert!(data.params.discard.end.is_empty());
    }

    #[test]
    fn imported_target_accepts_only_what_it_has() {
        let swapchain = ImportedRenderTarget::new(RenderTargetHandle(1), Viewport::new(4, 4));
        assert!(swapchain.accepts(TargetBufferFlags::COLOR0, 1));
        assert!(!swapchain.accepts(TargetBufferFlags::COLOR0 | TargetBufferFlags::DEPTH, 1));
        assert!(!swapchain.accepts(TargetBufferFlags::COLOR0, 4));
    }

    #[test]
    fn store_op_follows_discard_end() {
        let discard = DiscardFlags {
            start: TargetBufferFlags::empty(),
            end: TargetBufferFlags::DEPTH,
        };
        assert_eq!(discard.store_op(TargetBufferFlags::DEPTH), wgpu::StoreOp::Discard);
        assert_eq!(discard.store_op(TargetBufferFlags::COLOR0), wgpu::StoreOp::Store);
        assert_eq!(
            discard.load_op::<f32>(TargetBufferFlags::COLOR0, None),
            wgpu::LoadOp::Load
        );
    }
}
