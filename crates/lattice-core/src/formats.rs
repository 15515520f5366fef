//! Pixel-format metadata seam.
//!
//! The full format conversion tables live outside this layer; the cache
//! only needs renderability, sRGB-ness and the native image format token
//! when building framebuffer attachments and validating clears.

use std::collections::HashMap;

/// Opaque pixel-format identifier, assigned by the embedding layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FormatId(pub u16);

/// What the cache needs to know about one pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDesc {
    pub color_renderable: bool,
    pub depth_renderable: bool,
    pub stencil_renderable: bool,
    pub srgb: bool,
    /// Native internal-format token passed to image bindings.
    pub native_image_format: u32,
}

impl FormatDesc {
    /// A plain, color-renderable, linear format.
    pub fn color(native_image_format: u32) -> Self {
        FormatDesc {
            color_renderable: true,
            depth_renderable: false,
            stencil_renderable: false,
            srgb: false,
            native_image_format,
        }
    }
}

/// Format metadata registered by the embedding layer at device init.
#[derive(Debug, Default, Clone)]
pub struct FormatTable {
    formats: HashMap<FormatId, FormatDesc>,
}

impl FormatTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: FormatId, desc: FormatDesc) {
        self.formats.insert(id, desc);
    }

    /// Metadata for `id`. Unregistered formats degrade to a plain color
    /// format so lookups never fail mid-flush.
    pub fn describe(&self, id: FormatId) -> FormatDesc {
        self.formats
            .get(&id)
            .copied()
            .unwrap_or_else(|| FormatDesc::color(0))
    }
}
