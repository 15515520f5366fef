//! Resource views.
//!
//! A view wraps a native texture or buffer name together with the
//! sub-resource selection and a capability set describing how it may be
//! bound. One tagged type covers texture-backed, buffer-backed and
//! image-capable views instead of a class-per-kind hierarchy.

use bitflags::bitflags;
use lattice_gl::{NameHandle, TextureTarget};

use crate::formats::FormatId;
use crate::framebuffer::FrameBufferId;

/// Handle to a view owned by a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewId(pub(crate) u32);

bitflags! {
    /// How a view may be bound.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ViewCaps: u8 {
        /// Bindable to a texture unit.
        const TEXTURE = 1 << 0;
        /// Bindable to an image unit.
        const IMAGE = 1 << 1;
        /// Bindable to a storage-buffer unit.
        const STORAGE_BUFFER = 1 << 2;
        /// Attachable to a framebuffer slot.
        const ATTACHMENT = 1 << 3;
    }
}

/// Sub-resource selection of a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    /// Texture-backed: a mip level and optionally a single layer.
    Texture {
        target: TextureTarget,
        level: u32,
        layer: Option<u32>,
    },
    /// Buffer-backed: a byte range of the underlying buffer.
    Buffer { offset: usize, size: usize },
}

/// Everything needed to register a view with a context.
#[derive(Debug, Clone, Copy)]
pub struct ViewDesc {
    /// Native name of the underlying texture or buffer.
    pub name: lattice_gl::RawName,
    pub kind: ViewKind,
    pub format: FormatId,
    pub caps: ViewCaps,
}

/// A live view.
#[derive(Debug)]
pub struct View {
    pub(crate) handle: NameHandle,
    pub(crate) kind: ViewKind,
    pub(crate) format: FormatId,
    pub(crate) caps: ViewCaps,
    /// Framebuffers currently referencing this view. Maintained by the
    /// framebuffer cache.
    pub(crate) attached_framebuffers: Vec<FrameBufferId>,
}

impl View {
    pub fn kind(&self) -> ViewKind {
        self.kind
    }

    pub fn format(&self) -> FormatId {
        self.format
    }

    pub fn caps(&self) -> ViewCaps {
        self.caps
    }
}
