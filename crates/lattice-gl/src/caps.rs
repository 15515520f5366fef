//! Device capability description.
//!
//! Queried once at device creation and treated as immutable afterwards;
//! the caching layer pre-computes its hardware-unit partitions from these
//! numbers.

use crate::types::STAGE_COUNT;

/// Limits for one kind of hardware resource unit (texture units, uniform
/// buffer units, storage buffer units, image units).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceUnitCaps {
    /// Per-stage maximum, indexed by [`ShaderStage::index`].
    ///
    /// [`ShaderStage::index`]: crate::types::ShaderStage::index
    pub max_per_stage: [u32; STAGE_COUNT],
    /// Aggregate maximum across all stages, usually smaller than the sum
    /// of the per-stage maxima.
    pub max_total: u32,
}

impl ResourceUnitCaps {
    /// Uniform limits: the same per-stage maximum for every stage.
    pub fn uniform(max_per_stage: u32, max_total: u32) -> Self {
        ResourceUnitCaps {
            max_per_stage: [max_per_stage; STAGE_COUNT],
            max_total,
        }
    }
}

/// Everything the caching layer needs to know about the native device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCaps {
    pub texture_units: ResourceUnitCaps,
    pub uniform_buffer_units: ResourceUnitCaps,
    pub storage_buffer_units: ResourceUnitCaps,
    pub image_units: ResourceUnitCaps,

    /// Per-render-target blend state and write masks.
    pub independent_blend: bool,
    /// Shader storage buffer blocks.
    pub storage_blocks: bool,
    /// Shader image load/store.
    pub shader_images: bool,
    /// Native depth clamping (otherwise emulated in the shader).
    pub depth_clamp: bool,
    /// Compute shaders and dispatch.
    pub compute: bool,
    /// `glSampleMaski` and the sample-mask capability.
    pub sample_mask: bool,
    /// Stencil-only framebuffer attachments (otherwise stencil views must
    /// attach as combined depth-stencil).
    pub stencil_only_attachment: bool,

    /// Required alignment of uniform-buffer binding offsets.
    pub uniform_offset_alignment: u32,
    /// Number of color attachments a framebuffer supports.
    pub max_color_attachments: u32,
    /// Number of simultaneous viewports.
    pub max_viewports: u32,
    /// Shading-language version to declare in generated sources, e.g. 440.
    pub glsl_version: u32,
}

impl DeviceCaps {
    /// Caps resembling a desktop GL 4.4 device. Tests start from these and
    /// override what they exercise.
    pub fn desktop() -> Self {
        DeviceCaps {
            texture_units: ResourceUnitCaps::uniform(32, 96),
            uniform_buffer_units: ResourceUnitCaps::uniform(14, 84),
            storage_buffer_units: ResourceUnitCaps::uniform(16, 96),
            image_units: ResourceUnitCaps::uniform(8, 8),
            independent_blend: true,
            storage_blocks: true,
            shader_images: true,
            depth_clamp: true,
            compute: true,
            sample_mask: true,
            stencil_only_attachment: true,
            uniform_offset_alignment: 256,
            max_color_attachments: 8,
            max_viewports: 16,
            glsl_version: 440,
        }
    }
}
