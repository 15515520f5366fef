//! Fixed-function state descriptors and the driver state mirror.
//!
//! The mirror shadows every piece of native state this layer manages.
//! Exactly one operation may decide whether a native call is emitted:
//! [`refresh`]. Nothing in the flush path calls the driver speculatively.

use lattice_gl::{
    BlendFactor, BlendOp, ColorWrites, CompareFunc, CullFace, DeviceCaps, FillMode, FrontFace,
    RawName, StencilOp, TextureTarget, VertexAttribFormat,
};

use crate::pipeline::PipelineMode;

/// Render targets a framebuffer (and blend state) can address.
pub const MAX_RENDER_TARGETS: usize = 8;
/// Vertex buffer slots the input assembler exposes.
pub const MAX_VERTEX_SLOTS: usize = 16;
/// Vertex attributes the input assembler exposes.
pub const MAX_VERTEX_ATTRIBS: usize = 16;

/// Overwrites `mirror` with `value`, reporting whether it changed.
#[inline]
pub fn refresh<T: PartialEq + Copy>(mirror: &mut T, value: T) -> bool {
    if *mirror == value {
        false
    } else {
        *mirror = value;
        true
    }
}

/// Blend state of a single render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetBlend {
    pub enable: bool,
    pub src_color: BlendFactor,
    pub dst_color: BlendFactor,
    pub color_op: BlendOp,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
    pub alpha_op: BlendOp,
    pub write_mask: ColorWrites,
}

impl Default for TargetBlend {
    fn default() -> Self {
        TargetBlend {
            enable: false,
            src_color: BlendFactor::One,
            dst_color: BlendFactor::Zero,
            color_op: BlendOp::Add,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::Zero,
            alpha_op: BlendOp::Add,
            write_mask: ColorWrites::ALL,
        }
    }
}

/// Output-merger blend descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlendState {
    pub targets: [TargetBlend; MAX_RENDER_TARGETS],
    /// Per-target blend parameters; requires the matching device
    /// capability when the targets actually differ.
    pub independent: bool,
    pub alpha_to_coverage: bool,
}

/// One face of the stencil state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StencilFace {
    pub func: CompareFunc,
    pub stencil_fail: StencilOp,
    pub depth_fail: StencilOp,
    pub pass: StencilOp,
}

impl Default for StencilFace {
    fn default() -> Self {
        StencilFace {
            func: CompareFunc::Always,
            stencil_fail: StencilOp::Keep,
            depth_fail: StencilOp::Keep,
            pass: StencilOp::Keep,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthStencilState {
    pub depth_enable: bool,
    pub depth_write: bool,
    pub depth_func: CompareFunc,
    pub stencil_enable: bool,
    pub stencil_read_mask: u32,
    pub stencil_write_mask: u32,
    pub stencil_ref: i32,
    pub front: StencilFace,
    pub back: StencilFace,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        DepthStencilState {
            depth_enable: false,
            depth_write: true,
            depth_func: CompareFunc::Less,
            stencil_enable: false,
            stencil_read_mask: !0,
            stencil_write_mask: !0,
            stencil_ref: 0,
            front: StencilFace::default(),
            back: StencilFace::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterizerState {
    pub fill: FillMode,
    pub cull_enable: bool,
    pub cull: CullFace,
    pub front: FrontFace,
    pub depth_bias: f32,
    pub slope_scaled_depth_bias: f32,
    /// Disabling depth clip enables depth clamping (native when the device
    /// supports it, shader-emulated otherwise).
    pub depth_clip: bool,
    pub scissor_enable: bool,
}

impl Default for RasterizerState {
    fn default() -> Self {
        RasterizerState {
            fill: FillMode::Solid,
            cull_enable: false,
            cull: CullFace::Back,
            front: FrontFace::CounterClockwise,
            depth_bias: 0.0,
            slope_scaled_depth_bias: 0.0,
            depth_clip: true,
            scissor_enable: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f64,
    pub max_depth: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScissorRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Mirror of one texture unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureUnitMirror {
    pub target: TextureTarget,
    pub name: RawName,
    pub sampler: RawName,
}

impl Default for TextureUnitMirror {
    fn default() -> Self {
        TextureUnitMirror {
            target: TextureTarget::Tex2D,
            name: 0,
            sampler: 0,
        }
    }
}

/// Mirror of one indexed buffer binding (uniform or storage unit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferRangeMirror {
    pub name: RawName,
    pub offset: usize,
    pub size: usize,
}

/// Mirror of one image unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageUnitMirror {
    pub name: RawName,
    pub level: u32,
    pub layer: Option<u32>,
    pub format: u32,
}

/// Mirror of one vertex attribute's pointer setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttribMirror {
    pub buffer: RawName,
    pub format: VertexAttribFormat,
    pub stride: u32,
    pub offset: usize,
    pub divisor: u32,
}

/// Last-known native state.
///
/// After a successful flush this matches the state the driver actually
/// holds, field for field, for everything that was flushed.
#[derive(Debug, Clone, PartialEq)]
pub struct StateMirror {
    pub blend: BlendState,
    pub blend_color: [f32; 4],
    pub sample_mask: u32,
    pub sample_mask_enabled: bool,
    pub depth_stencil: DepthStencilState,
    pub rasterizer: RasterizerState,
    /// Native depth clamp enable (distinct from the rasterizer descriptor;
    /// only meaningful when the device clamps natively).
    pub depth_clamp: bool,
    pub viewports: Vec<Viewport>,
    pub scissors: Vec<ScissorRect>,

    pub texture_units: Vec<TextureUnitMirror>,
    pub uniform_units: Vec<BufferRangeMirror>,
    pub storage_units: Vec<BufferRangeMirror>,
    pub image_units: Vec<ImageUnitMirror>,
    pub active_texture: u32,

    pub attribs: Vec<Option<AttribMirror>>,
    pub enabled_attribs: u32,
    pub array_buffer: RawName,
    pub element_array_buffer: RawName,
    pub dispatch_indirect_buffer: RawName,
    pub patch_vertices: u32,

    pub program: RawName,
    pub pipeline_mode: PipelineMode,
    pub draw_framebuffer: RawName,
    pub framebuffer_srgb: bool,
}

impl StateMirror {
    /// A mirror matching the native default state of a fresh context,
    /// with unit tables sized to the device's aggregate limits.
    pub fn new(caps: &DeviceCaps) -> Self {
        StateMirror {
            blend: BlendState::default(),
            blend_color: [0.0; 4],
            sample_mask: !0,
            sample_mask_enabled: false,
            depth_stencil: DepthStencilState::default(),
            rasterizer: RasterizerState::default(),
            depth_clamp: false,
            viewports: vec![Viewport::default(); caps.max_viewports as usize],
            scissors: vec![ScissorRect::default(); caps.max_viewports as usize],

            texture_units: vec![
                TextureUnitMirror::default();
                caps.texture_units.max_total as usize
            ],
            uniform_units: vec![
                BufferRangeMirror::default();
                caps.uniform_buffer_units.max_total as usize
            ],
            storage_units: vec![
                BufferRangeMirror::default();
                caps.storage_buffer_units.max_total as usize
            ],
            image_units: vec![ImageUnitMirror::default(); caps.image_units.max_total as usize],
            active_texture: 0,

            attribs: vec![None; MAX_VERTEX_ATTRIBS],
            enabled_attribs: 0,
            array_buffer: 0,
            element_array_buffer: 0,
            dispatch_indirect_buffer: 0,
            patch_vertices: 3,

            program: 0,
            pipeline_mode: PipelineMode::Graphics,
            draw_framebuffer: 0,
            framebuffer_srgb: false,
        }
    }
}
