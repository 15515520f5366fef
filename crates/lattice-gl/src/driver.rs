//! The native-call seam.
//!
//! [`GlDriver`] mirrors the subset of the native API the runtime issues.
//! The caching layer guarantees it only calls into this trait when the
//! mirrored state actually differs, so implementations can forward every
//! call verbatim without their own redundancy checks.

use crate::types::{
    BlendFactor, BlendOp, BufferTarget, Capability, ColorWrites, CompareFunc, CullFace, FillMode,
    FrontFace, IndexType, PrimitiveMode, ShaderStage, StencilOp, TextureTarget, VertexAttribFormat,
};

/// A native object name. Zero is the null name.
pub type RawName = u32;

/// A framebuffer attachment point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attachment {
    /// Color attachment `i`.
    Color(u32),
    Depth,
    Stencil,
    DepthStencil,
}

/// The native GL entry points the runtime issues.
///
/// Fence names are separate from [`RawName`]s because native sync objects
/// are pointers, not small integers.
#[allow(clippy::too_many_arguments)]
pub trait GlDriver {
    // Object lifetime.
    fn gen_framebuffer(&mut self) -> RawName;
    fn delete_framebuffer(&mut self, name: RawName);
    fn gen_buffer(&mut self) -> RawName;
    fn delete_buffer(&mut self, name: RawName);
    fn gen_texture(&mut self) -> RawName;
    fn delete_texture(&mut self, name: RawName);
    fn gen_sampler(&mut self) -> RawName;
    fn delete_sampler(&mut self, name: RawName);

    // Shaders and programs.
    /// Creates, sources and compiles a shader object from the concatenation
    /// of `sources`. Returns the compile log on failure.
    fn compile_source(&mut self, stage: ShaderStage, sources: &[&str]) -> Result<RawName, String>;
    fn delete_shader(&mut self, name: RawName);
    fn create_program(&mut self) -> RawName;
    fn delete_program(&mut self, name: RawName);
    fn attach_shader(&mut self, program: RawName, shader: RawName);
    /// Links `program`, returning the link log on failure.
    fn link_program(&mut self, program: RawName) -> Result<(), String>;
    /// Validates `program` against the current state, returning the log on
    /// failure.
    fn validate_program(&mut self, program: RawName) -> Result<(), String>;
    fn use_program(&mut self, program: RawName);

    // Program introspection. `None` means the symbol was optimized away.
    fn uniform_location(&mut self, program: RawName, name: &str) -> Option<u32>;
    fn uniform_block_index(&mut self, program: RawName, name: &str) -> Option<u32>;
    fn storage_block_index(&mut self, program: RawName, name: &str) -> Option<u32>;
    /// Sets a sampler uniform to a texture unit (`glProgramUniform1i`).
    fn set_uniform_unit(&mut self, program: RawName, location: u32, unit: u32);
    fn uniform_block_binding(&mut self, program: RawName, block_index: u32, unit: u32);
    fn storage_block_binding(&mut self, program: RawName, block_index: u32, unit: u32);

    // Framebuffers. Attachment edits apply to the bound draw framebuffer.
    fn bind_draw_framebuffer(&mut self, name: RawName);
    fn framebuffer_texture(
        &mut self,
        attachment: Attachment,
        texture: RawName,
        level: u32,
        layer: Option<u32>,
    );
    /// Maps color outputs to attachments; `None` masks the output.
    fn draw_buffers(&mut self, mapping: &[Option<u32>]);
    fn check_framebuffer_complete(&mut self) -> bool;

    // Capabilities and fixed-function state.
    fn set_capability(&mut self, cap: Capability, enabled: bool);
    fn set_capability_indexed(&mut self, cap: Capability, index: u32, enabled: bool);
    /// `target == None` sets blend factors for all draw buffers.
    fn blend_func(
        &mut self,
        target: Option<u32>,
        src_rgb: BlendFactor,
        dst_rgb: BlendFactor,
        src_alpha: BlendFactor,
        dst_alpha: BlendFactor,
    );
    fn blend_equation(&mut self, target: Option<u32>, rgb: BlendOp, alpha: BlendOp);
    fn color_mask(&mut self, target: Option<u32>, mask: ColorWrites);
    fn blend_color(&mut self, color: [f32; 4]);
    fn sample_mask(&mut self, mask: u32);
    fn depth_mask(&mut self, enabled: bool);
    fn depth_func(&mut self, func: CompareFunc);
    fn stencil_func(&mut self, face: CullFace, func: CompareFunc, reference: i32, mask: u32);
    fn stencil_op(
        &mut self,
        face: CullFace,
        stencil_fail: StencilOp,
        depth_fail: StencilOp,
        pass: StencilOp,
    );
    fn stencil_write_mask(&mut self, face: CullFace, mask: u32);
    fn cull_face(&mut self, face: CullFace);
    fn front_face(&mut self, front: FrontFace);
    fn polygon_mode(&mut self, mode: FillMode);
    fn polygon_offset(&mut self, factor: f32, units: f32);
    fn viewport(&mut self, index: u32, x: f32, y: f32, width: f32, height: f32);
    fn depth_range(&mut self, index: u32, near: f64, far: f64);
    fn scissor(&mut self, index: u32, x: i32, y: i32, width: i32, height: i32);

    // Resource units.
    fn active_texture(&mut self, unit: u32);
    /// Binds to the active texture unit.
    fn bind_texture(&mut self, target: TextureTarget, name: RawName);
    fn bind_sampler(&mut self, unit: u32, name: RawName);
    fn bind_buffer_range(
        &mut self,
        target: BufferTarget,
        unit: u32,
        name: RawName,
        offset: usize,
        size: usize,
    );
    fn bind_image(
        &mut self,
        unit: u32,
        texture: RawName,
        level: u32,
        layer: Option<u32>,
        format: u32,
    );

    // Input assembly.
    fn bind_buffer(&mut self, target: BufferTarget, name: RawName);
    fn vertex_attrib_pointer(
        &mut self,
        index: u32,
        format: VertexAttribFormat,
        stride: u32,
        offset: usize,
    );
    fn set_vertex_attrib_enabled(&mut self, index: u32, enabled: bool);
    fn vertex_attrib_divisor(&mut self, index: u32, divisor: u32);
    fn patch_vertices(&mut self, count: u32);

    // Draws, dispatches and clears.
    fn draw_arrays(&mut self, mode: PrimitiveMode, first: u32, count: u32, instances: u32);
    fn draw_elements(
        &mut self,
        mode: PrimitiveMode,
        count: u32,
        index_type: IndexType,
        offset: usize,
        base_vertex: i32,
        instances: u32,
    );
    fn dispatch(&mut self, x: u32, y: u32, z: u32);
    /// Dispatches from the buffer bound to `DispatchIndirect`.
    fn dispatch_indirect(&mut self, offset: usize);
    /// `glClearBufferfv` on one color attachment of the bound framebuffer.
    fn clear_color_buffer(&mut self, draw_buffer: u32, color: [f32; 4]);
    fn clear_depth_stencil(&mut self, depth: Option<f32>, stencil: Option<i32>);

    // Buffer storage (named, so uploads don't disturb binding state).
    fn named_buffer_data(&mut self, name: RawName, size: usize);
    fn named_buffer_sub_data(&mut self, name: RawName, offset: usize, data: &[u8]);

    // Fences.
    fn fence_sync(&mut self) -> u64;
    fn fence_signaled(&mut self, fence: u64) -> bool;
    /// Blocks until `fence` signals.
    fn client_wait_fence(&mut self, fence: u64);
    fn delete_fence(&mut self, fence: u64);
}
