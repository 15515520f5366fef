//! A [`GlDriver`] that records calls instead of issuing them.
//!
//! State-cache tests assert on the exact sequence of native calls the
//! caching layer emits. Failure paths are scripted through magic markers in
//! shader source (`COMPILE_ERROR`, `LINK_ERROR`) and through the
//! `missing_symbols` / `incomplete_framebuffers` sets.

use std::collections::{HashMap, HashSet};

use crate::driver::{Attachment, GlDriver, RawName};
use crate::types::{
    BlendFactor, BlendOp, BufferTarget, Capability, ColorWrites, CompareFunc, CullFace, FillMode,
    FrontFace, IndexType, PrimitiveMode, ShaderStage, StencilOp, TextureTarget, VertexAttribFormat,
};

/// Source marker that makes [`RecordingDriver::compile_source`] fail.
pub const COMPILE_ERROR_MARKER: &str = "COMPILE_ERROR";
/// Source marker that makes [`RecordingDriver::link_program`] fail.
pub const LINK_ERROR_MARKER: &str = "LINK_ERROR";

/// One recorded native call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    GenFramebuffer(RawName),
    DeleteFramebuffer(RawName),
    GenBuffer(RawName),
    DeleteBuffer(RawName),
    GenTexture(RawName),
    DeleteTexture(RawName),
    GenSampler(RawName),
    DeleteSampler(RawName),

    CompileSource { stage: ShaderStage, name: RawName },
    DeleteShader(RawName),
    CreateProgram(RawName),
    DeleteProgram(RawName),
    AttachShader { program: RawName, shader: RawName },
    LinkProgram(RawName),
    ValidateProgram(RawName),
    UseProgram(RawName),

    UniformLocation { program: RawName, name: String },
    UniformBlockIndex { program: RawName, name: String },
    StorageBlockIndex { program: RawName, name: String },
    SetUniformUnit { program: RawName, location: u32, unit: u32 },
    UniformBlockBinding { program: RawName, block_index: u32, unit: u32 },
    StorageBlockBinding { program: RawName, block_index: u32, unit: u32 },

    BindDrawFramebuffer(RawName),
    FramebufferTexture { attachment: Attachment, texture: RawName, level: u32, layer: Option<u32> },
    DrawBuffers(Vec<Option<u32>>),
    CheckFramebufferComplete(RawName),

    SetCapability { cap: Capability, enabled: bool },
    SetCapabilityIndexed { cap: Capability, index: u32, enabled: bool },
    BlendFunc {
        target: Option<u32>,
        src_rgb: BlendFactor,
        dst_rgb: BlendFactor,
        src_alpha: BlendFactor,
        dst_alpha: BlendFactor,
    },
    BlendEquation { target: Option<u32>, rgb: BlendOp, alpha: BlendOp },
    ColorMask { target: Option<u32>, mask: ColorWrites },
    BlendColor([f32; 4]),
    SampleMask(u32),
    DepthMask(bool),
    DepthFunc(CompareFunc),
    StencilFunc { face: CullFace, func: CompareFunc, reference: i32, mask: u32 },
    StencilOp { face: CullFace, stencil_fail: StencilOp, depth_fail: StencilOp, pass: StencilOp },
    StencilWriteMask { face: CullFace, mask: u32 },
    SetCullFace(CullFace),
    FrontFace(FrontFace),
    PolygonMode(FillMode),
    PolygonOffset { factor: f32, units: f32 },
    Viewport { index: u32, x: f32, y: f32, width: f32, height: f32 },
    DepthRange { index: u32, near: f64, far: f64 },
    Scissor { index: u32, x: i32, y: i32, width: i32, height: i32 },

    ActiveTexture(u32),
    BindTexture { target: TextureTarget, name: RawName },
    BindSampler { unit: u32, name: RawName },
    BindBufferRange {
        target: BufferTarget,
        unit: u32,
        name: RawName,
        offset: usize,
        size: usize,
    },
    BindImage { unit: u32, texture: RawName, level: u32, layer: Option<u32>, format: u32 },

    BindBuffer { target: BufferTarget, name: RawName },
    VertexAttribPointer { index: u32, format: VertexAttribFormat, stride: u32, offset: usize },
    SetVertexAttribEnabled { index: u32, enabled: bool },
    VertexAttribDivisor { index: u32, divisor: u32 },
    PatchVertices(u32),

    DrawArrays { mode: PrimitiveMode, first: u32, count: u32, instances: u32 },
    DrawElements {
        mode: PrimitiveMode,
        count: u32,
        index_type: IndexType,
        offset: usize,
        base_vertex: i32,
        instances: u32,
    },
    Dispatch { x: u32, y: u32, z: u32 },
    DispatchIndirect { offset: usize },
    ClearColorBuffer { draw_buffer: u32, color: [f32; 4] },
    ClearDepthStencil { depth: Option<f32>, stencil: Option<i32> },

    NamedBufferData { name: RawName, size: usize },
    NamedBufferSubData { name: RawName, offset: usize, len: usize },

    FenceSync(u64),
    ClientWaitFence(u64),
    DeleteFence(u64),
}

/// Records every [`GlDriver`] call for later inspection.
#[derive(Default)]
pub struct RecordingDriver {
    /// Recorded calls, in issue order.
    pub calls: Vec<Call>,
    /// Symbol names that program introspection reports as optimized away.
    pub missing_symbols: HashSet<String>,
    /// Framebuffers that report incomplete.
    pub incomplete_framebuffers: HashSet<RawName>,

    next_name: RawName,
    next_fence: u64,
    bound_draw_framebuffer: RawName,
    shader_sources: HashMap<RawName, String>,
    attached: HashMap<RawName, Vec<RawName>>,
    locations: HashMap<(RawName, String), u32>,
    fences: HashMap<u64, bool>,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops the recorded call log, keeping all object state.
    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Number of recorded calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    /// The full source that was compiled into shader `name`.
    pub fn source_of(&self, name: RawName) -> Option<&str> {
        self.shader_sources.get(&name).map(String::as_str)
    }

    /// Marks every outstanding fence as signaled.
    pub fn signal_all_fences(&mut self) {
        for signaled in self.fences.values_mut() {
            *signaled = true;
        }
    }

    fn fresh_name(&mut self) -> RawName {
        self.next_name += 1;
        self.next_name
    }

    fn program_sources(&self, program: RawName) -> impl Iterator<Item = &str> {
        self.attached
            .get(&program)
            .into_iter()
            .flatten()
            .filter_map(|shader| self.source_of(*shader))
    }
}

impl GlDriver for RecordingDriver {
    fn gen_framebuffer(&mut self) -> RawName {
        let name = self.fresh_name();
        self.calls.push(Call::GenFramebuffer(name));
        name
    }

    fn delete_framebuffer(&mut self, name: RawName) {
        self.calls.push(Call::DeleteFramebuffer(name));
    }

    fn gen_buffer(&mut self) -> RawName {
        let name = self.fresh_name();
        self.calls.push(Call::GenBuffer(name));
        name
    }

    fn delete_buffer(&mut self, name: RawName) {
        self.calls.push(Call::DeleteBuffer(name));
    }

    fn gen_texture(&mut self) -> RawName {
        let name = self.fresh_name();
        self.calls.push(Call::GenTexture(name));
        name
    }

    fn delete_texture(&mut self, name: RawName) {
        self.calls.push(Call::DeleteTexture(name));
    }

    fn gen_sampler(&mut self) -> RawName {
        let name = self.fresh_name();
        self.calls.push(Call::GenSampler(name));
        name
    }

    fn delete_sampler(&mut self, name: RawName) {
        self.calls.push(Call::DeleteSampler(name));
    }

    fn compile_source(&mut self, stage: ShaderStage, sources: &[&str]) -> Result<RawName, String> {
        let source = sources.concat();
        if source.contains(COMPILE_ERROR_MARKER) {
            return Err(format!("scripted compile failure in {stage:?} shader"));
        }
        let name = self.fresh_name();
        self.shader_sources.insert(name, source);
        self.calls.push(Call::CompileSource { stage, name });
        Ok(name)
    }

    fn delete_shader(&mut self, name: RawName) {
        self.calls.push(Call::DeleteShader(name));
    }

    fn create_program(&mut self) -> RawName {
        let name = self.fresh_name();
        self.calls.push(Call::CreateProgram(name));
        name
    }

    fn delete_program(&mut self, name: RawName) {
        self.calls.push(Call::DeleteProgram(name));
    }

    fn attach_shader(&mut self, program: RawName, shader: RawName) {
        self.attached.entry(program).or_default().push(shader);
        self.calls.push(Call::AttachShader { program, shader });
    }

    fn link_program(&mut self, program: RawName) -> Result<(), String> {
        if self
            .program_sources(program)
            .any(|s| s.contains(LINK_ERROR_MARKER))
        {
            return Err("scripted link failure".to_owned());
        }
        self.calls.push(Call::LinkProgram(program));
        Ok(())
    }

    fn validate_program(&mut self, program: RawName) -> Result<(), String> {
        self.calls.push(Call::ValidateProgram(program));
        Ok(())
    }

    fn use_program(&mut self, program: RawName) {
        self.calls.push(Call::UseProgram(program));
    }

    fn uniform_location(&mut self, program: RawName, name: &str) -> Option<u32> {
        self.calls.push(Call::UniformLocation {
            program,
            name: name.to_owned(),
        });
        if self.missing_symbols.contains(name) {
            return None;
        }
        let next = self.locations.len() as u32;
        Some(
            *self
                .locations
                .entry((program, name.to_owned()))
                .or_insert(next),
        )
    }

    fn uniform_block_index(&mut self, program: RawName, name: &str) -> Option<u32> {
        self.calls.push(Call::UniformBlockIndex {
            program,
            name: name.to_owned(),
        });
        if self.missing_symbols.contains(name) {
            return None;
        }
        let next = self.locations.len() as u32;
        Some(
            *self
                .locations
                .entry((program, name.to_owned()))
                .or_insert(next),
        )
    }

    fn storage_block_index(&mut self, program: RawName, name: &str) -> Option<u32> {
        self.calls.push(Call::StorageBlockIndex {
            program,
            name: name.to_owned(),
        });
        if self.missing_symbols.contains(name) {
            return None;
        }
        let next = self.locations.len() as u32;
        Some(
            *self
                .locations
                .entry((program, name.to_owned()))
                .or_insert(next),
        )
    }

    fn set_uniform_unit(&mut self, program: RawName, location: u32, unit: u32) {
        self.calls.push(Call::SetUniformUnit {
            program,
            location,
            unit,
        });
    }

    fn uniform_block_binding(&mut self, program: RawName, block_index: u32, unit: u32) {
        self.calls.push(Call::UniformBlockBinding {
            program,
            block_index,
            unit,
        });
    }

    fn storage_block_binding(&mut self, program: RawName, block_index: u32, unit: u32) {
        self.calls.push(Call::StorageBlockBinding {
            program,
            block_index,
            unit,
        });
    }

    fn bind_draw_framebuffer(&mut self, name: RawName) {
        self.bound_draw_framebuffer = name;
        self.calls.push(Call::BindDrawFramebuffer(name));
    }

    fn framebuffer_texture(
        &mut self,
        attachment: Attachment,
        texture: RawName,
        level: u32,
        layer: Option<u32>,
    ) {
        self.calls.push(Call::FramebufferTexture {
            attachment,
            texture,
            level,
            layer,
        });
    }

    fn draw_buffers(&mut self, mapping: &[Option<u32>]) {
        self.calls.push(Call::DrawBuffers(mapping.to_vec()));
    }

    fn check_framebuffer_complete(&mut self) -> bool {
        let name = self.bound_draw_framebuffer;
        self.calls.push(Call::CheckFramebufferComplete(name));
        !self.incomplete_framebuffers.contains(&name)
    }

    fn set_capability(&mut self, cap: Capability, enabled: bool) {
        self.calls.push(Call::SetCapability { cap, enabled });
    }

    fn set_capability_indexed(&mut self, cap: Capability, index: u32, enabled: bool) {
        self.calls.push(Call::SetCapabilityIndexed {
            cap,
            index,
            enabled,
        });
    }

    fn blend_func(
        &mut self,
        target: Option<u32>,
        src_rgb: BlendFactor,
        dst_rgb: BlendFactor,
        src_alpha: BlendFactor,
        dst_alpha: BlendFactor,
    ) {
        self.calls.push(Call::BlendFunc {
            target,
            src_rgb,
            dst_rgb,
            src_alpha,
            dst_alpha,
        });
    }

    fn blend_equation(&mut self, target: Option<u32>, rgb: BlendOp, alpha: BlendOp) {
        self.calls.push(Call::BlendEquation { target, rgb, alpha });
    }

    fn color_mask(&mut self, target: Option<u32>, mask: ColorWrites) {
        self.calls.push(Call::ColorMask { target, mask });
    }

    fn blend_color(&mut self, color: [f32; 4]) {
        self.calls.push(Call::BlendColor(color));
    }

    fn sample_mask(&mut self, mask: u32) {
        self.calls.push(Call::SampleMask(mask));
    }

    fn depth_mask(&mut self, enabled: bool) {
        self.calls.push(Call::DepthMask(enabled));
    }

    fn depth_func(&mut self, func: CompareFunc) {
        self.calls.push(Call::DepthFunc(func));
    }

    fn stencil_func(&mut self, face: CullFace, func: CompareFunc, reference: i32, mask: u32) {
        self.calls.push(Call::StencilFunc {
            face,
            func,
            reference,
            mask,
        });
    }

    fn stencil_op(
        &mut self,
        face: CullFace,
        stencil_fail: StencilOp,
        depth_fail: StencilOp,
        pass: StencilOp,
    ) {
        self.calls.push(Call::StencilOp {
            face,
            stencil_fail,
            depth_fail,
            pass,
        });
    }

    fn stencil_write_mask(&mut self, face: CullFace, mask: u32) {
        self.calls.push(Call::StencilWriteMask { face, mask });
    }

    fn cull_face(&mut self, face: CullFace) {
        self.calls.push(Call::SetCullFace(face));
    }

    fn front_face(&mut self, front: FrontFace) {
        self.calls.push(Call::FrontFace(front));
    }

    fn polygon_mode(&mut self, mode: FillMode) {
        self.calls.push(Call::PolygonMode(mode));
    }

    fn polygon_offset(&mut self, factor: f32, units: f32) {
        self.calls.push(Call::PolygonOffset { factor, units });
    }

    fn viewport(&mut self, index: u32, x: f32, y: f32, width: f32, height: f32) {
        self.calls.push(Call::Viewport {
            index,
            x,
            y,
            width,
            height,
        });
    }

    fn depth_range(&mut self, index: u32, near: f64, far: f64) {
        self.calls.push(Call::DepthRange { index, near, far });
    }

    fn scissor(&mut self, index: u32, x: i32, y: i32, width: i32, height: i32) {
        self.calls.push(Call::Scissor {
            index,
            x,
            y,
            width,
            height,
        });
    }

    fn active_texture(&mut self, unit: u32) {
        self.calls.push(Call::ActiveTexture(unit));
    }

    fn bind_texture(&mut self, target: TextureTarget, name: RawName) {
        self.calls.push(Call::BindTexture { target, name });
    }

    fn bind_sampler(&mut self, unit: u32, name: RawName) {
        self.calls.push(Call::BindSampler { unit, name });
    }

    fn bind_buffer_range(
        &mut self,
        target: BufferTarget,
        unit: u32,
        name: RawName,
        offset: usize,
        size: usize,
    ) {
        self.calls.push(Call::BindBufferRange {
            target,
            unit,
            name,
            offset,
            size,
        });
    }

    fn bind_image(
        &mut self,
        unit: u32,
        texture: RawName,
        level: u32,
        layer: Option<u32>,
        format: u32,
    ) {
        self.calls.push(Call::BindImage {
            unit,
            texture,
            level,
            layer,
            format,
        });
    }

    fn bind_buffer(&mut self, target: BufferTarget, name: RawName) {
        self.calls.push(Call::BindBuffer { target, name });
    }

    fn vertex_attrib_pointer(
        &mut self,
        index: u32,
        format: VertexAttribFormat,
        stride: u32,
        offset: usize,
    ) {
        self.calls.push(Call::VertexAttribPointer {
            index,
            format,
            stride,
            offset,
        });
    }

    fn set_vertex_attrib_enabled(&mut self, index: u32, enabled: bool) {
        self.calls.push(Call::SetVertexAttribEnabled { index, enabled });
    }

    fn vertex_attrib_divisor(&mut self, index: u32, divisor: u32) {
        self.calls.push(Call::VertexAttribDivisor { index, divisor });
    }

    fn patch_vertices(&mut self, count: u32) {
        self.calls.push(Call::PatchVertices(count));
    }

    fn draw_arrays(&mut self, mode: PrimitiveMode, first: u32, count: u32, instances: u32) {
        self.calls.push(Call::DrawArrays {
            mode,
            first,
            count,
            instances,
        });
    }

    fn draw_elements(
        &mut self,
        mode: PrimitiveMode,
        count: u32,
        index_type: IndexType,
        offset: usize,
        base_vertex: i32,
        instances: u32,
    ) {
        self.calls.push(Call::DrawElements {
            mode,
            count,
            index_type,
            offset,
            base_vertex,
            instances,
        });
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.calls.push(Call::Dispatch { x, y, z });
    }

    fn dispatch_indirect(&mut self, offset: usize) {
        self.calls.push(Call::DispatchIndirect { offset });
    }

    fn clear_color_buffer(&mut self, draw_buffer: u32, color: [f32; 4]) {
        self.calls.push(Call::ClearColorBuffer { draw_buffer, color });
    }

    fn clear_depth_stencil(&mut self, depth: Option<f32>, stencil: Option<i32>) {
        self.calls.push(Call::ClearDepthStencil { depth, stencil });
    }

    fn named_buffer_data(&mut self, name: RawName, size: usize) {
        self.calls.push(Call::NamedBufferData { name, size });
    }

    fn named_buffer_sub_data(&mut self, name: RawName, offset: usize, data: &[u8]) {
        self.calls.push(Call::NamedBufferSubData {
            name,
            offset,
            len: data.len(),
        });
    }

    fn fence_sync(&mut self) -> u64 {
        self.next_fence += 1;
        self.fences.insert(self.next_fence, false);
        self.calls.push(Call::FenceSync(self.next_fence));
        self.next_fence
    }

    fn fence_signaled(&mut self, fence: u64) -> bool {
        self.fences.get(&fence).copied().unwrap_or(true)
    }

    fn client_wait_fence(&mut self, fence: u64) {
        self.fences.insert(fence, true);
        self.calls.push(Call::ClientWaitFence(fence));
    }

    fn delete_fence(&mut self, fence: u64) {
        self.fences.remove(&fence);
        self.calls.push(Call::DeleteFence(fence));
    }
}
