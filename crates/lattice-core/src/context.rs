//! The rendering context.
//!
//! All client-visible operations land here. Setters record into the
//! pending configuration or diff fixed-function state against the mirror
//! immediately; draws and dispatches flush whatever the dirty flags say is
//! stale, in a fixed order, and only then touch the driver. A failed flush
//! leaves its dirty flag set, so the next draw retries and reports the
//! same error instead of rendering with half-applied state.

use std::sync::Arc;

use bitflags::bitflags;
use lattice_gl::{
    BufferTarget, Capability, CullFace, DeviceCaps, GlDriver, PrimitiveMode, RawName, ShaderStage,
    STAGE_COUNT,
};
use lattice_psb::ShaderReflection;
use tracing::{debug, warn};

use crate::bindings::{
    set_slot, ConstantBufferBinding, IndexBufferBinding, StageSlots, VertexBufferBinding,
};
use crate::buffers::{Buffer, BufferId};
use crate::config::ContextConfig;
use crate::device::Device;
use crate::error::ContextError;
use crate::framebuffer::{FrameBufferCache, FrameBufferConfig, FrameBufferId};
use crate::input_assembler::{self, InputLayout, ResolvedVertexBuffer};
use crate::pipeline::{PipelineCache, PipelineConfig, PipelineId, PipelineMode};
use crate::shader::{Shader, ShaderId};
use crate::state::{
    refresh, BlendState, BufferRangeMirror, DepthStencilState, ImageUnitMirror, RasterizerState,
    ScissorRect, StateMirror, TargetBlend, TextureUnitMirror, Viewport, MAX_RENDER_TARGETS,
    MAX_VERTEX_SLOTS,
};
use crate::streaming::{StreamSpan, StreamingRing};
use crate::table::Table;
use crate::units::{ResourceType, UnitMap, UnitMapCache, RESOURCE_TYPE_COUNT, SAMPLER_NONE};
use crate::views::{View, ViewCaps, ViewDesc, ViewId, ViewKind};

bitflags! {
    /// Deferred-state classes needing reconciliation before the next draw.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct DirtyFlags: u32 {
        const FRAMEBUFFER = 1 << 0;
        const PIPELINE = 1 << 1;
        const INPUT_ASSEMBLER = 1 << 2;
        const TEXTURE_UNITS = 1 << 3;
        const UNIFORM_UNITS = 1 << 4;
        const STORAGE_UNITS = 1 << 5;
        const IMAGE_UNITS = 1 << 6;
    }
}

impl DirtyFlags {
    fn of_unit(ty: ResourceType) -> DirtyFlags {
        match ty {
            ResourceType::Texture => DirtyFlags::TEXTURE_UNITS,
            ResourceType::UniformBuffer => DirtyFlags::UNIFORM_UNITS,
            ResourceType::StorageBuffer => DirtyFlags::STORAGE_UNITS,
            ResourceType::Image => DirtyFlags::IMAGE_UNITS,
        }
    }
}

/// The client-visible configuration that has not been flushed yet.
struct PendingState {
    shaders: [Option<ShaderId>; STAGE_COUNT],
    framebuffer: FrameBufferConfig,
    topology: PrimitiveMode,
    patch_control_points: u32,
    input_layout: InputLayout,
    vertex_buffers: [Option<VertexBufferBinding>; MAX_VERTEX_SLOTS],
    index_buffer: Option<IndexBufferBinding>,
    emulate_depth_clamp: bool,
}

impl PendingState {
    fn new() -> Self {
        PendingState {
            shaders: [None; STAGE_COUNT],
            framebuffer: FrameBufferConfig::default(),
            topology: PrimitiveMode::Triangles,
            patch_control_points: 3,
            input_layout: InputLayout::default(),
            vertex_buffers: [None; MAX_VERTEX_SLOTS],
            index_buffer: None,
            emulate_depth_clamp: false,
        }
    }
}

pub struct Context<D: GlDriver> {
    driver: D,
    device: Arc<Device>,
    config: ContextConfig,

    shaders: Table<Shader>,
    views: Table<View>,
    buffers: Table<Buffer>,

    framebuffers: FrameBufferCache,
    pipelines: PipelineCache,
    unit_maps: UnitMapCache,

    stages: [StageSlots; STAGE_COUNT],
    /// Spans already uploaded for streamed slots this frame; invalidated on
    /// frame switch.
    streamed_spans: [Vec<Option<StreamSpan>>; STAGE_COUNT],
    pending: PendingState,

    current_pipeline: Option<PipelineId>,
    current_framebuffer: Option<FrameBufferId>,
    active_unit_maps: [Option<Arc<UnitMap>>; RESOURCE_TYPE_COUNT],

    mirror: StateMirror,
    dirty: DirtyFlags,
    streaming: StreamingRing,
}

impl<D: GlDriver> Context<D> {
    pub fn new(driver: D, device: Arc<Device>, config: ContextConfig) -> Self {
        let caps = device.caps().clone();
        let stages = std::array::from_fn(|stage| {
            StageSlots::new(
                stage,
                &caps.texture_units,
                &caps.uniform_buffer_units,
                &caps.storage_buffer_units,
                &caps.image_units,
            )
        });
        let streamed_spans = std::array::from_fn(|stage| {
            vec![None; caps.uniform_buffer_units.max_per_stage[stage] as usize]
        });
        let streaming = StreamingRing::new(&config, caps.uniform_offset_alignment);
        Context {
            driver,
            mirror: StateMirror::new(&caps),
            device,
            config,
            shaders: Table::default(),
            views: Table::default(),
            buffers: Table::default(),
            framebuffers: FrameBufferCache::new(),
            pipelines: PipelineCache::new(),
            unit_maps: UnitMapCache::new(),
            stages,
            streamed_spans,
            pending: PendingState::new(),
            current_pipeline: None,
            current_framebuffer: None,
            active_unit_maps: Default::default(),
            dirty: DirtyFlags::all(),
            streaming,
        }
    }

    pub fn caps(&self) -> &DeviceCaps {
        self.device.caps()
    }

    /// Last-known native state; read-only, mainly for diagnostics.
    pub fn mirror(&self) -> &StateMirror {
        &self.mirror
    }

    pub fn framebuffer_cache(&self) -> &FrameBufferCache {
        &self.framebuffers
    }

    pub fn pipeline_cache(&self) -> &PipelineCache {
        &self.pipelines
    }

    pub fn unit_map_cache(&self) -> &UnitMapCache {
        &self.unit_maps
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    // ---- Object lifetime ----------------------------------------------

    /// Registers a shader from its portable blob.
    pub fn create_shader(&mut self, stage: ShaderStage, blob: &[u8]) -> Result<ShaderId, ContextError> {
        if stage == ShaderStage::Compute && !self.device.caps().compute {
            return Err(ContextError::Unsupported { feature: "compute shaders" });
        }
        let reflection = ShaderReflection::parse(blob)?;
        let id = ShaderId(self.shaders.insert(Shader {
            stage,
            reflection,
            attached_pipelines: Vec::new(),
        }));
        debug!(?stage, id = id.0, "created shader");
        Ok(id)
    }

    /// Destroys a shader, evicting every pipeline built from it.
    pub fn destroy_shader(&mut self, id: ShaderId) -> Result<(), ContextError> {
        let shader = self
            .shaders
            .remove(id.0)
            .ok_or(ContextError::InvalidHandle { kind: "shader" })?;
        for pipeline in shader.attached_pipelines {
            self.pipelines.remove(
                &mut self.driver,
                &mut self.mirror,
                &mut self.shaders,
                pipeline,
                Some(id),
            );
            if self.current_pipeline == Some(pipeline) {
                self.current_pipeline = None;
                self.dirty |= DirtyFlags::PIPELINE;
            }
        }
        for slot in self.pending.shaders.iter_mut() {
            if *slot == Some(id) {
                *slot = None;
                self.dirty |= DirtyFlags::PIPELINE;
            }
        }
        Ok(())
    }

    /// Registers a view over a native texture. The context takes ownership
    /// of the name and deletes it when the last view over it is destroyed.
    pub fn create_view(&mut self, desc: ViewDesc) -> ViewId {
        let handle = self.device.names().create(desc.name);
        ViewId(self.views.insert(View {
            handle,
            kind: desc.kind,
            format: desc.format,
            caps: desc.caps,
            attached_framebuffers: Vec::new(),
        }))
    }

    /// Registers a storage view over a range of `buffer`, sharing its
    /// native name.
    pub fn create_buffer_view(
        &mut self,
        buffer: BufferId,
        offset: usize,
        size: usize,
        format: crate::formats::FormatId,
    ) -> Result<ViewId, ContextError> {
        let buffer = self
            .buffers
            .get(buffer.0)
            .ok_or(ContextError::InvalidHandle { kind: "buffer" })?;
        let handle = buffer.handle;
        self.device.names().retain(handle);
        Ok(ViewId(self.views.insert(View {
            handle,
            kind: ViewKind::Buffer { offset, size },
            format,
            caps: ViewCaps::STORAGE_BUFFER,
            attached_framebuffers: Vec::new(),
        })))
    }

    /// Destroys a view: evicts every framebuffer attached to it, clears any
    /// slot still referencing it, and deletes the native object when this
    /// was the last reference.
    pub fn destroy_view(&mut self, id: ViewId) -> Result<(), ContextError> {
        let view = self
            .views
            .remove(id.0)
            .ok_or(ContextError::InvalidHandle { kind: "view" })?;

        for framebuffer in view.attached_framebuffers.iter().copied() {
            self.framebuffers.remove(
                &mut self.driver,
                &mut self.mirror,
                &mut self.views,
                framebuffer,
                Some(id),
            );
            if self.current_framebuffer == Some(framebuffer) {
                self.current_framebuffer = None;
                self.dirty |= DirtyFlags::FRAMEBUFFER;
            }
        }

        for stage in &mut self.stages {
            for slot in stage.textures.iter_mut().filter(|s| **s == Some(id)) {
                *slot = None;
                self.dirty |= DirtyFlags::TEXTURE_UNITS;
            }
            for slot in stage.storage_buffers.iter_mut().filter(|s| **s == Some(id)) {
                *slot = None;
                self.dirty |= DirtyFlags::STORAGE_UNITS;
            }
            for slot in stage.images.iter_mut().filter(|s| **s == Some(id)) {
                *slot = None;
                self.dirty |= DirtyFlags::IMAGE_UNITS;
            }
        }
        let mut cleared_pending = false;
        for slot in self.pending.framebuffer.colors.iter_mut() {
            if *slot == Some(id) {
                *slot = None;
                cleared_pending = true;
            }
        }
        if self.pending.framebuffer.depth == Some(id) {
            self.pending.framebuffer.depth = None;
            cleared_pending = true;
        }
        if self.pending.framebuffer.stencil == Some(id) {
            self.pending.framebuffer.stencil = None;
            cleared_pending = true;
        }
        if cleared_pending {
            self.dirty |= DirtyFlags::FRAMEBUFFER;
        }

        if let Some(raw) = self.device.names().release(view.handle) {
            match view.kind {
                ViewKind::Texture { .. } => self.driver.delete_texture(raw),
                ViewKind::Buffer { .. } => self.driver.delete_buffer(raw),
            }
        }
        Ok(())
    }

    /// Allocates a buffer of `size` bytes.
    pub fn create_buffer(&mut self, size: usize) -> BufferId {
        let raw = self.driver.gen_buffer();
        self.driver.named_buffer_data(raw, size);
        let handle = self.device.names().create(raw);
        BufferId(self.buffers.insert(Buffer { handle, size }))
    }

    pub fn upload_buffer(
        &mut self,
        id: BufferId,
        offset: usize,
        data: &[u8],
    ) -> Result<(), ContextError> {
        let buffer = self
            .buffers
            .get(id.0)
            .ok_or(ContextError::InvalidHandle { kind: "buffer" })?;
        let raw = self.device.names().raw(buffer.handle);
        self.driver.named_buffer_sub_data(raw, offset, data);
        Ok(())
    }

    /// Destroys a buffer, clearing any binding still referencing it.
    pub fn destroy_buffer(&mut self, id: BufferId) -> Result<(), ContextError> {
        let buffer = self
            .buffers
            .remove(id.0)
            .ok_or(ContextError::InvalidHandle { kind: "buffer" })?;

        for (stage, spans) in self.stages.iter_mut().zip(self.streamed_spans.iter_mut()) {
            for (slot, binding) in stage.constant_buffers.iter_mut().enumerate() {
                if binding.map(|b| b.buffer) == Some(id) {
                    *binding = None;
                    spans[slot] = None;
                    self.dirty |= DirtyFlags::UNIFORM_UNITS;
                }
            }
        }
        for slot in self.pending.vertex_buffers.iter_mut() {
            if slot.map(|b| b.buffer) == Some(id) {
                *slot = None;
                self.dirty |= DirtyFlags::INPUT_ASSEMBLER;
            }
        }
        if self.pending.index_buffer.map(|b| b.buffer) == Some(id) {
            self.pending.index_buffer = None;
        }

        if let Some(raw) = self.device.names().release(buffer.handle) {
            self.driver.delete_buffer(raw);
        }
        Ok(())
    }

    /// Creates a native sampler object. Parameter setup is the embedding
    /// layer's concern.
    pub fn create_sampler(&mut self) -> RawName {
        self.driver.gen_sampler()
    }

    pub fn destroy_sampler(&mut self, name: RawName) {
        for stage in &mut self.stages {
            for slot in stage.samplers.iter_mut().filter(|s| **s == Some(name)) {
                *slot = None;
                self.dirty |= DirtyFlags::TEXTURE_UNITS;
            }
        }
        self.driver.delete_sampler(name);
    }

    // ---- Fixed-function state -----------------------------------------

    /// Applies an output-merger blend descriptor.
    ///
    /// Fails without touching any state when the descriptor needs
    /// per-target blending the device lacks.
    pub fn set_blend_state(&mut self, state: &BlendState) -> Result<(), ContextError> {
        let caps = self.device.caps();
        let active = (caps.max_color_attachments as usize).min(MAX_RENDER_TARGETS);
        let independent =
            state.independent && state.targets[1..active].iter().any(|t| *t != state.targets[0]);
        if independent && !caps.independent_blend {
            return Err(ContextError::Unsupported { feature: "independent blend" });
        }

        if refresh(&mut self.mirror.blend.alpha_to_coverage, state.alpha_to_coverage) {
            self.driver.set_capability(
                Capability::MultisampleAlphaToCoverage,
                state.alpha_to_coverage,
            );
        }

        if independent {
            for (i, target) in state.targets.iter().enumerate().take(active) {
                let index = i as u32;
                let mirror = &mut self.mirror.blend.targets[i];
                if refresh(&mut mirror.enable, target.enable) {
                    self.driver
                        .set_capability_indexed(Capability::Blend, index, target.enable);
                }
                if factors_changed(mirror, target) {
                    self.driver.blend_func(
                        Some(index),
                        target.src_color,
                        target.dst_color,
                        target.src_alpha,
                        target.dst_alpha,
                    );
                }
                if ops_changed(mirror, target) {
                    self.driver
                        .blend_equation(Some(index), target.color_op, target.alpha_op);
                }
                if refresh(&mut mirror.write_mask, target.write_mask) {
                    self.driver.color_mask(Some(index), target.write_mask);
                }
                *mirror = *target;
            }
        } else {
            // Shared path: a global call refreshes every target, so a field
            // is stale if any mirrored target disagrees with it.
            let target = state.targets[0];
            let mirrors = &self.mirror.blend.targets[..active];
            let enable_stale = mirrors.iter().any(|m| m.enable != target.enable);
            let factors_stale = mirrors.iter().any(|m| factors_changed(m, &target));
            let ops_stale = mirrors.iter().any(|m| ops_changed(m, &target));
            let mask_stale = mirrors.iter().any(|m| m.write_mask != target.write_mask);
            if enable_stale {
                self.driver.set_capability(Capability::Blend, target.enable);
            }
            if factors_stale {
                self.driver.blend_func(
                    None,
                    target.src_color,
                    target.dst_color,
                    target.src_alpha,
                    target.dst_alpha,
                );
            }
            if ops_stale {
                self.driver.blend_equation(None, target.color_op, target.alpha_op);
            }
            if mask_stale {
                self.driver.color_mask(None, target.write_mask);
            }
            self.mirror.blend.targets = [target; MAX_RENDER_TARGETS];
        }
        self.mirror.blend.independent = independent;
        Ok(())
    }

    pub fn set_depth_stencil_state(&mut self, state: &DepthStencilState) {
        let mirror = &mut self.mirror.depth_stencil;
        if refresh(&mut mirror.depth_enable, state.depth_enable) {
            self.driver.set_capability(Capability::DepthTest, state.depth_enable);
        }
        if refresh(&mut mirror.depth_write, state.depth_write) {
            self.driver.depth_mask(state.depth_write);
        }
        if refresh(&mut mirror.depth_func, state.depth_func) {
            self.driver.depth_func(state.depth_func);
        }
        if refresh(&mut mirror.stencil_enable, state.stencil_enable) {
            self.driver.set_capability(Capability::StencilTest, state.stencil_enable);
        }

        let shared_changed =
            mirror.stencil_ref != state.stencil_ref || mirror.stencil_read_mask != state.stencil_read_mask;
        for (face, mirror_face, face_state) in [
            (CullFace::Front, &mut mirror.front, &state.front),
            (CullFace::Back, &mut mirror.back, &state.back),
        ] {
            if shared_changed || mirror_face.func != face_state.func {
                self.driver.stencil_func(
                    face,
                    face_state.func,
                    state.stencil_ref,
                    state.stencil_read_mask,
                );
            }
            if mirror_face.stencil_fail != face_state.stencil_fail
                || mirror_face.depth_fail != face_state.depth_fail
                || mirror_face.pass != face_state.pass
            {
                self.driver.stencil_op(
                    face,
                    face_state.stencil_fail,
                    face_state.depth_fail,
                    face_state.pass,
                );
            }
            *mirror_face = *face_state;
        }
        mirror.stencil_ref = state.stencil_ref;
        mirror.stencil_read_mask = state.stencil_read_mask;
        if refresh(&mut mirror.stencil_write_mask, state.stencil_write_mask) {
            self.driver
                .stencil_write_mask(CullFace::FrontAndBack, state.stencil_write_mask);
        }
    }

    pub fn set_rasterizer_state(&mut self, state: &RasterizerState) {
        let caps = self.device.caps();
        let mirror = &mut self.mirror.rasterizer;
        if refresh(&mut mirror.fill, state.fill) {
            self.driver.polygon_mode(state.fill);
        }
        if refresh(&mut mirror.cull_enable, state.cull_enable) {
            self.driver.set_capability(Capability::CullFace, state.cull_enable);
        }
        if refresh(&mut mirror.cull, state.cull) {
            self.driver.cull_face(state.cull);
        }
        if refresh(&mut mirror.front, state.front) {
            self.driver.front_face(state.front);
        }

        let offset_enabled = state.depth_bias != 0.0 || state.slope_scaled_depth_bias != 0.0;
        let was_enabled = mirror.depth_bias != 0.0 || mirror.slope_scaled_depth_bias != 0.0;
        if mirror.depth_bias != state.depth_bias
            || mirror.slope_scaled_depth_bias != state.slope_scaled_depth_bias
        {
            mirror.depth_bias = state.depth_bias;
            mirror.slope_scaled_depth_bias = state.slope_scaled_depth_bias;
            if offset_enabled {
                self.driver
                    .polygon_offset(state.slope_scaled_depth_bias, state.depth_bias);
            }
        }
        if offset_enabled != was_enabled {
            self.driver.set_capability(Capability::PolygonOffsetFill, offset_enabled);
        }

        if refresh(&mut mirror.scissor_enable, state.scissor_enable) {
            self.driver.set_capability(Capability::ScissorTest, state.scissor_enable);
        }

        mirror.depth_clip = state.depth_clip;
        let clamp = !state.depth_clip;
        if caps.depth_clamp {
            if refresh(&mut self.mirror.depth_clamp, clamp) {
                self.driver.set_capability(Capability::DepthClamp, clamp);
            }
            if refresh(&mut self.pending.emulate_depth_clamp, false) {
                self.dirty |= DirtyFlags::PIPELINE;
            }
        } else if refresh(&mut self.pending.emulate_depth_clamp, clamp) {
            self.dirty |= DirtyFlags::PIPELINE;
        }
    }

    pub fn set_blend_color(&mut self, color: [f32; 4]) {
        if refresh(&mut self.mirror.blend_color, color) {
            self.driver.blend_color(color);
        }
    }

    /// Applies a multisample coverage mask. All-ones disables masking.
    pub fn set_sample_mask(&mut self, mask: u32) -> Result<(), ContextError> {
        let enabled = mask != !0;
        if enabled && !self.device.caps().sample_mask {
            return Err(ContextError::Unsupported { feature: "sample masking" });
        }
        if refresh(&mut self.mirror.sample_mask_enabled, enabled) {
            self.driver.set_capability(Capability::SampleMask, enabled);
        }
        if enabled && refresh(&mut self.mirror.sample_mask, mask) {
            self.driver.sample_mask(mask);
        }
        Ok(())
    }

    pub fn set_viewports(&mut self, viewports: &[Viewport]) {
        let max = self.mirror.viewports.len();
        if viewports.len() > max {
            warn!(requested = viewports.len(), max, "too many viewports; extra ignored");
        }
        for (i, viewport) in viewports.iter().take(max).enumerate() {
            let mirror = &mut self.mirror.viewports[i];
            if mirror.x != viewport.x
                || mirror.y != viewport.y
                || mirror.width != viewport.width
                || mirror.height != viewport.height
            {
                self.driver.viewport(
                    i as u32,
                    viewport.x,
                    viewport.y,
                    viewport.width,
                    viewport.height,
                );
            }
            if mirror.min_depth != viewport.min_depth || mirror.max_depth != viewport.max_depth {
                self.driver
                    .depth_range(i as u32, viewport.min_depth, viewport.max_depth);
            }
            *mirror = *viewport;
        }
    }

    pub fn set_scissor_rects(&mut self, rects: &[ScissorRect]) {
        let max = self.mirror.scissors.len();
        if rects.len() > max {
            warn!(requested = rects.len(), max, "too many scissor rects; extra ignored");
        }
        for (i, rect) in rects.iter().take(max).enumerate() {
            if refresh(&mut self.mirror.scissors[i], *rect) {
                self.driver
                    .scissor(i as u32, rect.x, rect.y, rect.width, rect.height);
            }
        }
    }

    // ---- Pending configuration ----------------------------------------

    pub fn set_shader(
        &mut self,
        stage: ShaderStage,
        shader: Option<ShaderId>,
    ) -> Result<(), ContextError> {
        if let Some(id) = shader {
            let entry = self
                .shaders
                .get(id.0)
                .ok_or(ContextError::InvalidHandle { kind: "shader" })?;
            if entry.stage != stage {
                return Err(ContextError::InvalidHandle { kind: "shader" });
            }
        }
        if refresh(&mut self.pending.shaders[stage.index()], shader) {
            self.dirty |= DirtyFlags::PIPELINE;
        }
        Ok(())
    }

    pub fn set_shader_texture(
        &mut self,
        stage: ShaderStage,
        slot: u32,
        view: Option<ViewId>,
    ) -> Result<(), ContextError> {
        if let Some(id) = view {
            self.require_view_caps(id, ViewCaps::TEXTURE, "binding a view as a texture")?;
        }
        match set_slot(&mut self.stages[stage.index()].textures, slot, view) {
            Some(true) => self.dirty |= DirtyFlags::TEXTURE_UNITS,
            Some(false) => {}
            None => warn!(?stage, slot, "texture slot out of range; ignored"),
        }
        Ok(())
    }

    pub fn set_sampler(&mut self, stage: ShaderStage, slot: u32, sampler: Option<RawName>) {
        match set_slot(&mut self.stages[stage.index()].samplers, slot, sampler) {
            Some(true) => self.dirty |= DirtyFlags::TEXTURE_UNITS,
            Some(false) => {}
            None => warn!(?stage, slot, "sampler slot out of range; ignored"),
        }
    }

    pub fn set_constant_buffer(
        &mut self,
        stage: ShaderStage,
        slot: u32,
        binding: Option<ConstantBufferBinding>,
    ) -> Result<(), ContextError> {
        if let Some(binding) = binding {
            if self.buffers.get(binding.buffer.0).is_none() {
                return Err(ContextError::InvalidHandle { kind: "buffer" });
            }
            let alignment = self.device.caps().uniform_offset_alignment as usize;
            if binding.offset % alignment != 0 {
                warn!(?stage, slot, offset = binding.offset, "unaligned constant buffer offset");
            }
        }
        let stage_slots = &mut self.stages[stage.index()];
        let mut changed = match set_slot(&mut stage_slots.constant_buffers, slot, binding) {
            Some(changed) => changed,
            None => {
                warn!(?stage, slot, "constant buffer slot out of range; ignored");
                return Ok(());
            }
        };
        // A buffer binding replaces any streamed data on the slot.
        if stage_slots.streamed[slot as usize].take().is_some() {
            self.streamed_spans[stage.index()][slot as usize] = None;
            changed = true;
        }
        if changed {
            self.dirty |= DirtyFlags::UNIFORM_UNITS;
        }
        Ok(())
    }

    /// Streams per-draw constant data into a slot, overriding any buffer
    /// binding there until one is set again.
    pub fn set_constant_data(&mut self, stage: ShaderStage, slot: u32, data: &[u8]) {
        let stage_index = stage.index();
        let Some(entry) = self.stages[stage_index].streamed.get_mut(slot as usize) else {
            warn!(?stage, slot, "constant buffer slot out of range; ignored");
            return;
        };
        if entry.as_deref() == Some(data) {
            return;
        }
        *entry = Some(data.to_vec());
        self.streamed_spans[stage_index][slot as usize] = None;
        self.dirty |= DirtyFlags::UNIFORM_UNITS;
    }

    pub fn set_storage_buffer(
        &mut self,
        stage: ShaderStage,
        slot: u32,
        view: Option<ViewId>,
    ) -> Result<(), ContextError> {
        if !self.device.caps().storage_blocks {
            return Err(ContextError::Unsupported { feature: "storage buffers" });
        }
        if let Some(id) = view {
            self.require_view_caps(id, ViewCaps::STORAGE_BUFFER, "binding a view as storage")?;
        }
        match set_slot(&mut self.stages[stage.index()].storage_buffers, slot, view) {
            Some(true) => self.dirty |= DirtyFlags::STORAGE_UNITS,
            Some(false) => {}
            None => warn!(?stage, slot, "storage buffer slot out of range; ignored"),
        }
        Ok(())
    }

    pub fn set_image(
        &mut self,
        stage: ShaderStage,
        slot: u32,
        view: Option<ViewId>,
    ) -> Result<(), ContextError> {
        if !self.device.caps().shader_images {
            return Err(ContextError::Unsupported { feature: "shader images" });
        }
        if let Some(id) = view {
            self.require_view_caps(id, ViewCaps::IMAGE, "binding a view as an image")?;
        }
        match set_slot(&mut self.stages[stage.index()].images, slot, view) {
            Some(true) => self.dirty |= DirtyFlags::IMAGE_UNITS,
            Some(false) => {}
            None => warn!(?stage, slot, "image slot out of range; ignored"),
        }
        Ok(())
    }

    pub fn set_vertex_buffer(
        &mut self,
        slot: u32,
        binding: Option<VertexBufferBinding>,
    ) -> Result<(), ContextError> {
        if let Some(binding) = binding {
            if self.buffers.get(binding.buffer.0).is_none() {
                return Err(ContextError::InvalidHandle { kind: "buffer" });
            }
        }
        let Some(entry) = self.pending.vertex_buffers.get_mut(slot as usize) else {
            warn!(slot, "vertex buffer slot out of range; ignored");
            return Ok(());
        };
        if refresh(entry, binding) {
            self.dirty |= DirtyFlags::INPUT_ASSEMBLER;
        }
        Ok(())
    }

    pub fn set_index_buffer(
        &mut self,
        binding: Option<IndexBufferBinding>,
    ) -> Result<(), ContextError> {
        if let Some(binding) = binding {
            if self.buffers.get(binding.buffer.0).is_none() {
                return Err(ContextError::InvalidHandle { kind: "buffer" });
            }
        }
        // The element-array binding is diffed at the indexed draw itself.
        self.pending.index_buffer = binding;
        Ok(())
    }

    pub fn set_input_layout(&mut self, layout: InputLayout) {
        if self.pending.input_layout != layout {
            self.pending.input_layout = layout;
            self.dirty |= DirtyFlags::INPUT_ASSEMBLER;
        }
    }

    pub fn set_topology(&mut self, topology: PrimitiveMode, patch_control_points: u32) {
        self.pending.topology = topology;
        self.pending.patch_control_points = patch_control_points.max(1);
    }

    pub fn set_render_targets(
        &mut self,
        colors: &[Option<ViewId>],
        depth: Option<ViewId>,
        stencil: Option<ViewId>,
    ) -> Result<(), ContextError> {
        if colors.len() > MAX_RENDER_TARGETS {
            warn!(requested = colors.len(), "too many render targets; extra ignored");
        }
        let mut config = FrameBufferConfig::default();
        for (slot, view) in colors.iter().take(MAX_RENDER_TARGETS).enumerate() {
            if let Some(id) = view {
                self.require_view_caps(*id, ViewCaps::ATTACHMENT, "attaching a view")?;
            }
            config.colors[slot] = *view;
        }
        for view in [depth, stencil].into_iter().flatten() {
            self.require_view_caps(view, ViewCaps::ATTACHMENT, "attaching a view")?;
        }
        config.depth = depth;
        config.stencil = stencil;

        if refresh(&mut self.pending.framebuffer, config) {
            self.dirty |= DirtyFlags::FRAMEBUFFER;
        }
        Ok(())
    }

    // ---- Clears -------------------------------------------------------

    /// Clears one color view through a single-attachment framebuffer.
    pub fn clear_render_target(
        &mut self,
        view: ViewId,
        color: [f32; 4],
    ) -> Result<(), ContextError> {
        let format = self
            .views
            .get(view.0)
            .ok_or(ContextError::InvalidHandle { kind: "view" })?
            .format();
        if !self.device.formats().describe(format).color_renderable {
            warn!("clearing a view with a non-color-renderable format");
        }

        let mut config = FrameBufferConfig::default();
        config.colors[0] = Some(view);
        self.bind_clear_framebuffer(&config)?;
        self.driver.clear_color_buffer(0, color);
        Ok(())
    }

    /// Clears depth and/or stencil of one view.
    pub fn clear_depth_stencil(
        &mut self,
        view: ViewId,
        depth: Option<f32>,
        stencil: Option<i32>,
    ) -> Result<(), ContextError> {
        if depth.is_none() && stencil.is_none() {
            return Ok(());
        }
        let format = self
            .views
            .get(view.0)
            .ok_or(ContextError::InvalidHandle { kind: "view" })?
            .format();
        let desc = self.device.formats().describe(format);

        let mut config = FrameBufferConfig::default();
        if desc.depth_renderable {
            config.depth = Some(view);
        }
        if desc.stencil_renderable {
            config.stencil = Some(view);
        }
        if config.depth.is_none() && config.stencil.is_none() {
            warn!("clearing a view with a non-depth-stencil format");
            config.depth = Some(view);
        }
        self.bind_clear_framebuffer(&config)?;

        // A masked depth plane would swallow the clear.
        if depth.is_some() && !self.mirror.depth_stencil.depth_write {
            self.driver.depth_mask(true);
            self.mirror.depth_stencil.depth_write = true;
        }
        self.driver.clear_depth_stencil(depth, stencil);
        Ok(())
    }

    fn bind_clear_framebuffer(&mut self, config: &FrameBufferConfig) -> Result<(), ContextError> {
        let id = self.framebuffers.allocate(
            &mut self.driver,
            &mut self.mirror,
            &mut self.views,
            self.device.names(),
            self.device.caps(),
            self.device.formats(),
            config,
        )?;
        // allocate() validated the entry exists.
        if let Some(object) = self.framebuffers.get(id) {
            let name = object.name;
            if refresh(&mut self.mirror.draw_framebuffer, name) {
                self.driver.bind_draw_framebuffer(name);
            }
        }
        // The draw framebuffer no longer matches the pending configuration.
        self.dirty |= DirtyFlags::FRAMEBUFFER;
        Ok(())
    }

    // ---- Draws and dispatches -----------------------------------------

    pub fn draw(&mut self, first: u32, count: u32) -> Result<(), ContextError> {
        self.draw_instanced(first, count, 1)
    }

    pub fn draw_instanced(
        &mut self,
        first: u32,
        count: u32,
        instances: u32,
    ) -> Result<(), ContextError> {
        self.flush_graphics()?;
        self.driver
            .draw_arrays(self.pending.topology, first, count, instances);
        Ok(())
    }

    pub fn draw_indexed(
        &mut self,
        first_index: u32,
        count: u32,
        base_vertex: i32,
    ) -> Result<(), ContextError> {
        self.draw_indexed_instanced(first_index, count, base_vertex, 1)
    }

    pub fn draw_indexed_instanced(
        &mut self,
        first_index: u32,
        count: u32,
        base_vertex: i32,
        instances: u32,
    ) -> Result<(), ContextError> {
        let binding = self
            .pending
            .index_buffer
            .ok_or(ContextError::InvalidHandle { kind: "index buffer" })?;
        let buffer = self
            .buffers
            .get(binding.buffer.0)
            .ok_or(ContextError::InvalidHandle { kind: "index buffer" })?;
        let raw = self.device.names().raw(buffer.handle);

        self.flush_graphics()?;
        if refresh(&mut self.mirror.element_array_buffer, raw) {
            self.driver.bind_buffer(BufferTarget::ElementArray, raw);
        }
        let offset = binding.offset + first_index as usize * binding.index_type.size();
        self.driver.draw_elements(
            self.pending.topology,
            count,
            binding.index_type,
            offset,
            base_vertex,
            instances,
        );
        Ok(())
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<(), ContextError> {
        self.flush_compute()?;
        self.driver.dispatch(x, y, z);
        Ok(())
    }

    pub fn dispatch_indirect(
        &mut self,
        buffer: BufferId,
        offset: usize,
    ) -> Result<(), ContextError> {
        let entry = self
            .buffers
            .get(buffer.0)
            .ok_or(ContextError::InvalidHandle { kind: "buffer" })?;
        let raw = self.device.names().raw(entry.handle);
        self.flush_compute()?;
        if refresh(&mut self.mirror.dispatch_indirect_buffer, raw) {
            self.driver.bind_buffer(BufferTarget::DispatchIndirect, raw);
        }
        self.driver.dispatch_indirect(offset);
        Ok(())
    }

    /// Marks the frame boundary: fences streaming memory and retires what
    /// the driver has finished with.
    pub fn switch_frame(&mut self) {
        self.streaming.switch_frame(&mut self.driver);
        let mut any = false;
        for spans in &mut self.streamed_spans {
            for span in spans.iter_mut() {
                any |= span.take().is_some();
            }
        }
        if any {
            // Streamed slots must re-upload into the new frame's region.
            self.dirty |= DirtyFlags::UNIFORM_UNITS;
        }
    }

    // ---- Flush --------------------------------------------------------

    fn flush_graphics(&mut self) -> Result<(), ContextError> {
        if self.mirror.pipeline_mode != PipelineMode::Graphics {
            self.mirror.pipeline_mode = PipelineMode::Graphics;
            self.dirty |=
                DirtyFlags::PIPELINE | DirtyFlags::FRAMEBUFFER | DirtyFlags::INPUT_ASSEMBLER;
        }

        if self.dirty.contains(DirtyFlags::INPUT_ASSEMBLER) {
            let mut resolved: [ResolvedVertexBuffer; MAX_VERTEX_SLOTS] = [None; MAX_VERTEX_SLOTS];
            for (slot, binding) in self.pending.vertex_buffers.iter().enumerate() {
                let Some(binding) = binding else { continue };
                match self.buffers.get(binding.buffer.0) {
                    Some(buffer) => {
                        let raw = self.device.names().raw(buffer.handle);
                        resolved[slot] = Some((raw, binding.stride, binding.offset));
                    }
                    None => warn!(slot, "vertex buffer slot references a dead buffer"),
                }
            }
            input_assembler::flush(
                &mut self.driver,
                &mut self.mirror,
                &self.pending.input_layout,
                &resolved,
            );
            self.dirty.remove(DirtyFlags::INPUT_ASSEMBLER);
        }

        if self.pending.topology == PrimitiveMode::Patches
            && refresh(&mut self.mirror.patch_vertices, self.pending.patch_control_points)
        {
            self.driver.patch_vertices(self.pending.patch_control_points);
        }

        self.flush_pipeline(PipelineMode::Graphics)?;
        self.flush_units();
        self.flush_framebuffer()?;
        Ok(())
    }

    fn flush_compute(&mut self) -> Result<(), ContextError> {
        if !self.device.caps().compute {
            return Err(ContextError::Unsupported { feature: "compute dispatch" });
        }
        if self.mirror.pipeline_mode != PipelineMode::Compute {
            self.mirror.pipeline_mode = PipelineMode::Compute;
            self.dirty |= DirtyFlags::PIPELINE;
        }
        self.flush_pipeline(PipelineMode::Compute)?;
        self.flush_units();
        Ok(())
    }

    fn flush_pipeline(&mut self, mode: PipelineMode) -> Result<(), ContextError> {
        if !self.dirty.contains(DirtyFlags::PIPELINE) {
            return Ok(());
        }

        let mut shaders = [None; STAGE_COUNT];
        match mode {
            PipelineMode::Graphics => {
                if self.pending.shaders[ShaderStage::Vertex.index()].is_none() {
                    return Err(ContextError::MissingShader { stage: ShaderStage::Vertex });
                }
                shaders[..ShaderStage::Compute.index()]
                    .copy_from_slice(&self.pending.shaders[..ShaderStage::Compute.index()]);
            }
            PipelineMode::Compute => {
                let compute = self.pending.shaders[ShaderStage::Compute.index()];
                if compute.is_none() {
                    return Err(ContextError::MissingShader { stage: ShaderStage::Compute });
                }
                shaders[ShaderStage::Compute.index()] = compute;
            }
        }
        let config = PipelineConfig {
            mode,
            shaders,
            emulate_depth_clamp: mode == PipelineMode::Graphics && self.pending.emulate_depth_clamp,
        };

        let id = self.pipelines.allocate(
            &mut self.driver,
            &mut self.shaders,
            self.device.partitions(),
            &mut self.unit_maps,
            self.device.caps(),
            &config,
        )?;
        // allocate() validated the entry exists.
        let Some(pipeline) = self.pipelines.get(id) else {
            return Err(ContextError::InvalidHandle { kind: "pipeline" });
        };

        let program = pipeline.program();
        for ty in ResourceType::ALL {
            let new = pipeline.unit_map(ty);
            let same = match (&self.active_unit_maps[ty.index()], new) {
                (None, None) => true,
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            };
            if !same {
                self.active_unit_maps[ty.index()] = new.cloned();
                self.dirty |= DirtyFlags::of_unit(ty);
            }
        }
        self.current_pipeline = Some(id);

        if refresh(&mut self.mirror.program, program) {
            self.driver.use_program(program);
        }
        if self.config.validate_pipelines {
            if let Err(log) = self.driver.validate_program(program) {
                warn!(%log, "pipeline failed native validation");
            }
        }
        self.dirty.remove(DirtyFlags::PIPELINE);
        Ok(())
    }

    fn flush_framebuffer(&mut self) -> Result<(), ContextError> {
        if !self.dirty.contains(DirtyFlags::FRAMEBUFFER) {
            return Ok(());
        }
        let id = self.framebuffers.allocate(
            &mut self.driver,
            &mut self.mirror,
            &mut self.views,
            self.device.names(),
            self.device.caps(),
            self.device.formats(),
            &self.pending.framebuffer,
        )?;
        let Some(object) = self.framebuffers.get(id) else {
            return Err(ContextError::InvalidHandle { kind: "framebuffer" });
        };
        let name = object.name;
        let srgb = object.srgb;
        if refresh(&mut self.mirror.draw_framebuffer, name) {
            self.driver.bind_draw_framebuffer(name);
        }
        if refresh(&mut self.mirror.framebuffer_srgb, srgb) {
            self.driver.set_capability(Capability::FramebufferSrgb, srgb);
        }
        self.current_framebuffer = Some(id);
        self.dirty.remove(DirtyFlags::FRAMEBUFFER);
        Ok(())
    }

    fn flush_units(&mut self) {
        if self.dirty.contains(DirtyFlags::TEXTURE_UNITS) {
            if let Some(map) = &self.active_unit_maps[ResourceType::Texture.index()] {
                for entry in map.entries() {
                    let stage = &self.stages[entry.stage as usize];
                    let view = stage
                        .textures
                        .get(entry.slot as usize)
                        .copied()
                        .flatten()
                        .and_then(|id| self.views.get(id.0));
                    let unit = entry.unit as usize;
                    let previous = self.mirror.texture_units[unit];
                    let (target, name) = match view {
                        Some(view) => match view.kind() {
                            ViewKind::Texture { target, .. } => {
                                (target, self.device.names().raw(view.handle))
                            }
                            ViewKind::Buffer { .. } => {
                                warn!(unit, "buffer view on a texture slot; unbinding");
                                (previous.target, 0)
                            }
                        },
                        None => (previous.target, 0),
                    };
                    let sampler = if entry.sampler_slot == SAMPLER_NONE {
                        0
                    } else {
                        stage
                            .samplers
                            .get(entry.sampler_slot as usize)
                            .copied()
                            .flatten()
                            .unwrap_or(0)
                    };

                    let desired = TextureUnitMirror { target, name, sampler };
                    if previous.target != target || previous.name != name {
                        if refresh(&mut self.mirror.active_texture, entry.unit as u32) {
                            self.driver.active_texture(entry.unit as u32);
                        }
                        self.driver.bind_texture(target, name);
                    }
                    if previous.sampler != sampler {
                        self.driver.bind_sampler(entry.unit as u32, sampler);
                    }
                    self.mirror.texture_units[unit] = desired;
                }
            }
            self.dirty.remove(DirtyFlags::TEXTURE_UNITS);
        }

        if self.dirty.contains(DirtyFlags::UNIFORM_UNITS) {
            let alignment = self.device.caps().uniform_offset_alignment as usize;
            if let Some(map) = &self.active_unit_maps[ResourceType::UniformBuffer.index()] {
                for entry in map.entries() {
                    let stage_index = entry.stage as usize;
                    let slot = entry.slot as usize;
                    let unit = entry.unit as usize;

                    let desired = if let Some(data) =
                        self.stages[stage_index].streamed.get(slot).and_then(|d| d.as_deref())
                    {
                        let span = match self.streamed_spans[stage_index][slot] {
                            Some(span) => span,
                            None => {
                                let span = match self.streaming.upload(&mut self.driver, data) {
                                    Some(span) => span,
                                    None => self.streaming.fallback_upload(&mut self.driver, data),
                                };
                                self.streamed_spans[stage_index][slot] = Some(span);
                                span
                            }
                        };
                        BufferRangeMirror {
                            name: span.buffer,
                            offset: span.offset,
                            size: span.size,
                        }
                    } else if let Some(binding) = self.stages[stage_index]
                        .constant_buffers
                        .get(slot)
                        .copied()
                        .flatten()
                    {
                        match self.buffers.get(binding.buffer.0) {
                            Some(buffer) => {
                                let available = buffer.size.saturating_sub(binding.offset);
                                let size =
                                    (binding.size.div_ceil(alignment) * alignment).min(available);
                                BufferRangeMirror {
                                    name: self.device.names().raw(buffer.handle),
                                    offset: binding.offset,
                                    size,
                                }
                            }
                            None => BufferRangeMirror::default(),
                        }
                    } else {
                        BufferRangeMirror::default()
                    };

                    if refresh(&mut self.mirror.uniform_units[unit], desired) {
                        self.driver.bind_buffer_range(
                            BufferTarget::Uniform,
                            entry.unit as u32,
                            desired.name,
                            desired.offset,
                            desired.size,
                        );
                    }
                }
            }
            self.dirty.remove(DirtyFlags::UNIFORM_UNITS);
        }

        if self.dirty.contains(DirtyFlags::STORAGE_UNITS) {
            if let Some(map) = &self.active_unit_maps[ResourceType::StorageBuffer.index()] {
                for entry in map.entries() {
                    let view = self.stages[entry.stage as usize]
                        .storage_buffers
                        .get(entry.slot as usize)
                        .copied()
                        .flatten()
                        .and_then(|id| self.views.get(id.0));
                    let desired = match view {
                        Some(view) => match view.kind() {
                            ViewKind::Buffer { offset, size } => BufferRangeMirror {
                                name: self.device.names().raw(view.handle),
                                offset,
                                size,
                            },
                            ViewKind::Texture { .. } => {
                                warn!(unit = entry.unit, "texture view on a storage slot; unbinding");
                                BufferRangeMirror::default()
                            }
                        },
                        None => BufferRangeMirror::default(),
                    };
                    let unit = entry.unit as usize;
                    if refresh(&mut self.mirror.storage_units[unit], desired) {
                        self.driver.bind_buffer_range(
                            BufferTarget::Storage,
                            entry.unit as u32,
                            desired.name,
                            desired.offset,
                            desired.size,
                        );
                    }
                }
            }
            self.dirty.remove(DirtyFlags::STORAGE_UNITS);
        }

        if self.dirty.contains(DirtyFlags::IMAGE_UNITS) {
            if let Some(map) = &self.active_unit_maps[ResourceType::Image.index()] {
                for entry in map.entries() {
                    let view = self.stages[entry.stage as usize]
                        .images
                        .get(entry.slot as usize)
                        .copied()
                        .flatten()
                        .and_then(|id| self.views.get(id.0));
                    let desired = match view {
                        Some(view) => match view.kind() {
                            ViewKind::Texture { level, layer, .. } => ImageUnitMirror {
                                name: self.device.names().raw(view.handle),
                                level,
                                layer,
                                format: self
                                    .device
                                    .formats()
                                    .describe(view.format())
                                    .native_image_format,
                            },
                            ViewKind::Buffer { .. } => {
                                warn!(unit = entry.unit, "buffer view on an image slot; unbinding");
                                ImageUnitMirror::default()
                            }
                        },
                        None => ImageUnitMirror::default(),
                    };
                    let unit = entry.unit as usize;
                    if refresh(&mut self.mirror.image_units[unit], desired) {
                        self.driver.bind_image(
                            entry.unit as u32,
                            desired.name,
                            desired.level,
                            desired.layer,
                            desired.format,
                        );
                    }
                }
            }
            self.dirty.remove(DirtyFlags::IMAGE_UNITS);
        }
    }

    fn require_view_caps(
        &self,
        id: ViewId,
        caps: ViewCaps,
        feature: &'static str,
    ) -> Result<(), ContextError> {
        let view = self
            .views
            .get(id.0)
            .ok_or(ContextError::InvalidHandle { kind: "view" })?;
        if !view.caps().contains(caps) {
            return Err(ContextError::Unsupported { feature });
        }
        Ok(())
    }
}

impl<D: GlDriver> Drop for Context<D> {
    fn drop(&mut self) {
        self.streaming.destroy(&mut self.driver);
    }
}

fn factors_changed(mirror: &TargetBlend, target: &TargetBlend) -> bool {
    mirror.src_color != target.src_color
        || mirror.dst_color != target.dst_color
        || mirror.src_alpha != target.src_alpha
        || mirror.dst_alpha != target.dst_alpha
}

fn ops_changed(mirror: &TargetBlend, target: &TargetBlend) -> bool {
    mirror.color_op != target.color_op || mirror.alpha_op != target.alpha_op
}
