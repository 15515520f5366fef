//! The content-addressed pipeline cache.
//!
//! A pipeline configuration is the full value identity of a linked native
//! program: one shader per stage, the render mode, and the depth-clamp
//! emulation flag. Compilation concatenates, per stage, a version header,
//! an import header resolving cross-stage linkage symbols, and the
//! pre-translated source body; any stage failing aborts the whole build
//! with no partial cache insertion. Unit binding happens here, at link
//! time, because unit assignment cannot change once the program exists.

use std::collections::HashMap;
use std::sync::Arc;

use lattice_gl::{DeviceCaps, GlDriver, RawName, ShaderStage, STAGE_COUNT};
use lattice_psb::{ImportSymbol, SourceChunk, SymbolType};
use tracing::{debug, error, warn};

use crate::cache::CacheStats;
use crate::error::ContextError;
use crate::partition::DevicePartitions;
use crate::shader::{Shader, ShaderId};
use crate::state::StateMirror;
use crate::table::Table;
use crate::units::{
    build_unit_maps, ResourceType, StageDeclarations, UnitMap, UnitMapCache, RESOURCE_TYPE_COUNT,
};

/// Whether a pipeline drives draws or dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineMode {
    Graphics,
    Compute,
}

/// Handle to a cached pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineId(pub(crate) u32);

/// Value identity of a compiled pipeline. The cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineConfig {
    pub mode: PipelineMode,
    /// One shader per stage, indexed by [`ShaderStage::index`].
    pub shaders: [Option<ShaderId>; STAGE_COUNT],
    /// Resolves the depth-clamp import in every contributing shader.
    pub emulate_depth_clamp: bool,
}

/// A linked native program plus the unit maps it was built with.
#[derive(Debug)]
pub struct CompiledPipeline {
    pub(crate) program: RawName,
    pub(crate) unit_maps: [Option<Arc<UnitMap>>; RESOURCE_TYPE_COUNT],
    config: PipelineConfig,
}

impl CompiledPipeline {
    pub fn program(&self) -> RawName {
        self.program
    }

    pub fn unit_map(&self, ty: ResourceType) -> Option<&Arc<UnitMap>> {
        self.unit_maps[ty.index()].as_ref()
    }
}

#[derive(Debug, Default)]
pub struct PipelineCache {
    by_config: HashMap<PipelineConfig, PipelineId>,
    objects: Table<CompiledPipeline>,
    pub stats: CacheStats,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: PipelineId) -> Option<&CompiledPipeline> {
        self.objects.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.len() == 0
    }

    /// Looks up `config`, compiling and linking on miss.
    pub(crate) fn allocate<D: GlDriver>(
        &mut self,
        driver: &mut D,
        shaders: &mut Table<Shader>,
        partitions: &DevicePartitions,
        unit_maps: &mut UnitMapCache,
        caps: &DeviceCaps,
        config: &PipelineConfig,
    ) -> Result<PipelineId, ContextError> {
        if let Some(id) = self.by_config.get(config) {
            self.stats.hit();
            return Ok(*id);
        }
        self.stats.miss();

        let mut active: Vec<(ShaderStage, ShaderId)> = Vec::new();
        for (slot, shader_id) in config.shaders.iter().enumerate() {
            let Some(shader_id) = shader_id else { continue };
            let shader = shaders
                .get(shader_id.0)
                .ok_or(ContextError::InvalidHandle { kind: "shader" })?;
            if shader.stage.index() != slot {
                return Err(ContextError::InvalidHandle { kind: "shader" });
            }
            active.push((shader.stage, *shader_id));
        }

        let version_header = format!("#version {} core\n", caps.glsl_version);
        let mut compiled: Vec<RawName> = Vec::with_capacity(active.len());
        let mut compile_error: Option<ContextError> = None;

        for (i, (stage, shader_id)) in active.iter().enumerate() {
            // Validated above; a vanished entry would be a table bug.
            let Some(shader) = shaders.get(shader_id.0) else { continue };
            let source = &shader.reflection.source;
            let next_exports = active
                .get(i + 1)
                .and_then(|(_, next)| shaders.get(next.0))
                .map(|s| s.reflection.source.exports.as_slice());
            let import_header =
                build_import_header(source, next_exports, config.emulate_depth_clamp);

            let split = source.symbols_offset as usize;
            let body = source.source.as_str();
            let sources = [
                version_header.as_str(),
                &body[..split],
                import_header.as_str(),
                &body[split..],
            ];
            match driver.compile_source(*stage, &sources) {
                Ok(name) => compiled.push(name),
                Err(log) => {
                    error!(?stage, %log, "shader compilation failed");
                    compile_error = Some(ContextError::ShaderCompile { stage: *stage, log });
                    break;
                }
            }
        }

        if let Some(err) = compile_error {
            for name in compiled {
                driver.delete_shader(name);
            }
            return Err(err);
        }

        let program = driver.create_program();
        for name in &compiled {
            driver.attach_shader(program, *name);
        }
        let linked = driver.link_program(program);
        for name in compiled {
            driver.delete_shader(name);
        }
        if let Err(log) = linked {
            error!(%log, "pipeline link failed");
            driver.delete_program(program);
            return Err(ContextError::PipelineLink { log });
        }

        let declarations: Vec<StageDeclarations<'_>> = active
            .iter()
            .filter_map(|(stage, shader_id)| {
                shaders.get(shader_id.0).map(|shader| StageDeclarations {
                    stage: *stage,
                    reflection: &shader.reflection,
                })
            })
            .collect();
        let maps = match build_unit_maps(&declarations, config.mode, partitions, caps, unit_maps) {
            Ok(maps) => maps,
            Err(err) => {
                driver.delete_program(program);
                return Err(err);
            }
        };
        bind_units(driver, program, &declarations, &maps, caps);
        drop(declarations);

        let id = PipelineId(self.objects.insert(CompiledPipeline {
            program,
            unit_maps: maps,
            config: *config,
        }));
        self.by_config.insert(*config, id);

        let mut seen: Vec<ShaderId> = Vec::new();
        for (_, shader_id) in &active {
            if seen.contains(shader_id) {
                continue;
            }
            seen.push(*shader_id);
            if let Some(shader) = shaders.get_mut(shader_id.0) {
                shader.attached_pipelines.push(id);
            }
        }

        debug!(program, entries = self.objects.len(), "built pipeline");
        Ok(id)
    }

    /// Evicts `id`, detaching it from every contributing shader's
    /// back-reference list except `invalidating_shader`.
    pub(crate) fn remove<D: GlDriver>(
        &mut self,
        driver: &mut D,
        mirror: &mut StateMirror,
        shaders: &mut Table<Shader>,
        id: PipelineId,
        invalidating_shader: Option<ShaderId>,
    ) {
        let Some(object) = self.objects.remove(id.0) else {
            debug_assert!(false, "removing a pipeline not present in the cache");
            error!("removing a pipeline not present in the cache");
            return;
        };
        self.by_config.remove(&object.config);

        let mut seen: Vec<ShaderId> = Vec::new();
        for shader_id in object.config.shaders.iter().flatten() {
            if Some(*shader_id) == invalidating_shader || seen.contains(shader_id) {
                continue;
            }
            seen.push(*shader_id);
            let Some(shader) = shaders.get_mut(shader_id.0) else { continue };
            let before = shader.attached_pipelines.len();
            shader.attached_pipelines.retain(|p| *p != id);
            if shader.attached_pipelines.len() == before {
                debug_assert!(false, "shader was not attached to the pipeline being removed");
                error!("shader was not attached to the pipeline being removed");
            }
        }

        if mirror.program == object.program {
            mirror.program = 0;
            driver.use_program(0);
        }
        driver.delete_program(object.program);
    }
}

/// Emits `#define IMPORT_<i> <value>` lines for the import span whose
/// resolved values differ from their defaults.
///
/// Resolution scans the next linked stage's export table for a matching
/// {type, id} pair; the depth-clamp symbol resolves from the pipeline flag
/// instead; anything unmatched keeps its default.
fn build_import_header(
    source: &SourceChunk,
    next_exports: Option<&[ImportSymbol]>,
    emulate_depth_clamp: bool,
) -> String {
    let resolve = |import: &ImportSymbol| -> u32 {
        match import.ty {
            SymbolType::EmulateDepthClamp => emulate_depth_clamp as u32,
            _ => next_exports
                .and_then(|exports| {
                    exports
                        .iter()
                        .find(|e| e.ty == import.ty && e.id == import.id)
                })
                .map_or(import.value, |e| e.value),
        }
    };

    let resolved: Vec<u32> = source.imports.iter().map(resolve).collect();
    let changed = |i: &usize| resolved[*i] != source.imports[*i].value;
    let Some(first) = (0..resolved.len()).find(changed) else {
        return String::new();
    };
    let last = (0..resolved.len()).rfind(changed).unwrap_or(first);

    let mut header = String::new();
    for (i, value) in resolved.iter().enumerate().take(last + 1).skip(first) {
        header.push_str(&format!("#define IMPORT_{i} {value}\n"));
    }
    header
}

/// Binds every declared resource to its mapped hardware unit by embedded
/// symbol name. A name the native compiler optimized away is a warning,
/// never a failure.
fn bind_units<D: GlDriver>(
    driver: &mut D,
    program: RawName,
    stages: &[StageDeclarations<'_>],
    maps: &[Option<Arc<UnitMap>>; RESOURCE_TYPE_COUNT],
    caps: &DeviceCaps,
) {
    let bind_sampler_uniform = |driver: &mut D, name: &str, unit: u16| {
        if name.is_empty() {
            return;
        }
        match driver.uniform_location(program, name) {
            Some(location) => driver.set_uniform_unit(program, location, unit as u32),
            None => warn!(name, "sampler uniform optimized away; skipping binding"),
        }
    };

    for active in stages {
        let stage = active.stage;
        let source = &active.reflection.source;

        if let Some(map) = &maps[ResourceType::Texture.index()] {
            for sampler in &source.samplers {
                let Some(unit) = map.unit_for(stage, sampler.texture_index as u16) else {
                    continue;
                };
                bind_sampler_uniform(driver, &sampler.normal_name, unit);
                bind_sampler_uniform(driver, &sampler.compare_name, unit);
            }
        }

        if let Some(map) = &maps[ResourceType::UniformBuffer.index()] {
            for entry in &source.uniform_buffers {
                let Some(unit) = map.unit_for(stage, entry.index as u16) else { continue };
                match driver.uniform_block_index(program, &entry.name) {
                    Some(index) => driver.uniform_block_binding(program, index, unit as u32),
                    None => warn!(name = %entry.name, "uniform block optimized away; skipping"),
                }
            }
        }

        if caps.storage_blocks {
            if let Some(map) = &maps[ResourceType::StorageBuffer.index()] {
                for entry in &source.storage_buffers {
                    let Some(unit) = map.unit_for(stage, entry.index as u16) else { continue };
                    match driver.storage_block_index(program, &entry.name) {
                        Some(index) => driver.storage_block_binding(program, index, unit as u32),
                        None => {
                            warn!(name = %entry.name, "storage block optimized away; skipping")
                        }
                    }
                }
            }
        }

        if caps.shader_images {
            if let Some(map) = &maps[ResourceType::Image.index()] {
                for entry in &source.images {
                    let Some(unit) = map.unit_for(stage, entry.index as u16) else { continue };
                    match driver.uniform_location(program, &entry.name) {
                        Some(location) => driver.set_uniform_unit(program, location, unit as u32),
                        None => {
                            warn!(name = %entry.name, "image uniform optimized away; skipping")
                        }
                    }
                }
            }
        }
    }
}
