//! Shader objects.
//!
//! A shader is created from a portable blob once; reflection parsing and
//! source translation happened offline, so creation only validates and
//! stores. Native compilation is deferred to pipeline build, where the
//! version and import headers become known.

use lattice_gl::ShaderStage;
use lattice_psb::ShaderReflection;

use crate::pipeline::PipelineId;

/// Handle to a shader owned by a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderId(pub(crate) u32);

/// A live shader: its reflection plus the pipelines built from it.
#[derive(Debug)]
pub struct Shader {
    pub(crate) stage: ShaderStage,
    pub(crate) reflection: ShaderReflection,
    /// Pipelines this shader contributed to. Maintained by the pipeline
    /// cache; destroying the shader evicts every entry listed here.
    pub(crate) attached_pipelines: Vec<PipelineId>,
}

impl Shader {
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }
}
