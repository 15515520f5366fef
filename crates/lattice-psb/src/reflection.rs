use crate::container::{PsbFile, ShaderModel};
use crate::error::PsbError;
use crate::signature::{parse_signature_chunk, SignatureChunk};
use crate::source::{SourceChunk, CHUNK_GLSL, CHUNK_ISGN, CHUNK_OSGN};

/// Everything the runtime binding layer needs from one shader blob.
///
/// Aggregates the mandatory translated-source chunk with the optional
/// input/output signatures into an owned structure, so the borrowed
/// [`PsbFile`] does not need to outlive parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderReflection {
    /// Shader model declared by the container header.
    pub shader_model: ShaderModel,
    /// Translated source body and its resource/symbol tables.
    pub source: SourceChunk,
    /// Input signature, empty when the blob carries no `ISGN` chunk.
    pub input_signature: SignatureChunk,
    /// Output signature, empty when the blob carries no `OSGN` chunk.
    pub output_signature: SignatureChunk,
}

impl ShaderReflection {
    /// Parses a whole `PSB` blob into reflection data.
    ///
    /// The `GLSL` chunk is mandatory; signature chunks default to empty
    /// when absent (compute shaders carry neither).
    pub fn parse(bytes: &[u8]) -> Result<ShaderReflection, PsbError> {
        let file = PsbFile::parse(bytes)?;

        let source = SourceChunk::parse(file.require_chunk(CHUNK_GLSL)?.data)?;

        let input_signature = match file.find_chunk(CHUNK_ISGN) {
            Some(chunk) => parse_signature_chunk(chunk.data)?,
            None => SignatureChunk::default(),
        };
        let output_signature = match file.find_chunk(CHUNK_OSGN) {
            Some(chunk) => parse_signature_chunk(chunk.data)?,
            None => SignatureChunk::default(),
        };

        Ok(ShaderReflection {
            shader_model: file.header().shader_model,
            source,
            input_signature,
            output_signature,
        })
    }
}
