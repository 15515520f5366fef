//! The translated-source chunk (`GLSL`).
//!
//! The cross-compiler stores the translated native-language source body in
//! this chunk together with packed reflection tables:
//!
//! - sampler declarations (3 words each: packed field + two embedded-name
//!   offsets, one for the regular sampler and one for the comparison
//!   sampler),
//! - resource declarations for uniform buffers, storage buffers and images
//!   (2 words each: packed field + embedded-name offset),
//! - import symbols (3 words: type, id, default value) marking late
//!   pipeline-specialization points,
//! - export symbols (3 words: type, id, value) advertised to earlier linked
//!   stages.
//!
//! Embedded-name offsets are byte offsets into the source body; a name is
//! the maximal identifier run (`[A-Za-z0-9_]`) starting at that offset.

use crate::container::read_u32_le;
use crate::error::PsbError;
use crate::fourcc::FourCC;

/// Tag of the translated-source chunk.
pub const CHUNK_GLSL: FourCC = FourCC(*b"GLSL");
/// Tag of the input-signature chunk.
pub const CHUNK_ISGN: FourCC = FourCC(*b"ISGN");
/// Tag of the output-signature chunk.
pub const CHUNK_OSGN: FourCC = FourCC(*b"OSGN");

const SOURCE_HEADER_WORDS: usize = 16;
pub(crate) const SAMPLER_ENTRY_WORDS: usize = 3;
pub(crate) const RESOURCE_ENTRY_WORDS: usize = 2;
pub(crate) const SYMBOL_ENTRY_WORDS: usize = 3;

/// Kinds of late-specialization symbols a translated shader can import or
/// export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolType {
    /// Tessellation partitioning mode, exported by the tess-control stage.
    TessPartitioning,
    /// Tessellation output primitive, exported by the tess-control stage.
    TessOutputPrimitive,
    /// Per-input interpolation qualifier, exported by the fragment stage.
    InputInterpolation,
    /// Whether the pipeline emulates depth clamping in the shader.
    EmulateDepthClamp,
}

impl SymbolType {
    /// Decodes a symbol type from its on-disk representation.
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(Self::TessPartitioning),
            2 => Some(Self::TessOutputPrimitive),
            3 => Some(Self::InputInterpolation),
            4 => Some(Self::EmulateDepthClamp),
            _ => None,
        }
    }

    /// The on-disk representation of this symbol type.
    pub fn to_u32(self) -> u32 {
        match self {
            Self::TessPartitioning => 1,
            Self::TessOutputPrimitive => 2,
            Self::InputInterpolation => 3,
            Self::EmulateDepthClamp => 4,
        }
    }
}

/// A sampler declaration recovered from the translated source tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerEntry {
    /// Texture register index declared by the portable bytecode.
    pub texture_index: u32,
    /// Sampler register index declared by the portable bytecode.
    pub sampler_index: u32,
    /// Hardware-unit index the translator declared for this sampler.
    pub unit_index: u32,
    /// Whether the shader samples this texture through a regular sampler.
    pub normal_sample: bool,
    /// Whether the shader samples this texture through a comparison sampler.
    pub compare_sample: bool,
    /// Symbol name of the regular sampler uniform (also used for loads).
    pub normal_name: String,
    /// Symbol name of the comparison sampler uniform, when present.
    pub compare_name: String,
}

/// A buffer or image declaration recovered from the translated source
/// tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEntry {
    /// Register index declared by the portable bytecode.
    pub index: u32,
    /// Symbol name of the declaration in the translated source.
    pub name: String,
}

/// An import or export symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSymbol {
    /// What the symbol specializes.
    pub ty: SymbolType,
    /// Disambiguates multiple symbols of the same type (e.g. input index).
    pub id: u32,
    /// Default (imports) or advertised (exports) value.
    pub value: u32,
}

/// Parsed contents of a `GLSL` chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceChunk {
    /// Hash of the portable bytecode this source was translated from.
    pub input_hash: u32,
    /// Translated source body.
    pub source: String,
    /// Byte offset into [`SourceChunk::source`] where the import
    /// substitution region begins (the import header is spliced in there).
    pub symbols_offset: u32,
    /// Sampler declarations.
    pub samplers: Vec<SamplerEntry>,
    /// Uniform-buffer declarations.
    pub uniform_buffers: Vec<ResourceEntry>,
    /// Storage-buffer declarations.
    pub storage_buffers: Vec<ResourceEntry>,
    /// Image declarations.
    pub images: Vec<ResourceEntry>,
    /// Import symbols, in declaration order.
    pub imports: Vec<ImportSymbol>,
    /// Export symbols, in declaration order.
    pub exports: Vec<ImportSymbol>,
}

/// Packs a sampler field word.
pub fn encode_sampler_field(
    texture_index: u32,
    sampler_index: u32,
    unit_index: u32,
    normal_sample: bool,
    compare_sample: bool,
) -> u32 {
    (texture_index & 0xFF)
        | ((sampler_index & 0xFF) << 8)
        | ((unit_index & 0xFF) << 16)
        | ((normal_sample as u32) << 24)
        | ((compare_sample as u32) << 25)
}

/// Packs a resource field word.
pub fn encode_resource_field(index: u32) -> u32 {
    index & 0xFFFF
}

fn decode_texture_index(field: u32) -> u32 {
    field & 0xFF
}

fn decode_sampler_index(field: u32) -> u32 {
    (field >> 8) & 0xFF
}

fn decode_unit_index(field: u32) -> u32 {
    (field >> 16) & 0xFF
}

fn decode_resource_index(field: u32) -> u32 {
    field & 0xFFFF
}

/// Reads the maximal identifier run starting at `offset` in `source`.
fn embedded_name(source: &str, offset: u32, what: &str) -> Result<String, PsbError> {
    let bytes = source.as_bytes();
    let start = offset as usize;
    if start >= bytes.len() {
        return Err(PsbError::invalid_chunk(format!(
            "{what} name offset {offset} is outside the source body ({} bytes)",
            bytes.len()
        )));
    }
    let mut end = start;
    while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
        end += 1;
    }
    if end == start {
        return Err(PsbError::invalid_chunk(format!(
            "{what} name offset {offset} does not point at an identifier"
        )));
    }
    Ok(source[start..end].to_owned())
}

fn read_table<'a>(
    data: &'a [u8],
    offset: u32,
    count: u32,
    entry_words: usize,
    what: &str,
) -> Result<&'a [u8], PsbError> {
    let len = (count as usize)
        .checked_mul(entry_words * 4)
        .ok_or_else(|| PsbError::invalid_chunk(format!("{what} table size overflows")))?;
    let end = (offset as usize)
        .checked_add(len)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| {
            PsbError::out_of_bounds(format!(
                "{what} table at {offset} (+{len}) exceeds chunk of {} bytes",
                data.len()
            ))
        })?;
    Ok(&data[offset as usize..end])
}

fn read_symbols(
    data: &[u8],
    offset: u32,
    count: u32,
    what: &str,
) -> Result<Vec<ImportSymbol>, PsbError> {
    let table = read_table(data, offset, count, SYMBOL_ENTRY_WORDS, what)?;
    let mut out = Vec::with_capacity(count as usize);
    for entry in table.chunks_exact(SYMBOL_ENTRY_WORDS * 4) {
        let raw_ty = read_u32_le(entry, 0, "symbol type")?;
        let ty = SymbolType::from_u32(raw_ty).ok_or_else(|| {
            PsbError::invalid_chunk(format!("{what} entry has unknown symbol type {raw_ty}"))
        })?;
        out.push(ImportSymbol {
            ty,
            id: read_u32_le(entry, 4, "symbol id")?,
            value: read_u32_le(entry, 8, "symbol value")?,
        });
    }
    Ok(out)
}

impl SourceChunk {
    /// Parses a `GLSL` chunk payload.
    pub fn parse(data: &[u8]) -> Result<SourceChunk, PsbError> {
        if data.len() < SOURCE_HEADER_WORDS * 4 {
            return Err(PsbError::invalid_chunk(format!(
                "source chunk is truncated: need {} header bytes, got {}",
                SOURCE_HEADER_WORDS * 4,
                data.len()
            )));
        }

        let word = |i: usize| read_u32_le(data, i * 4, "source header word");

        let input_hash = word(0)?;
        let source_offset = word(1)?;
        let source_len = word(2)?;
        let symbols_offset = word(3)?;

        let source_end = (source_offset as usize)
            .checked_add(source_len as usize)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| {
                PsbError::out_of_bounds(format!(
                    "source body at {source_offset} (+{source_len}) exceeds chunk of {} bytes",
                    data.len()
                ))
            })?;
        let source = core::str::from_utf8(&data[source_offset as usize..source_end])
            .map_err(|_| PsbError::invalid_chunk("source body is not valid UTF-8"))?
            .to_owned();
        if symbols_offset as usize > source.len() {
            return Err(PsbError::invalid_chunk(format!(
                "symbols_offset {symbols_offset} is outside the source body ({} bytes)",
                source.len()
            )));
        }
        // The runtime splits the body at this offset to splice the import
        // header in; an offset inside a multi-byte character must never
        // reach it.
        if !source.is_char_boundary(symbols_offset as usize) {
            return Err(PsbError::invalid_chunk(format!(
                "symbols_offset {symbols_offset} lands inside a multi-byte character"
            )));
        }

        let samplers_table = read_table(data, word(4)?, word(5)?, SAMPLER_ENTRY_WORDS, "sampler")?;
        let mut samplers = Vec::new();
        for entry in samplers_table.chunks_exact(SAMPLER_ENTRY_WORDS * 4) {
            let field = read_u32_le(entry, 0, "sampler field")?;
            let normal_name_offset = read_u32_le(entry, 4, "sampler name")?;
            let compare_name_offset = read_u32_le(entry, 8, "comparison sampler name")?;

            let normal_sample = field & (1 << 24) != 0;
            let compare_sample = field & (1 << 25) != 0;
            // Texture loads also go through the regular name field.
            let normal_name = if normal_sample || !compare_sample {
                embedded_name(&source, normal_name_offset, "sampler")?
            } else {
                String::new()
            };
            let compare_name = if compare_sample {
                embedded_name(&source, compare_name_offset, "comparison sampler")?
            } else {
                String::new()
            };

            samplers.push(SamplerEntry {
                texture_index: decode_texture_index(field),
                sampler_index: decode_sampler_index(field),
                unit_index: decode_unit_index(field),
                normal_sample,
                compare_sample,
                normal_name,
                compare_name,
            });
        }

        let resources = |offset_word: usize, what: &str| -> Result<Vec<ResourceEntry>, PsbError> {
            let table = read_table(
                data,
                word(offset_word)?,
                word(offset_word + 1)?,
                RESOURCE_ENTRY_WORDS,
                what,
            )?;
            let mut out = Vec::new();
            for entry in table.chunks_exact(RESOURCE_ENTRY_WORDS * 4) {
                let field = read_u32_le(entry, 0, "resource field")?;
                let name_offset = read_u32_le(entry, 4, "resource name")?;
                out.push(ResourceEntry {
                    index: decode_resource_index(field),
                    name: embedded_name(&source, name_offset, what)?,
                });
            }
            Ok(out)
        };

        let uniform_buffers = resources(6, "uniform buffer")?;
        let storage_buffers = resources(8, "storage buffer")?;
        let images = resources(10, "image")?;

        let imports = read_symbols(data, word(12)?, word(13)?, "import")?;
        let exports = read_symbols(data, word(14)?, word(15)?, "export")?;

        Ok(SourceChunk {
            input_hash,
            source,
            symbols_offset,
            samplers,
            uniform_buffers,
            storage_buffers,
            images,
            imports,
            exports,
        })
    }
}
