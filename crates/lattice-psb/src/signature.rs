//! Input/output signature chunks (`ISGN`, `OSGN`).
//!
//! A signature chunk declares the shader's interface parameters. The layout
//! is a small header (`param_count`, `param_offset`) followed by 24-byte
//! entries; semantic names are NUL-terminated strings referenced by byte
//! offset from the start of the chunk payload.

use crate::container::read_u32_le;
use crate::error::PsbError;

pub(crate) const SIGNATURE_ENTRY_LEN: usize = 24;
pub(crate) const SIGNATURE_HEADER_LEN: usize = 8;

/// One parameter of a shader input or output signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureEntry {
    /// Semantic name (e.g. `POSITION`, `TEXCOORD`).
    pub semantic_name: String,
    /// Semantic index, distinguishing e.g. `TEXCOORD0` from `TEXCOORD1`.
    pub semantic_index: u32,
    /// System-value designation, zero for plain parameters.
    pub system_value: u32,
    /// Component scalar type as declared by the translator.
    pub component_type: u32,
    /// Register this parameter occupies.
    pub register: u32,
    /// Components declared by the parameter.
    pub mask: u8,
    /// Components actually read (outputs) or written (inputs) by the
    /// consuming stage.
    pub used_mask: u8,
}

/// A parsed signature chunk.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignatureChunk {
    /// Parameters in declaration order.
    pub entries: Vec<SignatureEntry>,
}

impl SignatureChunk {
    /// Finds a parameter by semantic name (case-insensitive) and index.
    pub fn find(&self, semantic_name: &str, semantic_index: u32) -> Option<&SignatureEntry> {
        self.entries.iter().find(|e| {
            e.semantic_index == semantic_index && e.semantic_name.eq_ignore_ascii_case(semantic_name)
        })
    }
}

fn read_cstr(data: &[u8], offset: usize) -> Result<String, PsbError> {
    if offset >= data.len() {
        return Err(PsbError::out_of_bounds(format!(
            "semantic name offset {offset} exceeds chunk of {} bytes",
            data.len()
        )));
    }
    let tail = &data[offset..];
    let len = tail
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| PsbError::invalid_chunk("semantic name is not NUL-terminated"))?;
    core::str::from_utf8(&tail[..len])
        .map(str::to_owned)
        .map_err(|_| PsbError::invalid_chunk("semantic name is not valid UTF-8"))
}

/// Parses an `ISGN` or `OSGN` chunk payload.
pub fn parse_signature_chunk(data: &[u8]) -> Result<SignatureChunk, PsbError> {
    if data.len() < SIGNATURE_HEADER_LEN {
        return Err(PsbError::invalid_chunk(format!(
            "signature chunk is truncated: need {SIGNATURE_HEADER_LEN} header bytes, got {}",
            data.len()
        )));
    }

    let param_count = read_u32_le(data, 0, "param_count")? as usize;
    let param_offset = read_u32_le(data, 4, "param_offset")? as usize;

    let table_end = param_count
        .checked_mul(SIGNATURE_ENTRY_LEN)
        .and_then(|len| param_offset.checked_add(len))
        .filter(|end| *end <= data.len())
        .ok_or_else(|| {
            PsbError::out_of_bounds(format!(
                "{param_count} signature entries at {param_offset} exceed chunk of {} bytes",
                data.len()
            ))
        })?;

    let mut entries = Vec::with_capacity(param_count);
    for entry in data[param_offset..table_end].chunks_exact(SIGNATURE_ENTRY_LEN) {
        let name_offset = read_u32_le(entry, 0, "semantic name offset")? as usize;
        entries.push(SignatureEntry {
            semantic_name: read_cstr(data, name_offset)?,
            semantic_index: read_u32_le(entry, 4, "semantic index")?,
            system_value: read_u32_le(entry, 8, "system value")?,
            component_type: read_u32_le(entry, 12, "component type")?,
            register: read_u32_le(entry, 16, "register")?,
            mask: entry[20],
            used_mask: entry[21],
        });
    }

    Ok(SignatureChunk { entries })
}
