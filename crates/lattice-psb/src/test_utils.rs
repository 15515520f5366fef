//! Builders for synthetic `PSB` blobs.
//!
//! These produce byte-exact containers for tests without requiring the
//! offline cross-compiler. Panics on inconsistent input are acceptable
//! here; these helpers never run outside tests.

use crate::fourcc::FourCC;
use crate::source::SymbolType;

/// Builds a `PSB` container around the given `(tag, payload)` chunks.
///
/// The declared shader model is 5.0.
pub fn build_container(chunks: &[(FourCC, &[u8])]) -> Vec<u8> {
    let header_len = 16 + chunks.len() * 4;
    let mut records = Vec::new();
    let mut offsets = Vec::with_capacity(chunks.len());
    for (fourcc, payload) in chunks {
        offsets.push((header_len + records.len()) as u32);
        records.extend_from_slice(&fourcc.0);
        records.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        records.extend_from_slice(payload);
    }

    let total_size = (header_len + records.len()) as u32;
    let mut out = Vec::with_capacity(total_size as usize);
    out.extend_from_slice(b"PSB1");
    out.extend_from_slice(&5u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&total_size.to_le_bytes());
    out.extend_from_slice(&(chunks.len() as u32).to_le_bytes());
    for offset in offsets {
        out.extend_from_slice(&offset.to_le_bytes());
    }
    out.extend_from_slice(&records);
    out
}

/// Builds an `ISGN`/`OSGN` chunk payload.
///
/// Entries are `(semantic_name, semantic_index, system_value,
/// component_type, register, mask, used_mask)`.
pub fn build_signature_chunk(entries: &[(&str, u32, u32, u32, u32, u8, u8)]) -> Vec<u8> {
    const ENTRY_LEN: usize = 24;
    let table_offset = 8usize;
    let names_offset = table_offset + entries.len() * ENTRY_LEN;

    let mut names = Vec::new();
    let mut out = Vec::new();
    out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    out.extend_from_slice(&(table_offset as u32).to_le_bytes());
    for (name, semantic_index, system_value, component_type, register, mask, used_mask) in entries {
        out.extend_from_slice(&((names_offset + names.len()) as u32).to_le_bytes());
        names.extend_from_slice(name.as_bytes());
        names.push(0);
        out.extend_from_slice(&semantic_index.to_le_bytes());
        out.extend_from_slice(&system_value.to_le_bytes());
        out.extend_from_slice(&component_type.to_le_bytes());
        out.extend_from_slice(&register.to_le_bytes());
        out.push(*mask);
        out.push(*used_mask);
        out.extend_from_slice(&[0, 0]);
    }
    out.extend_from_slice(&names);
    out
}

/// Builds `GLSL` chunk payloads around a source body.
///
/// Table entries reference symbol names by byte offset into the source;
/// the builder locates each name with a substring search, so every named
/// symbol must occur verbatim in the source text.
pub struct SourceChunkBuilder {
    source: String,
    input_hash: u32,
    symbols_offset: u32,
    samplers: Vec<[u32; 3]>,
    uniform_buffers: Vec<[u32; 2]>,
    storage_buffers: Vec<[u32; 2]>,
    images: Vec<[u32; 2]>,
    imports: Vec<[u32; 3]>,
    exports: Vec<[u32; 3]>,
}

impl SourceChunkBuilder {
    /// Starts a builder around the given translated source body.
    pub fn new(source: &str) -> Self {
        SourceChunkBuilder {
            source: source.to_owned(),
            input_hash: 0,
            symbols_offset: 0,
            samplers: Vec::new(),
            uniform_buffers: Vec::new(),
            storage_buffers: Vec::new(),
            images: Vec::new(),
            imports: Vec::new(),
            exports: Vec::new(),
        }
    }

    /// Sets the declared hash of the pre-translation bytecode.
    pub fn input_hash(mut self, hash: u32) -> Self {
        self.input_hash = hash;
        self
    }

    /// Sets the byte offset where the import header is spliced in.
    pub fn symbols_offset(mut self, offset: u32) -> Self {
        self.symbols_offset = offset;
        self
    }

    fn name_offset(&self, name: &str) -> u32 {
        if name.is_empty() {
            return 0;
        }
        self.source
            .find(name)
            .unwrap_or_else(|| panic!("symbol {name:?} not present in source body"))
            as u32
    }

    /// Adds a sampler table entry.
    #[allow(clippy::too_many_arguments)]
    pub fn sampler(
        mut self,
        texture_index: u32,
        sampler_index: u32,
        unit_index: u32,
        normal_sample: bool,
        compare_sample: bool,
        normal_name: &str,
        compare_name: &str,
    ) -> Self {
        let field = crate::source::encode_sampler_field(
            texture_index,
            sampler_index,
            unit_index,
            normal_sample,
            compare_sample,
        );
        let normal = self.name_offset(normal_name);
        let compare = self.name_offset(compare_name);
        self.samplers.push([field, normal, compare]);
        self
    }

    /// Adds a uniform-buffer table entry.
    pub fn uniform_buffer(mut self, index: u32, name: &str) -> Self {
        let entry = [crate::source::encode_resource_field(index), self.name_offset(name)];
        self.uniform_buffers.push(entry);
        self
    }

    /// Adds a storage-buffer table entry.
    pub fn storage_buffer(mut self, index: u32, name: &str) -> Self {
        let entry = [crate::source::encode_resource_field(index), self.name_offset(name)];
        self.storage_buffers.push(entry);
        self
    }

    /// Adds an image table entry.
    pub fn image(mut self, index: u32, name: &str) -> Self {
        let entry = [crate::source::encode_resource_field(index), self.name_offset(name)];
        self.images.push(entry);
        self
    }

    /// Adds an import symbol with its default value.
    pub fn import(mut self, ty: SymbolType, id: u32, value: u32) -> Self {
        self.imports.push([ty.to_u32(), id, value]);
        self
    }

    /// Adds an export symbol.
    pub fn export(mut self, ty: SymbolType, id: u32, value: u32) -> Self {
        self.exports.push([ty.to_u32(), id, value]);
        self
    }

    /// Serializes the `GLSL` chunk payload.
    pub fn build_chunk_payload(&self) -> Vec<u8> {
        const HEADER_WORDS: usize = 16;

        let source_offset = HEADER_WORDS * 4;
        let mut tables = Vec::new();
        let mut place = |rows: &[u32]| -> u32 {
            let offset = (source_offset + self.source.len() + tables.len()) as u32;
            for word in rows {
                tables.extend_from_slice(&word.to_le_bytes());
            }
            offset
        };

        let flat = |rows: &[[u32; 3]]| rows.iter().flatten().copied().collect::<Vec<u32>>();
        let flat2 = |rows: &[[u32; 2]]| rows.iter().flatten().copied().collect::<Vec<u32>>();

        let samplers_offset = place(&flat(&self.samplers));
        let ub_offset = place(&flat2(&self.uniform_buffers));
        let sb_offset = place(&flat2(&self.storage_buffers));
        let img_offset = place(&flat2(&self.images));
        let imports_offset = place(&flat(&self.imports));
        let exports_offset = place(&flat(&self.exports));

        let header = [
            self.input_hash,
            source_offset as u32,
            self.source.len() as u32,
            self.symbols_offset,
            samplers_offset,
            self.samplers.len() as u32,
            ub_offset,
            self.uniform_buffers.len() as u32,
            sb_offset,
            self.storage_buffers.len() as u32,
            img_offset,
            self.images.len() as u32,
            imports_offset,
            self.imports.len() as u32,
            exports_offset,
            self.exports.len() as u32,
        ];

        let mut out = Vec::with_capacity(source_offset + self.source.len() + tables.len());
        for word in header {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out.extend_from_slice(self.source.as_bytes());
        out.extend_from_slice(&tables);
        out
    }

    /// Wraps the `GLSL` payload in a full container, with optional
    /// input/output signature chunks.
    pub fn build_blob(&self, isgn: Option<&[u8]>, osgn: Option<&[u8]>) -> Vec<u8> {
        let glsl = self.build_chunk_payload();
        let mut chunks: Vec<(FourCC, &[u8])> = vec![(crate::source::CHUNK_GLSL, &glsl)];
        if let Some(isgn) = isgn {
            chunks.push((crate::source::CHUNK_ISGN, isgn));
        }
        if let Some(osgn) = osgn {
            chunks.push((crate::source::CHUNK_OSGN, osgn));
        }
        build_container(&chunks)
    }
}
