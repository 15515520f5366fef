use core::fmt;

use crate::error::PsbError;
use crate::fourcc::FourCC;

const PSB_MAGIC: FourCC = FourCC(*b"PSB1");
// magic + version (major/minor u16) + total_size + chunk_count
const PSB_HEADER_LEN: usize = 4 + 4 + 4 + 4;
// Hard cap on chunk count to avoid pathological offset tables on hostile
// input. Real blobs carry a handful of chunks.
const MAX_PSB_CHUNK_COUNT: u32 = 1024;

/// Declared shader-model version of the bytecode this blob was translated
/// from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShaderModel {
    /// Major shader-model version.
    pub major: u16,
    /// Minor shader-model version.
    pub minor: u16,
}

/// The fixed header of a `PSB` container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsbHeader {
    /// Must be `PSB1`.
    pub magic: FourCC,
    /// Shader-model version declared by the translator.
    pub shader_model: ShaderModel,
    /// Declared total size, in bytes, of this container.
    pub total_size: u32,
    /// Number of chunk offsets following the header.
    pub chunk_count: u32,
}

/// A single chunk within a `PSB` container.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct PsbChunk<'a> {
    /// The chunk tag (e.g. `GLSL`, `ISGN`, `OSGN`).
    pub fourcc: FourCC,
    /// Raw chunk payload bytes.
    pub data: &'a [u8],
}

impl fmt::Debug for PsbChunk<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PsbChunk")
            .field("fourcc", &self.fourcc)
            .field("data_len", &self.data.len())
            .finish()
    }
}

/// A parsed `PSB` container.
///
/// Parsing is strict about bounds: every offset and size is validated to
/// ensure it stays within the container's declared `total_size`.
#[derive(Debug, Clone)]
pub struct PsbFile<'a> {
    bytes: &'a [u8],
    header: PsbHeader,
    chunk_offsets: &'a [u8],
}

impl<'a> PsbFile<'a> {
    /// Parses a `PSB` container from `bytes`.
    ///
    /// The input is treated as untrusted: all offsets and sizes are
    /// validated and malformed data never panics.
    pub fn parse(bytes: &'a [u8]) -> Result<PsbFile<'a>, PsbError> {
        if bytes.len() < PSB_HEADER_LEN {
            return Err(PsbError::malformed_header(format!(
                "need at least {PSB_HEADER_LEN} bytes, got {}",
                bytes.len()
            )));
        }

        let magic = FourCC([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if magic != PSB_MAGIC {
            return Err(PsbError::malformed_header(format!(
                "bad magic {magic:?}, expected {PSB_MAGIC:?}"
            )));
        }

        let major = u16::from_le_bytes([bytes[4], bytes[5]]);
        let minor = u16::from_le_bytes([bytes[6], bytes[7]]);
        let total_size = read_u32_le(bytes, 8, "total_size")?;
        let chunk_count = read_u32_le(bytes, 12, "chunk_count")?;

        if chunk_count > MAX_PSB_CHUNK_COUNT {
            return Err(PsbError::malformed_offsets(format!(
                "chunk_count {chunk_count} exceeds maximum {MAX_PSB_CHUNK_COUNT}"
            )));
        }
        if (total_size as usize) < PSB_HEADER_LEN {
            return Err(PsbError::malformed_header(format!(
                "total_size {total_size} is smaller than header size {PSB_HEADER_LEN}"
            )));
        }
        if total_size as usize > bytes.len() {
            return Err(PsbError::out_of_bounds(format!(
                "total_size {total_size} exceeds buffer length {}",
                bytes.len()
            )));
        }

        let bytes = &bytes[..total_size as usize];

        let offset_table_len = (chunk_count as usize)
            .checked_mul(4)
            .ok_or_else(|| PsbError::malformed_offsets("chunk_count overflows offset table"))?;
        let offset_table_end = PSB_HEADER_LEN
            .checked_add(offset_table_len)
            .ok_or_else(|| PsbError::malformed_offsets("offset table end overflows"))?;
        if offset_table_end > bytes.len() {
            return Err(PsbError::malformed_offsets(format!(
                "chunk offset table ends at {offset_table_end}, but total_size is {}",
                bytes.len()
            )));
        }

        let chunk_offsets = &bytes[PSB_HEADER_LEN..offset_table_end];

        let file = PsbFile {
            bytes,
            header: PsbHeader {
                magic,
                shader_model: ShaderModel { major, minor },
                total_size,
                chunk_count,
            },
            chunk_offsets,
        };

        // Validate every chunk record up front so accessors cannot fail.
        for i in 0..chunk_count {
            file.chunk_at(i)?;
        }

        Ok(file)
    }

    /// The parsed container header.
    pub fn header(&self) -> &PsbHeader {
        &self.header
    }

    /// Returns the `i`-th chunk of the container.
    pub fn chunk_at(&self, i: u32) -> Result<PsbChunk<'a>, PsbError> {
        if i >= self.header.chunk_count {
            return Err(PsbError::out_of_bounds(format!(
                "chunk index {i} out of range (chunk_count {})",
                self.header.chunk_count
            )));
        }

        let table_pos = i as usize * 4;
        let chunk_offset = u32::from_le_bytes([
            self.chunk_offsets[table_pos],
            self.chunk_offsets[table_pos + 1],
            self.chunk_offsets[table_pos + 2],
            self.chunk_offsets[table_pos + 3],
        ]) as usize;

        // A chunk record is fourcc + declared payload size + payload.
        let header_end = chunk_offset
            .checked_add(8)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                PsbError::malformed_offsets(format!(
                    "chunk {i} record at {chunk_offset} does not fit in container"
                ))
            })?;

        let fourcc = FourCC([
            self.bytes[chunk_offset],
            self.bytes[chunk_offset + 1],
            self.bytes[chunk_offset + 2],
            self.bytes[chunk_offset + 3],
        ]);
        let size = read_u32_le(self.bytes, chunk_offset + 4, "chunk size")? as usize;

        let data_end = header_end.checked_add(size).filter(|end| *end <= self.bytes.len());
        let Some(data_end) = data_end else {
            return Err(PsbError::out_of_bounds(format!(
                "chunk {i} ({fourcc}) payload of {size} bytes exceeds container"
            )));
        };

        Ok(PsbChunk {
            fourcc,
            data: &self.bytes[header_end..data_end],
        })
    }

    /// Iterates over all chunks in declaration order.
    pub fn chunks(&self) -> impl Iterator<Item = PsbChunk<'a>> + '_ {
        // chunk_at was validated during parse, so the unwrap-free fallback
        // below is unreachable in practice.
        (0..self.header.chunk_count).filter_map(|i| self.chunk_at(i).ok())
    }

    /// Returns the first chunk with the given tag, if present.
    pub fn find_chunk(&self, fourcc: FourCC) -> Option<PsbChunk<'a>> {
        self.chunks().find(|c| c.fourcc == fourcc)
    }

    /// Returns the first chunk with the given tag or a `MissingChunk` error.
    pub fn require_chunk(&self, fourcc: FourCC) -> Result<PsbChunk<'a>, PsbError> {
        self.find_chunk(fourcc)
            .ok_or_else(|| PsbError::missing_chunk(format!("no {fourcc} chunk in container")))
    }
}

pub(crate) fn read_u32_le(bytes: &[u8], offset: usize, what: &str) -> Result<u32, PsbError> {
    let end = offset
        .checked_add(4)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| {
            PsbError::out_of_bounds(format!("cannot read {what} at offset {offset}"))
        })?;
    Ok(u32::from_le_bytes([
        bytes[end - 4],
        bytes[end - 3],
        bytes[end - 2],
        bytes[end - 1],
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::build_container;

    #[test]
    fn parses_built_container() {
        let payload = [9u8, 8, 7];
        let bytes = build_container(&[(FourCC(*b"GLSL"), &payload)]);
        let file = PsbFile::parse(&bytes).expect("parse");

        assert_eq!(file.header().magic, PSB_MAGIC);
        assert_eq!(file.header().chunk_count, 1);
        assert_eq!(file.header().total_size as usize, bytes.len());

        let chunk = file.chunk_at(0).expect("chunk 0");
        assert_eq!(chunk.fourcc, FourCC(*b"GLSL"));
        assert_eq!(chunk.data, &payload);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = build_container(&[]);
        bytes[0] = b'X';
        assert!(matches!(
            PsbFile::parse(&bytes),
            Err(PsbError::MalformedHeader(_))
        ));
    }

    #[test]
    fn rejects_truncated_input() {
        let bytes = build_container(&[(FourCC(*b"GLSL"), &[0u8; 16])]);
        for len in 0..bytes.len() {
            assert!(PsbFile::parse(&bytes[..len]).is_err(), "len {len}");
        }
    }

    #[test]
    fn rejects_chunk_payload_past_end() {
        let mut bytes = build_container(&[(FourCC(*b"GLSL"), &[0u8; 4])]);
        // Inflate the declared payload size of chunk 0.
        let chunk_offset = u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]) as usize;
        bytes[chunk_offset + 4..chunk_offset + 8].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(PsbFile::parse(&bytes).is_err());
    }

    #[test]
    fn find_chunk_by_tag() {
        let bytes = build_container(&[
            (FourCC(*b"ISGN"), &[1u8][..]),
            (FourCC(*b"GLSL"), &[2u8][..]),
        ]);
        let file = PsbFile::parse(&bytes).expect("parse");
        assert_eq!(file.find_chunk(FourCC(*b"GLSL")).unwrap().data, &[2]);
        assert!(file.find_chunk(FourCC(*b"OSGN")).is_none());
        assert!(file.require_chunk(FourCC(*b"OSGN")).is_err());
    }
}
