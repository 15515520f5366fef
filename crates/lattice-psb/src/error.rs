use core::fmt;

/// Error raised while parsing a `PSB` container or one of its chunks.
///
/// The payload is a human-readable description of what was malformed; the
/// variant identifies which structural layer rejected the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PsbError {
    /// The fixed container header is missing or malformed.
    MalformedHeader(String),
    /// The chunk offset table is inconsistent with the declared total size.
    MalformedOffsets(String),
    /// A chunk payload failed validation.
    InvalidChunk(String),
    /// An offset or size points outside the container.
    OutOfBounds(String),
    /// A chunk the caller required is not present in the container.
    MissingChunk(String),
}

impl PsbError {
    pub(crate) fn malformed_header(msg: impl Into<String>) -> Self {
        Self::MalformedHeader(msg.into())
    }

    pub(crate) fn malformed_offsets(msg: impl Into<String>) -> Self {
        Self::MalformedOffsets(msg.into())
    }

    pub(crate) fn invalid_chunk(msg: impl Into<String>) -> Self {
        Self::InvalidChunk(msg.into())
    }

    pub(crate) fn out_of_bounds(msg: impl Into<String>) -> Self {
        Self::OutOfBounds(msg.into())
    }

    pub(crate) fn missing_chunk(msg: impl Into<String>) -> Self {
        Self::MissingChunk(msg.into())
    }

    /// The description carried by this error.
    pub fn context(&self) -> &str {
        match self {
            Self::MalformedHeader(s)
            | Self::MalformedOffsets(s)
            | Self::InvalidChunk(s)
            | Self::OutOfBounds(s)
            | Self::MissingChunk(s) => s,
        }
    }
}

impl fmt::Display for PsbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedHeader(s) => write!(f, "malformed PSB header: {s}"),
            Self::MalformedOffsets(s) => write!(f, "malformed PSB chunk offsets: {s}"),
            Self::InvalidChunk(s) => write!(f, "invalid PSB chunk: {s}"),
            Self::OutOfBounds(s) => write!(f, "PSB offset out of bounds: {s}"),
            Self::MissingChunk(s) => write!(f, "missing PSB chunk: {s}"),
        }
    }
}

impl std::error::Error for PsbError {}
