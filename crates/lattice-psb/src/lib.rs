//! A safe, zero-copy parser for portable shader blob containers (`PSB`).
//!
//! A `PSB` blob is the unit of exchange between the offline shader
//! cross-compiler and the runtime binding layer: a chunked container whose
//! payload carries the translated native-language source body together with
//! the reflection tables the runtime needs to wire resources to hardware
//! units (sampler/resource declarations with embedded symbol names, import
//! and export symbol tables, and input/output signatures).
//!
//! This crate is intended for parsing **untrusted** blobs without panicking
//! or reading out of bounds. Every offset and size is validated against the
//! container's declared extents.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod container;
mod error;
mod fourcc;
/// Structured reflection aggregated from a whole container.
pub mod reflection;
/// Parsers for input/output signature chunks (`ISGN`, `OSGN`).
pub mod signature;
/// Parser for the translated-source chunk (`GLSL`) and its packed tables.
pub mod source;

/// Helpers for building synthetic `PSB` blobs in tests.
///
/// Only available when compiling this crate's own tests, or when the
/// `test-utils` feature is enabled. Not part of the stable parsing API.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use crate::container::{PsbChunk, PsbFile, PsbHeader, ShaderModel};
pub use crate::error::PsbError;
pub use crate::fourcc::FourCC;
pub use crate::reflection::ShaderReflection;
pub use crate::signature::{parse_signature_chunk, SignatureChunk, SignatureEntry};
pub use crate::source::{
    ImportSymbol, ResourceEntry, SamplerEntry, SourceChunk, SymbolType, CHUNK_GLSL, CHUNK_ISGN,
    CHUNK_OSGN,
};
