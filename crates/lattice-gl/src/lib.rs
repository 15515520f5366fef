//! Thin abstraction over the native GL entry points used by the runtime.
//!
//! The state-caching layer never talks to the driver directly; it goes
//! through the [`GlDriver`] trait, which mirrors the (modern, DSA-flavored)
//! subset of the native API the runtime needs. Keeping the seam here lets
//! the caching layer be tested against a recording driver that logs every
//! native call instead of issuing it.

pub mod caps;
pub mod driver;
pub mod names;
pub mod types;

/// A recording [`GlDriver`] for tests.
///
/// Only available when compiling this crate's own tests, or when the
/// `test-utils` feature is enabled.
#[cfg(any(test, feature = "test-utils"))]
pub mod recording;

pub use crate::caps::{DeviceCaps, ResourceUnitCaps};
pub use crate::driver::{Attachment, GlDriver, RawName};
pub use crate::names::{NameHandle, NamePool};
pub use crate::types::{
    AttribKind, BlendFactor, BlendOp, BufferTarget, Capability, ColorWrites, CompareFunc,
    CullFace, FillMode, FrontFace, IndexType, PrimitiveMode, ShaderStage, StencilOp,
    TextureTarget, VertexAttribFormat, GRAPHICS_STAGE_COUNT, STAGE_COUNT,
};
