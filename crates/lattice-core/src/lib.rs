//! State-cached rendering contexts over a raw GL-style driver.
//!
//! The crate sits between a D3D11-flavored client API and the native
//! driver seam of [`lattice_gl`]. Client calls record into a pending
//! configuration; draws and dispatches reconcile that configuration with a
//! mirror of the last-known native state and emit only the calls whose
//! mirrored value actually changed. Framebuffers, linked programs and
//! slot-to-unit maps are content-addressed caches shared for the lifetime
//! of the context.

#![forbid(unsafe_code)]

mod bindings;
mod buffers;
mod cache;
mod config;
mod context;
mod device;
mod error;
mod formats;
mod framebuffer;
mod input_assembler;
mod partition;
mod pipeline;
mod shader;
mod state;
mod streaming;
mod table;
mod units;
mod views;

pub use bindings::{ConstantBufferBinding, IndexBufferBinding, StageSlots, VertexBufferBinding};
pub use buffers::{Buffer, BufferId};
pub use cache::CacheStats;
pub use config::ContextConfig;
pub use context::Context;
pub use device::Device;
pub use error::ContextError;
pub use formats::{FormatDesc, FormatId, FormatTable};
pub use framebuffer::{FrameBufferCache, FrameBufferConfig, FrameBufferId, FrameBufferObject};
pub use input_assembler::{InputLayout, VertexAttrib};
pub use pipeline::{CompiledPipeline, PipelineCache, PipelineConfig, PipelineId, PipelineMode};
pub use shader::{Shader, ShaderId};
pub use state::{
    BlendState, DepthStencilState, RasterizerState, ScissorRect, StateMirror, StencilFace,
    TargetBlend, Viewport, MAX_RENDER_TARGETS, MAX_VERTEX_ATTRIBS, MAX_VERTEX_SLOTS,
};
pub use streaming::{StreamSpan, StreamingRing};
pub use units::{ResourceType, UnitMap, UnitMapCache, UnitMapEntry, SAMPLER_NONE};
pub use views::{View, ViewCaps, ViewDesc, ViewId, ViewKind};
