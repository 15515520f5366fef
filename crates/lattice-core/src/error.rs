use lattice_gl::ShaderStage;
use thiserror::Error;

/// Error raised by a context operation.
///
/// Recoverable conditions (an unsupported state combination, a failed
/// pipeline build) never poison the context: the pending configuration and
/// state mirror are left exactly as they were before the failing call.
#[derive(Debug, Error)]
pub enum ContextError {
    /// The device lacks a capability the requested state needs.
    #[error("device does not support {feature}")]
    Unsupported { feature: &'static str },

    /// Native shader compilation failed.
    #[error("{stage:?} shader failed to compile: {log}")]
    ShaderCompile { stage: ShaderStage, log: String },

    /// Native program linking failed.
    #[error("pipeline failed to link: {log}")]
    PipelineLink { log: String },

    /// A graphics pipeline is missing a mandatory stage.
    #[error("no {stage:?} shader bound")]
    MissingShader { stage: ShaderStage },

    /// A framebuffer configuration did not validate as complete.
    #[error("framebuffer configuration is incomplete")]
    IncompleteFrameBuffer,

    /// A handle does not refer to a live object in this context.
    #[error("stale or unknown {kind} handle")]
    InvalidHandle { kind: &'static str },

    /// A shader blob failed reflection parsing.
    #[error("shader blob rejected: {0}")]
    Blob(#[from] lattice_psb::PsbError),
}
