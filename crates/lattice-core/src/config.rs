//! Context tuning knobs.
//!
//! Constructed once at context creation and read-only afterwards; there is
//! no process-wide mutable configuration.

/// Tunables for one context.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Section granularity of the streaming constant ring, in bytes.
    /// Sections are additionally rounded up to the device's uniform offset
    /// alignment.
    pub streaming_granularity: usize,
    /// Upper bound on the streaming ring's unit count; growth past this
    /// falls back to full buffer re-uploads for the binding that did not
    /// fit.
    pub max_streaming_units: u32,
    /// How many frames of streaming ring memory may be in flight before
    /// frame switching blocks on the oldest fence.
    pub frames_in_flight: usize,
    /// Run native program validation after every pipeline bind. Slow;
    /// diagnostics only.
    pub validate_pipelines: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        ContextConfig {
            streaming_granularity: 256,
            max_streaming_units: 64,
            frames_in_flight: 3,
            validate_pipelines: false,
        }
    }
}
