//! Streaming constant-buffer ring.
//!
//! Small per-draw constant data goes through a ring buffer instead of
//! rewriting the bound buffer object, so a draw never stalls on its own
//! previous frame. The ring is split into one region per in-flight frame;
//! a frame switch fences the finished region and, before a region is
//! rewritten, waits for its old fence. Sections are rounded up to the
//! streaming granularity and the device's uniform offset alignment.

use std::collections::VecDeque;

use lattice_gl::{GlDriver, RawName};
use tracing::{debug, warn};

use crate::config::ContextConfig;

const INITIAL_UNITS: u32 = 4;

/// A byte span of the ring (or of a fallback buffer), ready to bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpan {
    pub buffer: RawName,
    pub offset: usize,
    pub size: usize,
}

struct Frame {
    fence: u64,
    /// Buffers replaced while this frame was recording; deleted when the
    /// frame retires.
    garbage: Vec<RawName>,
}

pub struct StreamingRing {
    granularity: usize,
    max_units: u32,
    frames_in_flight: usize,

    buffer: RawName,
    unit_count: u32,
    region_size: usize,
    current_region: usize,
    write_offset: usize,

    in_flight: VecDeque<Frame>,
    garbage: Vec<RawName>,
}

impl StreamingRing {
    pub fn new(config: &ContextConfig, uniform_offset_alignment: u32) -> Self {
        let alignment = (uniform_offset_alignment as usize).max(1);
        let granularity = config.streaming_granularity.max(1).div_ceil(alignment) * alignment;
        StreamingRing {
            granularity,
            max_units: config.max_streaming_units.max(1),
            frames_in_flight: config.frames_in_flight.max(1),
            buffer: 0,
            unit_count: 0,
            region_size: 0,
            current_region: 0,
            write_offset: 0,
            in_flight: VecDeque::new(),
            garbage: Vec::new(),
        }
    }

    /// Uploads `data` into the current frame's region and returns the span
    /// to bind. `None` means growth hit the unit budget; the caller must
    /// fall back to [`StreamingRing::fallback_upload`].
    pub fn upload<D: GlDriver>(&mut self, driver: &mut D, data: &[u8]) -> Option<StreamSpan> {
        let section = data.len().max(1).div_ceil(self.granularity) * self.granularity;
        if !self.reserve(driver, section) {
            return None;
        }

        let offset = self.current_region * self.region_size + self.write_offset;
        driver.named_buffer_sub_data(self.buffer, offset, data);
        self.write_offset += section;
        Some(StreamSpan {
            buffer: self.buffer,
            offset,
            size: section,
        })
    }

    /// Full re-upload path for sections the ring cannot hold: a throwaway
    /// buffer retired with the current frame.
    pub fn fallback_upload<D: GlDriver>(&mut self, driver: &mut D, data: &[u8]) -> StreamSpan {
        let size = data.len().max(1).div_ceil(self.granularity) * self.granularity;
        let buffer = driver.gen_buffer();
        driver.named_buffer_data(buffer, size);
        driver.named_buffer_sub_data(buffer, 0, data);
        self.garbage.push(buffer);
        StreamSpan {
            buffer,
            offset: 0,
            size,
        }
    }

    /// Fences the finished frame, rotates regions, and retires frames
    /// oldest-first. Blocks (in here, not in the caller's draw path) when
    /// the region being reused is still in flight.
    pub fn switch_frame<D: GlDriver>(&mut self, driver: &mut D) {
        if self.buffer == 0 && self.garbage.is_empty() {
            return;
        }

        let fence = driver.fence_sync();
        self.in_flight.push_back(Frame {
            fence,
            garbage: std::mem::take(&mut self.garbage),
        });
        self.current_region = (self.current_region + 1) % self.frames_in_flight;
        self.write_offset = 0;

        // Opportunistically retire anything already signaled, oldest
        // first, stopping at the first fence still pending.
        while let Some(frame) = self.in_flight.front() {
            if !driver.fence_signaled(frame.fence) {
                break;
            }
            self.retire_front(driver, false);
        }
        // The region we just rotated into must not still be in flight.
        while self.in_flight.len() >= self.frames_in_flight {
            self.retire_front(driver, true);
        }
    }

    /// Deletes every native object the ring still holds.
    pub fn destroy<D: GlDriver>(&mut self, driver: &mut D) {
        while !self.in_flight.is_empty() {
            self.retire_front(driver, true);
        }
        for buffer in self.garbage.drain(..) {
            driver.delete_buffer(buffer);
        }
        if self.buffer != 0 {
            driver.delete_buffer(self.buffer);
            self.buffer = 0;
        }
    }

    fn retire_front<D: GlDriver>(&mut self, driver: &mut D, wait: bool) {
        let Some(frame) = self.in_flight.pop_front() else { return };
        if wait && !driver.fence_signaled(frame.fence) {
            driver.client_wait_fence(frame.fence);
        }
        driver.delete_fence(frame.fence);
        for buffer in frame.garbage {
            driver.delete_buffer(buffer);
        }
    }

    /// Makes sure the current region can hold `section` more bytes,
    /// growing the ring geometrically. Returns false when growth would
    /// exceed the unit budget.
    fn reserve<D: GlDriver>(&mut self, driver: &mut D, section: usize) -> bool {
        if self.buffer != 0 && self.write_offset + section <= self.region_size {
            return true;
        }

        let mut units = self.unit_count.max(INITIAL_UNITS.min(self.max_units));
        while (units as usize) * self.granularity < self.write_offset + section {
            let Some(doubled) = units.checked_mul(2) else { return false };
            units = doubled;
            if units > self.max_units {
                warn!(
                    requested = section,
                    max_units = self.max_units,
                    "streaming ring at capacity; falling back to direct upload"
                );
                return false;
            }
        }
        if self.buffer != 0 && units == self.unit_count {
            return true;
        }
        if units > self.max_units {
            return false;
        }

        let region_size = units as usize * self.granularity;
        let new_buffer = driver.gen_buffer();
        driver.named_buffer_data(new_buffer, region_size * self.frames_in_flight);
        if self.buffer != 0 {
            // The old buffer may still be read by in-flight frames.
            self.garbage.push(self.buffer);
        }
        debug!(units, region_size, "streaming ring grown");

        self.buffer = new_buffer;
        self.unit_count = units;
        self.region_size = region_size;
        self.write_offset = 0;
        true
    }
}
