//! Input-assembler state: vertex attribute layout and buffer slots.

use lattice_gl::{BufferTarget, GlDriver, RawName, VertexAttribFormat};
use tracing::warn;

use crate::state::{refresh, AttribMirror, StateMirror, MAX_VERTEX_ATTRIBS, MAX_VERTEX_SLOTS};

/// One vertex attribute of an input layout. The attribute's index in the
/// layout is its shader location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttrib {
    /// Input-assembler buffer slot the attribute reads from.
    pub buffer_slot: u32,
    pub format: VertexAttribFormat,
    /// Byte offset within one element of the slot's buffer.
    pub offset: usize,
    /// Instancing divisor; zero for per-vertex data.
    pub divisor: u32,
}

/// The vertex attribute layout of the pending configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InputLayout {
    pub attribs: Vec<VertexAttrib>,
}

/// A resolved vertex-buffer slot: native name, stride, base offset.
pub(crate) type ResolvedVertexBuffer = Option<(RawName, u32, usize)>;

/// Reconciles attribute pointers, divisors and enables with the mirror.
pub(crate) fn flush<D: GlDriver>(
    driver: &mut D,
    mirror: &mut StateMirror,
    layout: &InputLayout,
    buffers: &[ResolvedVertexBuffer; MAX_VERTEX_SLOTS],
) {
    let count = layout.attribs.len().min(MAX_VERTEX_ATTRIBS);
    if layout.attribs.len() > MAX_VERTEX_ATTRIBS {
        warn!(
            attribs = layout.attribs.len(),
            "input layout exceeds attribute limit; extra attributes ignored"
        );
    }

    for (index, attrib) in layout.attribs.iter().take(count).enumerate() {
        let resolved = buffers
            .get(attrib.buffer_slot as usize)
            .copied()
            .flatten();
        let Some((buffer, stride, base_offset)) = resolved else {
            // No buffer in the slot: leave the pointer alone but make sure
            // the attribute is off so the draw cannot read stale memory.
            set_enabled(driver, mirror, index as u32, false);
            continue;
        };

        let desired = AttribMirror {
            buffer,
            format: attrib.format,
            stride,
            offset: base_offset + attrib.offset,
            divisor: attrib.divisor,
        };
        let previous = mirror.attribs[index];
        if previous != Some(desired) {
            let pointer_changed = previous.is_none_or(|p| {
                p.buffer != desired.buffer
                    || p.format != desired.format
                    || p.stride != desired.stride
                    || p.offset != desired.offset
            });
            if pointer_changed {
                if refresh(&mut mirror.array_buffer, buffer) {
                    driver.bind_buffer(BufferTarget::Array, buffer);
                }
                driver.vertex_attrib_pointer(
                    index as u32,
                    desired.format,
                    desired.stride,
                    desired.offset,
                );
            }
            if previous.is_none_or(|p| p.divisor != desired.divisor) {
                driver.vertex_attrib_divisor(index as u32, desired.divisor);
            }
            mirror.attribs[index] = Some(desired);
        }
        set_enabled(driver, mirror, index as u32, true);
    }

    for index in count..MAX_VERTEX_ATTRIBS {
        set_enabled(driver, mirror, index as u32, false);
    }
}

fn set_enabled<D: GlDriver>(driver: &mut D, mirror: &mut StateMirror, index: u32, enabled: bool) {
    let bit = 1u32 << index;
    let currently = mirror.enabled_attribs & bit != 0;
    if currently != enabled {
        driver.set_vertex_attrib_enabled(index, enabled);
        mirror.enabled_attribs ^= bit;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_gl::recording::{Call, RecordingDriver};
    use lattice_gl::{AttribKind, DeviceCaps};

    fn float_attrib(buffer_slot: u32, offset: usize) -> VertexAttrib {
        VertexAttrib {
            buffer_slot,
            format: VertexAttribFormat {
                components: 4,
                kind: AttribKind::F32,
                normalized: false,
                integer: false,
            },
            offset,
            divisor: 0,
        }
    }

    #[test]
    fn second_flush_of_identical_layout_is_silent() {
        let mut driver = RecordingDriver::new();
        let mut mirror = StateMirror::new(&DeviceCaps::desktop());
        let layout = InputLayout {
            attribs: vec![float_attrib(0, 0), float_attrib(0, 16)],
        };
        let mut buffers: [ResolvedVertexBuffer; MAX_VERTEX_SLOTS] = [None; MAX_VERTEX_SLOTS];
        buffers[0] = Some((7, 32, 0));

        flush(&mut driver, &mut mirror, &layout, &buffers);
        let first_pass = driver.calls.len();
        assert!(first_pass > 0);

        flush(&mut driver, &mut mirror, &layout, &buffers);
        assert_eq!(driver.calls.len(), first_pass);
    }

    #[test]
    fn shrinking_the_layout_disables_stale_attribs() {
        let mut driver = RecordingDriver::new();
        let mut mirror = StateMirror::new(&DeviceCaps::desktop());
        let mut buffers: [ResolvedVertexBuffer; MAX_VERTEX_SLOTS] = [None; MAX_VERTEX_SLOTS];
        buffers[0] = Some((7, 32, 0));

        let two = InputLayout {
            attribs: vec![float_attrib(0, 0), float_attrib(0, 16)],
        };
        flush(&mut driver, &mut mirror, &two, &buffers);

        let one = InputLayout {
            attribs: vec![float_attrib(0, 0)],
        };
        driver.clear_calls();
        flush(&mut driver, &mut mirror, &one, &buffers);
        assert_eq!(
            driver.calls,
            vec![Call::SetVertexAttribEnabled {
                index: 1,
                enabled: false
            }]
        );
    }

    #[test]
    fn moving_the_base_offset_reemits_only_the_pointer() {
        let mut driver = RecordingDriver::new();
        let mut mirror = StateMirror::new(&DeviceCaps::desktop());
        let layout = InputLayout {
            attribs: vec![float_attrib(0, 0)],
        };
        let mut buffers: [ResolvedVertexBuffer; MAX_VERTEX_SLOTS] = [None; MAX_VERTEX_SLOTS];
        buffers[0] = Some((7, 32, 0));
        flush(&mut driver, &mut mirror, &layout, &buffers);

        buffers[0] = Some((7, 32, 64));
        driver.clear_calls();
        flush(&mut driver, &mut mirror, &layout, &buffers);
        assert_eq!(driver.calls.len(), 1);
        assert!(matches!(
            driver.calls[0],
            Call::VertexAttribPointer { index: 0, offset: 64, .. }
        ));
    }
}
