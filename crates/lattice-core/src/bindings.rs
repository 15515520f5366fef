//! Per-stage resource slot tables of the pending configuration.
//!
//! Slots hold client-visible logical indices; the unit mapper translates
//! them to hardware units at flush time. Setting a slot never touches the
//! driver.

use lattice_gl::{IndexType, RawName, ResourceUnitCaps};

use crate::buffers::BufferId;
use crate::views::ViewId;

/// A constant-buffer range bound to one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantBufferBinding {
    pub buffer: BufferId,
    pub offset: usize,
    pub size: usize,
}

/// A vertex buffer bound to one input-assembler slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBufferBinding {
    pub buffer: BufferId,
    pub stride: u32,
    pub offset: usize,
}

/// The bound index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBufferBinding {
    pub buffer: BufferId,
    pub index_type: IndexType,
    pub offset: usize,
}

/// Slot tables for one shader stage.
#[derive(Debug, Default)]
pub struct StageSlots {
    pub textures: Vec<Option<ViewId>>,
    pub samplers: Vec<Option<RawName>>,
    pub constant_buffers: Vec<Option<ConstantBufferBinding>>,
    /// Per-slot streamed constant data, overriding the slot's buffer
    /// binding when present.
    pub streamed: Vec<Option<Vec<u8>>>,
    pub storage_buffers: Vec<Option<ViewId>>,
    pub images: Vec<Option<ViewId>>,
}

impl StageSlots {
    /// Tables sized to the device's per-stage unit limits for `stage`.
    pub fn new(
        stage: usize,
        textures: &ResourceUnitCaps,
        uniforms: &ResourceUnitCaps,
        storages: &ResourceUnitCaps,
        images: &ResourceUnitCaps,
    ) -> Self {
        StageSlots {
            textures: vec![None; textures.max_per_stage[stage] as usize],
            samplers: vec![None; textures.max_per_stage[stage] as usize],
            constant_buffers: vec![None; uniforms.max_per_stage[stage] as usize],
            streamed: vec![None; uniforms.max_per_stage[stage] as usize],
            storage_buffers: vec![None; storages.max_per_stage[stage] as usize],
            images: vec![None; images.max_per_stage[stage] as usize],
        }
    }
}

/// Writes `value` into `slots[slot]`, reporting whether anything changed.
/// `None` means the slot index is beyond the stage's table.
pub(crate) fn set_slot<T: PartialEq>(
    slots: &mut [Option<T>],
    slot: u32,
    value: Option<T>,
) -> Option<bool> {
    let entry = slots.get_mut(slot as usize)?;
    if *entry == value {
        Some(false)
    } else {
        *entry = value;
        Some(true)
    }
}
