//! Pre-computed hardware-unit partitions.
//!
//! At device init, static per-stage bounds tables are distributed against
//! the device's per-stage and aggregate unit limits, producing for each
//! resource type a list of candidate partitions: disjoint contiguous unit
//! ranges per stage. At pipeline-build time the unit mapper picks the
//! first partition whose ranges contain every active stage's declared
//! window; partitions are looked up there, never created.

use lattice_gl::{DeviceCaps, ResourceUnitCaps, ShaderStage, STAGE_COUNT};
use tracing::warn;

use crate::pipeline::PipelineMode;
use crate::units::{ResourceType, RESOURCE_TYPE_COUNT};

/// Contiguous unit range assigned to one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageRange {
    pub first: u32,
    pub count: u32,
}

/// One candidate assignment of unit ranges to stages for a resource type.
/// Ranges are disjoint; `None` means the stage gets no units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub ranges: [Option<StageRange>; STAGE_COUNT],
}

impl Partition {
    /// Whether every stage window in `windows` (maximum declared unit
    /// index per stage, `None` for unused stages) fits inside this
    /// partition's range for that stage. All-or-nothing: a partition that
    /// fits only some of the active stages does not fit.
    pub fn fits(&self, windows: &[Option<u32>; STAGE_COUNT]) -> bool {
        windows.iter().enumerate().all(|(stage, window)| {
            match (window, &self.ranges[stage]) {
                (None, _) => true,
                (Some(max_declared), Some(range)) => *max_declared < range.count,
                (Some(_), None) => false,
            }
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct StageBounds {
    min: u32,
    max: u32,
}

const B0: StageBounds = StageBounds { min: 0, max: 0 };

/// Candidate bounds tables for graphics pipelines, most specific first.
/// Stage order per [`ShaderStage::index`].
const GRAPHICS_TEXTURE_BOUNDS: &[[StageBounds; STAGE_COUNT]] = &[
    // Vertex + fragment only, generous windows.
    [
        StageBounds { min: 4, max: 16 },
        B0,
        B0,
        B0,
        StageBounds { min: 8, max: 32 },
        B0,
    ],
    // All graphics stages, fragment-weighted.
    [
        StageBounds { min: 4, max: 16 },
        StageBounds { min: 1, max: 8 },
        StageBounds { min: 1, max: 8 },
        StageBounds { min: 1, max: 8 },
        StageBounds { min: 8, max: 32 },
        B0,
    ],
];

const GRAPHICS_BUFFER_BOUNDS: &[[StageBounds; STAGE_COUNT]] = &[[
    StageBounds { min: 2, max: 14 },
    StageBounds { min: 1, max: 14 },
    StageBounds { min: 1, max: 14 },
    StageBounds { min: 1, max: 14 },
    StageBounds { min: 2, max: 14 },
    B0,
]];

const GRAPHICS_IMAGE_BOUNDS: &[[StageBounds; STAGE_COUNT]] = &[[
    StageBounds { min: 0, max: 4 },
    B0,
    B0,
    B0,
    StageBounds { min: 1, max: 8 },
    B0,
]];

/// Compute pipelines hand every unit to the compute stage.
const COMPUTE_BOUNDS: [StageBounds; STAGE_COUNT] = [
    B0,
    B0,
    B0,
    B0,
    B0,
    StageBounds { min: 1, max: u32::MAX },
];

/// Distributes one bounds table against the device limits.
///
/// Every stage starts at its minimum; spare aggregate capacity is spread
/// proportionally to each stage's remaining headroom, at least one unit at
/// a time. Returns `None` when the bounds cannot be satisfied at all.
fn distribute(
    ty: ResourceType,
    bounds: &[StageBounds; STAGE_COUNT],
    caps: &ResourceUnitCaps,
) -> Option<Partition> {
    let mut counts = [0u32; STAGE_COUNT];
    let mut maxes = [0u32; STAGE_COUNT];
    for stage in 0..STAGE_COUNT {
        maxes[stage] = bounds[stage].max.min(caps.max_per_stage[stage]);
        if bounds[stage].min > maxes[stage] {
            warn!(
                ?ty,
                stage = ?ShaderStage::ALL[stage],
                "dropping unit partition: stage minimum exceeds device limit"
            );
            return None;
        }
        counts[stage] = bounds[stage].min;
    }

    let total_min: u32 = counts.iter().sum();
    if total_min > caps.max_total {
        warn!(?ty, total_min, max_total = caps.max_total, "dropping unit partition");
        return None;
    }

    let budget = caps
        .max_total
        .min(maxes.iter().fold(0u32, |acc, m| acc.saturating_add(*m)));
    let mut spare = budget - total_min;
    while spare > 0 {
        let total_headroom: u32 = (0..STAGE_COUNT).map(|s| maxes[s] - counts[s]).sum();
        if total_headroom == 0 {
            break;
        }
        for stage in 0..STAGE_COUNT {
            let headroom = maxes[stage] - counts[stage];
            if headroom == 0 {
                continue;
            }
            let share = ((spare as u64 * headroom as u64) / total_headroom as u64) as u32;
            let give = share.max(1).min(headroom).min(spare);
            counts[stage] += give;
            spare -= give;
            if spare == 0 {
                break;
            }
        }
    }

    let mut ranges = [None; STAGE_COUNT];
    let mut first = 0u32;
    for stage in 0..STAGE_COUNT {
        if counts[stage] > 0 {
            ranges[stage] = Some(StageRange {
                first,
                count: counts[stage],
            });
            first += counts[stage];
        }
    }
    Some(Partition { ranges })
}

/// All candidate partitions of a device, per mode and resource type.
#[derive(Debug)]
pub struct DevicePartitions {
    graphics: [Vec<Partition>; RESOURCE_TYPE_COUNT],
    compute: [Vec<Partition>; RESOURCE_TYPE_COUNT],
}

impl DevicePartitions {
    pub fn new(caps: &DeviceCaps) -> Self {
        let unit_caps = |ty: ResourceType| match ty {
            ResourceType::Texture => &caps.texture_units,
            ResourceType::UniformBuffer => &caps.uniform_buffer_units,
            ResourceType::StorageBuffer => &caps.storage_buffer_units,
            ResourceType::Image => &caps.image_units,
        };
        let bounds_for = |ty: ResourceType| -> &[[StageBounds; STAGE_COUNT]] {
            match ty {
                ResourceType::Texture => GRAPHICS_TEXTURE_BOUNDS,
                ResourceType::UniformBuffer | ResourceType::StorageBuffer => {
                    GRAPHICS_BUFFER_BOUNDS
                }
                ResourceType::Image => GRAPHICS_IMAGE_BOUNDS,
            }
        };

        let mut graphics: [Vec<Partition>; RESOURCE_TYPE_COUNT] = Default::default();
        let mut compute: [Vec<Partition>; RESOURCE_TYPE_COUNT] = Default::default();
        for ty in ResourceType::ALL {
            let unit_caps = unit_caps(ty);
            graphics[ty.index()] = bounds_for(ty)
                .iter()
                .filter_map(|bounds| distribute(ty, bounds, unit_caps))
                .collect();
            compute[ty.index()] = distribute(ty, &COMPUTE_BOUNDS, unit_caps)
                .into_iter()
                .collect();
        }
        DevicePartitions { graphics, compute }
    }

    pub fn candidates(&self, mode: PipelineMode, ty: ResourceType) -> &[Partition] {
        match mode {
            PipelineMode::Graphics => &self.graphics[ty.index()],
            PipelineMode::Compute => &self.compute[ty.index()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_gl::DeviceCaps;

    #[test]
    fn graphics_texture_ranges_are_disjoint_and_within_budget() {
        let caps = DeviceCaps::desktop();
        let partitions = DevicePartitions::new(&caps);
        for partition in partitions.candidates(PipelineMode::Graphics, ResourceType::Texture) {
            let mut end = 0u32;
            let mut total = 0u32;
            for range in partition.ranges.iter().flatten() {
                assert_eq!(range.first, end, "ranges must be contiguous and disjoint");
                end += range.count;
                total += range.count;
            }
            assert!(total <= caps.texture_units.max_total);
        }
    }

    #[test]
    fn spare_capacity_spreads_beyond_minimums() {
        let caps = DeviceCaps::desktop();
        let partitions = DevicePartitions::new(&caps);
        let first = &partitions.candidates(PipelineMode::Graphics, ResourceType::Texture)[0];
        let vertex = first.ranges[0].unwrap();
        let fragment = first.ranges[4].unwrap();
        assert!(vertex.count > 4, "vertex stage should receive spare units");
        assert!(fragment.count > 8, "fragment stage should receive spare units");
        assert!(fragment.count >= vertex.count, "spread follows headroom");
    }

    #[test]
    fn compute_partition_owns_all_units() {
        let caps = DeviceCaps::desktop();
        let partitions = DevicePartitions::new(&caps);
        let only = &partitions.candidates(PipelineMode::Compute, ResourceType::Texture)[0];
        let compute = only.ranges[5].unwrap();
        assert_eq!(compute.first, 0);
        assert_eq!(
            compute.count,
            caps.texture_units.max_per_stage[5].min(caps.texture_units.max_total)
        );
        assert!(only.ranges[..5].iter().all(Option::is_none));
    }

    #[test]
    fn unsatisfiable_bounds_are_dropped() {
        let mut caps = DeviceCaps::desktop();
        caps.texture_units = lattice_gl::ResourceUnitCaps::uniform(2, 4);
        let partitions = DevicePartitions::new(&caps);
        // The all-stage variant needs more than 4 units of minimums.
        assert!(
            partitions.candidates(PipelineMode::Graphics, ResourceType::Texture).len() < 2
        );
    }

    #[test]
    fn fit_is_all_or_nothing() {
        let partition = Partition {
            ranges: {
                let mut r = [None; STAGE_COUNT];
                r[0] = Some(StageRange { first: 0, count: 4 });
                r[4] = Some(StageRange { first: 4, count: 8 });
                r
            },
        };
        let mut windows = [None; STAGE_COUNT];
        windows[0] = Some(3);
        windows[4] = Some(7);
        assert!(partition.fits(&windows));
        // One stage overflowing rejects the whole partition.
        windows[0] = Some(4);
        assert!(!partition.fits(&windows));
        // A window on a stage with no range rejects too.
        windows[0] = None;
        windows[3] = Some(0);
        assert!(!partition.fits(&windows));
    }
}
