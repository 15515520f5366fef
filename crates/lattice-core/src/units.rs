//! Shader-slot to hardware-unit mapping.
//!
//! A compiled pipeline carries one immutable [`UnitMap`] per resource type,
//! translating every declared shader slot to the hardware unit it was
//! bound to at link time. Maps are interned by content so pipelines with
//! identical resource-usage patterns share one instance; the flush path
//! relies on that pointer identity to tell whether a pipeline switch
//! changed a unit class at all.

use std::collections::HashMap;
use std::sync::Arc;

use lattice_gl::{DeviceCaps, ShaderStage, STAGE_COUNT};
use lattice_psb::ShaderReflection;
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::cache::CacheStats;
use crate::error::ContextError;
use crate::partition::DevicePartitions;
use crate::pipeline::PipelineMode;

/// Resource classes with distinct hardware unit namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Texture,
    UniformBuffer,
    StorageBuffer,
    Image,
}

pub const RESOURCE_TYPE_COUNT: usize = 4;

impl ResourceType {
    pub const ALL: [ResourceType; RESOURCE_TYPE_COUNT] = [
        Self::Texture,
        Self::UniformBuffer,
        Self::StorageBuffer,
        Self::Image,
    ];

    pub fn index(self) -> usize {
        match self {
            Self::Texture => 0,
            Self::UniformBuffer => 1,
            Self::StorageBuffer => 2,
            Self::Image => 3,
        }
    }
}

/// Sentinel for "no sampler slot associated with this entry".
pub const SAMPLER_NONE: u16 = u16::MAX;

/// One slot-to-unit assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitMapEntry {
    /// Stage index per [`ShaderStage::index`].
    pub stage: u16,
    /// Shader-declared logical slot.
    pub slot: u16,
    /// Associated sampler slot, [`SAMPLER_NONE`] when not applicable.
    pub sampler_slot: u16,
    /// Hardware unit the slot was bound to.
    pub unit: u16,
}

impl UnitMapEntry {
    fn to_bytes(self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[0..2].copy_from_slice(&self.stage.to_le_bytes());
        out[2..4].copy_from_slice(&self.slot.to_le_bytes());
        out[4..6].copy_from_slice(&self.sampler_slot.to_le_bytes());
        out[6..8].copy_from_slice(&self.unit.to_le_bytes());
        out
    }
}

/// Immutable slot-to-unit table for one resource type.
#[derive(Debug, PartialEq, Eq)]
pub struct UnitMap {
    entries: Vec<UnitMapEntry>,
}

impl UnitMap {
    pub fn entries(&self) -> &[UnitMapEntry] {
        &self.entries
    }

    /// The hardware unit assigned to `slot` of `stage`, if any.
    pub fn unit_for(&self, stage: ShaderStage, slot: u16) -> Option<u16> {
        let stage = stage.index() as u16;
        self.entries
            .iter()
            .find(|e| e.stage == stage && e.slot == slot)
            .map(|e| e.unit)
    }

    fn content_hash(entries: &[UnitMapEntry]) -> u64 {
        let mut bytes = Vec::with_capacity(entries.len() * 8);
        for entry in entries {
            bytes.extend_from_slice(&entry.to_bytes());
        }
        xxh3_64(&bytes)
    }
}

/// Content-addressed interner for unit maps.
#[derive(Debug, Default)]
pub struct UnitMapCache {
    buckets: HashMap<u64, Vec<Arc<UnitMap>>>,
    pub stats: CacheStats,
}

impl UnitMapCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shared map with exactly these entries, inserting it on
    /// first sight.
    pub fn intern(&mut self, entries: Vec<UnitMapEntry>) -> Arc<UnitMap> {
        let hash = UnitMap::content_hash(&entries);
        let bucket = self.buckets.entry(hash).or_default();
        if let Some(existing) = bucket.iter().find(|m| m.entries == entries) {
            self.stats.hit();
            return Arc::clone(existing);
        }
        self.stats.miss();
        let map = Arc::new(UnitMap { entries });
        bucket.push(Arc::clone(&map));
        map
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// One active stage's reflection, input to the mapper.
pub struct StageDeclarations<'a> {
    pub stage: ShaderStage,
    pub reflection: &'a ShaderReflection,
}

struct Declaration {
    stage: usize,
    slot: u16,
    sampler_slot: u16,
    declared_unit: u32,
}

fn declarations_of(stages: &[StageDeclarations<'_>], ty: ResourceType) -> Vec<Declaration> {
    let mut out = Vec::new();
    for active in stages {
        let stage = active.stage.index();
        let source = &active.reflection.source;
        match ty {
            ResourceType::Texture => {
                for sampler in &source.samplers {
                    out.push(Declaration {
                        stage,
                        slot: sampler.texture_index as u16,
                        sampler_slot: sampler.sampler_index as u16,
                        declared_unit: sampler.unit_index,
                    });
                }
            }
            ResourceType::UniformBuffer => {
                for entry in &source.uniform_buffers {
                    out.push(Declaration {
                        stage,
                        slot: entry.index as u16,
                        sampler_slot: SAMPLER_NONE,
                        declared_unit: entry.index,
                    });
                }
            }
            ResourceType::StorageBuffer => {
                for entry in &source.storage_buffers {
                    out.push(Declaration {
                        stage,
                        slot: entry.index as u16,
                        sampler_slot: SAMPLER_NONE,
                        declared_unit: entry.index,
                    });
                }
            }
            ResourceType::Image => {
                for entry in &source.images {
                    out.push(Declaration {
                        stage,
                        slot: entry.index as u16,
                        sampler_slot: SAMPLER_NONE,
                        declared_unit: entry.index,
                    });
                }
            }
        }
    }
    out
}

/// Builds the per-type unit maps for one pipeline.
///
/// Per resource type: compute each stage's declared-unit window, pick the
/// first pre-computed partition containing every active window and remap
/// declared indices through it; with no fitting partition, assign units
/// sequentially in declaration order instead. Types with no declarations
/// at all get no map. Fails when the declarations of one type outnumber
/// the device's aggregate units for it; every emitted unit stays below
/// that aggregate limit.
pub fn build_unit_maps(
    stages: &[StageDeclarations<'_>],
    mode: PipelineMode,
    partitions: &DevicePartitions,
    caps: &DeviceCaps,
    cache: &mut UnitMapCache,
) -> Result<[Option<Arc<UnitMap>>; RESOURCE_TYPE_COUNT], ContextError> {
    let mut maps: [Option<Arc<UnitMap>>; RESOURCE_TYPE_COUNT] = Default::default();
    for ty in ResourceType::ALL {
        let declarations = declarations_of(stages, ty);
        if declarations.is_empty() {
            continue;
        }

        let mut windows: [Option<u32>; STAGE_COUNT] = [None; STAGE_COUNT];
        for decl in &declarations {
            let window = windows[decl.stage].get_or_insert(0);
            *window = (*window).max(decl.declared_unit);
        }

        let partition = partitions
            .candidates(mode, ty)
            .iter()
            .find(|p| p.fits(&windows));

        let entries: Vec<UnitMapEntry> = match partition {
            Some(partition) => declarations
                .iter()
                .map(|decl| {
                    // fits() guarantees the range exists.
                    let first = partition.ranges[decl.stage].map_or(0, |r| r.first);
                    UnitMapEntry {
                        stage: decl.stage as u16,
                        slot: decl.slot,
                        sampler_slot: decl.sampler_slot,
                        unit: (first + decl.declared_unit) as u16,
                    }
                })
                .collect(),
            None => {
                let limit = aggregate_limit(caps, ty);
                if declarations.len() as u32 > limit {
                    warn!(
                        ?ty,
                        declared = declarations.len(),
                        limit,
                        "pipeline declares more resources than the device has units"
                    );
                    return Err(ContextError::Unsupported {
                        feature: "more resource declarations than the device has hardware units",
                    });
                }
                declarations
                    .iter()
                    .enumerate()
                    .map(|(next, decl)| UnitMapEntry {
                        stage: decl.stage as u16,
                        slot: decl.slot,
                        sampler_slot: decl.sampler_slot,
                        unit: next as u16,
                    })
                    .collect()
            }
        };

        debug!(
            ?ty,
            entries = entries.len(),
            partitioned = partition.is_some(),
            "built unit map"
        );
        maps[ty.index()] = Some(cache.intern(entries));
    }
    Ok(maps)
}

fn aggregate_limit(caps: &DeviceCaps, ty: ResourceType) -> u32 {
    match ty {
        ResourceType::Texture => caps.texture_units.max_total,
        ResourceType::UniformBuffer => caps.uniform_buffer_units.max_total,
        ResourceType::StorageBuffer => caps.storage_buffer_units.max_total,
        ResourceType::Image => caps.image_units.max_total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(stage: u16, slot: u16, unit: u16) -> UnitMapEntry {
        UnitMapEntry {
            stage,
            slot,
            sampler_slot: SAMPLER_NONE,
            unit,
        }
    }

    #[test]
    fn interning_shares_identical_content() {
        let mut cache = UnitMapCache::new();
        let a = cache.intern(vec![entry(0, 0, 0), entry(4, 1, 17)]);
        let b = cache.intern(vec![entry(0, 0, 0), entry(4, 1, 17)]);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.stats.hits, 1);
        assert_eq!(cache.stats.misses, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn different_content_gets_distinct_maps() {
        let mut cache = UnitMapCache::new();
        let a = cache.intern(vec![entry(0, 0, 0)]);
        let b = cache.intern(vec![entry(0, 0, 1)]);
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 2);
    }

    fn reflection_with_samplers(count: u32) -> ShaderReflection {
        let mut builder = lattice_psb::test_utils::SourceChunkBuilder::new(
            "uniform sampler2D tex_s;\nvoid main() {}\n",
        );
        for i in 0..count {
            builder = builder.sampler(i, i, i, true, false, "tex_s", "");
        }
        ShaderReflection::parse(&builder.build_blob(None, None)).expect("blob")
    }

    #[test]
    fn fallback_units_stay_within_the_device_aggregate() {
        let caps = DeviceCaps::desktop();
        let partitions = DevicePartitions::new(&caps);
        let mut cache = UnitMapCache::new();

        // 60 fragment samplers overflow every partition's fragment range
        // but fit the aggregate, so the fallback assigns them sequentially.
        let refl = reflection_with_samplers(60);
        let stages = [StageDeclarations {
            stage: ShaderStage::Fragment,
            reflection: &refl,
        }];
        let maps =
            build_unit_maps(&stages, PipelineMode::Graphics, &partitions, &caps, &mut cache)
                .expect("within limits");
        let map = maps[ResourceType::Texture.index()].as_ref().expect("texture map");
        assert_eq!(map.entries().len(), 60);
        assert!(map
            .entries()
            .iter()
            .all(|e| (e.unit as u32) < caps.texture_units.max_total));

        let refl = reflection_with_samplers(100);
        let stages = [StageDeclarations {
            stage: ShaderStage::Fragment,
            reflection: &refl,
        }];
        let err = build_unit_maps(&stages, PipelineMode::Graphics, &partitions, &caps, &mut cache);
        assert!(matches!(err, Err(ContextError::Unsupported { .. })));
    }

    #[test]
    fn unit_lookup_by_stage_and_slot() {
        let mut cache = UnitMapCache::new();
        let map = cache.intern(vec![entry(0, 2, 5), entry(4, 2, 9)]);
        assert_eq!(map.unit_for(ShaderStage::Vertex, 2), Some(5));
        assert_eq!(map.unit_for(ShaderStage::Fragment, 2), Some(9));
        assert_eq!(map.unit_for(ShaderStage::Geometry, 2), None);
    }
}
