//! The shared device.
//!
//! Immutable after creation: capabilities, format metadata and the
//! pre-computed unit partitions are read by every context of the device,
//! and the name pool refcounts natives shared across contexts.

use std::sync::Arc;

use lattice_gl::{DeviceCaps, NamePool};

use crate::formats::FormatTable;
use crate::partition::DevicePartitions;

pub struct Device {
    caps: DeviceCaps,
    formats: FormatTable,
    partitions: DevicePartitions,
    names: NamePool,
}

impl Device {
    pub fn new(caps: DeviceCaps, formats: FormatTable) -> Arc<Self> {
        let partitions = DevicePartitions::new(&caps);
        Arc::new(Device {
            caps,
            formats,
            partitions,
            names: NamePool::new(),
        })
    }

    pub fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    pub fn formats(&self) -> &FormatTable {
        &self.formats
    }

    pub(crate) fn partitions(&self) -> &DevicePartitions {
        &self.partitions
    }

    pub(crate) fn names(&self) -> &NamePool {
        &self.names
    }
}
