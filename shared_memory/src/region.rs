//! Shared-memory region

use core_types::{PhysicalPages, ProcessId, RegionId};
use std::collections::BTreeMap;

/// A run of frames that several processes may map
///
/// The region stays alive while its owner still holds it or while any
/// process has it mapped.
#[derive(Debug)]
pub struct Region {
    id: RegionId,
    owner: ProcessId,
    frames: PhysicalPages,
    mappings: BTreeMap<ProcessId, u64>,
    owner_released: bool,
    charged: bool,
}

impl Region {
    pub(crate) fn new(id: RegionId, owner: ProcessId, frames: PhysicalPages) -> Self {
        Self {
            id,
            owner,
            frames,
            mappings: BTreeMap::new(),
            owner_released: false,
            charged: true,
        }
    }

    pub fn id(&self) -> RegionId {
        self.id
    }

    pub fn owner(&self) -> ProcessId {
        self.owner
    }

    /// Size in pages
    pub fn pages(&self) -> u64 {
        self.frames.page_count()
    }

    /// Backing frames shared by every mapping
    pub fn frames(&self) -> &PhysicalPages {
        &self.frames
    }

    /// Address at which `process` has the region mapped
    pub fn mapping_of(&self, process: ProcessId) -> Option<u64> {
        self.mappings.get(&process).copied()
    }

    /// Every current mapping
    pub fn mappings(&self) -> impl Iterator<Item = (ProcessId, u64)> + '_ {
        self.mappings.iter().map(|(pid, addr)| (*pid, *addr))
    }

    pub fn mapping_count(&self) -> usize {
        self.mappings.len()
    }

    /// Returns true once the owner has destroyed or abandoned the region
    pub fn owner_released(&self) -> bool {
        self.owner_released
    }

    pub(crate) fn add_mapping(&mut self, process: ProcessId, addr: u64) {
        self.mappings.insert(process, addr);
    }

    pub(crate) fn remove_mapping(&mut self, process: ProcessId) -> Option<u64> {
        self.mappings.remove(&process)
    }

    pub(crate) fn release_owner(&mut self) {
        self.owner_released = true;
    }

    /// Clears the quota charge, returning whether it was still held
    pub(crate) fn take_charge(&mut self) -> bool {
        std::mem::replace(&mut self.charged, false)
    }

    /// Returns true when nothing references the region any more
    pub(crate) fn is_unreferenced(&self) -> bool {
        self.owner_released && self.mappings.is_empty()
    }
}
