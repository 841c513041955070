//! Shared-memory manager
//!
//! Regions live in a fixed-capacity arena. Creation is charged to the
//! owner's quota; the charge is returned exactly once, when the region is
//! freed or when its owner exits, whichever comes first.

use crate::Region;
use core_types::{pages_for, IdAllocator, ProcessId, RegionId};
use kernel_api::{KernelError, MemoryManager};
use resources::{QuotaLedger, ResourceKind};

/// Largest region, in pages
pub const MAX_SHM_PAGES: u64 = 16;

/// Default number of region slots
pub const DEFAULT_SHM_CAPACITY: usize = 32;

/// Table of shared-memory regions
#[derive(Debug)]
pub struct SharedMemoryManager {
    slots: Vec<Option<Region>>,
    ids: IdAllocator,
}

impl SharedMemoryManager {
    /// Creates a manager with `capacity` region slots
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            ids: IdAllocator::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of live regions
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up a live region
    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.slots.iter().flatten().find(|r| r.id() == id)
    }

    fn index_of(&self, id: RegionId) -> Result<usize, KernelError> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|r| r.id() == id))
            .ok_or_else(|| KernelError::NotFound(id.to_string()))
    }

    /// Creates a zero-filled region of at least `size` bytes
    ///
    /// Every check runs before the quota is reserved. Frames are allocated
    /// before the reservation and go straight back to the pool if anything
    /// after them fails.
    pub fn create(
        &mut self,
        owner: ProcessId,
        size: u64,
        ledger: &mut QuotaLedger,
        mm: &dyn MemoryManager,
    ) -> Result<RegionId, KernelError> {
        let pages = pages_for(size)
            .filter(|pages| (1..=MAX_SHM_PAGES).contains(pages))
            .ok_or_else(|| {
                log::debug!("{}: rejected shm size {}", owner, size);
                KernelError::InvalidArgument(format!("shm size {}", size))
            })?;
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or_else(|| KernelError::CapacityExhausted("shm table".into()))?;
        if self.ids.peek().is_none() {
            return Err(KernelError::CapacityExhausted("shm ids".into()));
        }
        ledger.check(owner, ResourceKind::SharedMemoryRegions)?;

        let frames = mm
            .allocate_frames(pages)
            .map_err(|err| KernelError::CapacityExhausted(err.to_string()))?;
        let id = self
            .ids
            .allocate()
            .map(RegionId::new)
            .ok_or_else(|| KernelError::CapacityExhausted("shm ids".into()))?;
        ledger.try_reserve(owner, ResourceKind::SharedMemoryRegions)?;

        self.slots[index] = Some(Region::new(id, owner, frames));
        log::debug!("{} created {} ({} pages)", owner, id, pages);
        Ok(id)
    }

    /// Maps a region into `caller`'s address space
    ///
    /// Mapping a region the caller already has mapped returns the existing
    /// address.
    pub fn map(
        &mut self,
        id: RegionId,
        caller: ProcessId,
        addr_hint: u64,
        mm: &dyn MemoryManager,
    ) -> Result<u64, KernelError> {
        let index = self.index_of(id)?;
        let Some(region) = self.slots[index].as_mut() else {
            return Err(KernelError::NotFound(id.to_string()));
        };
        if let Some(addr) = region.mapping_of(caller) {
            return Ok(addr);
        }
        if region.owner_released() {
            return Err(KernelError::NotFound(id.to_string()));
        }

        let addr = mm.map_physical(caller, addr_hint, region.frames())?;
        region.add_mapping(caller, addr);
        log::debug!("{} mapped {} at {:#x}", caller, id, addr);
        Ok(addr)
    }

    /// Removes `caller`'s mapping of a region
    pub fn unmap(
        &mut self,
        id: RegionId,
        caller: ProcessId,
        ledger: &mut QuotaLedger,
        mm: &dyn MemoryManager,
    ) -> Result<(), KernelError> {
        let index = self.index_of(id)?;
        let Some(region) = self.slots[index].as_mut() else {
            return Err(KernelError::NotFound(id.to_string()));
        };
        let addr = region
            .mapping_of(caller)
            .ok_or_else(|| KernelError::NotFound(format!("{} not mapped by {}", id, caller)))?;

        mm.unmap(caller, addr, region.pages())?;
        region.remove_mapping(caller);
        log::debug!("{} unmapped {}", caller, id);
        self.free_if_unreferenced(index, ledger);
        Ok(())
    }

    /// Drops the owner's reference to a region
    ///
    /// The region is freed now if nobody has it mapped, otherwise when the
    /// last mapping goes.
    pub fn destroy(
        &mut self,
        id: RegionId,
        caller: ProcessId,
        ledger: &mut QuotaLedger,
    ) -> Result<(), KernelError> {
        let index = self.index_of(id)?;
        let Some(region) = self.slots[index].as_mut() else {
            return Err(KernelError::NotFound(id.to_string()));
        };
        if region.owner() != caller {
            return Err(KernelError::PermissionDenied(format!(
                "{} does not own {}",
                caller, id
            )));
        }
        if region.owner_released() {
            return Err(KernelError::NotFound(id.to_string()));
        }
        region.release_owner();
        self.free_if_unreferenced(index, ledger);
        Ok(())
    }

    /// Drops every mapping and ownership held by an exiting process
    ///
    /// Quota charged to the process is returned immediately even if other
    /// processes keep the region alive.
    pub fn release_process(
        &mut self,
        process: ProcessId,
        ledger: &mut QuotaLedger,
        mm: &dyn MemoryManager,
    ) {
        for index in 0..self.slots.len() {
            let Some(region) = self.slots[index].as_mut() else {
                continue;
            };
            if let Some(addr) = region.remove_mapping(process) {
                if let Err(err) = mm.unmap(process, addr, region.pages()) {
                    log::debug!("{}: unmap of {} during exit: {}", process, region.id(), err);
                }
            }
            if region.owner() == process {
                region.release_owner();
                if region.take_charge() {
                    ledger.release(process, ResourceKind::SharedMemoryRegions);
                }
            }
            self.free_if_unreferenced(index, ledger);
        }
    }

    fn free_if_unreferenced(&mut self, index: usize, ledger: &mut QuotaLedger) {
        let unreferenced = self.slots[index]
            .as_ref()
            .is_some_and(Region::is_unreferenced);
        if !unreferenced {
            return;
        }
        if let Some(mut region) = self.slots[index].take() {
            if region.take_charge() {
                ledger.release(region.owner(), ResourceKind::SharedMemoryRegions);
            }
            log::debug!("{} freed ({} pages)", region.id(), region.pages());
        }
    }
}

impl Default for SharedMemoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_SHM_CAPACITY)
    }
}
