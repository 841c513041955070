//! Address space management for SimulatedKernel
//!
//! This module implements the simulation-level memory manager: one address
//! space per process, page-granular mappings backed by [`PhysicalPages`], and
//! a bounded physical frame pool.
//!
//! Mappings are either anonymous (private scratch memory) or shared (the
//! frames of a shared-memory region). Both kinds go through the same
//! validation and copy paths, so a user buffer may straddle them.

use crate::audit::EventRing;
use core_types::{
    is_page_aligned, AccessKind, MemoryError, MemoryPerms, PhysicalPages, ProcessId, UserRange,
    PAGE_SIZE, USER_SPACE_END,
};
use kernel_api::MemoryManager;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Lowest address chosen for a shared-memory mapping without a hint
pub const SHM_MAP_BASE: u64 = 0x0000_0000_6000_0000;

/// Default size of the physical frame pool, in pages
pub const DEFAULT_PHYSICAL_PAGES: u64 = 1024;

/// Kind of mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MappingKind {
    Anonymous,
    Shared,
}

/// Address space audit events (test-only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressSpaceEvent {
    /// Address space created
    SpaceCreated { process: ProcessId },
    /// Pages mapped
    Mapped {
        process: ProcessId,
        base: u64,
        pages: u64,
        kind: MappingKind,
    },
    /// Pages unmapped
    Unmapped {
        process: ProcessId,
        base: u64,
        pages: u64,
    },
    /// A user range failed validation
    AccessDenied {
        process: ProcessId,
        addr: u64,
        len: u64,
        access: AccessKind,
    },
    /// Address space destroyed
    SpaceDestroyed { process: ProcessId, mappings: usize },
}

/// Audit log for address space operations
#[derive(Debug, Clone, Default)]
pub struct AddressSpaceAuditLog {
    events: EventRing<AddressSpaceEvent>,
}

impl AddressSpaceAuditLog {
    /// Creates a new empty audit log
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a log that retains at most `capacity` events
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: EventRing::with_capacity(capacity),
        }
    }

    /// Events discarded to stay within capacity
    pub fn dropped(&self) -> u64 {
        self.events.dropped()
    }

    /// Records an event
    pub fn record(&mut self, event: AddressSpaceEvent) {
        self.events.push(event);
    }

    /// Returns all recorded events
    pub fn events(&self) -> &[AddressSpaceEvent] {
        self.events.as_slice()
    }

    /// Clears all events
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Checks if an event matching the predicate exists
    pub fn has_event<F>(&self, predicate: F) -> bool
    where
        F: Fn(&AddressSpaceEvent) -> bool,
    {
        self.events.as_slice().iter().any(predicate)
    }

    /// Counts events matching the predicate
    pub fn count_events<F>(&self, predicate: F) -> usize
    where
        F: Fn(&AddressSpaceEvent) -> bool,
    {
        self.events.as_slice().iter().filter(|e| predicate(e)).count()
    }
}

#[derive(Debug, Clone)]
struct Mapping {
    frames: PhysicalPages,
    perms: MemoryPerms,
    kind: MappingKind,
}

impl Mapping {
    fn len(&self) -> u64 {
        self.frames.len()
    }
}

/// Mappings of one process, keyed by base address
#[derive(Debug, Default)]
struct AddressSpace {
    mappings: BTreeMap<u64, Mapping>,
}

impl AddressSpace {
    /// Mapping containing `addr`, with its base
    fn lookup(&self, addr: u64) -> Option<(u64, &Mapping)> {
        let (base, mapping) = self.mappings.range(..=addr).next_back()?;
        (addr < base + mapping.len()).then_some((*base, mapping))
    }

    fn overlaps(&self, start: u64, len: u64) -> Option<u64> {
        let end = start + len;
        self.mappings
            .iter()
            .find(|(base, m)| **base < end && **base + m.len() > start)
            .map(|(base, _)| *base)
    }

    /// First free page-aligned gap of `len` bytes at or above `floor`
    fn find_free(&self, floor: u64, len: u64) -> Option<u64> {
        let mut candidate = floor;
        for (base, mapping) in &self.mappings {
            let end = base + mapping.len();
            if end <= candidate {
                continue;
            }
            if *base >= candidate.checked_add(len)? {
                break;
            }
            candidate = end;
        }
        let end = candidate.checked_add(len)?;
        (end <= USER_SPACE_END).then_some(candidate)
    }

    /// Splits `range` into (frames, offset, chunk) pieces
    ///
    /// Fails unless every byte is covered by a mapping allowing `access`.
    fn pieces(
        &self,
        range: UserRange,
        access: AccessKind,
    ) -> Result<Vec<(PhysicalPages, u64, usize)>, MemoryError> {
        let mut pieces = Vec::new();
        let mut cursor = range.addr();
        while cursor < range.end() {
            let (base, mapping) = self
                .lookup(cursor)
                .ok_or(MemoryError::Unmapped { addr: cursor })?;
            if !mapping.perms.allows(access) {
                return Err(MemoryError::AccessDenied {
                    addr: cursor,
                    access,
                });
            }
            let chunk_end = (base + mapping.len()).min(range.end());
            pieces.push((
                mapping.frames.clone(),
                cursor - base,
                (chunk_end - cursor) as usize,
            ));
            cursor = chunk_end;
        }
        Ok(pieces)
    }
}

/// Address space manager for SimulatedKernel
///
/// Spaces live behind one reader-writer lock; validation and copies take the
/// read side, mapping changes the write side. Frames are counted in an
/// atomic pool that every [`PhysicalPages`] handle refills when dropped.
#[derive(Debug)]
pub struct AddressSpaceManager {
    spaces: RwLock<HashMap<ProcessId, AddressSpace>>,
    free_frames: Arc<AtomicU64>,
    total_frames: u64,
    audit_log: Mutex<AddressSpaceAuditLog>,
}

impl AddressSpaceManager {
    /// Creates a manager with a pool of `total_frames` physical pages
    pub fn new(total_frames: u64) -> Self {
        Self {
            spaces: RwLock::new(HashMap::new()),
            free_frames: Arc::new(AtomicU64::new(total_frames)),
            total_frames,
            audit_log: Mutex::new(AddressSpaceAuditLog::new()),
        }
    }

    /// Keeps at most `capacity` audit events
    pub fn with_audit_capacity(mut self, capacity: usize) -> Self {
        self.audit_log = Mutex::new(AddressSpaceAuditLog::with_capacity(capacity));
        self
    }

    fn record(&self, event: AddressSpaceEvent) {
        self.audit_log.lock().record(event);
    }

    /// Creates an empty address space for `process`
    pub fn create_space(&self, process: ProcessId) {
        self.spaces.write().entry(process).or_default();
        self.record(AddressSpaceEvent::SpaceCreated { process });
    }

    /// Destroys the address space of `process`
    ///
    /// Frames that no other mapping shares return to the pool. Returns the
    /// number of mappings that were dropped.
    pub fn destroy_space(&self, process: ProcessId) -> usize {
        let removed = self.spaces.write().remove(&process);
        let mappings = removed.map(|space| space.mappings.len()).unwrap_or(0);
        self.record(AddressSpaceEvent::SpaceDestroyed { process, mappings });
        mappings
    }

    pub fn has_space(&self, process: ProcessId) -> bool {
        self.spaces.read().contains_key(&process)
    }

    /// Maps fresh zero-filled pages into `process`
    ///
    /// A zero `addr_hint` places the mapping at the first free address at
    /// or above one page.
    pub fn map_anonymous(
        &self,
        process: ProcessId,
        addr_hint: u64,
        pages: u64,
        perms: MemoryPerms,
    ) -> Result<u64, MemoryError> {
        let frames = self.allocate_frames(pages)?;
        self.insert_mapping(process, addr_hint, PAGE_SIZE, frames, perms, MappingKind::Anonymous)
    }

    fn insert_mapping(
        &self,
        process: ProcessId,
        addr_hint: u64,
        floor: u64,
        frames: PhysicalPages,
        perms: MemoryPerms,
        kind: MappingKind,
    ) -> Result<u64, MemoryError> {
        let len = frames.len();
        let mut spaces = self.spaces.write();
        let space = spaces
            .get_mut(&process)
            .ok_or(MemoryError::NoAddressSpace(process.as_u32()))?;

        let base = if addr_hint != 0 {
            UserRange::new(addr_hint, len)?;
            if !is_page_aligned(addr_hint) {
                return Err(MemoryError::Misaligned { addr: addr_hint });
            }
            if let Some(existing) = space.overlaps(addr_hint, len) {
                return Err(MemoryError::Overlap { addr: existing });
            }
            addr_hint
        } else {
            space
                .find_free(floor, len)
                .ok_or(MemoryError::AddressSpaceExhausted {
                    pages: frames.page_count(),
                })?
        };

        let pages = frames.page_count();
        space.mappings.insert(base, Mapping { frames, perms, kind });
        drop(spaces);
        self.record(AddressSpaceEvent::Mapped {
            process,
            base,
            pages,
            kind,
        });
        Ok(base)
    }

    /// Number of mappings in the space of `process`
    pub fn mapping_count(&self, process: ProcessId) -> usize {
        self.spaces
            .read()
            .get(&process)
            .map(|space| space.mappings.len())
            .unwrap_or(0)
    }

    /// Base and page count of the mapping containing `addr`
    pub fn mapping_at(&self, process: ProcessId, addr: u64) -> Option<(u64, u64)> {
        let spaces = self.spaces.read();
        let (base, mapping) = spaces.get(&process)?.lookup(addr)?;
        Some((base, mapping.frames.page_count()))
    }

    /// Frames currently in the pool
    pub fn free_frames(&self) -> u64 {
        self.free_frames.load(Ordering::SeqCst)
    }

    /// Size of the pool
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Returns a snapshot of the audit log (test-only)
    pub fn audit_log(&self) -> AddressSpaceAuditLog {
        self.audit_log.lock().clone()
    }

    /// Clears the audit log (test-only)
    pub fn clear_audit_log(&self) {
        self.audit_log.lock().clear();
    }
}

impl Default for AddressSpaceManager {
    fn default() -> Self {
        Self::new(DEFAULT_PHYSICAL_PAGES)
    }
}

impl MemoryManager for AddressSpaceManager {
    fn validate_user_range(&self, process: ProcessId, range: UserRange, access: AccessKind) -> bool {
        let valid = match self.spaces.read().get(&process) {
            Some(space) => range.is_empty() || space.pieces(range, access).is_ok(),
            None => false,
        };
        if !valid {
            self.record(AddressSpaceEvent::AccessDenied {
                process,
                addr: range.addr(),
                len: range.len(),
                access,
            });
        }
        valid
    }

    fn copy_from_user(&self, process: ProcessId, range: UserRange) -> Result<Vec<u8>, MemoryError> {
        let pieces = {
            let spaces = self.spaces.read();
            let space = spaces
                .get(&process)
                .ok_or(MemoryError::NoAddressSpace(process.as_u32()))?;
            space.pieces(range, AccessKind::Read)?
        };
        let mut out = vec![0u8; range.len() as usize];
        let mut written = 0;
        for (frames, offset, chunk) in pieces {
            frames.read_at(offset, &mut out[written..written + chunk])?;
            written += chunk;
        }
        Ok(out)
    }

    fn copy_to_user(
        &self,
        process: ProcessId,
        range: UserRange,
        data: &[u8],
    ) -> Result<(), MemoryError> {
        if data.len() as u64 != range.len() {
            return Err(MemoryError::FrameOutOfBounds {
                offset: 0,
                len: data.len() as u64,
            });
        }
        let pieces = {
            let spaces = self.spaces.read();
            let space = spaces
                .get(&process)
                .ok_or(MemoryError::NoAddressSpace(process.as_u32()))?;
            space.pieces(range, AccessKind::Write)?
        };
        let mut read = 0;
        for (frames, offset, chunk) in pieces {
            frames.write_at(offset, &data[read..read + chunk])?;
            read += chunk;
        }
        Ok(())
    }

    fn allocate_frames(&self, pages: u64) -> Result<PhysicalPages, MemoryError> {
        if pages == 0 {
            return Err(MemoryError::InvalidSize(0));
        }
        self.free_frames
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |free| {
                free.checked_sub(pages)
            })
            .map_err(|available| MemoryError::OutOfFrames {
                requested: pages,
                available,
            })?;
        let pool = self.free_frames.clone();
        PhysicalPages::zeroed_with_release(pages, move |n| {
            pool.fetch_add(n, Ordering::SeqCst);
        })
        .inspect_err(|_| {
            self.free_frames.fetch_add(pages, Ordering::SeqCst);
        })
    }

    fn map_physical(
        &self,
        process: ProcessId,
        addr_hint: u64,
        frames: &PhysicalPages,
    ) -> Result<u64, MemoryError> {
        self.insert_mapping(
            process,
            addr_hint,
            SHM_MAP_BASE,
            frames.clone(),
            MemoryPerms::read_write(),
            MappingKind::Shared,
        )
    }

    fn unmap(&self, process: ProcessId, addr: u64, pages: u64) -> Result<(), MemoryError> {
        let mut spaces = self.spaces.write();
        let space = spaces
            .get_mut(&process)
            .ok_or(MemoryError::NoAddressSpace(process.as_u32()))?;
        match space.mappings.get(&addr) {
            Some(mapping) if mapping.frames.page_count() == pages => {}
            _ => return Err(MemoryError::Unmapped { addr }),
        }
        space.mappings.remove(&addr);
        drop(spaces);
        self.record(AddressSpaceEvent::Unmapped {
            process,
            base: addr,
            pages,
        });
        Ok(())
    }
}
