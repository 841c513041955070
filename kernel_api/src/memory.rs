//! Memory manager collaborator

use core_types::{AccessKind, MemoryError, PhysicalPages, ProcessId, UserRange};

/// Virtual memory interface used by the kernel core
///
/// Implementations own the page tables of every process. The core only asks
/// questions about ranges and moves bytes through this trait; it never
/// dereferences a user address itself.
pub trait MemoryManager: Send + Sync {
    /// Checks that every byte of `range` is mapped with `access` for `process`
    fn validate_user_range(&self, process: ProcessId, range: UserRange, access: AccessKind)
        -> bool;

    /// Copies `range` out of the process's address space
    fn copy_from_user(&self, process: ProcessId, range: UserRange)
        -> Result<Vec<u8>, MemoryError>;

    /// Copies `data` into the process's address space at `range.addr()`
    ///
    /// `range.len()` must equal `data.len()`.
    fn copy_to_user(
        &self,
        process: ProcessId,
        range: UserRange,
        data: &[u8],
    ) -> Result<(), MemoryError>;

    /// Allocates zero-filled physical frames
    ///
    /// The frames return to the pool when the last handle is dropped.
    fn allocate_frames(&self, pages: u64) -> Result<PhysicalPages, MemoryError>;

    /// Maps `frames` read-write into `process`
    ///
    /// A zero `addr_hint` lets the manager choose. Returns the virtual
    /// address of the mapping.
    fn map_physical(
        &self,
        process: ProcessId,
        addr_hint: u64,
        frames: &PhysicalPages,
    ) -> Result<u64, MemoryError>;

    /// Removes a mapping of `pages` pages starting at `addr`
    fn unmap(&self, process: ProcessId, addr: u64, pages: u64) -> Result<(), MemoryError>;
}
