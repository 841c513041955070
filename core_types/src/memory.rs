//! # Memory Types
//!
//! This module defines the memory vocabulary used at the user/kernel boundary.
//!
//! ## Philosophy
//!
//! - **User addresses are untrusted numbers** until a [`UserRange`] is built
//!   from them, and building one rejects overflow and kernel-half addresses.
//! - **Physical frames are owned objects**: [`PhysicalPages`] returns its frames
//!   to the pool when the last handle is dropped, so a failed operation can
//!   never leak backing storage.
//! - **Page granularity**: every mapping and every region is whole pages.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Size of one page in bytes
pub const PAGE_SIZE: u64 = 4096;

/// First address past the user half of the address space
///
/// Everything at or above this address belongs to the kernel.
pub const USER_SPACE_END: u64 = 0x0000_8000_0000_0000;

/// Returns the number of whole pages needed to hold `bytes`
pub fn pages_for(bytes: u64) -> Option<u64> {
    bytes
        .checked_add(PAGE_SIZE - 1)
        .map(|rounded| rounded / PAGE_SIZE)
}

/// Returns true if `addr` lies on a page boundary
pub fn is_page_aligned(addr: u64) -> bool {
    addr % PAGE_SIZE == 0
}

/// Kind of access requested on a user range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessKind {
    /// The kernel reads from user memory (copy-in)
    Read,
    /// The kernel writes to user memory (copy-out)
    Write,
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessKind::Read => write!(f, "Read"),
            AccessKind::Write => write!(f, "Write"),
        }
    }
}

/// Memory permission flags for a user mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryPerms {
    pub read: bool,
    pub write: bool,
}

impl MemoryPerms {
    /// No permissions (guard page)
    pub fn none() -> Self {
        Self {
            read: false,
            write: false,
        }
    }

    /// Read-only permission
    pub fn read_only() -> Self {
        Self {
            read: true,
            write: false,
        }
    }

    /// Read and write permissions
    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
        }
    }

    /// Checks whether this mapping allows the given access
    pub fn allows(&self, access: AccessKind) -> bool {
        match access {
            AccessKind::Read => self.read,
            AccessKind::Write => self.write,
        }
    }
}

impl fmt::Display for MemoryPerms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}",
            if self.read { "R" } else { "-" },
            if self.write { "W" } else { "-" }
        )
    }
}

/// A user address range that has passed arithmetic validation
///
/// Construction guarantees that `addr + len` does not wrap and that the whole
/// range lies below [`USER_SPACE_END`]. It says nothing about whether the
/// pages are mapped; that is the memory manager's question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserRange {
    addr: u64,
    len: u64,
}

impl UserRange {
    /// Validates a raw pointer/length pair supplied by user space
    pub fn new(addr: u64, len: u64) -> Result<Self, MemoryError> {
        let end = addr
            .checked_add(len)
            .ok_or(MemoryError::RangeOverflow { addr, len })?;
        if addr >= USER_SPACE_END || end > USER_SPACE_END {
            return Err(MemoryError::OutsideUserSpace { addr, len });
        }
        Ok(Self { addr, len })
    }

    /// Start address
    pub fn addr(&self) -> u64 {
        self.addr
    }

    /// Length in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns true for a zero-length range
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last byte
    pub fn end(&self) -> u64 {
        self.addr + self.len
    }

    /// Returns the sub-range `[addr, addr + len)` truncated to `max_len` bytes
    pub fn truncated(&self, max_len: u64) -> Self {
        Self {
            addr: self.addr,
            len: self.len.min(max_len),
        }
    }
}

impl fmt::Display for UserRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x})", self.addr, self.end())
    }
}

type ReleaseHook = Box<dyn Fn(u64) + Send + Sync>;

struct FrameRun {
    pages: u64,
    bytes: RwLock<Box<[u8]>>,
    on_release: Option<ReleaseHook>,
}

impl Drop for FrameRun {
    fn drop(&mut self) {
        if let Some(hook) = self.on_release.take() {
            hook(self.pages);
        }
    }
}

/// A run of physical frames
///
/// Cloning the handle shares the same frames; this is what makes every
/// mapping of a shared-memory region observe the same bytes. When the last
/// handle goes away the optional release hook gives the frames back to the
/// allocator they came from.
#[derive(Clone)]
pub struct PhysicalPages {
    run: Arc<FrameRun>,
}

impl PhysicalPages {
    /// Allocates zero-filled frames without any pool accounting
    pub fn zeroed(pages: u64) -> Result<Self, MemoryError> {
        Self::build(pages, None)
    }

    /// Allocates zero-filled frames and calls `on_release(pages)` when freed
    pub fn zeroed_with_release<F>(pages: u64, on_release: F) -> Result<Self, MemoryError>
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        Self::build(pages, Some(Box::new(on_release)))
    }

    fn build(pages: u64, on_release: Option<ReleaseHook>) -> Result<Self, MemoryError> {
        let bytes = pages
            .checked_mul(PAGE_SIZE)
            .and_then(|len| usize::try_from(len).ok())
            .filter(|len| *len > 0)
            .ok_or(MemoryError::InvalidSize(pages))?;
        Ok(Self {
            run: Arc::new(FrameRun {
                pages,
                bytes: RwLock::new(vec![0u8; bytes].into_boxed_slice()),
                on_release,
            }),
        })
    }

    /// Number of pages in this run
    pub fn page_count(&self) -> u64 {
        self.run.pages
    }

    /// Size of this run in bytes
    pub fn len(&self) -> u64 {
        self.run.pages * PAGE_SIZE
    }

    /// Always false; a frame run holds at least one page
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns true if both handles refer to the same frames
    pub fn same_frames(&self, other: &PhysicalPages) -> bool {
        Arc::ptr_eq(&self.run, &other.run)
    }

    /// Copies bytes starting at `offset` into `buf`
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), MemoryError> {
        let range = self.byte_range(offset, buf.len())?;
        buf.copy_from_slice(&self.run.bytes.read()[range]);
        Ok(())
    }

    /// Copies `data` into the frames starting at `offset`
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<(), MemoryError> {
        let range = self.byte_range(offset, data.len())?;
        self.run.bytes.write()[range].copy_from_slice(data);
        Ok(())
    }

    fn byte_range(&self, offset: u64, len: usize) -> Result<std::ops::Range<usize>, MemoryError> {
        let out_of_bounds = MemoryError::FrameOutOfBounds {
            offset,
            len: len as u64,
        };
        let start = usize::try_from(offset).map_err(|_| out_of_bounds.clone())?;
        let end = start.checked_add(len).ok_or_else(|| out_of_bounds.clone())?;
        if end as u64 > self.len() {
            return Err(out_of_bounds);
        }
        Ok(start..end)
    }
}

impl fmt::Debug for PhysicalPages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicalPages")
            .field("pages", &self.run.pages)
            .field("handles", &Arc::strong_count(&self.run))
            .finish()
    }
}

/// Memory-related errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("Address range overflows: addr={addr:#x}, len={len}")]
    RangeOverflow { addr: u64, len: u64 },

    #[error("Range outside user space: addr={addr:#x}, len={len}")]
    OutsideUserSpace { addr: u64, len: u64 },

    #[error("Address not mapped: {addr:#x}")]
    Unmapped { addr: u64 },

    #[error("Access denied: {access} at {addr:#x}")]
    AccessDenied { addr: u64, access: AccessKind },

    #[error("Address not page aligned: {addr:#x}")]
    Misaligned { addr: u64 },

    #[error("Mapping overlaps an existing mapping at {addr:#x}")]
    Overlap { addr: u64 },

    #[error("No free virtual range for {pages} pages")]
    AddressSpaceExhausted { pages: u64 },

    #[error("Out of physical frames: requested {requested} pages, {available} available")]
    OutOfFrames { requested: u64, available: u64 },

    #[error("Invalid size: {0} pages")]
    InvalidSize(u64),

    #[error("Frame access out of bounds: offset={offset}, len={len}")]
    FrameOutOfBounds { offset: u64, len: u64 },

    #[error("No address space for process {0}")]
    NoAddressSpace(u32),
}
