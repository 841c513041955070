//! # Core Types
//!
//! This crate defines the fundamental types shared by every table of the
//! kernel core.
//!
//! ## Philosophy
//!
//! Core types are designed with these principles:
//! - **Handles are opaque integers**: User space only ever sees small IDs,
//!   never kernel memory.
//! - **Type safety first**: An endpoint ID cannot be confused with a region ID.
//! - **Untrusted input is parsed once**: Raw user addresses and names become
//!   checked types at the boundary.
//!
//! ## Key Types
//!
//! - [`ProcessId`], [`ThreadId`]: Identity of callers
//! - [`EndpointId`], [`RegionId`]: Kernel object handles
//! - [`IdAllocator`]: Monotonic, never-reused handle source
//! - [`UserRange`]: Overflow-checked user address range
//! - [`PhysicalPages`]: Shared backing frames
//! - [`ServiceName`]: Fixed-width, NUL-padded ASCII service name

pub mod ids;
pub mod memory;
pub mod service_name;

pub use ids::{EndpointId, IdAllocator, ProcessId, RegionId, ThreadId};
pub use memory::{
    is_page_aligned, pages_for, AccessKind, MemoryError, MemoryPerms, PhysicalPages, UserRange,
    PAGE_SIZE, USER_SPACE_END,
};
pub use service_name::{NameError, ServiceName, SERVICE_NAME_MAX};
