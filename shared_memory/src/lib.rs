//! # Shared Memory
//!
//! This crate manages shared-memory regions: runs of physical frames that
//! several processes map into their address spaces at once.
//!
//! ## Philosophy
//!
//! - **One backing, many views**: every mapping of a region refers to the
//!   same frames, so all mappers observe the same bytes
//! - **Whole pages only**: sizes round up to the page size and are capped at
//!   [`MAX_SHM_PAGES`]
//! - **Counted once**: a region is charged to its owner's quota at creation
//!   and the charge is returned exactly once
//! - **No leaks under pressure**: frames go back to the pool the moment the
//!   last reference to a region disappears

pub mod manager;
pub mod region;

pub use manager::{SharedMemoryManager, DEFAULT_SHM_CAPACITY, MAX_SHM_PAGES};
pub use region::Region;
