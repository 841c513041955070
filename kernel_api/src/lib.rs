//! # Kernel API
//!
//! This crate defines the interface between user space and the kernel core,
//! and the narrow interfaces the core uses to reach its collaborators.
//!
//! ## Philosophy
//!
//! The kernel provides **mechanisms**, not policies:
//! - Rendezvous message passing through single-slot endpoints
//! - A small, fixed-capacity name registry
//! - Shared-memory regions with explicit mapping
//! - Per-process quotas on every creation call
//!
//! ## Design Goals
//!
//! 1. **Testability**: The scheduler and memory manager are traits, so the
//!    whole core runs under `cargo test`
//! 2. **Untrusted input**: Every pointer goes through [`uaccess`] first
//! 3. **Uniform failure**: User space sees `-1` for every error
//! 4. **Simplicity**: Minimal surface area
//!
//! ## Non-Goals
//!
//! This is NOT:
//! - POSIX (no fork, exec, signals, files)
//! - A scheduler or a page-table implementation
//! - A program loader

pub mod error;
pub mod kernel;
pub mod memory;
pub mod scheduler;
pub mod syscalls;
pub mod uaccess;

pub use error::{ErrorClass, KernelError};
pub use kernel::{Caller, KernelApi};
pub use memory::MemoryManager;
pub use scheduler::{Scheduler, WaitKey, Wakeup};
pub use syscalls::{dispatch, encode_result, handle_syscall, Syscall, SyscallArgs};
