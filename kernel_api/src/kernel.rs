//! Kernel API trait and caller identity

use crate::KernelError;
use core_types::{EndpointId, ProcessId, RegionId, ThreadId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of the thread executing a system call
///
/// The kernel fills this in from its own state. User space never supplies
/// it, so it cannot be forged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Caller {
    pub process: ProcessId,
    pub thread: ThreadId,
}

impl Caller {
    /// Creates a caller identity
    pub fn new(process: ProcessId, thread: ThreadId) -> Self {
        Self { process, thread }
    }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.process, self.thread)
    }
}

/// The kernel API trait
///
/// This is the surface the syscall dispatcher drives. Every pointer argument
/// is a raw user virtual address and is validated by the implementation
/// before anything is read or written.
///
/// # Design Principles
///
/// **Validate, then mutate**: a call that fails leaves every kernel table as
/// it was.
///
/// **Only `ipc_recv` blocks**: every other call returns without waiting.
///
/// **Shared receiver**: implementations are internally synchronized, so all
/// methods take `&self` and may be called from many threads at once.
///
/// # Example
///
/// ```
/// use kernel_api::{Caller, KernelApi, KernelError};
///
/// fn announce<K: KernelApi>(kernel: &K, caller: Caller, name_ptr: u64) -> Result<(), KernelError> {
///     let endpoint = kernel.ipc_create(caller)?;
///     kernel.svc_register(caller, name_ptr, endpoint)
/// }
/// ```
pub trait KernelApi {
    /// Creates an endpoint owned by the calling process
    fn ipc_create(&self, caller: Caller) -> Result<EndpointId, KernelError>;

    /// Deposits `len` bytes at `buf` into the endpoint's slot
    ///
    /// Fails without touching the slot if it already holds a message.
    fn ipc_send(
        &self,
        caller: Caller,
        endpoint: EndpointId,
        buf: u64,
        len: u64,
    ) -> Result<(), KernelError>;

    /// Takes the pending message, blocking until one arrives
    ///
    /// At most `max_len` bytes are copied to `buf`. The full message length
    /// is returned. When `sender_out` is non-zero the sender's process ID is
    /// written there as a little-endian `u32`.
    fn ipc_recv(
        &self,
        caller: Caller,
        endpoint: EndpointId,
        buf: u64,
        max_len: u64,
        sender_out: u64,
    ) -> Result<u64, KernelError>;

    /// Destroys an endpoint owned by the caller
    fn ipc_close(&self, caller: Caller, endpoint: EndpointId) -> Result<(), KernelError>;

    /// Binds the 24-byte name at `name_ptr` to `endpoint`
    fn svc_register(
        &self,
        caller: Caller,
        name_ptr: u64,
        endpoint: EndpointId,
    ) -> Result<(), KernelError>;

    /// Resolves the 24-byte name at `name_ptr`
    fn svc_lookup(&self, caller: Caller, name_ptr: u64) -> Result<EndpointId, KernelError>;

    /// Creates a zero-filled region of at least `size` bytes
    fn shm_create(&self, caller: Caller, size: u64) -> Result<RegionId, KernelError>;

    /// Maps a region into the caller's address space
    ///
    /// An `addr_hint` of zero lets the kernel pick the address.
    fn shm_map(&self, caller: Caller, region: RegionId, addr_hint: u64)
        -> Result<u64, KernelError>;

    /// Removes the caller's mapping of a region
    fn shm_unmap(&self, caller: Caller, region: RegionId) -> Result<(), KernelError>;

    /// Releases the owner's reference to a region
    fn shm_destroy(&self, caller: Caller, region: RegionId) -> Result<(), KernelError>;

    /// Starts another thread in the calling process
    fn thread_spawn(&self, caller: Caller) -> Result<ThreadId, KernelError>;

    /// Ends the calling thread
    fn thread_exit(&self, caller: Caller) -> Result<(), KernelError>;
}
