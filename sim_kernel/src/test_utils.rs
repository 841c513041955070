//! Test utilities for resilience testing
//!
//! This module provides helpers for driving the simulated kernel the way a
//! user process would: through raw syscall numbers and pointers into its
//! own address space.

use crate::SimulatedKernel;
use core_types::{ServiceName, ThreadId, PAGE_SIZE};
use kernel_api::syscalls::SYS_THREAD_SPAWN;
use kernel_api::{Caller, KernelError, WaitKey};
use std::time::{Duration, Instant};

/// Pages of scratch memory mapped into every [`UserProcess`]
pub const SCRATCH_PAGES: u64 = 4;

/// A process with a scratch buffer, seen from user space
///
/// # Example
///
/// ```
/// use sim_kernel::test_utils::UserProcess;
/// use sim_kernel::SimulatedKernel;
/// use kernel_api::syscalls::SYS_IPC_CREATE;
///
/// let kernel = SimulatedKernel::new();
/// let server = UserProcess::spawn(&kernel, "server").unwrap();
/// assert!(server.syscall(&kernel, SYS_IPC_CREATE, &[]) > 0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserProcess {
    pub caller: Caller,
    pub scratch: u64,
}

impl UserProcess {
    /// Spawns a process and maps its scratch buffer
    pub fn spawn(kernel: &SimulatedKernel, name: &str) -> Result<Self, KernelError> {
        let caller = kernel.spawn_process(name)?;
        let scratch = kernel.map_user_pages(caller.process, SCRATCH_PAGES)?;
        Ok(Self { caller, scratch })
    }

    /// Same process, seen from another of its threads
    pub fn on_thread(&self, thread: ThreadId) -> Self {
        Self {
            caller: Caller::new(self.caller.process, thread),
            ..*self
        }
    }

    /// Address `offset` bytes into the scratch buffer
    pub fn buf(&self, offset: u64) -> u64 {
        self.scratch + offset
    }

    /// Size of the scratch buffer in bytes
    pub fn scratch_len(&self) -> u64 {
        SCRATCH_PAGES * PAGE_SIZE
    }

    /// Issues a syscall from this process
    pub fn syscall(&self, kernel: &SimulatedKernel, number: u64, args: &[u64]) -> i64 {
        kernel.syscall(self.caller, number, args)
    }

    /// Writes bytes into the scratch buffer, returning their address
    pub fn write(
        &self,
        kernel: &SimulatedKernel,
        offset: u64,
        data: &[u8],
    ) -> Result<u64, KernelError> {
        let addr = self.buf(offset);
        kernel.write_user(self.caller.process, addr, data)?;
        Ok(addr)
    }

    /// Reads bytes from anywhere in the process
    pub fn read(&self, kernel: &SimulatedKernel, addr: u64, len: u64) -> Result<Vec<u8>, KernelError> {
        kernel.read_user(self.caller.process, addr, len)
    }

    /// Writes a NUL-padded service name, returning its address
    pub fn write_name(
        &self,
        kernel: &SimulatedKernel,
        offset: u64,
        name: &str,
    ) -> Result<u64, KernelError> {
        let padded = ServiceName::new(name)?.to_padded();
        self.write(kernel, offset, &padded)
    }

    /// Reads the little-endian sender id written by `ipc_recv`
    pub fn read_sender(&self, kernel: &SimulatedKernel, addr: u64) -> Result<u32, KernelError> {
        let bytes = self.read(kernel, addr, 4)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&bytes);
        Ok(u32::from_le_bytes(raw))
    }

    /// Spawns another thread in this process through the syscall gate
    pub fn spawn_thread(&self, kernel: &SimulatedKernel) -> Option<Self> {
        let raw = self.syscall(kernel, SYS_THREAD_SPAWN, &[]);
        let thread = u32::try_from(raw).ok().map(ThreadId::new)?;
        Some(self.on_thread(thread))
    }
}

/// Polls until `thread` is parked on `key` or the timeout passes
///
/// Returns true if the thread was observed blocked.
pub fn wait_until_blocked(
    kernel: &SimulatedKernel,
    thread: ThreadId,
    key: WaitKey,
    timeout: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if kernel.scheduler().is_blocked_on(thread, key) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    false
}
