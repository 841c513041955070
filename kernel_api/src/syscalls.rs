//! Syscall ABI: numbers, register decoding, dispatch and result encoding.
//!
//! A trap hands the kernel a syscall number and six 64-bit registers. They
//! are decoded once into a typed [`Syscall`], every handle is narrowed to its
//! 32-bit ID type, and the call is routed to [`KernelApi`] by an exhaustive
//! match. The result collapses to a single `i64`: the success value, or `-1`.

use crate::{Caller, KernelApi, KernelError};
use core_types::{EndpointId, RegionId};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const SYS_THREAD_SPAWN: u64 = 1;
pub const SYS_THREAD_EXIT: u64 = 2;
pub const SYS_SHM_CREATE: u64 = 6;
pub const SYS_SHM_MAP: u64 = 7;
pub const SYS_IPC_SEND: u64 = 8;
pub const SYS_IPC_RECV: u64 = 9;
pub const SYS_IPC_CREATE: u64 = 11;
pub const SYS_SVC_REGISTER: u64 = 12;
pub const SYS_SVC_LOOKUP: u64 = 13;
pub const SYS_SHM_UNMAP: u64 = 14;
pub const SYS_SHM_DESTROY: u64 = 15;
pub const SYS_IPC_CLOSE: u64 = 16;

/// Value user space sees for every failure
pub const SYSCALL_FAILURE: i64 = -1;

/// Raw argument registers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyscallArgs {
    pub regs: [u64; 6],
}

impl SyscallArgs {
    /// Builds argument registers from a prefix, zero-filling the rest
    pub fn from_slice(values: &[u64]) -> Self {
        let mut regs = [0u64; 6];
        for (reg, value) in regs.iter_mut().zip(values) {
            *reg = *value;
        }
        Self { regs }
    }

    fn endpoint(&self, index: usize) -> Result<EndpointId, KernelError> {
        EndpointId::from_register(self.regs[index]).ok_or_else(|| {
            KernelError::InvalidArgument(format!("endpoint handle {:#x}", self.regs[index]))
        })
    }

    fn region(&self, index: usize) -> Result<RegionId, KernelError> {
        RegionId::from_register(self.regs[index]).ok_or_else(|| {
            KernelError::InvalidArgument(format!("region handle {:#x}", self.regs[index]))
        })
    }
}

/// A decoded system call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Syscall {
    ThreadSpawn,
    ThreadExit,
    ShmCreate {
        size: u64,
    },
    ShmMap {
        region: RegionId,
        addr_hint: u64,
    },
    IpcSend {
        endpoint: EndpointId,
        buf: u64,
        len: u64,
    },
    IpcRecv {
        endpoint: EndpointId,
        buf: u64,
        max_len: u64,
        sender_out: u64,
    },
    IpcCreate,
    SvcRegister {
        name_ptr: u64,
        endpoint: EndpointId,
    },
    SvcLookup {
        name_ptr: u64,
    },
    ShmUnmap {
        region: RegionId,
    },
    ShmDestroy {
        region: RegionId,
    },
    IpcClose {
        endpoint: EndpointId,
    },
}

impl Syscall {
    /// Decodes a syscall number and its argument registers
    pub fn decode(number: u64, args: &SyscallArgs) -> Result<Self, KernelError> {
        let r = &args.regs;
        let call = match number {
            SYS_THREAD_SPAWN => Syscall::ThreadSpawn,
            SYS_THREAD_EXIT => Syscall::ThreadExit,
            SYS_SHM_CREATE => Syscall::ShmCreate { size: r[0] },
            SYS_SHM_MAP => Syscall::ShmMap {
                region: args.region(0)?,
                addr_hint: r[1],
            },
            SYS_IPC_SEND => Syscall::IpcSend {
                endpoint: args.endpoint(0)?,
                buf: r[1],
                len: r[2],
            },
            SYS_IPC_RECV => Syscall::IpcRecv {
                endpoint: args.endpoint(0)?,
                buf: r[1],
                max_len: r[2],
                sender_out: r[3],
            },
            SYS_IPC_CREATE => Syscall::IpcCreate,
            SYS_SVC_REGISTER => Syscall::SvcRegister {
                name_ptr: r[0],
                endpoint: args.endpoint(1)?,
            },
            SYS_SVC_LOOKUP => Syscall::SvcLookup { name_ptr: r[0] },
            SYS_SHM_UNMAP => Syscall::ShmUnmap {
                region: args.region(0)?,
            },
            SYS_SHM_DESTROY => Syscall::ShmDestroy {
                region: args.region(0)?,
            },
            SYS_IPC_CLOSE => Syscall::IpcClose {
                endpoint: args.endpoint(0)?,
            },
            other => return Err(KernelError::UnknownSyscall(other)),
        };
        Ok(call)
    }

    /// Returns the ABI number of this call
    pub fn number(&self) -> u64 {
        match self {
            Syscall::ThreadSpawn => SYS_THREAD_SPAWN,
            Syscall::ThreadExit => SYS_THREAD_EXIT,
            Syscall::ShmCreate { .. } => SYS_SHM_CREATE,
            Syscall::ShmMap { .. } => SYS_SHM_MAP,
            Syscall::IpcSend { .. } => SYS_IPC_SEND,
            Syscall::IpcRecv { .. } => SYS_IPC_RECV,
            Syscall::IpcCreate => SYS_IPC_CREATE,
            Syscall::SvcRegister { .. } => SYS_SVC_REGISTER,
            Syscall::SvcLookup { .. } => SYS_SVC_LOOKUP,
            Syscall::ShmUnmap { .. } => SYS_SHM_UNMAP,
            Syscall::ShmDestroy { .. } => SYS_SHM_DESTROY,
            Syscall::IpcClose { .. } => SYS_IPC_CLOSE,
        }
    }

    /// Returns a short name for logs and audits
    pub fn name(&self) -> &'static str {
        match self {
            Syscall::ThreadSpawn => "thread_spawn",
            Syscall::ThreadExit => "thread_exit",
            Syscall::ShmCreate { .. } => "shm_create",
            Syscall::ShmMap { .. } => "shm_map",
            Syscall::IpcSend { .. } => "ipc_send",
            Syscall::IpcRecv { .. } => "ipc_recv",
            Syscall::IpcCreate => "ipc_create",
            Syscall::SvcRegister { .. } => "svc_register",
            Syscall::SvcLookup { .. } => "svc_lookup",
            Syscall::ShmUnmap { .. } => "shm_unmap",
            Syscall::ShmDestroy { .. } => "shm_destroy",
            Syscall::IpcClose { .. } => "ipc_close",
        }
    }

    /// Returns true for the only call that may suspend the caller
    pub fn may_block(&self) -> bool {
        matches!(self, Syscall::IpcRecv { .. })
    }
}

impl fmt::Display for Syscall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name(), self.number())
    }
}

/// Routes a decoded call to the kernel
///
/// Returns the raw success value that will be handed back to user space.
pub fn dispatch<K: KernelApi + ?Sized>(
    kernel: &K,
    caller: Caller,
    call: Syscall,
) -> Result<u64, KernelError> {
    match call {
        Syscall::ThreadSpawn => kernel
            .thread_spawn(caller)
            .map(|thread| u64::from(thread.as_u32())),
        Syscall::ThreadExit => kernel.thread_exit(caller).map(|()| 0),
        Syscall::ShmCreate { size } => kernel
            .shm_create(caller, size)
            .map(|region| u64::from(region.as_u32())),
        Syscall::ShmMap { region, addr_hint } => kernel.shm_map(caller, region, addr_hint),
        Syscall::IpcSend { endpoint, buf, len } => {
            kernel.ipc_send(caller, endpoint, buf, len).map(|()| 0)
        }
        Syscall::IpcRecv {
            endpoint,
            buf,
            max_len,
            sender_out,
        } => kernel.ipc_recv(caller, endpoint, buf, max_len, sender_out),
        Syscall::IpcCreate => kernel
            .ipc_create(caller)
            .map(|endpoint| u64::from(endpoint.as_u32())),
        Syscall::SvcRegister { name_ptr, endpoint } => {
            kernel.svc_register(caller, name_ptr, endpoint).map(|()| 0)
        }
        Syscall::SvcLookup { name_ptr } => kernel
            .svc_lookup(caller, name_ptr)
            .map(|endpoint| u64::from(endpoint.as_u32())),
        Syscall::ShmUnmap { region } => kernel.shm_unmap(caller, region).map(|()| 0),
        Syscall::ShmDestroy { region } => kernel.shm_destroy(caller, region).map(|()| 0),
        Syscall::IpcClose { endpoint } => kernel.ipc_close(caller, endpoint).map(|()| 0),
    }
}

/// Collapses a result into the user-visible return register
pub fn encode_result(result: &Result<u64, KernelError>) -> i64 {
    match result {
        Ok(value) => i64::try_from(*value).unwrap_or(SYSCALL_FAILURE),
        Err(err) => err.user_code(),
    }
}

/// Decodes, dispatches and encodes in one step
pub fn handle_syscall<K: KernelApi + ?Sized>(
    kernel: &K,
    caller: Caller,
    number: u64,
    args: &SyscallArgs,
) -> i64 {
    let result = Syscall::decode(number, args).and_then(|call| dispatch(kernel, caller, call));
    encode_result(&result)
}
