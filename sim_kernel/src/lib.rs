//! # Simulated Kernel
//!
//! This crate composes the IPC core into a kernel that runs in-process.
//!
//! ## Purpose
//!
//! The simulated kernel allows testing the trust boundary without hardware:
//! - Runs under `cargo test`
//! - Real concurrency: kernel threads are host threads, so blocking receives
//!   and racing senders are exercised for real
//! - Inspectable: quota usage, table sizes and audit logs are accessible
//!
//! ## Locking
//!
//! Every table sits behind its own lock. Locks are always taken in this
//! order:
//!
//! 1. process table (read for ordinary syscalls, write for lifecycle)
//! 2. endpoint table, service registry, shared-memory table
//! 3. quota ledger
//! 4. resource audit
//!
//! The scheduler and the address-space manager lock internally and never
//! call back into the kernel, so they may be used under any of the above.
//! No lock is held while a thread is parked in `ipc_recv`.

pub mod address_space;
pub mod audit;
pub mod config;
pub mod resource_audit;
pub mod scheduler;
pub mod syscall_gate;
pub mod test_utils;

use address_space::AddressSpaceManager;
use config::{ConfigError, KernelConfig};
use core_types::{
    AccessKind, EndpointId, IdAllocator, MemoryPerms, ProcessId, RegionId, ThreadId, UserRange,
};
use ipc::{EndpointTable, Message, RecvOutcome, IPC_MSG_MAX_SIZE};
use kernel_api::uaccess::{check_user_range, copy_in, copy_out, read_service_name};
use kernel_api::{Caller, KernelApi, KernelError, Scheduler, SyscallArgs, WaitKey};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use resource_audit::{ResourceAuditLog, ResourceEvent};
use resources::{ProcessUsage, QuotaError, QuotaLedger, ResourceKind};
use scheduler::HostScheduler;
use services_registry::ServiceRegistry;
use shared_memory::{Region, SharedMemoryManager};
use std::collections::{BTreeSet, HashMap};
use syscall_gate::{SyscallAuditLog, SyscallGate};

#[derive(Debug)]
struct ProcessInfo {
    name: String,
    threads: BTreeSet<ThreadId>,
}

#[derive(Debug, Default)]
struct ProcessTable {
    processes: HashMap<ProcessId, ProcessInfo>,
    ids: IdAllocator,
}

impl ProcessTable {
    fn check_caller(&self, caller: Caller) -> Result<&ProcessInfo, KernelError> {
        self.processes
            .get(&caller.process)
            .filter(|info| info.threads.contains(&caller.thread))
            .ok_or_else(|| KernelError::NotFound(format!("caller {}", caller)))
    }
}

/// Simulated kernel state
///
/// All state is internally synchronized; share the kernel between threads
/// with an `Arc`.
#[derive(Debug)]
pub struct SimulatedKernel {
    config: KernelConfig,
    processes: RwLock<ProcessTable>,
    endpoints: Mutex<EndpointTable>,
    registry: Mutex<ServiceRegistry>,
    shm: Mutex<SharedMemoryManager>,
    ledger: Mutex<QuotaLedger>,
    memory: AddressSpaceManager,
    scheduler: HostScheduler,
    gate: SyscallGate,
    resource_audit: Mutex<ResourceAuditLog>,
}

impl SimulatedKernel {
    /// Creates a kernel with the default configuration
    pub fn new() -> Self {
        Self::with_config(KernelConfig::default())
    }

    /// Creates a kernel with an explicit configuration
    pub fn with_config(config: KernelConfig) -> Self {
        log::info!(
            "kernel starting: {}, {} endpoint slots, {} registry slots, {} shm slots, {} pages",
            config.quotas,
            config.endpoint_capacity,
            config.registry_capacity,
            config.shm_capacity,
            config.physical_pages
        );
        Self {
            processes: RwLock::new(ProcessTable::default()),
            endpoints: Mutex::new(EndpointTable::new(config.endpoint_capacity)),
            registry: Mutex::new(ServiceRegistry::with_capacity(config.registry_capacity)),
            shm: Mutex::new(SharedMemoryManager::new(config.shm_capacity)),
            ledger: Mutex::new(QuotaLedger::new(config.quotas)),
            memory: AddressSpaceManager::new(config.physical_pages)
                .with_audit_capacity(config.audit_capacity),
            scheduler: HostScheduler::with_audit_capacity(config.audit_capacity),
            gate: SyscallGate::with_audit_capacity(config.audit_capacity),
            resource_audit: Mutex::new(ResourceAuditLog::with_capacity(config.audit_capacity)),
            config,
        }
    }

    /// Creates a kernel from a JSON configuration
    pub fn from_json_config(text: &str) -> Result<Self, ConfigError> {
        Ok(Self::with_config(KernelConfig::from_json(text)?))
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Process lifecycle
    // ------------------------------------------------------------------

    /// Creates a process with an empty address space and one thread
    ///
    /// The initial thread is charged to the thread quota.
    pub fn spawn_process(&self, name: &str) -> Result<Caller, KernelError> {
        let mut procs = self.processes.write();
        let pid = procs
            .ids
            .peek()
            .map(ProcessId::new)
            .ok_or_else(|| KernelError::CapacityExhausted("process ids".into()))?;

        let mut ledger = self.ledger.lock();
        ledger.check(pid, ResourceKind::Threads)?;
        let thread = self
            .scheduler
            .spawn_thread(pid)
            .ok_or_else(|| KernelError::CapacityExhausted("thread ids".into()))?;
        let count = ledger.try_reserve(pid, ResourceKind::Threads)?;
        self.record_resource(ResourceEvent::Reserved {
            process: pid,
            kind: ResourceKind::Threads,
            count,
        });
        drop(ledger);

        procs.ids.allocate();
        self.memory.create_space(pid);
        procs.processes.insert(
            pid,
            ProcessInfo {
                name: name.to_string(),
                threads: BTreeSet::from([thread]),
            },
        );
        log::info!("{} '{}' started with {}", pid, name, thread);
        Ok(Caller::new(pid, thread))
    }

    /// Terminates a process and releases everything it held
    ///
    /// Blocked receivers of the process return `Cancelled`, its endpoints
    /// are destroyed and unbound from the registry, its shared-memory
    /// mappings and ownerships are dropped, its address space is destroyed
    /// and its ledger entry removed. Returns false if the process was not
    /// running.
    pub fn terminate_process(&self, pid: ProcessId) -> bool {
        let mut procs = self.processes.write();
        let Some(info) = procs.processes.remove(&pid) else {
            return false;
        };

        let threads = self.scheduler.on_process_exit(pid);
        let mut endpoints = self.endpoints.lock();
        let mut registry = self.registry.lock();
        let mut shm = self.shm.lock();
        let mut ledger = self.ledger.lock();

        endpoints.purge_threads(&threads);
        let closed = endpoints.release_owned(pid, &mut ledger, &self.scheduler);
        let unbound: usize = closed
            .iter()
            .map(|ep| registry.unbind_endpoint(*ep).len())
            .sum();
        shm.release_process(pid, &mut ledger, &self.memory);
        self.memory.destroy_space(pid);

        for _ in &info.threads {
            ledger.release(pid, ResourceKind::Threads);
        }
        let leftover = ledger.remove_process(pid);
        self.record_resource(ResourceEvent::ProcessReleased {
            process: pid,
            leftover,
        });

        log::info!(
            "{} '{}' terminated: {} threads, {} endpoints, {} names released",
            pid,
            info.name,
            threads.len(),
            closed.len(),
            unbound
        );
        true
    }

    /// Returns true if the process is running
    pub fn is_live(&self, pid: ProcessId) -> bool {
        self.processes.read().processes.contains_key(&pid)
    }

    /// Number of running processes
    pub fn process_count(&self) -> usize {
        self.processes.read().processes.len()
    }

    // ------------------------------------------------------------------
    // Trap entry
    // ------------------------------------------------------------------

    /// Enters the kernel through the syscall gate
    ///
    /// Returns the value user space sees: the result, or `-1`.
    pub fn syscall(&self, caller: Caller, number: u64, args: &[u64]) -> i64 {
        self.gate
            .execute(self, caller, number, &SyscallArgs::from_slice(args))
    }

    // ------------------------------------------------------------------
    // Loader-side memory access
    // ------------------------------------------------------------------

    /// Maps fresh read-write pages into a process, as a loader would
    pub fn map_user_pages(&self, pid: ProcessId, pages: u64) -> Result<u64, KernelError> {
        self.map_user_pages_at(pid, 0, pages, MemoryPerms::read_write())
    }

    /// Maps fresh pages at a fixed address with explicit permissions
    pub fn map_user_pages_at(
        &self,
        pid: ProcessId,
        addr: u64,
        pages: u64,
        perms: MemoryPerms,
    ) -> Result<u64, KernelError> {
        Ok(self.memory.map_anonymous(pid, addr, pages, perms)?)
    }

    /// Writes into a process's writable memory
    pub fn write_user(&self, pid: ProcessId, addr: u64, data: &[u8]) -> Result<(), KernelError> {
        let range = check_user_range(&self.memory, pid, addr, data.len() as u64, AccessKind::Write)?;
        copy_out(&self.memory, pid, range, data)
    }

    /// Reads from a process's memory
    pub fn read_user(&self, pid: ProcessId, addr: u64, len: u64) -> Result<Vec<u8>, KernelError> {
        copy_in(&self.memory, pid, addr, len)
    }

    // ------------------------------------------------------------------
    // Inspection (test-only)
    // ------------------------------------------------------------------

    pub fn memory(&self) -> &AddressSpaceManager {
        &self.memory
    }

    pub fn scheduler(&self) -> &HostScheduler {
        &self.scheduler
    }

    /// Current quota usage of a process
    pub fn quota_usage(&self, pid: ProcessId) -> ProcessUsage {
        self.ledger.lock().usage(pid)
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.lock().len()
    }

    /// Returns whether an endpoint holds a pending message
    pub fn endpoint_is_occupied(&self, endpoint: EndpointId) -> Option<bool> {
        self.endpoints.lock().is_occupied(endpoint)
    }

    /// Sender of the pending message on an endpoint
    pub fn pending_sender(&self, endpoint: EndpointId) -> Option<ProcessId> {
        self.endpoints
            .lock()
            .get(endpoint)
            .and_then(|ep| ep.pending().map(Message::sender))
    }

    pub fn registry_count(&self) -> usize {
        self.registry.lock().count()
    }

    pub fn shm_region_count(&self) -> usize {
        self.shm.lock().len()
    }

    /// Snapshot of the syscall audit log
    pub fn syscall_audit(&self) -> SyscallAuditLog {
        self.gate.audit_log()
    }

    /// Snapshot of the resource audit log
    pub fn resource_audit(&self) -> ResourceAuditLog {
        self.resource_audit.lock().clone()
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn live_caller(&self, caller: Caller) -> Result<RwLockReadGuard<'_, ProcessTable>, KernelError> {
        let procs = self.processes.read();
        procs.check_caller(caller)?;
        Ok(procs)
    }

    fn record_resource(&self, event: ResourceEvent) {
        self.resource_audit.lock().record_event(event);
    }

    /// Records the quota outcome of a creation call
    fn audit_reservation<T>(
        &self,
        ledger: &QuotaLedger,
        process: ProcessId,
        kind: ResourceKind,
        result: &Result<T, KernelError>,
    ) {
        let event = match result {
            Ok(_) => ResourceEvent::Reserved {
                process,
                kind,
                count: ledger.count(process, kind),
            },
            Err(KernelError::QuotaExceeded(QuotaError::Exceeded { ceiling, .. })) => {
                ResourceEvent::Denied {
                    process,
                    kind,
                    ceiling: *ceiling,
                }
            }
            Err(_) => return,
        };
        self.record_resource(event);
    }

    /// Records a release if `process`'s count dropped below `before`
    fn audit_release(
        &self,
        ledger: &QuotaLedger,
        process: ProcessId,
        kind: ResourceKind,
        before: u32,
    ) {
        let count = ledger.count(process, kind);
        if count < before {
            self.record_resource(ResourceEvent::Released {
                process,
                kind,
                count,
            });
        }
    }

    fn shm_release_op<F>(&self, caller: Caller, region: RegionId, op: F) -> Result<(), KernelError>
    where
        F: FnOnce(&mut SharedMemoryManager, &mut QuotaLedger) -> Result<(), KernelError>,
    {
        let _procs = self.live_caller(caller)?;
        let mut shm = self.shm.lock();
        let mut ledger = self.ledger.lock();
        let owner = shm.region(region).map(Region::owner);
        let before = owner.map(|o| ledger.count(o, ResourceKind::SharedMemoryRegions));
        op(&mut *shm, &mut *ledger)?;
        if let (Some(owner), Some(before)) = (owner, before) {
            self.audit_release(&ledger, owner, ResourceKind::SharedMemoryRegions, before);
        }
        Ok(())
    }

    /// Copies a received message and its sender id into user memory
    fn deliver(
        &self,
        process: ProcessId,
        dest: UserRange,
        sender_dest: Option<UserRange>,
        message: &Message,
    ) -> Result<(), KernelError> {
        copy_out(&self.memory, process, dest, message.payload())?;
        if let Some(range) = sender_dest {
            let sender = message.sender().as_u32().to_le_bytes();
            copy_out(&self.memory, process, range, &sender)?;
        }
        Ok(())
    }
}

impl Default for SimulatedKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelApi for SimulatedKernel {
    fn ipc_create(&self, caller: Caller) -> Result<EndpointId, KernelError> {
        let _procs = self.live_caller(caller)?;
        let mut endpoints = self.endpoints.lock();
        let mut ledger = self.ledger.lock();
        let result = endpoints.create(caller.process, &mut ledger);
        self.audit_reservation(&ledger, caller.process, ResourceKind::Endpoints, &result);
        result
    }

    fn ipc_send(
        &self,
        caller: Caller,
        endpoint: EndpointId,
        buf: u64,
        len: u64,
    ) -> Result<(), KernelError> {
        let _procs = self.live_caller(caller)?;
        if len > IPC_MSG_MAX_SIZE as u64 {
            log::debug!("{}: send of {} bytes exceeds {}", caller, len, IPC_MSG_MAX_SIZE);
            return Err(KernelError::InvalidArgument(format!("message length {}", len)));
        }
        let payload = copy_in(&self.memory, caller.process, buf, len)?;
        let message = Message::new(caller.process, payload)?;
        self.endpoints
            .lock()
            .send(endpoint, message, &self.scheduler)
    }

    fn ipc_recv(
        &self,
        caller: Caller,
        endpoint: EndpointId,
        buf: u64,
        max_len: u64,
        sender_out: u64,
    ) -> Result<u64, KernelError> {
        let (dest, sender_dest) = {
            let _procs = self.live_caller(caller)?;
            let dest = check_user_range(&self.memory, caller.process, buf, max_len, AccessKind::Write)?;
            let sender_dest = match sender_out {
                0 => None,
                addr => Some(check_user_range(
                    &self.memory,
                    caller.process,
                    addr,
                    4,
                    AccessKind::Write,
                )?),
            };

            let mut endpoints = self.endpoints.lock();
            match endpoints.recv_or_wait(endpoint, caller)? {
                RecvOutcome::Ready(message) => {
                    if let Err(err) = self.deliver(caller.process, dest, sender_dest, &message) {
                        endpoints.restore(endpoint, message)?;
                        return Err(err);
                    }
                    return Ok(message.len() as u64);
                }
                RecvOutcome::MustWait => (dest, sender_dest),
            }
        };

        let wakeup = self
            .scheduler
            .block_current_thread(caller.thread, WaitKey::Endpoint(endpoint));
        let Some(message) = Message::from_wakeup(wakeup) else {
            self.endpoints.lock().cancel_waiter(endpoint, caller.thread);
            log::debug!("{}: recv on {} cancelled", caller, endpoint);
            return Err(KernelError::Cancelled);
        };

        match self.deliver(caller.process, dest, sender_dest, &message) {
            Ok(()) => {
                self.endpoints.lock().finish_handoff(endpoint, caller.thread);
                Ok(message.len() as u64)
            }
            Err(err) => {
                log::debug!("{}: copy-out on {} failed, returning message", caller, endpoint);
                if let Err(lost) = self.endpoints.lock().return_handoff(
                    endpoint,
                    caller.thread,
                    message,
                    &self.scheduler,
                ) {
                    log::debug!("{}: returned message dropped: {}", endpoint, lost);
                }
                Err(err)
            }
        }
    }

    fn ipc_close(&self, caller: Caller, endpoint: EndpointId) -> Result<(), KernelError> {
        let _procs = self.live_caller(caller)?;
        let mut endpoints = self.endpoints.lock();
        let mut registry = self.registry.lock();
        let mut ledger = self.ledger.lock();
        let before = ledger.count(caller.process, ResourceKind::Endpoints);
        endpoints.destroy(endpoint, caller.process, &mut ledger, &self.scheduler)?;
        registry.unbind_endpoint(endpoint);
        self.audit_release(&ledger, caller.process, ResourceKind::Endpoints, before);
        Ok(())
    }

    fn svc_register(
        &self,
        caller: Caller,
        name_ptr: u64,
        endpoint: EndpointId,
    ) -> Result<(), KernelError> {
        let _procs = self.live_caller(caller)?;
        let name = read_service_name(&self.memory, caller.process, name_ptr)?;
        let endpoints = self.endpoints.lock();
        if !endpoints.contains(endpoint) {
            return Err(KernelError::NotFound(endpoint.to_string()));
        }
        self.registry
            .lock()
            .register(name, endpoint, caller.process)?;
        Ok(())
    }

    fn svc_lookup(&self, caller: Caller, name_ptr: u64) -> Result<EndpointId, KernelError> {
        let _procs = self.live_caller(caller)?;
        let name = read_service_name(&self.memory, caller.process, name_ptr)?;
        Ok(self.registry.lock().lookup(&name)?)
    }

    fn shm_create(&self, caller: Caller, size: u64) -> Result<RegionId, KernelError> {
        let _procs = self.live_caller(caller)?;
        let mut shm = self.shm.lock();
        let mut ledger = self.ledger.lock();
        let result = shm.create(caller.process, size, &mut ledger, &self.memory);
        self.audit_reservation(
            &ledger,
            caller.process,
            ResourceKind::SharedMemoryRegions,
            &result,
        );
        result
    }

    fn shm_map(&self, caller: Caller, region: RegionId, addr_hint: u64) -> Result<u64, KernelError> {
        let _procs = self.live_caller(caller)?;
        self.shm
            .lock()
            .map(region, caller.process, addr_hint, &self.memory)
    }

    fn shm_unmap(&self, caller: Caller, region: RegionId) -> Result<(), KernelError> {
        self.shm_release_op(caller, region, |shm, ledger| {
            shm.unmap(region, caller.process, ledger, &self.memory)
        })
    }

    fn shm_destroy(&self, caller: Caller, region: RegionId) -> Result<(), KernelError> {
        self.shm_release_op(caller, region, |shm, ledger| {
            shm.destroy(region, caller.process, ledger)
        })
    }

    fn thread_spawn(&self, caller: Caller) -> Result<ThreadId, KernelError> {
        let mut procs = self.processes.write();
        procs.check_caller(caller)?;
        let mut ledger = self.ledger.lock();

        let result = ledger
            .check(caller.process, ResourceKind::Threads)
            .map_err(KernelError::from)
            .and_then(|()| {
                self.scheduler
                    .spawn_thread(caller.process)
                    .ok_or_else(|| KernelError::CapacityExhausted("thread ids".into()))
            })
            .and_then(|thread| {
                ledger.try_reserve(caller.process, ResourceKind::Threads)?;
                Ok(thread)
            });
        self.audit_reservation(&ledger, caller.process, ResourceKind::Threads, &result);

        let thread = result?;
        if let Some(info) = procs.processes.get_mut(&caller.process) {
            info.threads.insert(thread);
        }
        log::debug!("{} spawned {}", caller, thread);
        Ok(thread)
    }

    fn thread_exit(&self, caller: Caller) -> Result<(), KernelError> {
        let last = {
            let mut procs = self.processes.write();
            procs.check_caller(caller)?;
            let mut ledger = self.ledger.lock();
            let before = ledger.count(caller.process, ResourceKind::Threads);

            self.scheduler.exit_thread(caller.thread);
            ledger.release(caller.process, ResourceKind::Threads);
            self.audit_release(&ledger, caller.process, ResourceKind::Threads, before);

            procs.processes.get_mut(&caller.process).is_some_and(|info| {
                info.threads.remove(&caller.thread);
                info.threads.is_empty()
            })
        };
        if last {
            self.terminate_process(caller.process);
        }
        Ok(())
    }
}
