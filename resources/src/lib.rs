//! # Resources
//!
//! This crate provides the per-process quota ledger for the kernel core.
//!
//! ## Philosophy
//!
//! - **Resources are finite and must be explicit**
//! - **Quotas are enforced, not advisory**: a reservation either succeeds and
//!   counts, or fails and changes nothing
//! - **Accounting is deterministic and testable**
//! - **Counters never go negative**: a stray release is logged and ignored
//!
//! ## Core Concepts
//!
//! - [`ResourceKind`]: Endpoints, shared-memory regions, threads
//! - [`QuotaCeilings`]: Immutable per-process limits
//! - [`ProcessUsage`]: Current consumption of one process
//! - [`QuotaLedger`]: Usage of every live process
//!
//! ## Non-Goals
//!
//! This is NOT:
//! - Memory or CPU accounting
//! - Hierarchical budgets
//! - A lock; callers serialize access to the ledger

use core_types::ProcessId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// A kind of counted kernel object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Endpoints,
    SharedMemoryRegions,
    Threads,
}

impl ResourceKind {
    /// Every counted kind
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::Endpoints,
        ResourceKind::SharedMemoryRegions,
        ResourceKind::Threads,
    ];
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Endpoints => write!(f, "endpoints"),
            ResourceKind::SharedMemoryRegions => write!(f, "shm regions"),
            ResourceKind::Threads => write!(f, "threads"),
        }
    }
}

/// Per-process ceilings
///
/// The same ceilings apply to every process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaCeilings {
    pub endpoints: u32,
    pub shm_regions: u32,
    pub threads: u32,
}

impl QuotaCeilings {
    /// Creates ceilings with explicit values
    pub fn new(endpoints: u32, shm_regions: u32, threads: u32) -> Self {
        Self {
            endpoints,
            shm_regions,
            threads,
        }
    }

    /// Sets the endpoint ceiling
    pub fn with_endpoints(mut self, limit: u32) -> Self {
        self.endpoints = limit;
        self
    }

    /// Sets the shared-memory region ceiling
    pub fn with_shm_regions(mut self, limit: u32) -> Self {
        self.shm_regions = limit;
        self
    }

    /// Sets the thread ceiling
    pub fn with_threads(mut self, limit: u32) -> Self {
        self.threads = limit;
        self
    }

    /// Returns the ceiling for a kind
    pub fn get(&self, kind: ResourceKind) -> u32 {
        match kind {
            ResourceKind::Endpoints => self.endpoints,
            ResourceKind::SharedMemoryRegions => self.shm_regions,
            ResourceKind::Threads => self.threads,
        }
    }
}

impl Default for QuotaCeilings {
    fn default() -> Self {
        Self::new(8, 4, 4)
    }
}

impl fmt::Display for QuotaCeilings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QuotaCeilings[endpoints={}, shm={}, threads={}]",
            self.endpoints, self.shm_regions, self.threads
        )
    }
}

/// Current consumption of one process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProcessUsage {
    pub endpoints: u32,
    pub shm_regions: u32,
    pub threads: u32,
}

impl ProcessUsage {
    /// Creates a usage record with all counters at zero
    pub fn zero() -> Self {
        Self::default()
    }

    /// Returns the counter for a kind
    pub fn get(&self, kind: ResourceKind) -> u32 {
        match kind {
            ResourceKind::Endpoints => self.endpoints,
            ResourceKind::SharedMemoryRegions => self.shm_regions,
            ResourceKind::Threads => self.threads,
        }
    }

    fn counter_mut(&mut self, kind: ResourceKind) -> &mut u32 {
        match kind {
            ResourceKind::Endpoints => &mut self.endpoints,
            ResourceKind::SharedMemoryRegions => &mut self.shm_regions,
            ResourceKind::Threads => &mut self.threads,
        }
    }

    /// Checks whether one more object of `kind` would exceed the ceilings
    pub fn would_exceed(&self, kind: ResourceKind, ceilings: &QuotaCeilings) -> bool {
        self.get(kind) >= ceilings.get(kind)
    }

    /// Returns true if every counter is zero
    pub fn is_zero(&self) -> bool {
        ResourceKind::ALL.iter().all(|kind| self.get(*kind) == 0)
    }
}

impl fmt::Display for ProcessUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ProcessUsage[endpoints={}, shm={}, threads={}]",
            self.endpoints, self.shm_regions, self.threads
        )
    }
}

/// Quota ledger for every process
///
/// Callers hold the ledger behind their own lock and pass `&mut` into each
/// table operation, so a reservation and the object it pays for are
/// committed under the same critical section.
#[derive(Debug, Clone, Default)]
pub struct QuotaLedger {
    ceilings: QuotaCeilings,
    usage: HashMap<ProcessId, ProcessUsage>,
}

impl QuotaLedger {
    /// Creates a ledger enforcing the given ceilings
    pub fn new(ceilings: QuotaCeilings) -> Self {
        Self {
            ceilings,
            usage: HashMap::new(),
        }
    }

    /// Returns the configured ceilings
    pub fn ceilings(&self) -> &QuotaCeilings {
        &self.ceilings
    }

    /// Returns the ceiling for one kind
    pub fn ceiling(&self, kind: ResourceKind) -> u32 {
        self.ceilings.get(kind)
    }

    /// Checks that one more object of `kind` fits without reserving it
    pub fn check(&self, process: ProcessId, kind: ResourceKind) -> Result<(), QuotaError> {
        if self.usage(process).would_exceed(kind, &self.ceilings) {
            return Err(QuotaError::Exceeded {
                process,
                kind,
                ceiling: self.ceilings.get(kind),
            });
        }
        Ok(())
    }

    /// Reserves one object of `kind` for `process`
    ///
    /// Returns the new count on success. On failure nothing changes.
    pub fn try_reserve(
        &mut self,
        process: ProcessId,
        kind: ResourceKind,
    ) -> Result<u32, QuotaError> {
        let ceiling = self.ceilings.get(kind);
        let usage = self.usage.entry(process).or_default();
        if usage.would_exceed(kind, &self.ceilings) {
            return Err(QuotaError::Exceeded {
                process,
                kind,
                ceiling,
            });
        }
        let counter = usage.counter_mut(kind);
        *counter += 1;
        Ok(*counter)
    }

    /// Releases one object of `kind` for `process`
    ///
    /// Returns the new count. Releasing at zero, or for an unknown process,
    /// leaves the ledger unchanged.
    pub fn release(&mut self, process: ProcessId, kind: ResourceKind) -> u32 {
        let Some(usage) = self.usage.get_mut(&process) else {
            log::warn!("quota release for unknown {} ({})", process, kind);
            return 0;
        };
        let counter = usage.counter_mut(kind);
        if *counter == 0 {
            log::warn!("quota release below zero for {} ({})", process, kind);
            return 0;
        }
        *counter -= 1;
        *counter
    }

    /// Returns the current usage of `process`
    pub fn usage(&self, process: ProcessId) -> ProcessUsage {
        self.usage.get(&process).copied().unwrap_or_default()
    }

    /// Returns the current count of one kind for `process`
    pub fn count(&self, process: ProcessId, kind: ResourceKind) -> u32 {
        self.usage(process).get(kind)
    }

    /// Drops the entry for an exited process
    ///
    /// Returns the usage the process still held, which should be zero once
    /// every table has released its objects.
    pub fn remove_process(&mut self, process: ProcessId) -> ProcessUsage {
        let leftover = self.usage.remove(&process).unwrap_or_default();
        if !leftover.is_zero() {
            log::warn!("{} exited still holding {}", process, leftover);
        }
        leftover
    }

    /// Number of processes with an entry
    pub fn tracked_processes(&self) -> usize {
        self.usage.len()
    }
}

/// Quota errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QuotaError {
    #[error("Quota exceeded for {process}: {kind} ceiling is {ceiling}")]
    Exceeded {
        process: ProcessId,
        kind: ResourceKind,
        ceiling: u32,
    },
}
