//! Syscall gate for the user/kernel boundary.
//!
//! This module is the single entry point from a trapped user thread into the
//! kernel. It decodes the raw registers, dispatches the call and collapses
//! the result to the user-visible return value, recording every step for
//! tests.

use crate::audit::EventRing;
use kernel_api::{
    dispatch, encode_result, Caller, ErrorClass, KernelApi, KernelError, Syscall, SyscallArgs,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Syscall audit event (for testing and verification).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyscallEvent {
    /// Syscall decoded and about to run
    Invoked { caller: Caller, syscall: String },
    /// Syscall completed successfully
    Completed {
        caller: Caller,
        syscall: String,
        value: u64,
    },
    /// Syscall failed; user space saw -1
    Rejected {
        caller: Caller,
        syscall: String,
        class: ErrorClass,
        reason: String,
    },
}

/// Audit log for syscall operations.
#[derive(Debug, Clone, Default)]
pub struct SyscallAuditLog {
    events: EventRing<SyscallEvent>,
}

impl SyscallAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a log that retains at most `capacity` events
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: EventRing::with_capacity(capacity),
        }
    }

    /// Events discarded to stay within capacity
    pub fn dropped(&self) -> u64 {
        self.events.dropped()
    }

    pub fn record(&mut self, event: SyscallEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[SyscallEvent] {
        self.events.as_slice()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn has_event<F>(&self, predicate: F) -> bool
    where
        F: Fn(&SyscallEvent) -> bool,
    {
        self.events.as_slice().iter().any(predicate)
    }

    pub fn count_events<F>(&self, predicate: F) -> usize
    where
        F: Fn(&SyscallEvent) -> bool,
    {
        self.events.as_slice().iter().filter(|e| predicate(e)).count()
    }

    /// Counts rejections of one class
    pub fn rejections(&self, class: ErrorClass) -> usize {
        self.count_events(|e| matches!(e, SyscallEvent::Rejected { class: c, .. } if *c == class))
    }
}

/// Syscall gate that enforces the user/kernel boundary.
///
/// The audit lock is never held across dispatch, so a blocked `ipc_recv`
/// does not stall other callers.
#[derive(Debug, Default)]
pub struct SyscallGate {
    audit_log: Mutex<SyscallAuditLog>,
}

impl SyscallGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a gate whose audit log keeps at most `capacity` events
    pub fn with_audit_capacity(capacity: usize) -> Self {
        Self {
            audit_log: Mutex::new(SyscallAuditLog::with_capacity(capacity)),
        }
    }

    /// Returns a snapshot of the audit log (test-only)
    pub fn audit_log(&self) -> SyscallAuditLog {
        self.audit_log.lock().clone()
    }

    /// Clears the audit log (test-only)
    pub fn clear_audit_log(&self) {
        self.audit_log.lock().clear();
    }

    /// Executes a syscall on behalf of `caller`.
    ///
    /// Returns the value placed in the user's return register.
    pub fn execute<K: KernelApi + ?Sized>(
        &self,
        kernel: &K,
        caller: Caller,
        number: u64,
        args: &SyscallArgs,
    ) -> i64 {
        let call = match Syscall::decode(number, args) {
            Ok(call) => call,
            Err(err) => {
                let result = Err(err);
                self.finish(caller, format!("#{}", number), &result);
                return encode_result(&result);
            }
        };

        self.audit_log.lock().record(SyscallEvent::Invoked {
            caller,
            syscall: call.name().to_string(),
        });
        let result = dispatch(kernel, caller, call);
        self.finish(caller, call.name().to_string(), &result);
        encode_result(&result)
    }

    fn finish(&self, caller: Caller, syscall: String, result: &Result<u64, KernelError>) {
        let event = match result {
            Ok(value) => SyscallEvent::Completed {
                caller,
                syscall,
                value: *value,
            },
            Err(err) => {
                log::debug!("{}: {} failed: {}", caller, syscall, err);
                SyscallEvent::Rejected {
                    caller,
                    syscall,
                    class: err.class(),
                    reason: err.to_string(),
                }
            }
        };
        self.audit_log.lock().record(event);
    }
}
