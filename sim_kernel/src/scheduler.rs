//! Host scheduler
//!
//! Kernel threads in the simulation are ordinary host threads identified by
//! a [`ThreadId`]. This module owns their bookkeeping and implements the
//! blocking primitive the IPC core relies on.
//!
//! ## Philosophy
//!
//! - **Mechanism, not policy**: no time slices and no priorities; host
//!   threads run when the host schedules them.
//! - **No lost wakeups**: every thread has a one-entry mailbox. A wakeup
//!   posted before the thread parks stays there until it does.
//! - **Exit cancels**: removing a process wakes all of its parked threads
//!   with [`Wakeup::Cancelled`].

use crate::audit::EventRing;
use core_types::{IdAllocator, ProcessId, ThreadId};
use kernel_api::{Scheduler, WaitKey, Wakeup};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Thread state in the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadState {
    /// Thread is running or ready to run
    Runnable,
    /// Thread is parked on a wait key
    Blocked(WaitKey),
}

/// Scheduling event for audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleEvent {
    ThreadSpawned {
        thread: ThreadId,
        process: ProcessId,
    },
    ThreadBlocked {
        thread: ThreadId,
        key: WaitKey,
    },
    WakeupPosted {
        thread: ThreadId,
        key: WaitKey,
        cancelled: bool,
    },
    ThreadResumed {
        thread: ThreadId,
    },
    ThreadExited {
        thread: ThreadId,
    },
    ProcessCancelled {
        process: ProcessId,
        threads: usize,
    },
}

/// Audit log for scheduling decisions
#[derive(Debug, Clone, Default)]
pub struct ScheduleAuditLog {
    events: EventRing<ScheduleEvent>,
}

impl ScheduleAuditLog {
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

    pub fn record(&mut self, event: ScheduleEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[ScheduleEvent] {
        self.events.as_slice()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn has_event<F>(&self, predicate: F) -> bool
    where
        F: Fn(&ScheduleEvent) -> bool,
    {
        self.events.as_slice().iter().any(predicate)
    }

    pub fn count_events<F>(&self, predicate: F) -> usize
    where
        F: Fn(&ScheduleEvent) -> bool,
    {
        self.events.as_slice().iter().filter(|e| predicate(e)).count()
    }
}

#[derive(Debug)]
struct ThreadEntry {
    process: ProcessId,
    state: ThreadState,
    mailbox: Option<Wakeup>,
}

#[derive(Debug, Default)]
struct SchedulerState {
    threads: HashMap<ThreadId, ThreadEntry>,
    ids: IdAllocator,
    audit: ScheduleAuditLog,
}

/// Scheduler backed by host threads
#[derive(Debug, Default)]
pub struct HostScheduler {
    state: Mutex<SchedulerState>,
    wakeups: Condvar,
}

impl HostScheduler {
    /// Creates a scheduler with no threads
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a scheduler whose audit log keeps at most `capacity` events
    pub fn with_audit_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                audit: ScheduleAuditLog::with_capacity(capacity),
                ..SchedulerState::default()
            }),
            wakeups: Condvar::new(),
        }
    }

    /// Registers a new thread for `process`
    ///
    /// Returns `None` once thread IDs are exhausted.
    pub fn spawn_thread(&self, process: ProcessId) -> Option<ThreadId> {
        let mut state = self.state.lock();
        let thread = ThreadId::new(state.ids.allocate()?);
        state.threads.insert(
            thread,
            ThreadEntry {
                process,
                state: ThreadState::Runnable,
                mailbox: None,
            },
        );
        state
            .audit
            .record(ScheduleEvent::ThreadSpawned { thread, process });
        Some(thread)
    }

    /// Removes a thread that is exiting on its own
    ///
    /// Returns the process the thread belonged to.
    pub fn exit_thread(&self, thread: ThreadId) -> Option<ProcessId> {
        let mut state = self.state.lock();
        let entry = state.threads.remove(&thread)?;
        state.audit.record(ScheduleEvent::ThreadExited { thread });
        self.wakeups.notify_all();
        Some(entry.process)
    }

    /// Returns the owning process of a live thread
    pub fn process_of(&self, thread: ThreadId) -> Option<ProcessId> {
        self.state.lock().threads.get(&thread).map(|e| e.process)
    }

    /// Returns the live threads of a process in ID order
    pub fn live_threads(&self, process: ProcessId) -> Vec<ThreadId> {
        let state = self.state.lock();
        let mut threads: Vec<ThreadId> = state
            .threads
            .iter()
            .filter(|(_, entry)| entry.process == process)
            .map(|(thread, _)| *thread)
            .collect();
        threads.sort();
        threads
    }

    /// Returns the state of a live thread
    pub fn thread_state(&self, thread: ThreadId) -> Option<ThreadState> {
        self.state.lock().threads.get(&thread).map(|e| e.state)
    }

    /// Returns true if `thread` is parked on `key`
    pub fn is_blocked_on(&self, thread: ThreadId, key: WaitKey) -> bool {
        self.thread_state(thread) == Some(ThreadState::Blocked(key))
    }

    /// Number of live threads across all processes
    pub fn thread_count(&self) -> usize {
        self.state.lock().threads.len()
    }

    /// Returns a snapshot of the audit log (test-only)
    pub fn audit_log(&self) -> ScheduleAuditLog {
        self.state.lock().audit.clone()
    }
}

impl Scheduler for HostScheduler {
    fn block_current_thread(&self, current: ThreadId, key: WaitKey) -> Wakeup {
        let mut state = self.state.lock();
        let mut parked = false;
        loop {
            let SchedulerState { threads, audit, .. } = &mut *state;
            let Some(entry) = threads.get_mut(&current) else {
                // Removed by process exit while parked
                return Wakeup::Cancelled;
            };
            if let Some(wakeup) = entry.mailbox.take() {
                entry.state = ThreadState::Runnable;
                audit.record(ScheduleEvent::ThreadResumed { thread: current });
                return wakeup;
            }
            if !parked {
                entry.state = ThreadState::Blocked(key);
                audit.record(ScheduleEvent::ThreadBlocked {
                    thread: current,
                    key,
                });
                parked = true;
            }
            self.wakeups.wait(&mut state);
        }
    }

    fn wake_one(&self, key: WaitKey, thread: ThreadId, wakeup: Wakeup) -> Result<(), Wakeup> {
        let mut state = self.state.lock();
        let SchedulerState { threads, audit, .. } = &mut *state;
        let Some(entry) = threads.get_mut(&thread) else {
            return Err(wakeup);
        };
        if entry.mailbox.is_some() {
            return Err(wakeup);
        }
        let cancelled = wakeup == Wakeup::Cancelled;
        entry.mailbox = Some(wakeup);
        audit.record(ScheduleEvent::WakeupPosted {
            thread,
            key,
            cancelled,
        });
        self.wakeups.notify_all();
        Ok(())
    }

    fn on_process_exit(&self, process: ProcessId) -> Vec<ThreadId> {
        let mut state = self.state.lock();
        let mut removed: Vec<ThreadId> = state
            .threads
            .iter()
            .filter(|(_, entry)| entry.process == process)
            .map(|(thread, _)| *thread)
            .collect();
        removed.sort();
        for thread in &removed {
            state.threads.remove(thread);
        }
        state.audit.record(ScheduleEvent::ProcessCancelled {
            process,
            threads: removed.len(),
        });
        self.wakeups.notify_all();
        removed
    }
}
