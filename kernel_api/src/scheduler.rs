//! Scheduler collaborator
//!
//! The IPC core never parks threads itself. It hands the scheduler a wait
//! key and later a [`Wakeup`] carrying the delivered message, so a woken
//! receiver never has to take the endpoint lock again to find its payload.

use core_types::{EndpointId, ProcessId, ThreadId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a blocked thread is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WaitKey {
    Endpoint(EndpointId),
}

impl fmt::Display for WaitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitKey::Endpoint(id) => write!(f, "wait:{}", id),
        }
    }
}

/// Result handed to a parked thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Wakeup {
    /// A sender deposited a message for this thread
    Delivered { sender: ProcessId, payload: Vec<u8> },
    /// The wait was abandoned (endpoint closed or process exiting)
    Cancelled,
}

/// Scheduler interface used by the IPC core
pub trait Scheduler: Send + Sync {
    /// Parks `current` until a wakeup for `key` is posted
    ///
    /// A wakeup posted before the thread parks is kept and returned
    /// immediately, so there is no window in which a wakeup can be lost.
    fn block_current_thread(&self, current: ThreadId, key: WaitKey) -> Wakeup;

    /// Posts `wakeup` to `thread`, which is waiting on `key`
    ///
    /// Gives the wakeup back if the thread can no longer accept it (it has
    /// exited or already holds an undelivered wakeup), so the caller can
    /// offer it to the next waiter.
    fn wake_one(&self, key: WaitKey, thread: ThreadId, wakeup: Wakeup) -> Result<(), Wakeup>;

    /// Cancels every thread of an exiting process
    ///
    /// Blocked threads return [`Wakeup::Cancelled`]. Returns the threads that
    /// belonged to the process.
    fn on_process_exit(&self, process: ProcessId) -> Vec<ThreadId>;
}
