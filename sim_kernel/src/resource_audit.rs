//! Resource audit log
//!
//! Tracks quota reservations, releases and denials for testing.
//!
//! Audit logs are deterministic and queryable in tests but do not affect
//! correctness or enforcement logic.

use crate::audit::EventRing;
use core_types::ProcessId;
use resources::{ProcessUsage, ResourceKind};
use serde::{Deserialize, Serialize};

/// Quota accounting event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceEvent {
    /// A reservation succeeded; `count` is the new usage
    Reserved {
        process: ProcessId,
        kind: ResourceKind,
        count: u32,
    },

    /// A reservation was returned; `count` is the new usage
    Released {
        process: ProcessId,
        kind: ResourceKind,
        count: u32,
    },

    /// A reservation hit the ceiling
    Denied {
        process: ProcessId,
        kind: ResourceKind,
        ceiling: u32,
    },

    /// An exiting process's ledger entry was dropped
    ProcessReleased {
        process: ProcessId,
        leftover: ProcessUsage,
    },
}

/// Resource audit log
///
/// Test-visible log of all quota events.
#[derive(Debug, Clone, Default)]
pub struct ResourceAuditLog {
    entries: EventRing<ResourceEvent>,
}

impl ResourceAuditLog {
    /// Creates a new empty audit log
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a log that retains at most `capacity` events
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: EventRing::with_capacity(capacity),
        }
    }

    /// Events discarded to stay within capacity
    pub fn dropped(&self) -> u64 {
        self.entries.dropped()
    }

    /// Records a resource event
    pub fn record_event(&mut self, event: ResourceEvent) {
        self.entries.push(event);
    }

    /// Returns the number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks if the log is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns all entries
    pub fn get_entries(&self) -> &[ResourceEvent] {
        self.entries.as_slice()
    }

    /// Checks if any entry matches a predicate
    pub fn has_event<F>(&self, predicate: F) -> bool
    where
        F: Fn(&ResourceEvent) -> bool,
    {
        self.entries.as_slice().iter().any(predicate)
    }

    /// Counts events matching a predicate
    pub fn count_events<F>(&self, predicate: F) -> usize
    where
        F: Fn(&ResourceEvent) -> bool,
    {
        self.entries.as_slice().iter().filter(|e| predicate(e)).count()
    }

    /// Returns the denials recorded for one process
    pub fn denials_for(&self, process: ProcessId) -> Vec<ResourceKind> {
        self.entries
            .as_slice()
            .iter()
            .filter_map(|event| match event {
                ResourceEvent::Denied {
                    process: p, kind, ..
                } if *p == process => Some(*kind),
                _ => None,
            })
            .collect()
    }

    /// Clears all entries
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
